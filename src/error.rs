//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the gatekeeper crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Regex(#[from] regex::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	TemplateParse(#[from] handlebars::TemplateError),
	#[error(transparent)]
	TemplateRender(#[from] handlebars::RenderError),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: String, body: Option<String> },
	#[error("issuer {issuer} is not valid")]
	IssuerNotAllowed { issuer: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("no secret configured")]
	NoSecret,
	#[error("key {kid} is not known")]
	UnknownKey { kid: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
