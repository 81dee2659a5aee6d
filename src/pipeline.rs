//! Per-request validation: credential extraction, verification, claim checks and the response
//! chosen for a rejected request.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use base64::prelude::*;
use http::{
	HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri,
	header::{CONTENT_TYPE, COOKIE, LOCATION},
	uri::PathAndQuery,
};
use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	cache::{manager::KeyManager, store::KeyCache},
	config::Config,
	http::client::{HttpClients, KeyFetcher},
	key::{self, KeyMaterial},
	metrics::{AuthorizerMetrics, AuthorizerMetricsSnapshot, Outcome},
	refresh::RefreshSchedule,
	requirement::Requirements,
	security::IssuerAllowlist,
	template::{Environment, Template, TemplateVariables},
};

const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Claims of a verified token, attached to the extensions of an authorized request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerifiedClaims(pub Map<String, Value>);

/// Response owed to the client for a rejected request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
	/// `302 Found` to an expanded redirect template.
	Redirect {
		/// Redirect target.
		location: HeaderValue,
	},
	/// gRPC status headers for a `401` or `403` decision.
	Grpc {
		/// `UNAUTHORIZED` or `FORBIDDEN`.
		status: StatusCode,
	},
	/// Plain-text error response.
	Status {
		/// `UNAUTHORIZED` or `FORBIDDEN`.
		status: StatusCode,
		/// Reason sent as the body.
		message: String,
	},
	/// The redirect location could not be produced.
	Internal {
		/// Reason sent as the body.
		message: String,
	},
}
impl Rejection {
	/// HTTP status of the response.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::Redirect { .. } => StatusCode::FOUND,
			Self::Grpc { .. } => StatusCode::OK,
			Self::Status { status, .. } => *status,
			Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Render the rejection as an HTTP response.
	pub fn into_response<R>(self) -> Response<R>
	where
		R: From<String>,
	{
		let status = self.status();
		let mut headers = HeaderMap::new();
		let body = match self {
			Self::Redirect { location } => {
				headers.insert(LOCATION, location);

				String::new()
			},
			Self::Grpc { status } => {
				let (code, message) = match status {
					StatusCode::FORBIDDEN => ("7", "PERMISSION_DENIED"),
					_ => ("16", "UNAUTHENTICATED"),
				};

				headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
				headers.insert("grpc-status", HeaderValue::from_static(code));
				headers.insert("grpc-message", HeaderValue::from_static(message));

				String::new()
			},
			Self::Status { message, .. } | Self::Internal { message } => {
				headers.insert(
					CONTENT_TYPE,
					HeaderValue::from_static("text/plain; charset=utf-8"),
				);
				headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));

				format!("{message}\n")
			},
		};
		let mut response = Response::new(R::from(body));

		*response.status_mut() = status;
		*response.headers_mut() = headers;

		response
	}
}

#[derive(Debug)]
struct Denial {
	status: StatusCode,
	reason: String,
}
impl Denial {
	fn unauthorized(reason: impl Into<String>) -> Self {
		Self { status: StatusCode::UNAUTHORIZED, reason: reason.into() }
	}

	fn outcome(&self) -> Outcome {
		if self.status == StatusCode::FORBIDDEN { Outcome::Forbidden } else { Outcome::Unauthorized }
	}
}

/// Bearer-token authorizer built from a [`Config`].
pub struct Authorizer {
	algorithms: Vec<Algorithm>,
	keys: KeyManager,
	requirements: Requirements,
	optional: bool,
	redirect_unauthorized: Option<Template>,
	redirect_forbidden: Option<Template>,
	cookie_name: Option<String>,
	header_name: Option<HeaderName>,
	parameter_name: Option<String>,
	header_map: Vec<(HeaderName, String)>,
	remove_missing_headers: bool,
	forward_token: bool,
	freshness: u64,
	environment: Environment,
	metrics: Arc<AuthorizerMetrics>,
	refresher: Option<JoinHandle<()>>,
}
impl Authorizer {
	/// Build an authorizer over the process environment.
	///
	/// When called inside a Tokio runtime the configured key prefetch and refresh schedule starts
	/// immediately.
	pub fn new(config: Config) -> Result<Self> {
		Self::with_environment(config, Environment::capture())
	}

	/// Build an authorizer whose templates see `environment` instead of the process environment.
	pub fn with_environment(config: Config, environment: Environment) -> Result<Self> {
		config.validate()?;

		let metrics = AuthorizerMetrics::new();
		let statics = key::static_keys(&config.secrets)?;
		let has_static_keys = !statics.is_empty();
		let fallback = KeyMaterial::from_config(&config.secret)?;
		let clients = HttpClients::new(&config.root_cas, &config.insecure_skip_verify)?;
		let keys = KeyManager::new(
			KeyFetcher::new(clients),
			KeyCache::with_static(statics),
			IssuerAllowlist::new(&config.issuers)?,
			fallback,
			has_static_keys,
			metrics.clone(),
		);
		let header_map = config
			.header_map
			.iter()
			.map(|(header, claim)| Ok((header_name("headerMap", header)?, claim.clone())))
			.collect::<Result<_>>()?;
		let mut authorizer = Self {
			algorithms: config.algorithms()?,
			keys,
			requirements: Requirements::build(&config.require)?,
			optional: config.optional,
			redirect_unauthorized: optional_template(&config.redirect_unauthorized)?,
			redirect_forbidden: optional_template(&config.redirect_forbidden)?,
			cookie_name: non_empty(config.cookie_name.clone()),
			header_name: optional_header_name("headerName", &config.header_name)?,
			parameter_name: non_empty(config.parameter_name.clone()),
			header_map,
			remove_missing_headers: config.remove_missing_headers,
			forward_token: config.forward_token,
			freshness: config.freshness,
			environment,
			metrics,
			refresher: None,
		};
		let schedule = RefreshSchedule::from_config(&config)?;

		authorizer.refresher = match tokio::runtime::Handle::try_current() {
			Ok(_) => schedule.spawn(authorizer.keys.clone()),
			Err(_) if schedule == RefreshSchedule::Never => None,
			Err(_) => {
				tracing::warn!(?schedule, "no async runtime; key refresh schedule not started");

				None
			},
		};

		Ok(authorizer)
	}

	/// Key resolution shared with the background refresher.
	pub fn keys(&self) -> &KeyManager {
		&self.keys
	}

	/// Counters accumulated by this authorizer.
	pub fn stats(&self) -> AuthorizerMetricsSnapshot {
		self.metrics.snapshot()
	}

	/// Whether the background refresh task is running. It is stopped when the authorizer drops.
	pub fn is_refreshing(&self) -> bool {
		self.refresher.as_ref().is_some_and(|handle| !handle.is_finished())
	}

	/// Authorize `request`, preparing it for forwarding on success.
	///
	/// On success the credential is stripped unless forwarding is enabled, mapped claims are added
	/// as headers and [`VerifiedClaims`] are attached to the request extensions.
	#[tracing::instrument(
		skip_all,
		fields(method = %request.method(), path = request.uri().path())
	)]
	pub async fn authorize<B>(
		&self,
		request: &mut Request<B>,
	) -> std::result::Result<(), Rejection> {
		let variables = TemplateVariables::from_request(&self.environment, request);

		match self.validate(request, &variables).await {
			Ok(()) => {
				self.metrics.record_outcome(Outcome::Allowed);

				Ok(())
			},
			Err(denial) => {
				tracing::debug!(status = %denial.status, reason = %denial.reason, "request denied");

				self.metrics.record_outcome(denial.outcome());

				Err(self.reject(denial, request.headers(), &variables))
			},
		}
	}

	async fn validate<B>(
		&self,
		request: &mut Request<B>,
		variables: &TemplateVariables,
	) -> std::result::Result<(), Denial> {
		let Some(token) = self.extract_token(request) else {
			return if self.optional { Ok(()) } else { Err(Denial::unauthorized("no token provided")) };
		};
		let claims = self.verify(&token).await.map_err(|err| Denial::unauthorized(err.to_string()))?;

		if let Err(err) = self.requirements.validate(&claims, variables) {
			let status =
				if self.is_stale(&claims) { StatusCode::UNAUTHORIZED } else { StatusCode::FORBIDDEN };

			return Err(Denial { status, reason: err.to_string() });
		}

		self.project_claims(&claims, request.headers_mut());
		request.extensions_mut().insert(VerifiedClaims(claims));

		Ok(())
	}

	async fn verify(&self, token: &str) -> Result<Map<String, Value>> {
		let header = jsonwebtoken::decode_header(token)?;

		if !self.algorithms.contains(&header.alg) {
			return Err(Error::Validation {
				field: "alg",
				reason: format!("signing method {:?} is invalid", header.alg),
			});
		}

		let issuer = unverified_issuer(token);
		let key = self.keys.resolve(header.kid.as_deref(), issuer.as_deref()).await?;
		let mut validation = Validation::new(header.alg);

		validation.set_required_spec_claims::<&str>(&[]);
		validation.validate_aud = false;
		validation.validate_nbf = true;
		validation.leeway = 0;

		let data =
			jsonwebtoken::decode::<Map<String, Value>>(token, key.decoding_key(), &validation)?;

		Ok(data.claims)
	}

	// A failed claim check on a token older than the freshness window asks for re-authentication.
	fn is_stale(&self, claims: &Map<String, Value>) -> bool {
		if self.freshness == 0 {
			return false;
		}

		let freshness = i64::try_from(self.freshness).unwrap_or(i64::MAX);

		claims
			.get("iat")
			.and_then(Value::as_i64)
			.is_some_and(|iat| Utc::now().timestamp().saturating_sub(iat) > freshness)
	}

	fn project_claims(&self, claims: &Map<String, Value>, headers: &mut HeaderMap) {
		for (header, claim) in &self.header_map {
			match claims.get(claim) {
				Some(value) => {
					let text = match value {
						Value::String(text) => text.clone(),
						value => value.to_string(),
					};

					match HeaderValue::from_str(&text) {
						Ok(value) => {
							headers.append(header.clone(), value);
						},
						Err(err) => {
							tracing::debug!(
								header = %header,
								claim = %claim,
								error = %err,
								"claim is not a valid header value"
							);
						},
					}
				},
				None if self.remove_missing_headers => {
					headers.remove(header);
				},
				None => {},
			}
		}
	}

	fn reject(
		&self,
		denial: Denial,
		headers: &HeaderMap,
		variables: &TemplateVariables,
	) -> Rejection {
		if let Some(unauthorized) = &self.redirect_unauthorized {
			let template = match &self.redirect_forbidden {
				Some(forbidden) if denial.status == StatusCode::FORBIDDEN => forbidden,
				_ => unauthorized,
			};

			return match redirect_location(template, variables) {
				Ok(location) => Rejection::Redirect { location },
				Err(err) => {
					tracing::error!(error = %err, "failed to get redirect URL");

					Rejection::Internal { message: err.to_string() }
				},
			};
		}

		let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok());

		if content_type.is_some_and(|content_type| has_token(content_type, GRPC_CONTENT_TYPE)) {
			return Rejection::Grpc { status: denial.status };
		}

		Rejection::Status { status: denial.status, message: denial.reason }
	}

	fn extract_token<B>(&self, request: &mut Request<B>) -> Option<String> {
		let from_cookie = self.cookie_name.as_deref().and_then(|name| self.take_cookie(request, name));

		if from_cookie.is_some() {
			return from_cookie;
		}

		let from_header =
			self.header_name.as_ref().and_then(|name| self.take_header(request.headers_mut(), name));

		if from_header.is_some() {
			return from_header;
		}

		self.parameter_name.as_deref().and_then(|name| self.take_parameter(request, name))
	}

	fn take_cookie<B>(&self, request: &mut Request<B>, name: &str) -> Option<String> {
		let pairs: Vec<(String, String)> = request
			.headers()
			.get_all(COOKIE)
			.iter()
			.filter_map(|value| value.to_str().ok())
			.flat_map(|value| value.split(';'))
			.filter_map(|pair| {
				let (key, value) = pair.trim().split_once('=')?;

				Some((key.trim().to_owned(), value.trim().to_owned()))
			})
			.collect();
		let token = pairs.iter().find(|(key, _)| key == name).map(|(_, value)| {
			let unquoted = value.strip_prefix('"').and_then(|value| value.strip_suffix('"'));

			unquoted.unwrap_or(value).to_owned()
		})?;

		if !self.forward_token {
			let remaining = pairs
				.iter()
				.filter(|(key, _)| key != name)
				.map(|(key, value)| format!("{key}={value}"))
				.collect::<Vec<_>>()
				.join("; ");
			let headers = request.headers_mut();

			headers.remove(COOKIE);

			if !remaining.is_empty()
				&& let Ok(value) = HeaderValue::from_str(&remaining)
			{
				headers.insert(COOKIE, value);
			}
		}

		(!token.is_empty()).then_some(token)
	}

	fn take_header(&self, headers: &mut HeaderMap, name: &HeaderName) -> Option<String> {
		let value = headers.get(name)?.to_str().ok()?.to_owned();

		if !self.forward_token {
			headers.remove(name);
		}

		let token = match value.get(..7) {
			Some(prefix) if prefix.eq_ignore_ascii_case("Bearer ") => value[7..].to_owned(),
			_ => value,
		};

		(!token.is_empty()).then_some(token)
	}

	fn take_parameter<B>(&self, request: &mut Request<B>, name: &str) -> Option<String> {
		let query = request.uri().query()?;
		let token = url::form_urlencoded::parse(query.as_bytes())
			.find(|(key, _)| key == name)
			.map(|(_, value)| value.into_owned())?;

		if !self.forward_token {
			let remaining = url::form_urlencoded::Serializer::new(String::new())
				.extend_pairs(
					url::form_urlencoded::parse(query.as_bytes()).filter(|(key, _)| key != name),
				)
				.finish();

			match without_query(request.uri(), &remaining) {
				Ok(uri) => *request.uri_mut() = uri,
				Err(err) => tracing::debug!(error = %err, "failed to strip token parameter"),
			}
		}

		(!token.is_empty()).then_some(token)
	}
}
impl Drop for Authorizer {
	fn drop(&mut self) {
		if let Some(refresher) = self.refresher.take() {
			refresher.abort();
		}
	}
}
impl Debug for Authorizer {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Authorizer")
			.field("algorithms", &self.algorithms)
			.field("keys", &self.keys)
			.field("requirements", &self.requirements)
			.field("optional", &self.optional)
			.field("cookie_name", &self.cookie_name)
			.field("header_name", &self.header_name)
			.field("parameter_name", &self.parameter_name)
			.field("forward_token", &self.forward_token)
			.field("freshness", &self.freshness)
			.finish_non_exhaustive()
	}
}

/// Whether a comma, space, tab or `+` separated header value contains `token`, ignoring ASCII case.
pub fn has_token(header: &str, token: &str) -> bool {
	if token.is_empty() || token.len() > header.len() {
		return false;
	}

	let bytes = header.as_bytes();

	(0..=bytes.len() - token.len()).any(|start| {
		let end = start + token.len();

		(start == 0 || is_token_boundary(bytes[start - 1]))
			&& (end == bytes.len() || is_token_boundary(bytes[end]))
			&& bytes[start..end].eq_ignore_ascii_case(token.as_bytes())
	})
}

fn is_token_boundary(byte: u8) -> bool {
	matches!(byte, b' ' | b',' | b'\t' | b'+')
}

// Routing only: the issuer picks which keys to fetch, and the signature is verified afterwards.
fn unverified_issuer(token: &str) -> Option<String> {
	let payload = token.split('.').nth(1)?;
	let bytes = BASE64_URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
	let claims: Map<String, Value> = serde_json::from_slice(&bytes).ok()?;

	claims.get("iss").and_then(Value::as_str).map(str::to_owned)
}

fn redirect_location(template: &Template, variables: &TemplateVariables) -> Result<HeaderValue> {
	let location = template.render(variables)?;

	Ok(HeaderValue::from_str(&location).map_err(http::Error::from)?)
}

fn without_query(uri: &Uri, query: &str) -> Result<Uri> {
	let path = if query.is_empty() {
		uri.path().to_owned()
	} else {
		format!("{}?{query}", uri.path())
	};
	let mut parts = uri.clone().into_parts();

	parts.path_and_query = Some(PathAndQuery::try_from(path).map_err(http::Error::from)?);

	Ok(Uri::from_parts(parts).map_err(http::Error::from)?)
}

fn optional_template(text: &str) -> Result<Option<Template>> {
	if text.is_empty() { Ok(None) } else { Template::new(text).map(Some) }
}

fn non_empty(value: String) -> Option<String> {
	(!value.is_empty()).then_some(value)
}

fn optional_header_name(field: &'static str, name: &str) -> Result<Option<HeaderName>> {
	if name.is_empty() { Ok(None) } else { header_name(field, name).map(Some) }
}

fn header_name(field: &'static str, name: &str) -> Result<HeaderName> {
	HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::Validation {
		field,
		reason: format!("Invalid header name {name:?}: {err}."),
	})
}
