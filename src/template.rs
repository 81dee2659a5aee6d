//! Per-request template rendering for claim requirements and redirect locations.

// std
use std::{
	collections::BTreeMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use handlebars::Handlebars;
use http::{Request, header::HOST};
// self
use crate::_prelude::*;

const TEMPLATE_NAME: &str = "template";

mod helpers {
	#![allow(missing_docs)]

	use handlebars::handlebars_helper;

	handlebars_helper!(url_query_escape: |value: str| {
		url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>()
	});
	handlebars_helper!(html_escape: |value: str| handlebars::html_escape(value));
}
use helpers::{html_escape, url_query_escape};

/// Read-only snapshot of the process environment, captured once.
#[derive(Clone, Debug, Default)]
pub struct Environment(Arc<BTreeMap<String, String>>);
impl Environment {
	/// Capture the current process environment. Variables that are not valid UTF-8 are skipped.
	pub fn capture() -> Self {
		Self::from_iter(std::env::vars_os().filter_map(|(key, value)| {
			Some((key.into_string().ok()?, value.into_string().ok()?))
		}))
	}

	/// Value of one variable.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str)
	}
}
impl<K, V> FromIterator<(K, V)> for Environment
where
	K: Into<String>,
	V: Into<String>,
{
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
	{
		Self(Arc::new(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect()))
	}
}

/// Variables available to templates while handling one request.
///
/// Seeded from the [`Environment`] and overwritten with `Method`, `Host`, `Path`, `Scheme` and
/// `URL` of the request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateVariables(BTreeMap<String, String>);
impl TemplateVariables {
	/// Build the variables for `request`.
	pub fn from_request<B>(environment: &Environment, request: &Request<B>) -> Self {
		let mut variables = environment.0.as_ref().clone();
		let uri = request.uri();
		let host = request
			.headers()
			.get(HOST)
			.and_then(|value| value.to_str().ok())
			.map(str::to_owned)
			.or_else(|| uri.authority().map(|authority| authority.to_string()))
			.unwrap_or_default();
		let path = uri
			.path_and_query()
			.map(|path| path.as_str())
			.filter(|path| path.starts_with('/'))
			.unwrap_or("/")
			.to_owned();
		let (scheme, url) = match (uri.scheme_str(), uri.host()) {
			(Some(scheme), Some(_)) => (scheme.to_owned(), uri.to_string()),
			_ => {
				let scheme = request
					.headers()
					.get("x-forwarded-proto")
					.and_then(|value| value.to_str().ok())
					.filter(|value| !value.is_empty())
					.unwrap_or("https")
					.to_owned();
				let url = format!("{scheme}://{host}{path}");

				(scheme, url)
			},
		};

		variables.insert("Method".into(), request.method().as_str().to_owned());
		variables.insert("Host".into(), host);
		variables.insert("Path".into(), path);
		variables.insert("Scheme".into(), scheme);
		variables.insert("URL".into(), url);

		Self(variables)
	}

	/// Value of one variable.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str)
	}

	/// Set one variable.
	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.0.insert(name.into(), value.into());
	}
}
impl<K, V> FromIterator<(K, V)> for TemplateVariables
where
	K: Into<String>,
	V: Into<String>,
{
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
	{
		Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
	}
}

/// Compiled template text.
///
/// Rendering is strict: referencing an undefined variable is an error. Output is not HTML escaped;
/// `URLQueryEscape` and `HTMLEscape` helpers are available for explicit escaping.
pub struct Template {
	registry: Handlebars<'static>,
	source: String,
}
impl Template {
	/// Compile `text`.
	pub fn new(text: &str) -> Result<Self> {
		let mut registry = Handlebars::new();

		registry.set_strict_mode(true);
		registry.register_escape_fn(handlebars::no_escape);
		registry.register_helper("URLQueryEscape", Box::new(url_query_escape));
		registry.register_helper("HTMLEscape", Box::new(html_escape));
		registry.register_template_string(TEMPLATE_NAME, text)?;

		Ok(Self { registry, source: text.to_owned() })
	}

	/// Whether `text` contains interpolation markers.
	pub fn is_template(text: &str) -> bool {
		text.contains("{{") && text.contains("}}")
	}

	/// Source text of the template.
	pub fn source(&self) -> &str {
		&self.source
	}

	/// Expand the template against `variables`.
	pub fn render(&self, variables: &TemplateVariables) -> Result<String> {
		Ok(self.registry.render(TEMPLATE_NAME, &variables.0)?)
	}
}
impl Debug for Template {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Template").field("source", &self.source).finish()
	}
}
