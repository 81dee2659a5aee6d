//! Middleware configuration and validation.
//!
//! Field names follow the camelCase convention of the configuration files this middleware is
//! usually embedded in, so a `Config` can be decoded from JSON, YAML or TOML with any `serde`
//! format crate.

// std
use std::{collections::BTreeMap, str::FromStr};
// crates.io
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Default maximum token age, in seconds, before a claim failure asks for re-authentication.
pub const DEFAULT_FRESHNESS: u64 = 3600;
/// Default cookie and header name carrying the credential.
pub const DEFAULT_CREDENTIAL_NAME: &str = "Authorization";
/// Signing algorithms accepted when `validMethods` is not configured.
pub const DEFAULT_VALID_METHODS: [&str; 11] = [
	"RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "HS256", "HS384", "HS512",
];

/// Typed middleware options.
///
/// Empty strings are treated as "not configured" for every optional text field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	/// Signing algorithms a token header may declare.
	#[serde(default = "default_valid_methods")]
	pub valid_methods: Vec<String>,
	/// Issuer patterns (`*` wildcard) trusted for key discovery.
	#[serde(default)]
	pub issuers: Vec<String>,
	/// Skip the initial background prefetch of issuer keys.
	#[serde(default)]
	pub skip_prefetch: bool,
	/// Delay before the initial prefetch, as a duration string such as `"1s"`.
	#[serde(default)]
	pub delay_prefetch: String,
	/// Interval between periodic key refreshes; empty disables the refresh loop.
	#[serde(default)]
	pub refresh_keys_interval: String,
	/// Hosts whose TLS certificates are not verified when fetching keys.
	#[serde(default)]
	pub insecure_skip_verify: Vec<String>,
	/// Additional trusted root certificates, inline PEM or file paths.
	#[serde(default, rename = "rootCAs", deserialize_with = "one_or_many")]
	pub root_cas: Vec<String>,
	/// Fixed fallback key: PEM public key or HMAC secret.
	#[serde(default)]
	pub secret: String,
	/// Statically configured keys by key identifier.
	#[serde(default)]
	pub secrets: BTreeMap<String, String>,
	/// Declarative claim requirements.
	#[serde(default)]
	pub require: Map<String, Value>,
	/// Allow requests that carry no credential at all.
	#[serde(default)]
	pub optional: bool,
	/// Redirect template used for unauthorized requests.
	#[serde(default)]
	pub redirect_unauthorized: String,
	/// Redirect template used for forbidden requests.
	#[serde(default)]
	pub redirect_forbidden: String,
	/// Cookie carrying the credential; empty disables cookie extraction.
	#[serde(default = "default_credential_name")]
	pub cookie_name: String,
	/// Header carrying the credential; empty disables header extraction.
	#[serde(default = "default_credential_name")]
	pub header_name: String,
	/// Query parameter carrying the credential; empty disables query extraction.
	#[serde(default)]
	pub parameter_name: String,
	/// Outbound header name to claim name projection.
	#[serde(default)]
	pub header_map: BTreeMap<String, String>,
	/// Delete mapped headers whose claim is absent from the token.
	#[serde(default)]
	pub remove_missing_headers: bool,
	/// Leave the credential on the forwarded request.
	#[serde(default = "default_true")]
	pub forward_token: bool,
	/// Freshness window in seconds; zero disables it.
	#[serde(default = "default_freshness")]
	pub freshness: u64,
}
impl Config {
	/// Resolve `valid_methods` into verifier algorithms.
	pub fn algorithms(&self) -> Result<Vec<Algorithm>> {
		self.valid_methods
			.iter()
			.map(|name| {
				Algorithm::from_str(name).map_err(|_| Error::Validation {
					field: "validMethods",
					reason: format!("Unsupported signing algorithm {name:?}."),
				})
			})
			.collect()
	}

	/// Delay before the first prefetch, or `None` when prefetching is skipped.
	pub fn prefetch_delay(&self) -> Result<Option<Duration>> {
		if self.skip_prefetch {
			return Ok(None);
		}

		parse_duration("delayPrefetch", &self.delay_prefetch).map(Some)
	}

	/// Interval of the periodic refresh loop, or `None` when disabled.
	pub fn refresh_interval(&self) -> Result<Option<Duration>> {
		let interval = parse_duration("refreshKeysInterval", &self.refresh_keys_interval)?;

		Ok((!interval.is_zero()).then_some(interval))
	}

	/// Validate the options that do not need I/O to check.
	pub fn validate(&self) -> Result<()> {
		if self.valid_methods.is_empty() {
			return Err(Error::Validation {
				field: "validMethods",
				reason: "At least one signing algorithm is required.".into(),
			});
		}

		self.algorithms()?;
		self.prefetch_delay()?;
		self.refresh_interval()?;

		if self.issuers.iter().any(|issuer| issuer.trim().is_empty()) {
			return Err(Error::Validation {
				field: "issuers",
				reason: "Issuer patterns must be non-empty.".into(),
			});
		}
		for header in self.header_map.keys() {
			if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
				return Err(Error::Validation {
					field: "headerMap",
					reason: format!("Invalid header name {header:?}."),
				});
			}
		}
		if !self.header_name.is_empty()
			&& http::HeaderName::from_bytes(self.header_name.as_bytes()).is_err()
		{
			return Err(Error::Validation {
				field: "headerName",
				reason: format!("Invalid header name {:?}.", self.header_name),
			});
		}

		Ok(())
	}
}
impl Default for Config {
	fn default() -> Self {
		Self {
			valid_methods: default_valid_methods(),
			issuers: Vec::new(),
			skip_prefetch: false,
			delay_prefetch: String::new(),
			refresh_keys_interval: String::new(),
			insecure_skip_verify: Vec::new(),
			root_cas: Vec::new(),
			secret: String::new(),
			secrets: BTreeMap::new(),
			require: Map::new(),
			optional: false,
			redirect_unauthorized: String::new(),
			redirect_forbidden: String::new(),
			cookie_name: default_credential_name(),
			header_name: default_credential_name(),
			parameter_name: String::new(),
			header_map: BTreeMap::new(),
			remove_missing_headers: false,
			forward_token: true,
			freshness: DEFAULT_FRESHNESS,
		}
	}
}

/// Parse a duration string such as `"1h30m"`, `"250ms"` or `"1.5s"`.
///
/// An empty string is zero. Negative durations and missing units are rejected.
pub fn parse_duration(field: &'static str, text: &str) -> Result<Duration> {
	let invalid = || Error::Validation { field, reason: format!("Invalid duration {text:?}.") };
	let trimmed = text.trim();

	if trimmed.is_empty() {
		return Ok(Duration::ZERO);
	}
	if trimmed.starts_with('-') {
		return Err(Error::Validation {
			field,
			reason: format!("Duration {text:?} must not be negative."),
		});
	}

	let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);

	if rest == "0" {
		return Ok(Duration::ZERO);
	}
	if rest.is_empty() {
		return Err(invalid());
	}

	let mut nanos = 0_f64;

	while !rest.is_empty() {
		let number_end =
			rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
		let (number, tail) = rest.split_at(number_end);

		if number.is_empty() || number == "." {
			return Err(invalid());
		}

		let value = number.parse::<f64>().map_err(|_| invalid())?;
		let unit_end = tail.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(tail.len());
		let (unit, tail) = tail.split_at(unit_end);
		let scale = match unit {
			"ns" => 1.,
			"us" | "\u{b5}s" | "\u{3bc}s" => 1e3,
			"ms" => 1e6,
			"s" => 1e9,
			"m" => 60e9,
			"h" => 3600e9,
			_ => return Err(invalid()),
		};

		nanos += value * scale;
		rest = tail;
	}

	if !nanos.is_finite() || nanos > u64::MAX as f64 {
		return Err(invalid());
	}

	Ok(Duration::from_nanos(nanos.round() as u64))
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum OneOrMany {
		One(String),
		Many(Vec<String>),
	}

	Ok(match OneOrMany::deserialize(deserializer)? {
		OneOrMany::One(value) if value.is_empty() => Vec::new(),
		OneOrMany::One(value) => vec![value],
		OneOrMany::Many(values) => values,
	})
}

fn default_valid_methods() -> Vec<String> {
	DEFAULT_VALID_METHODS.iter().map(|name| name.to_string()).collect()
}

fn default_credential_name() -> String {
	DEFAULT_CREDENTIAL_NAME.into()
}

fn default_true() -> bool {
	true
}

fn default_freshness() -> u64 {
	DEFAULT_FRESHNESS
}
