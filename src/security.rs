//! Issuer allowlisting, host canonicalisation, and trust material loading.
//!
//! # Threat Model
//! Key discovery is only ever triggered for issuers matching a configured pattern, so a token
//! cannot point the middleware at an arbitrary host. Hosts that skip certificate verification are
//! matched by exact canonical name, never by pattern.

// std
use std::{collections::HashSet, fs};
// crates.io
use url::Url;
// self
use crate::{_prelude::*, glob::Pattern};

/// Append the trailing slash every issuer is compared with.
pub fn canonicalize_issuer(issuer: &str) -> String {
	if issuer.ends_with('/') { issuer.to_owned() } else { format!("{issuer}/") }
}

/// Canonicalise a DNS name by trimming whitespace, removing any trailing dot, and lowercasing.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return None;
	}

	let without_trailing_dot = trimmed.trim_end_matches('.');
	if without_trailing_dot.is_empty() {
		return None;
	}

	Some(without_trailing_dot.to_ascii_lowercase())
}

/// Normalise a host list by canonicalising entries and removing duplicates/empties.
pub fn normalize_hosts<I, S>(hosts: I) -> HashSet<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	hosts.into_iter().filter_map(|host| canonicalize_dns_name(host.as_ref())).collect()
}

/// Host name of an absolute URL, canonicalised for lookups.
pub fn hostname(address: &str) -> Option<String> {
	match Url::parse(address) {
		Ok(url) => url.host_str().and_then(canonicalize_dns_name),
		Err(err) => {
			tracing::debug!(url = address, error = %err, "failed to parse url");

			None
		},
	}
}

/// Canonical issuer patterns trusted for key discovery.
#[derive(Clone, Debug, Default)]
pub struct IssuerAllowlist {
	patterns: Vec<Pattern>,
}
impl IssuerAllowlist {
	/// Canonicalise and compile the configured patterns.
	pub fn new<I, S>(patterns: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let patterns = patterns
			.into_iter()
			.map(|pattern| {
				let pattern = canonicalize_issuer(pattern.as_ref());

				Pattern::new(&pattern).map_err(|err| Error::Validation {
					field: "issuers",
					reason: format!("invalid issuer pattern {pattern}: {err}"),
				})
			})
			.collect::<Result<_>>()?;

		Ok(Self { patterns })
	}

	/// Whether any pattern is configured.
	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}

	/// Whether the canonical issuer matches a configured pattern.
	pub fn permits(&self, issuer: &str) -> bool {
		self.patterns.iter().any(|pattern| pattern.matches(issuer))
	}

	/// Patterns naming a single concrete issuer, which can be fetched without a token.
	pub fn concrete(&self) -> impl Iterator<Item = &str> {
		self.patterns.iter().map(Pattern::as_str).filter(|pattern| !pattern.contains('*'))
	}
}

/// Return PEM text as-is, or read it from the file the value names.
pub fn pem_content(value: &str) -> Result<String> {
	if value.is_empty() || value.starts_with("-----BEGIN") {
		return Ok(value.to_owned());
	}

	fs::read_to_string(value).map_err(|err| Error::Validation {
		field: "rootCAs",
		reason: format!("failed to load root CA: {value}: {err}"),
	})
}
