//! HTTP clients and issuer key discovery.

// std
use std::collections::{HashMap, HashSet};
// crates.io
use http::StatusCode;
use reqwest::{Certificate, Client, ClientBuilder, redirect::Policy};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
// self
use crate::{
	_prelude::*,
	jwks::JsonWebKeySet,
	key::KeyMaterial,
	metrics,
	security,
};

/// Discovery document fields consumed by the fetcher.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
	/// Location of the issuer's key set.
	#[serde(default)]
	pub jwks_uri: String,
}

/// Outbound clients: one verifying certificates, one for hosts that skip verification.
#[derive(Clone, Debug)]
pub struct HttpClients {
	verified: Client,
	unverified: Client,
	insecure_hosts: HashSet<String>,
}
impl HttpClients {
	/// Build clients trusting the extra `root_cas` (PEM text or file paths) and skipping
	/// verification for `insecure_hosts`.
	///
	/// An unreadable root CA file is an error; an unparsable certificate is logged and skipped.
	pub fn new(root_cas: &[String], insecure_hosts: &[String]) -> Result<Self> {
		let mut verified = base_builder();

		for entry in root_cas {
			let pem = security::pem_content(entry)?;

			if let Some(certificate) = load_root_certificate(&pem) {
				verified = verified.add_root_certificate(certificate);
			}
		}

		Ok(Self {
			verified: verified.build()?,
			unverified: base_builder().danger_accept_invalid_certs(true).build()?,
			insecure_hosts: security::normalize_hosts(insecure_hosts),
		})
	}

	/// Client for the given absolute URL.
	pub fn client_for(&self, url: &str) -> &Client {
		match security::hostname(url) {
			Some(host) if self.insecure_hosts.contains(&host) => &self.unverified,
			_ => &self.verified,
		}
	}
}

/// Keys retrieved from one key-set endpoint.
#[derive(Clone, Debug)]
pub struct FetchedKeys {
	/// Key-set URL the keys came from.
	pub url: String,
	/// Decoded keys by identifier.
	pub keys: HashMap<String, Arc<KeyMaterial>>,
}

/// Discovers and downloads issuer key sets.
#[derive(Clone, Debug)]
pub struct KeyFetcher {
	clients: HttpClients,
}
impl KeyFetcher {
	/// Create a fetcher over the given clients.
	pub fn new(clients: HttpClients) -> Self {
		Self { clients }
	}

	/// Fetch the keys of a canonical issuer (ending in `/`).
	///
	/// The discovery document names the key set; when it cannot be used the well-known
	/// `jwks.json` location is tried instead. Key-set failures are returned to the caller.
	#[tracing::instrument(skip(self))]
	pub async fn fetch_keys(&self, issuer: &str) -> Result<FetchedKeys> {
		let started = Instant::now();
		let discovery_url = format!("{issuer}.well-known/openid-configuration");
		let url = match self.fetch_json::<OpenIdConfiguration>(&discovery_url).await {
			Ok(document) if !document.jwks_uri.is_empty() => {
				tracing::info!(url = %discovery_url, "fetched openid-configuration");

				document.jwks_uri
			},
			outcome => {
				let fallback = format!("{issuer}.well-known/jwks.json");
				let reason = match outcome {
					Ok(_) => "missing jwks_uri".to_owned(),
					Err(err) => err.to_string(),
				};

				tracing::warn!(
					url = %discovery_url,
					fallback = %fallback,
					error = %reason,
					"failed to fetch openid-configuration; falling back to direct JWKS URL"
				);

				fallback
			},
		};
		let set = match self.fetch_json::<JsonWebKeySet>(&url).await {
			Ok(set) => set,
			Err(err) => {
				metrics::record_fetch_error(issuer);

				return Err(err);
			},
		};
		let keys = set.decode(&url);

		for kid in keys.keys() {
			tracing::info!(kid = %kid, url = %url, "fetched key");
		}

		metrics::record_fetch_success(issuer, started.elapsed());

		Ok(FetchedKeys { url, keys })
	}

	async fn fetch_json<T>(&self, url: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.clients.client_for(url).get(url).send().await?;
		let status = response.status();

		if status != StatusCode::OK {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: url.to_owned(), body });
		}

		let bytes = response.bytes().await?;

		tracing::debug!(url, status = %status, bytes = bytes.len(), "fetched document");

		Ok(serde_json::from_slice(&bytes)?)
	}
}

fn base_builder() -> ClientBuilder {
	Client::builder()
		.redirect(Policy::limited(10))
		.user_agent(format!("jwt-gatekeeper/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(5))
}

fn load_root_certificate(pem: &str) -> Option<Certificate> {
	let certificate = match Certificate::from_pem(pem.as_bytes()) {
		Ok(certificate) => certificate,
		Err(err) => {
			tracing::warn!(error = %err, "failed to add root CA");

			return None;
		},
	};

	// Some TLS backends only parse the certificate when the client is built.
	match Client::builder().add_root_certificate(certificate.clone()).build() {
		Ok(_) => Some(certificate),
		Err(err) => {
			tracing::warn!(error = %err, "failed to add root CA");

			None
		},
	}
}
