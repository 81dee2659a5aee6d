//! Key resolution on top of the key cache, fetching issuer keys on demand.

// self
use crate::{
	_prelude::*,
	cache::store::{KeyCache, KeySource},
	http::client::KeyFetcher,
	key::KeyMaterial,
	metrics::AuthorizerMetrics,
	security::{self, IssuerAllowlist},
};

/// Resolves verification keys by identifier, refreshing issuer key sets on a miss.
///
/// Network fetches run without any cache lock held, so concurrent misses for the same new key may
/// each trigger a fetch.
#[derive(Clone, Debug)]
pub struct KeyManager {
	fetcher: Arc<KeyFetcher>,
	cache: Arc<KeyCache>,
	allowlist: Arc<IssuerAllowlist>,
	fallback: Option<Arc<KeyMaterial>>,
	has_static_keys: bool,
	metrics: Arc<AuthorizerMetrics>,
}
impl KeyManager {
	/// Assemble a manager from its collaborators.
	pub fn new(
		fetcher: KeyFetcher,
		cache: KeyCache,
		allowlist: IssuerAllowlist,
		fallback: Option<KeyMaterial>,
		has_static_keys: bool,
		metrics: Arc<AuthorizerMetrics>,
	) -> Self {
		Self {
			fetcher: Arc::new(fetcher),
			cache: Arc::new(cache),
			allowlist: Arc::new(allowlist),
			fallback: fallback.map(Arc::new),
			has_static_keys,
			metrics,
		}
	}

	/// Shared key cache.
	pub fn cache(&self) -> &KeyCache {
		&self.cache
	}

	/// Resolve the key a token names.
	///
	/// A cached `kid` is returned without network activity. On a miss, a permitted `issuer` has
	/// its keys fetched once and the lookup retried once. When no key is found the fixed fallback
	/// key is used, if configured; otherwise the most specific error of the miss path is returned.
	#[tracing::instrument(skip(self))]
	pub async fn resolve(
		&self,
		kid: Option<&str>,
		issuer: Option<&str>,
	) -> Result<Arc<KeyMaterial>> {
		let mut error = Error::NoSecret;

		if let Some(kid) = kid
			&& (self.has_static_keys || !self.allowlist.is_empty())
		{
			match self.lookup_with_refresh(kid, issuer).await {
				Ok(key) => return Ok(key),
				Err(err) => error = err,
			}
		}

		match &self.fallback {
			Some(key) => {
				tracing::debug!("using fixed fallback key");

				Ok(key.clone())
			},
			None => Err(error),
		}
	}

	async fn lookup_with_refresh(
		&self,
		kid: &str,
		issuer: Option<&str>,
	) -> Result<Arc<KeyMaterial>> {
		let cached = self.cache.lookup(kid).await;

		self.metrics.record_key_lookup(cached.is_some());

		if let Some(key) = cached {
			return Ok(key);
		}

		let Some(issuer) = issuer else {
			return Err(Error::NoSecret);
		};
		let issuer = security::canonicalize_issuer(issuer);

		if !self.allowlist.permits(&issuer) {
			return Err(Error::IssuerNotAllowed { issuer });
		}

		let refreshed = self.refresh_issuer(&issuer).await;

		if let Some(key) = self.cache.lookup(kid).await {
			return Ok(key);
		}

		match refreshed {
			Ok(url) => {
				tracing::warn!(kid, url = %url, "refreshed keys and still no match");

				Err(Error::UnknownKey { kid: kid.to_owned() })
			},
			Err(err) => Err(err),
		}
	}

	/// Fetch the keys of one canonical issuer and store them, returning the key-set URL used.
	#[tracing::instrument(skip(self))]
	pub async fn refresh_issuer(&self, issuer: &str) -> Result<String> {
		match self.fetcher.fetch_keys(issuer).await {
			Ok(fetched) => {
				self.cache.store(KeySource::Endpoint(fetched.url.clone()), fetched.keys).await;

				Ok(fetched.url)
			},
			Err(err) => {
				tracing::warn!(error = %err, "failed to fetch keys");

				Err(err)
			},
		}
	}

	/// Refresh every configured issuer that is not a wildcard pattern, in order.
	///
	/// Failures are logged and do not stop the remaining issuers.
	pub async fn refresh_all(&self) {
		for issuer in self.allowlist.concrete() {
			if let Err(err) = self.refresh_issuer(issuer).await {
				tracing::debug!(issuer, error = %err, "issuer refresh skipped");
			}
		}
	}
}
