//! Metrics helpers and per-authorizer telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_KEY_LOOKUPS_TOTAL: &str = "jwt_gatekeeper_key_lookups_total";
const METRIC_KEY_FETCH_TOTAL: &str = "jwt_gatekeeper_key_fetch_total";
const METRIC_KEY_FETCH_DURATION: &str = "jwt_gatekeeper_key_fetch_duration_seconds";
const METRIC_KEYS_PURGED_TOTAL: &str = "jwt_gatekeeper_keys_purged_total";
const METRIC_DECISIONS_TOTAL: &str = "jwt_gatekeeper_decisions_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Final classification of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
	/// Forwarded to the backend.
	Allowed,
	/// Rejected for missing, invalid or stale credentials.
	Unauthorized,
	/// Rejected for insufficient claims.
	Forbidden,
}
impl Outcome {
	/// Metric label value.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Allowed => "allowed",
			Self::Unauthorized => "unauthorized",
			Self::Forbidden => "forbidden",
		}
	}
}

/// Thread-safe counters for a single authorizer.
#[derive(Debug, Default)]
pub struct AuthorizerMetrics {
	allowed: AtomicU64,
	unauthorized: AtomicU64,
	forbidden: AtomicU64,
	key_hits: AtomicU64,
	key_misses: AtomicU64,
}
impl AuthorizerMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record the outcome of one request.
	pub fn record_outcome(&self, outcome: Outcome) {
		let counter = match outcome {
			Outcome::Allowed => &self.allowed,
			Outcome::Unauthorized => &self.unauthorized,
			Outcome::Forbidden => &self.forbidden,
		};

		counter.fetch_add(1, Ordering::Relaxed);
		record_decision(outcome);
	}

	/// Record a key lookup served from the cache or not.
	pub fn record_key_lookup(&self, hit: bool) {
		if hit {
			self.key_hits.fetch_add(1, Ordering::Relaxed);
		} else {
			self.key_misses.fetch_add(1, Ordering::Relaxed);
		}

		record_key_lookup(hit);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> AuthorizerMetricsSnapshot {
		AuthorizerMetricsSnapshot {
			allowed: self.allowed.load(Ordering::Relaxed),
			unauthorized: self.unauthorized.load(Ordering::Relaxed),
			forbidden: self.forbidden.load(Ordering::Relaxed),
			key_hits: self.key_hits.load(Ordering::Relaxed),
			key_misses: self.key_misses.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of per-authorizer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizerMetricsSnapshot {
	/// Requests forwarded to the backend.
	pub allowed: u64,
	/// Requests rejected as unauthorized.
	pub unauthorized: u64,
	/// Requests rejected as forbidden.
	pub forbidden: u64,
	/// Key lookups answered from the cache.
	pub key_hits: u64,
	/// Key lookups that missed the cache.
	pub key_misses: u64,
}
impl AuthorizerMetricsSnapshot {
	/// Share of key lookups answered from the cache.
	pub fn key_hit_rate(&self) -> f64 {
		let total = self.key_hits + self.key_misses;

		if total == 0 { 0.0 } else { self.key_hits as f64 / total as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a key lookup outcome.
pub fn record_key_lookup(hit: bool) {
	let labels = outcome_labels(if hit { "hit" } else { "miss" });

	metrics::counter!(METRIC_KEY_LOOKUPS_TOTAL, labels.iter()).increment(1);
}

/// Record a successful key-set fetch along with its latency.
pub fn record_fetch_success(issuer: &str, duration: Duration) {
	metrics::counter!(METRIC_KEY_FETCH_TOTAL, fetch_labels(issuer, "success").iter()).increment(1);
	metrics::histogram!(METRIC_KEY_FETCH_DURATION, issuer_labels(issuer).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed key-set fetch.
pub fn record_fetch_error(issuer: &str) {
	metrics::counter!(METRIC_KEY_FETCH_TOTAL, fetch_labels(issuer, "error").iter()).increment(1);
}

/// Record keys dropped by a purge pass.
pub fn record_purged(count: usize) {
	if count > 0 {
		metrics::counter!(METRIC_KEYS_PURGED_TOTAL).increment(count as u64);
	}
}

/// Record a request decision.
pub fn record_decision(outcome: Outcome) {
	metrics::counter!(METRIC_DECISIONS_TOTAL, outcome_labels(outcome.as_str()).iter())
		.increment(1);
}

fn outcome_labels(outcome: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("outcome", outcome));

	labels
}

fn issuer_labels(issuer: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("issuer", issuer.to_owned()));

	labels
}

fn fetch_labels(issuer: &str, status: &'static str) -> LabelSet {
	let mut labels = issuer_labels(issuer);

	labels.push(Label::new("status", status));

	labels
}
