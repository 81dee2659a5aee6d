//! Background prefetch and periodic refresh of issuer keys.

// crates.io
use tokio::task::JoinHandle;
// self
use crate::{_prelude::*, cache::manager::KeyManager, config::Config};

/// When issuer keys are fetched outside of request handling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshSchedule {
	/// Keys are only fetched on demand.
	Never,
	/// A single prefetch after `delay`.
	Once {
		/// Delay before the prefetch.
		delay: Duration,
	},
	/// An optional prefetch, then a refresh every `interval`.
	Periodic {
		/// Delay before the first fetch, or `None` to wait a full interval.
		prefetch: Option<Duration>,
		/// Pause between refreshes.
		interval: Duration,
	},
}
impl RefreshSchedule {
	/// Derive the schedule from `skipPrefetch`, `delayPrefetch` and `refreshKeysInterval`.
	pub fn from_config(config: &Config) -> Result<Self> {
		let schedule = match (config.prefetch_delay()?, config.refresh_interval()?) {
			(None, None) => Self::Never,
			(Some(delay), None) => Self::Once { delay },
			(prefetch, Some(interval)) => Self::Periodic { prefetch, interval },
		};

		Ok(schedule)
	}

	/// Start the schedule on the current runtime. Returns `None` for [`RefreshSchedule::Never`].
	///
	/// The task runs until its handle is aborted; refresh failures are logged and retried on the
	/// next tick.
	pub fn spawn(self, keys: KeyManager) -> Option<JoinHandle<()>> {
		if self == Self::Never {
			return None;
		}

		Some(tokio::spawn(self.run(keys)))
	}

	async fn run(self, keys: KeyManager) {
		match self {
			Self::Never => {},
			Self::Once { delay } => {
				tokio::time::sleep(delay).await;
				prefetch(&keys).await;
			},
			Self::Periodic { prefetch: delay, interval } => {
				if let Some(delay) = delay {
					tokio::time::sleep(delay).await;
					prefetch(&keys).await;
				}

				loop {
					tokio::time::sleep(interval).await;

					tracing::debug!(interval = ?interval, "refreshing issuer keys");

					keys.refresh_all().await;
				}
			},
		}
	}
}

async fn prefetch(keys: &KeyManager) {
	tracing::debug!("prefetching issuer keys");

	keys.refresh_all().await;
}
