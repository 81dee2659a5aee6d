//! JWT bearer authorization middleware with OIDC key discovery, a purging key cache, and
//! declarative claim requirements.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod glob;
pub mod http;
pub mod jwks;
pub mod key;
pub mod layer;
pub mod metrics;
pub mod pipeline;
pub mod refresh;
pub mod requirement;
pub mod security;
pub mod template;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::Utc;
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{
		manager::KeyManager,
		store::{KeyCache, KeyCacheSnapshot, KeySource},
	},
	config::Config,
	error::{Error, Result},
	layer::{AuthorizeLayer, AuthorizeService},
	metrics::{AuthorizerMetricsSnapshot, Outcome},
	pipeline::{Authorizer, Rejection, VerifiedClaims},
	refresh::RefreshSchedule,
	requirement::Requirements,
	template::{Environment, Template, TemplateVariables},
};
