//! Signing key cache and key resolution.

pub mod manager;
pub mod store;
