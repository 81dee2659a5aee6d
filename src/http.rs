//! HTTP plumbing for issuer key discovery.

pub mod client;
