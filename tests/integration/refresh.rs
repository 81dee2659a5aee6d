//! Integration tests for key rotation and background refresh.

// std
use std::time::Duration;
// crates.io
use jsonwebtoken::Algorithm;
use jwt_gatekeeper::{Config, Rejection, Result};
use serde_json::json;
use wiremock::{
	Mock, MockServer,
	matchers::{method, path},
};
// self
use crate::*;

async fn wait_for<F, Fut>(mut condition: F)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	tokio::time::timeout(Duration::from_secs(5), async {
		while !condition().await {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

async fn key_set_requests(server: &MockServer) -> usize {
	server
		.received_requests()
		.await
		.unwrap_or_default()
		.iter()
		.filter(|request| request.url.path() == JWKS_PATH)
		.count()
}

#[tokio::test]
async fn rotated_keys_replace_and_purge_old_ones() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(key_set(vec![rsa_jwk("2024")]))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(key_set(vec![rsa_jwk("2025")]))
		.mount(&server)
		.await;

	let authorizer = authorizer(issuer_config(&[server.uri()]))?;
	let old = sign(Algorithm::RS256, Some("2024"), json!({ "iss": server.uri() }));
	let new = sign(Algorithm::RS256, Some("2025"), json!({ "iss": server.uri() }));

	assert_eq!(authorizer.authorize(&mut bearer(&old)).await, Ok(()));
	assert_eq!(authorizer.authorize(&mut bearer(&new)).await, Ok(()));
	assert_eq!(authorizer.keys().cache().snapshot().await.kids, vec!["2025"]);

	let rejection = authorizer.authorize(&mut bearer(&old)).await.unwrap_err();

	assert_eq!(
		rejection,
		Rejection::Status {
			status: http::StatusCode::UNAUTHORIZED,
			message: "key 2024 is not known".into(),
		}
	);
	assert_eq!(key_set_requests(&server).await, 3);

	Ok(())
}

#[tokio::test]
async fn static_keys_skip_discovery() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let config = Config {
		secrets: [("static".to_string(), RSA_PUBLIC.to_string())].into_iter().collect(),
		skip_prefetch: true,
		..Default::default()
	};
	let authorizer = authorizer(config)?;
	let token = sign(Algorithm::RS256, Some("static"), json!({ "sub": "service" }));
	let unknown = sign(Algorithm::RS256, Some("unknown"), json!({ "sub": "service" }));

	assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));
	assert!(authorizer.authorize(&mut bearer(&unknown)).await.is_err());
	assert_eq!(authorizer.keys().cache().snapshot().await.sources[0].0, "config");

	Ok(())
}

#[tokio::test]
async fn prefetch_fills_the_cache_before_the_first_request() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(key_set(vec![rsa_jwk("primary")]))
		.expect(1)
		.mount(&server)
		.await;

	let config = Config {
		issuers: vec![server.uri(), "http://127.0.0.1:*".into()],
		delay_prefetch: "10ms".into(),
		..Default::default()
	};
	let authorizer = authorizer(config)?;
	let cache = authorizer.keys().cache();

	wait_for(|| async move { !cache.is_empty().await }).await;

	let token = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));

	assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));
	assert_eq!(authorizer.stats().key_hits, 1);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn periodic_refresh_keeps_fetching() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_key_set(&server, vec![rsa_jwk("primary")]).await;

	let config = Config {
		refresh_keys_interval: "20ms".into(),
		..issuer_config(&[server.uri()])
	};
	let authorizer = authorizer(config)?;
	let mock = &server;

	assert!(authorizer.is_refreshing());

	wait_for(|| async move { key_set_requests(mock).await >= 2 }).await;

	Ok(())
}

#[tokio::test]
async fn refresh_all_continues_past_failing_issuers() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(key_set(vec![rsa_jwk("primary")]))
		.expect(1)
		.mount(&server)
		.await;

	let authorizer = authorizer(issuer_config(&["http://127.0.0.1:1".into(), server.uri()]))?;

	authorizer.keys().refresh_all().await;

	assert_eq!(authorizer.keys().cache().snapshot().await.kids, vec!["primary"]);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn no_schedule_without_refresh_options() -> Result<()> {
	let authorizer = authorizer(issuer_config(&["https://auth.example.com".into()]))?;

	assert!(!authorizer.is_refreshing());

	Ok(())
}
