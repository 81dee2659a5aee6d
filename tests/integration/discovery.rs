//! Integration tests for issuer key discovery.

// crates.io
use http::StatusCode;
use jsonwebtoken::Algorithm;
use jwt_gatekeeper::{Rejection, Result, jwks::JsonWebKey};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::*;

#[tokio::test]
async fn discovers_keys_through_openid_configuration() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(json!({ "jwks_uri": format!("{}/keys", server.uri()) })),
		)
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/keys"))
		.respond_with(key_set(vec![rsa_jwk("primary")]))
		.expect(1)
		.mount(&server)
		.await;

	let authorizer = authorizer(issuer_config(&[server.uri()]))?;
	let token = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));

	assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));
	assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));

	let snapshot = authorizer.keys().cache().snapshot().await;

	assert_eq!(snapshot.kids, vec!["primary"]);
	assert_eq!(snapshot.sources[0].0, format!("{}/keys", server.uri()));
	assert_eq!(authorizer.stats().key_hits, 1);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn falls_back_to_well_known_key_set() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	for discovery in [ResponseTemplate::new(500), ResponseTemplate::new(200).set_body_string("{")] {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/.well-known/openid-configuration"))
			.respond_with(discovery)
			.mount(&server)
			.await;
		mount_key_set(&server, vec![rsa_jwk("primary")]).await;

		let authorizer = authorizer(issuer_config(&[server.uri()]))?;
		let token = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));

		assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));
	}

	Ok(())
}

#[tokio::test]
async fn key_set_failures_are_unauthorized() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	for response in [ResponseTemplate::new(500), ResponseTemplate::new(200).set_body_string("[")] {
		let server = MockServer::start().await;

		Mock::given(method("GET")).and(path(JWKS_PATH)).respond_with(response).mount(&server).await;

		let authorizer = authorizer(issuer_config(&[server.uri()]))?;
		let token = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));
		let rejection = authorizer.authorize(&mut bearer(&token)).await.unwrap_err();

		assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
		assert!(authorizer.keys().cache().is_empty().await);
	}

	Ok(())
}

#[tokio::test]
async fn ec_keys_without_kid_are_found_by_thumbprint() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let symmetric = json!({ "kty": "oct", "kid": "ignored", "k": "c2VjcmV0" });

	mount_key_set(&server, vec![ec_jwk(), symmetric]).await;

	let thumbprint = serde_json::from_value::<JsonWebKey>(ec_jwk())?.thumbprint();
	let authorizer = authorizer(issuer_config(&[server.uri()]))?;
	let token = sign(Algorithm::ES256, Some(&thumbprint), json!({ "iss": server.uri() }));

	assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));
	assert_eq!(authorizer.keys().cache().snapshot().await.kids, vec![thumbprint]);

	Ok(())
}

#[tokio::test]
async fn untrusted_issuers_are_never_contacted() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(key_set(vec![rsa_jwk("primary")]))
		.expect(0)
		.mount(&server)
		.await;

	let authorizer = authorizer(issuer_config(&["https://auth.example.com".into()]))?;
	let token = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));

	assert_eq!(
		authorizer.authorize(&mut bearer(&token)).await,
		Err(Rejection::Status {
			status: StatusCode::UNAUTHORIZED,
			message: format!("issuer {}/ is not valid", server.uri()),
		})
	);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn wildcard_issuers_allow_on_demand_discovery() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_key_set(&server, vec![rsa_jwk("primary")]).await;

	let authorizer = authorizer(issuer_config(&["http://127.0.0.1:*".into()]))?;
	let token = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));

	assert_eq!(authorizer.authorize(&mut bearer(&token)).await, Ok(()));

	Ok(())
}
