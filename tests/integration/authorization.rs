//! Integration tests for request decisions through the tower layer.

// std
use std::convert::Infallible;
// crates.io
use base64::prelude::*;
use http::{Request, Response, StatusCode};
use jsonwebtoken::Algorithm;
use jwt_gatekeeper::{AuthorizeLayer, Config, Result, VerifiedClaims};
use serde_json::{Value, json};
use tower::{Layer, ServiceExt, service_fn};
use wiremock::MockServer;
// self
use crate::*;

const SECRET: &str = "shared secret";

// Echoes the projected subject header, or the verified subject when none was projected.
async fn backend(request: Request<String>) -> std::result::Result<Response<String>, Infallible> {
	let projected = request.headers().get("x-subject").and_then(|value| value.to_str().ok());
	let verified = request
		.extensions()
		.get::<VerifiedClaims>()
		.and_then(|claims| claims.0.get("sub"))
		.and_then(Value::as_str);

	Ok(Response::new(projected.or(verified).unwrap_or("anonymous").to_owned()))
}

fn require(require: Value) -> Config {
	let Value::Object(require) = require else { panic!("require must be an object") };

	Config { secret: SECRET.into(), skip_prefetch: true, require, ..Default::default() }
}

async fn call(config: Config, request: Request<String>) -> Result<Response<String>> {
	let service = AuthorizeLayer::new(authorizer(config)?).layer(service_fn(backend));
	let response = match service.oneshot(request).await {
		Ok(response) => response,
		Err(never) => match never {},
	};

	Ok(response)
}

#[tokio::test]
async fn projected_claims_reach_the_backend() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let config = Config {
		header_map: [("X-Subject".to_string(), "sub".to_string())].into_iter().collect(),
		..require(json!({ "scope": ["read", "write"] }))
	};
	let token = sign_hmac(SECRET, json!({ "sub": "alice", "scope": ["write"] }));
	let response = call(config, bearer(&token)).await?;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.body(), "alice");

	Ok(())
}

#[tokio::test]
async fn templated_and_combined_requirements() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let config = || {
		require(json!({
			"tenant": "{{TENANT}}",
			"groups": { "$or": [{ "$and": ["staff", "ops-*"] }, "admin"] }
		}))
	};
	let admin = sign_hmac(SECRET, json!({ "sub": "a", "tenant": "acme", "groups": ["admin"] }));
	let operator = sign_hmac(
		SECRET,
		json!({ "sub": "o", "tenant": "acme", "groups": ["staff", "ops-eu"] }),
	);
	let staff = sign_hmac(SECRET, json!({ "sub": "s", "tenant": "acme", "groups": ["staff"] }));
	let other_tenant =
		sign_hmac(SECRET, json!({ "sub": "x", "tenant": "globex", "groups": ["admin"] }));

	assert_eq!(call(config(), bearer(&admin)).await?.status(), StatusCode::OK);
	assert_eq!(call(config(), bearer(&operator)).await?.status(), StatusCode::OK);
	assert_eq!(call(config(), bearer(&staff)).await?.status(), StatusCode::FORBIDDEN);
	assert_eq!(call(config(), bearer(&other_tenant)).await?.status(), StatusCode::FORBIDDEN);

	Ok(())
}

#[tokio::test]
async fn browsers_are_redirected_to_login() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let config = Config {
		redirect_unauthorized: "https://login.example.com/?return_to={{URLQueryEscape URL}}".into(),
		..require(json!({}))
	};
	let request = Request::builder()
		.uri("/dashboard")
		.header("host", "app.example.com")
		.header("x-forwarded-proto", "http")
		.body(String::new())
		.unwrap();
	let response = call(config, request).await?;

	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(
		response.headers()["location"],
		"https://login.example.com/?return_to=http%3A%2F%2Fapp.example.com%2Fdashboard"
	);

	Ok(())
}

#[tokio::test]
async fn grpc_clients_receive_status_headers() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let token = sign_hmac(SECRET, json!({ "sub": "alice", "aud": "other" }));
	let mut request = bearer(&token);

	request.headers_mut().insert("content-type", "application/grpc+proto".parse().unwrap());

	let response = call(require(json!({ "aud": "api" })), request).await?;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers()["grpc-status"], "7");
	assert_eq!(response.headers()["grpc-message"], "PERMISSION_DENIED");
	assert_eq!(response.body(), "");

	Ok(())
}

#[tokio::test]
async fn tampered_payload_fails_the_signature_check() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_key_set(&server, vec![rsa_jwk("primary")]).await;

	let config = issuer_config(&[server.uri()]);
	let signed = sign(Algorithm::RS256, Some("primary"), json!({ "iss": server.uri() }));
	let payload =
		BASE64_URL_SAFE_NO_PAD.encode(json!({ "iss": server.uri(), "sub": "mallory" }).to_string());
	let mut parts: Vec<&str> = signed.split('.').collect();

	parts[1] = &payload;

	let response = call(config, bearer(&parts.join("."))).await?;

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	Ok(())
}
