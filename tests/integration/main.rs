//! End-to-end tests driving the authorizer against mock issuers.

mod authorization;
mod discovery;
mod refresh;

// crates.io
use http::Request;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use jwt_gatekeeper::{Authorizer, Config, Environment, Result};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

const RSA_PRIVATE: &str = include_str!("../fixtures/rsa_private.pem");
const RSA_PUBLIC: &str = include_str!("../fixtures/rsa_public.pem");
const EC_PRIVATE: &str = include_str!("../fixtures/ec_private.pem");
const RSA_N: &str = concat!(
	"5lIMQRHsoQI1PWv2pjs2-XRb_NVSUq9hCrm9Qpia7eQcCcBZ1lsd1MUVih31_p0hPA0XhfAvZAdviioL0QIiT7egl",
	"BMEaZo7qd06joalHxcdUyf3G4pewNi6DnZu3-dPZtsmEEZdPG6L6siVcd4pL096PFvP-5ZG106HEQnmptrN9KMHl",
	"zXMhlS83pMJ0PaKLuPlirhsgCr78eFSNgG3Bde29UgSEmAr3LORDRqmiHGJPOdkkYxuMHYB1w5jDxBSjLE_Ys63V",
	"iKZs9dsZIjoj9UCiL4_3R33Z22uQltonRZQRaG5pV4TpWEqJd88mOEZG0w4sbSwuT5mVcpzQPOf2Q",
);
const EC_X: &str = "VHTuO9JvQM0xBlLdb_BUSRd5ICc6bZQn13QIb4Iz3oM";
const EC_Y: &str = "5H9Y2xE5CikmiL2FCMs_cs6AYCrdQ881OyqB-A4MzvA";
const JWKS_PATH: &str = "/.well-known/jwks.json";

fn rsa_jwk(kid: &str) -> Value {
	json!({ "kty": "RSA", "alg": "RS256", "use": "sig", "kid": kid, "n": RSA_N, "e": "AQAB" })
}

fn ec_jwk() -> Value {
	json!({ "kty": "EC", "crv": "P-256", "x": EC_X, "y": EC_Y })
}

fn key_set(keys: Vec<Value>) -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(json!({ "keys": keys }))
}

/// Serve `keys` at the well-known key-set location only.
async fn mount_key_set(server: &MockServer, keys: Vec<Value>) {
	Mock::given(method("GET")).and(path(JWKS_PATH)).respond_with(key_set(keys)).mount(server).await;
}

fn sign(algorithm: Algorithm, kid: Option<&str>, claims: Value) -> String {
	let key = match algorithm {
		Algorithm::ES256 => EncodingKey::from_ec_pem(EC_PRIVATE.as_bytes()),
		_ => EncodingKey::from_rsa_pem(RSA_PRIVATE.as_bytes()),
	}
	.unwrap();
	let mut header = Header::new(algorithm);

	header.kid = kid.map(str::to_owned);

	jsonwebtoken::encode(&header, &claims, &key).unwrap()
}

fn sign_hmac(secret: &str, claims: Value) -> String {
	jsonwebtoken::encode(
		&Header::new(Algorithm::HS256),
		&claims,
		&EncodingKey::from_secret(secret.as_bytes()),
	)
	.unwrap()
}

fn authorizer(config: Config) -> Result<Authorizer> {
	Authorizer::with_environment(config, Environment::from_iter([("TENANT", "acme")]))
}

fn issuer_config(issuers: &[String]) -> Config {
	Config { issuers: issuers.to_vec(), skip_prefetch: true, ..Default::default() }
}

fn bearer(token: &str) -> Request<String> {
	Request::builder()
		.uri("/resource")
		.header("host", "app.example.com")
		.header("authorization", format!("Bearer {token}"))
		.body(String::new())
		.unwrap()
}
