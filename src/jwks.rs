//! JSON Web Key Set wire types and decoding into verification keys.

// std
use std::collections::HashMap;
// crates.io
use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	key::{EcCurve, KeyMaterial},
};

/// Single key record of a key set. Unknown members are ignored and `null` members read as empty.
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
	#[serde(default, deserialize_with = "nullable")]
	pub kid: String,
	#[serde(default, deserialize_with = "nullable")]
	pub kty: String,
	#[serde(default, deserialize_with = "nullable")]
	pub alg: String,
	#[serde(default, rename = "use", deserialize_with = "nullable")]
	pub usage: String,
	#[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "nullable")]
	pub n: String,
	#[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "nullable")]
	pub e: String,
	#[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "nullable")]
	pub crv: String,
	#[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "nullable")]
	pub x: String,
	#[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "nullable")]
	pub y: String,
}
impl JsonWebKey {
	/// RFC 7638 thumbprint of the key's required members.
	///
	/// EC thumbprints always name `P-256`, whatever curve the record declares, so identifiers stay
	/// stable with key sets published by existing deployments.
	pub fn thumbprint(&self) -> String {
		let canonical = match self.kty.as_str() {
			"RSA" => format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, self.e, self.n),
			"EC" => format!(r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#, self.x, self.y),
			_ => String::new(),
		};

		BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
	}

	/// Identifier of the key: its `kid`, or the thumbprint when absent.
	pub fn identifier(&self) -> String {
		if self.kid.is_empty() { self.thumbprint() } else { self.kid.clone() }
	}

	/// Decode the record, returning `None` for key types this crate does not verify with.
	pub fn to_key_material(&self) -> Option<Result<KeyMaterial>> {
		match self.kty.as_str() {
			"RSA" => Some(KeyMaterial::rsa_components(&self.n, &self.e)),
			"EC" => {
				let curve = EcCurve::from_crv(&self.crv)
					.or_else(|| EcCurve::from_alg(&self.alg))
					.unwrap_or(EcCurve::P256);

				Some(KeyMaterial::ec_components(curve, &self.x, &self.y))
			},
			_ => None,
		}
	}
}

/// Key set document served by an issuer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
	/// Key records in publication order.
	#[serde(default, deserialize_with = "nullable")]
	pub keys: Vec<JsonWebKey>,
}
impl JsonWebKeySet {
	/// Decode every usable key, keyed by identifier.
	///
	/// A record with malformed encoding is logged and skipped; unknown key types are ignored.
	pub fn decode(&self, source: &str) -> HashMap<String, Arc<KeyMaterial>> {
		let mut keys = HashMap::with_capacity(self.keys.len());

		for jwk in &self.keys {
			let kid = jwk.identifier();

			match jwk.to_key_material() {
				Some(Ok(key)) => {
					keys.insert(kid, Arc::new(key));
				},
				Some(Err(err)) => {
					tracing::warn!(
						kid = %kid,
						kty = %jwk.kty,
						url = source,
						error = %err,
						"skipping malformed key"
					);
				},
				None => {
					tracing::debug!(
						kid = %kid,
						kty = %jwk.kty,
						url = source,
						"ignoring unsupported key type"
					);
				},
			}
		}

		keys
	}
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
	D: Deserializer<'de>,
	T: Default + Deserialize<'de>,
{
	Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
