//! Verification key material.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use jsonwebtoken::DecodingKey;
// self
use crate::_prelude::*;

const EC_PUBLIC_KEY_TAG: &str = "-----BEGIN EC PUBLIC KEY";
const PUBLIC_KEY_TAG: &str = "-----BEGIN PUBLIC KEY";
const RSA_PUBLIC_KEY_TAG: &str = "-----BEGIN RSA PUBLIC KEY";

/// Elliptic curves a key set may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcCurve {
	/// NIST P-256.
	P256,
	/// NIST P-384.
	P384,
	/// NIST P-521.
	P521,
}
impl EcCurve {
	/// Curve named by a JWK `crv` member.
	pub fn from_crv(crv: &str) -> Option<Self> {
		match crv {
			"P-256" => Some(Self::P256),
			"P-384" => Some(Self::P384),
			"P-521" => Some(Self::P521),
			_ => None,
		}
	}

	/// Curve implied by a JWK `alg` member.
	pub fn from_alg(alg: &str) -> Option<Self> {
		match alg {
			"ES256" => Some(Self::P256),
			"ES384" => Some(Self::P384),
			"ES512" => Some(Self::P521),
			_ => None,
		}
	}
}
impl Display for EcCurve {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(match self {
			Self::P256 => "P-256",
			Self::P384 => "P-384",
			Self::P521 => "P-521",
		})
	}
}

/// Shape of the key held by a [`KeyMaterial`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
	/// RSA public key.
	Rsa,
	/// EC public key; the curve is unknown for keys loaded from PEM.
	Ec(Option<EcCurve>),
	/// Shared HMAC secret.
	Secret,
}

/// Immutable verification key, shared by reference once cached.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
	kind: KeyKind,
	decoding: DecodingKey,
}
impl KeyMaterial {
	/// Build an RSA key from base64url modulus and exponent.
	pub fn rsa_components(n: &str, e: &str) -> Result<Self> {
		let decoding =
			DecodingKey::from_rsa_components(n.trim_end_matches('='), e.trim_end_matches('='))?;

		Ok(Self { kind: KeyKind::Rsa, decoding })
	}

	/// Build an EC key from base64url affine coordinates.
	pub fn ec_components(curve: EcCurve, x: &str, y: &str) -> Result<Self> {
		let decoding = DecodingKey::from_ec_components(x, y)?;

		Ok(Self { kind: KeyKind::Ec(Some(curve)), decoding })
	}

	/// Build a shared HMAC secret.
	pub fn secret(bytes: &[u8]) -> Self {
		Self { kind: KeyKind::Secret, decoding: DecodingKey::from_secret(bytes) }
	}

	/// Parse statically configured key material.
	///
	/// PEM public keys are recognised by their armour; any other text is an HMAC secret. An
	/// empty value yields `None`.
	pub fn from_config(raw: &str) -> Result<Option<Self>> {
		if raw.is_empty() {
			return Ok(None);
		}
		if raw.starts_with(EC_PUBLIC_KEY_TAG) || raw.starts_with(PUBLIC_KEY_TAG) {
			let ec = Self::ec_pem(raw);

			// Only the generic armour may still hold an RSA key.
			if ec.is_ok() || raw.starts_with(EC_PUBLIC_KEY_TAG) {
				return ec.map(Some);
			}
		}
		if raw.starts_with(RSA_PUBLIC_KEY_TAG) || raw.starts_with(PUBLIC_KEY_TAG) {
			return Self::rsa_pem(raw).map(Some);
		}

		Ok(Some(Self::secret(raw.as_bytes())))
	}

	fn ec_pem(raw: &str) -> Result<Self> {
		let normalized = raw.replace("EC PUBLIC KEY", "PUBLIC KEY");
		let decoding = DecodingKey::from_ec_pem(normalized.as_bytes())?;

		Ok(Self { kind: KeyKind::Ec(None), decoding })
	}

	fn rsa_pem(raw: &str) -> Result<Self> {
		let decoding = DecodingKey::from_rsa_pem(raw.as_bytes())?;

		Ok(Self { kind: KeyKind::Rsa, decoding })
	}

	/// Key shape.
	pub fn kind(&self) -> KeyKind {
		self.kind
	}

	/// Key in the form the verifier consumes.
	pub fn decoding_key(&self) -> &DecodingKey {
		&self.decoding
	}
}

/// Parse the `secrets` table, rejecting empty or malformed entries.
pub fn static_keys<'a, I>(secrets: I) -> Result<Vec<(String, Arc<KeyMaterial>)>>
where
	I: IntoIterator<Item = (&'a String, &'a String)>,
{
	secrets
		.into_iter()
		.map(|(kid, raw)| {
			let key = KeyMaterial::from_config(raw).map_err(|err| Error::Validation {
				field: "secrets",
				reason: format!("kid {kid}: invalid key: {err}"),
			})?;
			let key = key.ok_or_else(|| Error::Validation {
				field: "secrets",
				reason: format!("kid {kid}: invalid key: Key is empty"),
			})?;

			Ok((kid.clone(), Arc::new(key)))
		})
		.collect()
}
