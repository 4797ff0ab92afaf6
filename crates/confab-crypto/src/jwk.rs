//! JSON Web Keys (RFC 7517) for the three key types the KMS exchanges:
//! symmetric (`oct`), elliptic curve (`EC`, P-256 only), and `RSA` public
//! keys.

use std::fmt;

use p256::{
    EncodedPoint, FieldBytes, PublicKey,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
};
use rsa::{BigUint, RsaPublicKey, traits::PublicKeyParts};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{encoding, error::CryptoError};

/// `kty` of symmetric keys
pub const KTY_OCT: &str = "oct";

/// `kty` of elliptic curve keys
pub const KTY_EC: &str = "EC";

/// `kty` of RSA keys
pub const KTY_RSA: &str = "RSA";

/// The only supported curve
pub const CRV_P256: &str = "P-256";

/// Size of a P-256 coordinate in bytes
const COORDINATE_SIZE: usize = 32;

/// A JSON Web Key.
///
/// Only the members used by the key exchange are modelled. Unknown members
/// are ignored on input and never emitted.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (`oct`, `EC`, `RSA`)
    pub kty: String,
    /// Key identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Symmetric key value (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    /// Curve name for EC keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    /// Symmetric key from raw bytes.
    pub fn symmetric(key: &[u8]) -> Self {
        Self { kty: KTY_OCT.to_string(), k: Some(encoding::encode(key)), ..Self::default() }
    }

    /// Public JWK for a P-256 key.
    pub fn from_p256(public: &PublicKey) -> Self {
        let point = public.to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            unreachable!("uncompressed encoding of a valid public key has both coordinates");
        };

        Self {
            kty: KTY_EC.to_string(),
            crv: Some(CRV_P256.to_string()),
            x: Some(encoding::encode(x)),
            y: Some(encoding::encode(y)),
            ..Self::default()
        }
    }

    /// Public JWK for an RSA key.
    pub fn from_rsa(public: &RsaPublicKey) -> Self {
        Self {
            kty: KTY_RSA.to_string(),
            n: Some(encoding::encode(&public.n().to_bytes_be())),
            e: Some(encoding::encode(&public.e().to_bytes_be())),
            ..Self::default()
        }
    }

    /// Attach a key identifier.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// True for `oct` keys.
    pub fn is_symmetric(&self) -> bool {
        self.kty == KTY_OCT
    }

    /// Raw bytes of a symmetric key.
    ///
    /// # Errors
    ///
    /// - `WrongKeyType` if `kty` is not `oct`
    /// - `InvalidKey` if `k` is missing or not base64url
    pub fn symmetric_bytes(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if !self.is_symmetric() {
            return Err(CryptoError::WrongKeyType { expected: KTY_OCT, actual: self.kty.clone() });
        }

        let k = self.k.as_deref().ok_or_else(|| missing("k"))?;
        let bytes = encoding::decode(k, "k").map_err(invalid_key)?;
        Ok(Zeroizing::new(bytes))
    }

    /// Parse as a P-256 public key.
    ///
    /// # Errors
    ///
    /// - `WrongKeyType` if `kty` is not `EC`
    /// - `InvalidKey` if the curve is not P-256 or the point is not on it
    pub fn to_p256(&self) -> Result<PublicKey, CryptoError> {
        if self.kty != KTY_EC {
            return Err(CryptoError::WrongKeyType { expected: KTY_EC, actual: self.kty.clone() });
        }
        if self.crv.as_deref() != Some(CRV_P256) {
            return Err(CryptoError::InvalidKey {
                reason: format!("unsupported curve: {}", self.crv.as_deref().unwrap_or("none")),
            });
        }

        let x = self.coordinate(self.x.as_deref(), "x")?;
        let y = self.coordinate(self.y.as_deref(), "y")?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );

        Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| CryptoError::InvalidKey { reason: "point is not on P-256".to_string() })
    }

    /// Parse as an RSA public key.
    ///
    /// # Errors
    ///
    /// - `WrongKeyType` if `kty` is not `RSA`
    /// - `InvalidKey` if the modulus or exponent is missing or rejected
    pub fn to_rsa(&self) -> Result<RsaPublicKey, CryptoError> {
        if self.kty != KTY_RSA {
            return Err(CryptoError::WrongKeyType { expected: KTY_RSA, actual: self.kty.clone() });
        }

        let n = self.n.as_deref().ok_or_else(|| missing("n"))?;
        let e = self.e.as_deref().ok_or_else(|| missing("e"))?;
        let n = encoding::decode(n, "n").map_err(invalid_key)?;
        let e = encoding::decode(e, "e").map_err(invalid_key)?;

        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })
    }

    fn coordinate(&self, value: Option<&str>, name: &'static str) -> Result<Vec<u8>, CryptoError> {
        let value = value.ok_or_else(|| missing(name))?;
        let bytes = encoding::decode(value, name).map_err(invalid_key)?;
        if bytes.len() != COORDINATE_SIZE {
            return Err(CryptoError::InvalidKey {
                reason: format!(
                    "{name} coordinate is {} bytes, expected {COORDINATE_SIZE}",
                    bytes.len()
                ),
            });
        }
        Ok(bytes)
    }
}

fn invalid_key(err: CryptoError) -> CryptoError {
    CryptoError::InvalidKey { reason: err.to_string() }
}

fn missing(member: &str) -> CryptoError {
    CryptoError::InvalidKey { reason: format!("missing member: {member}") }
}

// Symmetric key material stays out of logs.
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("k", &self.k.as_ref().map(|_| "<redacted>"))
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .finish_non_exhaustive()
    }
}
