//! RSA signing keys and their published (public) form

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::claims::TokenClaims;
use crate::ids::KeyId;
use crate::jwt::{self, TokenError};

/// Key type advertised for every published key
pub const KEY_TYPE: &str = "RSA";

/// Modulus size of generated keys
pub const KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("Key encoding failed: {0}")]
    Encoding(String),

    #[error("Key decoding failed: {0}")]
    Decoding(String),

    #[error("Unsupported key type '{0}'")]
    UnsupportedKeyType(String),
}

/// The authority's private signing key.
///
/// Only the SPKI encoding of the public half ever leaves this type, through
/// [`SigningKey::published`].
pub struct SigningKey {
    kid: KeyId,
    public_der: Vec<u8>,
    encoding_key: EncodingKey,
    expires_at: DateTime<Utc>,
}

impl SigningKey {
    /// Generate a fresh keypair with a random key id, valid for `validity`.
    ///
    /// RSA generation takes long enough to stall a runtime worker, so it runs
    /// on the blocking pool.
    pub async fn generate(validity: Duration) -> Result<Self, KeyError> {
        let private = tokio::task::spawn_blocking(|| {
            RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)
        })
        .await
        .map_err(|e| KeyError::Generation(e.to_string()))?
        .map_err(|e| KeyError::Generation(e.to_string()))?;

        Self::from_private_key(KeyId::random(), &private, Utc::now() + validity)
    }

    pub fn from_private_key(
        kid: KeyId,
        private: &RsaPrivateKey,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, KeyError> {
        let pkcs1 = private
            .to_pkcs1_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        let public_der = RsaPublicKey::from(private)
            .to_public_key_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?
            .as_bytes()
            .to_vec();

        Ok(Self {
            kid,
            public_der,
            encoding_key: EncodingKey::from_rsa_der(pkcs1.as_bytes()),
            expires_at,
        })
    }

    pub fn kid(&self) -> &KeyId {
        &self.kid
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn published(&self) -> PublishedKey {
        PublishedKey {
            kty: KEY_TYPE.to_string(),
            k: STANDARD.encode(&self.public_der),
            kid: self.kid.clone(),
            expires_at: self.expires_at.timestamp(),
        }
    }

    /// The public half as a PEM `PUBLIC KEY` block.
    pub fn public_key_pem(&self) -> Result<String, KeyError> {
        RsaPublicKey::from_public_key_der(&self.public_der)
            .and_then(|public| public.to_public_key_pem(LineEnding::LF))
            .map_err(|e| KeyError::Encoding(e.to_string()))
    }

    /// Sign `claims` after stamping this key's id into them.
    pub fn sign(&self, claims: TokenClaims) -> Result<String, TokenError> {
        let claims = claims.with_key_id(self.kid.clone());
        jwt::sign(&claims, &self.encoding_key, &self.kid)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Public key entry as served in the JWKS document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishedKey {
    pub kty: String,
    /// Standard base64 of the DER SubjectPublicKeyInfo
    pub k: String,
    pub kid: KeyId,
    /// Unix seconds
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl PublishedKey {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < 0 || self.expires_at < Utc::now().timestamp()
    }

    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        if !self.kty.eq_ignore_ascii_case(KEY_TYPE) {
            return Err(KeyError::UnsupportedKeyType(self.kty.clone()));
        }

        let spki = STANDARD
            .decode(&self.k)
            .map_err(|e| KeyError::Decoding(e.to_string()))?;
        let public = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| KeyError::Decoding(e.to_string()))?;
        let pkcs1 = public
            .to_pkcs1_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;

        Ok(DecodingKey::from_rsa_der(pkcs1.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Capability;
    use crate::jwt::UnverifiedToken;

    #[tokio::test]
    async fn test_published_key_verifies_own_tokens() {
        let key = SigningKey::generate(Duration::hours(24)).await.unwrap();
        let published = key.published();

        assert_eq!(published.kty, "RSA");
        assert_eq!(&published.kid, key.kid());
        assert!(!published.is_expired());

        let token = key
            .sign(TokenClaims::new("test", Duration::hours(1)).with_capability(&Capability::CONNECT_TCP))
            .unwrap();
        let parsed = UnverifiedToken::parse(&token).unwrap();
        assert_eq!(parsed.key_id(), Some(key.kid()));

        let claims = parsed.verify(&published.decoding_key().unwrap()).unwrap();
        assert_eq!(claims.kid.as_ref(), Some(key.kid()));
        assert!(claims.grants(&Capability::CONNECT_TCP));
    }

    #[tokio::test]
    async fn test_public_key_pem_matches_published_key() {
        let key = SigningKey::generate(Duration::hours(1)).await.unwrap();
        let pem = key.public_key_pem().unwrap();

        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(pem.trim_end().ends_with("-----END PUBLIC KEY-----"));

        let from_pem = RsaPublicKey::from_public_key_pem(&pem).unwrap();
        let der = from_pem.to_public_key_der().unwrap();
        assert_eq!(STANDARD.encode(der.as_bytes()), key.published().k);
    }

    #[test]
    fn test_published_key_json_shape() {
        let published = PublishedKey {
            kty: KEY_TYPE.to_string(),
            k: "AAAA".to_string(),
            kid: KeyId::from("77"),
            expires_at: 1_700_000_000,
        };

        let value = serde_json::to_value(&published).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"kty": "RSA", "k": "AAAA", "kid": "77", "expiresAt": 1_700_000_000})
        );
    }

    #[test]
    fn test_non_rsa_or_garbage_key_rejected() {
        let mut published = PublishedKey {
            kty: "EC".to_string(),
            k: "AAAA".to_string(),
            kid: KeyId::from("1"),
            expires_at: i64::MAX,
        };
        assert!(matches!(
            published.decoding_key(),
            Err(KeyError::UnsupportedKeyType(_))
        ));

        published.kty = KEY_TYPE.to_string();
        assert!(matches!(published.decoding_key(), Err(KeyError::Decoding(_))));
    }

    #[test]
    fn test_negative_expiry_counts_as_expired() {
        let published = PublishedKey {
            kty: KEY_TYPE.to_string(),
            k: String::new(),
            kid: KeyId::from("1"),
            expires_at: -1,
        };
        assert!(published.is_expired());
    }
}
