//! Compact JWS handling for capability tokens
//!
//! Tokens are parsed in two steps. [`UnverifiedToken::parse`] splits the
//! compact form and decodes the header without touching the signature, which
//! is how the verifier learns which `kid` to look up. [`UnverifiedToken::verify`]
//! then checks the signature against that key and only accepts the RSA family,
//! so a token claiming HS256 can never be "verified" with a public key posing
//! as an HMAC secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{crypto, encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::claims::TokenClaims;
use crate::ids::KeyId;

/// Algorithms accepted for signed tokens.
pub const ACCEPTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Algorithm marker of an unsigned token
pub const UNSIGNED_ALGORITHM: &str = "none";

/// Token errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported signing algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Invalid claims: {0}")]
    InvalidClaims(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The parts of a JOSE header the verifier cares about.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub kid: Option<KeyId>,
}

impl TokenHeader {
    pub fn is_unsigned(&self) -> bool {
        self.alg.eq_ignore_ascii_case(UNSIGNED_ALGORITHM)
    }
}

/// A compact token split into its segments, header decoded, nothing trusted.
#[derive(Debug)]
pub struct UnverifiedToken<'a> {
    signing_input: &'a str,
    signature: &'a str,
    header: TokenHeader,
    payload: Vec<u8>,
}

impl<'a> UnverifiedToken<'a> {
    pub fn parse(raw: &'a str) -> Result<Self, TokenError> {
        let (signing_input, signature) = raw
            .rsplit_once('.')
            .ok_or_else(|| TokenError::Malformed("expected three segments".to_string()))?;
        let (header_b64, payload_b64) = signing_input
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("expected three segments".to_string()))?;

        if header_b64.is_empty() || payload_b64.is_empty() || payload_b64.contains('.') {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| TokenError::Malformed(format!("header encoding: {}", e)))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| TokenError::Malformed(format!("payload encoding: {}", e)))?;
        let header: TokenHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| TokenError::Malformed(format!("header: {}", e)))?;

        Ok(Self {
            signing_input,
            signature,
            header,
            payload,
        })
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn key_id(&self) -> Option<&KeyId> {
        self.header.kid.as_ref()
    }

    /// Decode the payload without checking anything.
    pub fn claims(&self) -> Result<TokenClaims, TokenError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Verify the signature with `key` and check expiry.
    pub fn verify(&self, key: &DecodingKey) -> Result<TokenClaims, TokenError> {
        let algorithm = Algorithm::from_str(&self.header.alg)
            .map_err(|_| TokenError::UnsupportedAlgorithm(self.header.alg.clone()))?;
        if !ACCEPTED_ALGORITHMS.contains(&algorithm) {
            return Err(TokenError::UnsupportedAlgorithm(self.header.alg.clone()));
        }

        if !crypto::verify(self.signature, self.signing_input.as_bytes(), key, algorithm)? {
            return Err(TokenError::BadSignature);
        }

        self.unexpired_claims()
    }

    /// Claims of an `alg: none` token. Expiry is still enforced.
    pub fn unsigned_claims(&self) -> Result<TokenClaims, TokenError> {
        if !self.header.is_unsigned() {
            return Err(TokenError::UnsupportedAlgorithm(self.header.alg.clone()));
        }
        self.unexpired_claims()
    }

    fn unexpired_claims(&self) -> Result<TokenClaims, TokenError> {
        let claims = self.claims()?;
        if claims.is_expired() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Sign `claims` with RS256, stamping `kid` into the header.
pub fn sign(claims: &TokenClaims, key: &EncodingKey, kid: &KeyId) -> Result<String, TokenError> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());

    Ok(encode(&header, claims, key)?)
}

/// Encode `claims` as an unsigned `alg: none` token with an empty signature.
///
/// Only a gate running in insecure mode accepts these.
pub fn encode_unsigned(claims: &TokenClaims) -> Result<String, TokenError> {
    let header = serde_json::json!({ "alg": UNSIGNED_ALGORITHM, "typ": "JWT" });
    Ok(format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn segment(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json)
    }

    #[test]
    fn test_parse_reads_numeric_kid() {
        let raw = format!(
            "{}.{}.sig",
            segment(r#"{"alg":"RS256","kid":12345}"#),
            segment(r#"{"exp":1}"#)
        );

        let token = UnverifiedToken::parse(&raw).unwrap();
        assert_eq!(token.key_id(), Some(&KeyId::from("12345")));
        assert_eq!(token.header().alg, "RS256");
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        for raw in ["", "abc", "a.b", "a.b.c.d", ".b.c", "a..c"] {
            assert!(
                UnverifiedToken::parse(raw).is_err(),
                "accepted malformed token {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_hmac_token_is_refused_before_signature_check() {
        let claims = TokenClaims::new("issuer", Duration::hours(1));
        let raw = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"public-key-bytes"),
        )
        .unwrap();

        let token = UnverifiedToken::parse(&raw).unwrap();
        let result = token.verify(&DecodingKey::from_secret(b"public-key-bytes"));

        assert!(matches!(result, Err(TokenError::UnsupportedAlgorithm(alg)) if alg == "HS256"));
    }

    #[test]
    fn test_unsigned_claims() {
        let raw = format!(
            "{}.{}.",
            segment(r#"{"alg":"none"}"#),
            segment(&serde_json::to_string(&TokenClaims::new("i", Duration::hours(1))).unwrap())
        );
        let token = UnverifiedToken::parse(&raw).unwrap();
        assert!(token.header().is_unsigned());
        assert!(token.unsigned_claims().is_ok());
        assert!(matches!(
            token.verify(&DecodingKey::from_secret(b"k")),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_encode_unsigned_parses_back() {
        let claims = TokenClaims::new("dev", Duration::hours(1));
        let raw = encode_unsigned(&claims).unwrap();

        assert!(raw.ends_with('.'));
        let token = UnverifiedToken::parse(&raw).unwrap();
        assert!(token.header().is_unsigned());
        assert_eq!(token.header().typ.as_deref(), Some("JWT"));
        assert_eq!(token.unsigned_claims().unwrap(), claims);
    }

    #[test]
    fn test_expired_unsigned_token_rejected() {
        let raw = format!(
            "{}.{}.",
            segment(r#"{"alg":"none"}"#),
            segment(&serde_json::to_string(&TokenClaims::new("i", Duration::hours(-1))).unwrap())
        );
        let token = UnverifiedToken::parse(&raw).unwrap();
        assert!(matches!(token.unsigned_claims(), Err(TokenError::Expired)));
    }
}
