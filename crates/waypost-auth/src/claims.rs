//! Token claims and capability flags

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::{KeyId, TokenId};

/// A named permission carried as a boolean claim (e.g. `connect-tcp`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability(Cow<'static, str>);

impl Capability {
    /// Plain TCP tunnels via CONNECT (RFC 9110)
    pub const CONNECT_TCP: Capability = Capability(Cow::Borrowed("connect-tcp"));
    /// UDP proxying (RFC 9298)
    pub const CONNECT_UDP: Capability = Capability(Cow::Borrowed("connect-udp"));
    /// IP proxying (RFC 9484)
    pub const CONNECT_IP: Capability = Capability(Cow::Borrowed("connect-ip"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Capability {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connect-tcp" => Self::CONNECT_TCP,
            "connect-udp" => Self::CONNECT_UDP,
            "connect-ip" => Self::CONNECT_IP,
            other => Self::new(other),
        })
    }
}

/// Claims of a capability token.
///
/// Everything besides the registered claims lands in `extra`, which is where
/// capability flags live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Issuer (authority name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Expiration time (unix seconds)
    pub exp: i64,
    /// Token ID, the revocation handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<TokenId>,
    /// Back-reference to the signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<KeyId>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TokenClaims {
    pub fn new(issuer: impl Into<String>, validity: Duration) -> Self {
        Self {
            iss: Some(issuer.into()),
            exp: (Utc::now() + validity).timestamp(),
            jti: Some(TokenId::random()),
            kid: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_key_id(mut self, kid: KeyId) -> Self {
        self.kid = Some(kid);
        self
    }

    pub fn with_token_id(mut self, jti: Option<TokenId>) -> Self {
        self.jti = jti;
        self
    }

    pub fn with_capability(mut self, capability: &Capability) -> Self {
        self.extra
            .insert(capability.as_str().to_string(), Value::Bool(true));
        self
    }

    pub fn with_capabilities<'a>(
        self,
        capabilities: impl IntoIterator<Item = &'a Capability>,
    ) -> Self {
        capabilities
            .into_iter()
            .fold(self, |claims, capability| claims.with_capability(capability))
    }

    /// A capability is granted by a boolean `true`, or the string `"true"`
    /// which some older issuers emit.
    pub fn grants(&self, capability: &Capability) -> bool {
        match self.extra.get(capability.as_str()) {
            Some(Value::Bool(granted)) => *granted,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_grants() {
        let claims = TokenClaims::new("issuer", Duration::hours(1))
            .with_capability(&Capability::CONNECT_TCP);

        assert!(claims.grants(&Capability::CONNECT_TCP));
        assert!(!claims.grants(&Capability::CONNECT_UDP));
    }

    #[test]
    fn test_string_true_is_accepted_other_values_are_not() {
        let mut claims = TokenClaims::new("issuer", Duration::hours(1));
        claims.extra.insert("connect-tcp".into(), json!("true"));
        claims.extra.insert("connect-udp".into(), json!(false));
        claims.extra.insert("connect-ip".into(), json!(1));

        assert!(claims.grants(&Capability::CONNECT_TCP));
        assert!(!claims.grants(&Capability::CONNECT_UDP));
        assert!(!claims.grants(&Capability::CONNECT_IP));
    }

    #[test]
    fn test_flags_serialize_at_top_level() {
        let claims = TokenClaims::new("issuer", Duration::hours(1))
            .with_key_id(KeyId::from("9"))
            .with_capability(&Capability::CONNECT_TCP);

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["connect-tcp"], json!(true));
        assert_eq!(value["kid"], json!("9"));
        assert_eq!(value["iss"], json!("issuer"));
    }

    #[test]
    fn test_numeric_jti_is_normalized() {
        let claims: TokenClaims =
            serde_json::from_value(json!({"exp": 10, "jti": 123456789, "connect-tcp": true}))
                .unwrap();

        assert_eq!(claims.jti, Some(TokenId::from("123456789")));
        assert!(claims.grants(&Capability::CONNECT_TCP));
        assert!(!claims.extra.contains_key("jti"));
    }

    #[test]
    fn test_expiry() {
        assert!(TokenClaims::new("issuer", Duration::seconds(-5)).is_expired());
        assert!(!TokenClaims::new("issuer", Duration::hours(1)).is_expired());
    }
}
