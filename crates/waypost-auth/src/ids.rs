//! Canonical identifiers for signing keys (`kid`) and tokens (`jti`).
//!
//! Issuers disagree on how these travel in JSON: some emit strings, some emit
//! integers, and some JSON stacks surface integers as floats. Both identifier
//! types accept all of those forms when deserializing and always serialize as a
//! string, so every comparison downstream works on one representation.

use rand::Rng;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Largest float that still maps onto an exact integer identifier (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

fn random_identifier() -> String {
    // 63 bits, always non-negative when read back as i64
    let value: u64 = rand::rngs::OsRng.gen::<u64>() >> 1;
    value.to_string()
}

struct IdentifierVisitor(&'static str);

impl<'de> Visitor<'de> for IdentifierVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a {} as a string or integer", self.0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        if v.is_empty() {
            return Err(E::custom(format!("empty {}", self.0)));
        }
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
        self.visit_str(&v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
        if v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_EXACT_FLOAT {
            Ok((v as i64).to_string())
        } else {
            Err(E::custom(format!("{} {} is not an integer", self.0, v)))
        }
    }
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// A fresh identifier drawn from the OS random source.
            pub fn random() -> Self {
                Self(random_identifier())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer
                    .deserialize_any(IdentifierVisitor($label))
                    .map(Self)
            }
        }
    };
}

identifier!(
    /// Identifies the signing key that produced a token (`kid`).
    KeyId,
    "key id"
);

identifier!(
    /// Per-token unique identifier used for revocation (`jti`).
    TokenId,
    "token id"
);
