//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Content digest in `algorithm:hex` form, e.g. `sha256:9f86d0...`.
    Digest
);

string_newtype!(
    /// Full 64-character hex container identifier.
    ContainerId
);

impl Digest {
    /// Digest of `data` using sha256, the only algorithm the store writes.
    pub fn sha256(data: &[u8]) -> Self {
        Self(format!("sha256:{}", hex::encode(Sha256::digest(data))))
    }

    /// Algorithm prefix (`sha256`), or the empty string for malformed digests.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map_or("", |(alg, _)| alg)
    }

    /// Encoded part after the algorithm prefix.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, hex)| hex)
    }

    /// Validate `algorithm:hex` shape: lowercase sha256 with 64 hex characters.
    pub fn is_valid(&self) -> bool {
        self.algorithm() == "sha256"
            && self.encoded().len() == 64
            && self
                .encoded()
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl ContainerId {
    /// Truncated 12-character prefix used for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_input() {
        let d = Digest::sha256(b"");
        assert_eq!(
            d.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(d.algorithm(), "sha256");
        assert!(d.is_valid());
    }

    #[test]
    fn digest_rejects_malformed() {
        assert!(!Digest::new("sha256:xyz").is_valid());
        assert!(!Digest::new("md5:abcd").is_valid());
        assert!(!Digest::new("nocolon").is_valid());
        assert_eq!(Digest::new("nocolon").algorithm(), "");
    }

    #[test]
    fn digest_serializes_transparently() {
        let d = Digest::new("sha256:abc");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"sha256:abc\"");
    }

    #[test]
    fn container_id_short_prefix() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }
}
