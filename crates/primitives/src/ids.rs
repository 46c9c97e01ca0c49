use core::fmt;
use core::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("expected {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex encoding")]
    InvalidHex,
}

macro_rules! hex_id {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != $len * 2 {
                    return Err(IdParseError::InvalidLength {
                        expected: $len * 2,
                        got: s.len(),
                    });
                }

                let mut bytes = [0_u8; $len];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| IdParseError::InvalidHex)?;

                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_id!(
    /// 32-byte event identifier: the SHA-256 of the canonical serialization.
    EventId,
    32
);

hex_id!(
    /// 32-byte x-only Schnorr public key.
    Pubkey,
    32
);

hex_id!(
    /// 64-byte Schnorr signature.
    Sig,
    64
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_hex() {
        let id: EventId = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36"
            .parse()
            .expect("valid hex id");

        assert_eq!(
            id.to_hex(),
            "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36"
        );

        let json = serde_json::to_string(&id).expect("serialize");
        let back: EventId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }

    #[test]
    fn rejects_wrong_length_and_bad_hex() {
        assert_eq!(
            "abcd".parse::<Pubkey>(),
            Err(IdParseError::InvalidLength {
                expected: 64,
                got: 4
            })
        );

        let bad = "zz".repeat(32);
        assert_eq!(bad.parse::<Pubkey>(), Err(IdParseError::InvalidHex));
    }

    #[test]
    fn ordering_is_lexicographic_on_bytes() {
        let a = EventId::from_bytes([0_u8; 32]);
        let b = EventId::from_bytes([1_u8; 32]);
        assert!(a < b);
    }
}
