//! Chain-assigned identities.
//!
//! All identities are 32-byte values. They are rendered as `0x`-prefixed hex
//! everywhere they leave the process (logs, JSON, config).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const LEN: usize = 32;

            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// First 8 bytes as hex, for log fields.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..8])
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), self.short())
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex32(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

id_type!(
    /// Identity of a deployed program.
    ProgramId
);
id_type!(
    /// Identity of a single message, assigned by the chain on submission.
    MessageId
);
id_type!(
    /// Identity of uploaded WASM code.
    CodeId
);
id_type!(
    /// An account or program acting as a message source.
    ActorId
);
id_type!(BlockHash);

impl CodeId {
    /// BLAKE3 hash of the WASM bytes.
    pub fn generate(code: &[u8]) -> Self {
        Self(*blake3::hash(code).as_bytes())
    }
}

impl From<ProgramId> for ActorId {
    fn from(id: ProgramId) -> Self {
        Self(id.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

/// Parse a 32-byte hex string, with or without a `0x` prefix.
pub fn parse_hex32(s: &str) -> Result<[u8; 32], IdParseError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| IdParseError::Hex(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(IdParseError::Length(bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
