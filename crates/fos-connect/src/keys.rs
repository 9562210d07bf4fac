//! WireGuard Key Handling
//!
//! Parses and validates the X25519 keys embedded in WireGuard profiles
//! and derives the interface public key handed to the tunnel.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// WireGuard private key (Curve25519)
#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(s)?;
        Ok(Self {
            secret: StaticSecret::from(bytes),
        })
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: X25519Public::from(&self.secret),
        }
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.secret.to_bytes() == other.secret.to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([redacted])")
    }
}

/// WireGuard public key (Curve25519)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: X25519Public,
}

impl PublicKey {
    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(s)?;
        Ok(Self {
            key: X25519Public::from(bytes),
        })
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_base64()[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

fn decode_key(s: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(s.trim()).map_err(|_| KeyError::InvalidBase64)?;
    bytes.try_into().map_err(|_| KeyError::InvalidLength)
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid base64 encoding")]
    InvalidBase64,

    #[error("Invalid key length (expected 32 bytes)")]
    InvalidLength,
}
