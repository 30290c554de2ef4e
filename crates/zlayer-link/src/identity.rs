//! Link identity: the node's WireGuard keypair
//!
//! The keypair is generated on first use and then kept for the life of the
//! process. The provisioning service binds trust to the public key, so a
//! key that has been handed out is never replaced.

use crate::error::{LinkError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// An x25519 keypair in WireGuard format
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| LinkError::KeyGeneration(e.to_string()))?;

        let secret = StaticSecret::from(bytes);
        bytes.zeroize();

        Ok(Self::from_secret(secret))
    }

    /// Rebuild a keypair from a base64 encoded private key
    pub fn from_private_key(encoded: &str) -> Result<Self> {
        let mut bytes = STANDARD
            .decode(encoded)
            .map_err(|e| LinkError::InvalidKey(e.to_string()))?;

        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            LinkError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        bytes.zeroize();

        Ok(Self::from_secret(StaticSecret::from(array)))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Private key, base64 encoded
    pub fn private_key(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }

    /// Public key, base64 encoded
    pub fn public_key(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Process-lifetime holder of the link keypair
#[derive(Debug, Default)]
pub struct LinkIdentity {
    key: Option<KeyPair>,
}

impl LinkIdentity {
    /// An identity with no key generated yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the keypair, generating it on the first call
    pub fn ensure_key(&mut self) -> Result<&KeyPair> {
        if self.key.is_none() {
            let pair = KeyPair::generate()?;
            tracing::info!(public_key = %pair.public_key(), "Generated link keypair");
            self.key = Some(pair);
        }

        self.key
            .as_ref()
            .ok_or_else(|| LinkError::KeyGeneration("keypair missing after generation".into()))
    }

    /// Keypair, if it has been generated
    pub fn key(&self) -> Option<&KeyPair> {
        self.key.as_ref()
    }

    /// Whether a keypair has been generated
    pub fn is_initialized(&self) -> bool {
        self.key.is_some()
    }
}
