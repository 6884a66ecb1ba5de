//! Secret key material handed between the handshakes and the session layer.
//!
//! All types wipe their bytes on drop and print redacted.

use std::fmt;

use crate::hkdf::{self, Context};
use hapd_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw agreement output: the SRP session key or an X25519 shared secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<[u8; 32]> for SharedSecret {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

/// ChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Per-direction keys protecting frames after pair-verify.
#[derive(Clone, ZeroizeOnDrop)]
pub struct TrafficKeys {
    /// Seals frames the accessory sends.
    pub accessory_to_controller: EncryptionKey,
    /// Opens frames the controller sends.
    pub controller_to_accessory: EncryptionKey,
}

impl TrafficKeys {
    /// Derive both directions from the pair-verify shared secret.
    ///
    /// The labels are named from the controller's point of view, so the
    /// accessory seals with the "read" key.
    pub fn derive(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let ikm = shared_secret.as_bytes();
        Ok(Self {
            accessory_to_controller: EncryptionKey(hkdf::derive(Context::ControlRead, ikm)?),
            controller_to_accessory: EncryptionKey(hkdf::derive(Context::ControlWrite, ikm)?),
        })
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.0.len())
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl fmt::Debug for TrafficKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrafficKeys { .. }")
    }
}
