//! X25519 key agreement for pair-verify.
//!
//! Each verify attempt uses a fresh pair; [`EcdhKeyPair::diffie_hellman`]
//! consumes it so a secret never outlives its exchange.

use hapd_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_LEN: usize = 32;

/// Ephemeral X25519 key pair.
pub struct EcdhKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        Self::from_static(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild a pair from a fixed scalar.
    pub fn from_secret(secret: &[u8; KEY_LEN]) -> Self {
        Self::from_static(StaticSecret::from(*secret))
    }

    fn from_static(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// Agree on a shared secret with `peer_public`, consuming the pair.
    ///
    /// A non-contributory result (the peer sent a low-order point, all-zero
    /// key included) is refused.
    pub fn diffie_hellman(self, peer_public: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey(
                "X25519 peer key is a low-order point".to_string(),
            ));
        }
        Ok(shared.to_bytes())
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}
