//! Ed25519 long-term identities and signatures.
//!
//! The accessory keeps one [`IdentityKeyPair`] for its whole life; controllers
//! are known only by their 32-byte public keys, so verification is a free
//! function over raw bytes.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hapd_core::error::CryptoError;
use rand::rngs::OsRng;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
/// Stored secret: seed followed by the public key.
pub const SECRET_LEN: usize = 64;

/// Long-term Ed25519 identity key pair.
///
/// The signing key wipes itself on drop, so clones are as safe as the
/// original.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Load the stored form written by [`IdentityKeyPair::secret_bytes`].
    ///
    /// Fails when the public half does not belong to the seed, which is how
    /// a corrupted key block shows up.
    pub fn from_secret(secret: &[u8; SECRET_LEN]) -> Result<Self, CryptoError> {
        let (seed, public) = secret.split_at(32);
        let mut seed_bytes = [0u8; 32];
        seed_bytes.copy_from_slice(seed);
        let pair = Self::from_seed(&seed_bytes);
        if pair.public_key()[..] != *public {
            return Err(CryptoError::KeyDerivation(
                "stored public key does not match seed".to_string(),
            ));
        }
        Ok(pair)
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_LEN] {
        self.signing.to_keypair_bytes()
    }

    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Check `signature` over `message` against a raw public key.
///
/// Uses strict verification: small-order keys and non-canonical signatures
/// are refused.
pub fn verify(
    public_key: &[u8; PUBLIC_KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidPublicKey(format!("Ed25519: {}", e)))?;
    let signature = Signature::from_bytes(signature);
    key.verify_strict(message, &signature)
        .map_err(|_| CryptoError::Decryption("signature verification failed".to_string()))
}
