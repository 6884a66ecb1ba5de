//! Accessory long-term identity.
//!
//! The accessory signs pair-setup M6 and pair-verify M2 with one Ed25519
//! keypair and announces itself with one identifier (`XX:XX:XX:XX:XX:XX`).
//! A controller compares both against what it stored at pairing time, so
//! neither may change once the first controller has paired.

use hapd_core::error::Result;
use hapd_crypto::ed25519::IdentityKeyPair;

use crate::traits::PairingStore;

/// Accessory identifier plus long-term keypair (LTPK/LTSK).
#[derive(Clone)]
pub struct AccessoryIdentity {
    id: String,
    keypair: IdentityKeyPair,
}

impl AccessoryIdentity {
    pub fn new(id: impl Into<String>, keypair: IdentityKeyPair) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    /// Read the keypair from `store`, if one was ever generated.
    pub fn from_store(store: &dyn PairingStore, id: &str) -> Result<Option<Self>> {
        Ok(store.long_term_keys()?.map(|keypair| Self::new(id, keypair)))
    }

    /// Generate a fresh keypair and persist it.
    pub fn generate_into(store: &mut dyn PairingStore, id: &str) -> Result<Self> {
        let keypair = IdentityKeyPair::generate();
        store.set_long_term_keys(&keypair)?;
        tracing::info!(accessory_id = %id, "Generated accessory long-term keys");
        Ok(Self::new(id, keypair))
    }

    /// Load the keypair from `store`, generating and persisting one when absent.
    pub fn load_or_generate(store: &mut dyn PairingStore, id: &str) -> Result<Self> {
        match Self::from_store(store, id)? {
            Some(identity) => Ok(identity),
            None => Self::generate_into(store, id),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier bytes as carried in TLV Identifier items and signatures.
    pub fn id_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }
}

impl std::fmt::Debug for AccessoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessoryIdentity")
            .field("id", &self.id)
            .field("keypair", &self.keypair)
            .finish()
    }
}
