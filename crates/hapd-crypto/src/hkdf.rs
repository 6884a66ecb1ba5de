//! HKDF-SHA512 key derivation.
//!
//! Every key the handshakes use is 32 bytes, expanded from either the SRP
//! session key (setup) or the X25519 shared secret (verify, session) under a
//! fixed salt/info pair named by [`Context`].

use hapd_core::error::CryptoError;

use hkdf::Hkdf;
use sha2::Sha512;

/// Where a derived key is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// Seals setup M5 and M6 sub-TLVs.
    SetupEncrypt,
    /// Prefix of the controller's M5 signature.
    ControllerSign,
    /// Prefix of the accessory's M6 signature.
    AccessorySign,
    /// Seals verify M2 and M3 sub-TLVs.
    VerifyEncrypt,
    /// Frames the controller writes to the accessory.
    ControlWrite,
    /// Frames the accessory writes to the controller.
    ControlRead,
}

impl Context {
    pub const fn salt(self) -> &'static [u8] {
        match self {
            Context::SetupEncrypt => b"Pair-Setup-Encrypt-Salt",
            Context::ControllerSign => b"Pair-Setup-Controller-Sign-Salt",
            Context::AccessorySign => b"Pair-Setup-Accessory-Sign-Salt",
            Context::VerifyEncrypt => b"Pair-Verify-Encrypt-Salt",
            Context::ControlWrite | Context::ControlRead => b"Control-Salt",
        }
    }

    pub const fn info(self) -> &'static [u8] {
        match self {
            Context::SetupEncrypt => b"Pair-Setup-Encrypt-Info",
            Context::ControllerSign => b"Pair-Setup-Controller-Sign-Info",
            Context::AccessorySign => b"Pair-Setup-Accessory-Sign-Info",
            Context::VerifyEncrypt => b"Pair-Verify-Encrypt-Info",
            Context::ControlWrite => b"Control-Write-Encryption-Key",
            Context::ControlRead => b"Control-Read-Encryption-Key",
        }
    }
}

/// Derive the 32-byte key for `context` from `ikm`.
pub fn derive(context: Context, ikm: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut okm = [0u8; 32];
    expand_into(ikm, context.salt(), context.info(), &mut okm)?;
    Ok(okm)
}

/// Expand `ikm` into `length` bytes under an arbitrary salt and info.
pub fn expand(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
    let mut okm = vec![0u8; length];
    expand_into(ikm, salt, info, &mut okm)?;
    Ok(okm)
}

fn expand_into(ikm: &[u8], salt: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), CryptoError> {
    Hkdf::<Sha512>::new(Some(salt), ikm)
        .expand(info, okm)
        .map_err(|_| CryptoError::KeyDerivation(format!("cannot expand {} bytes", okm.len())))
}
