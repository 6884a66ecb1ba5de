//! Encrypted session channel with length-prefixed framing.
//!
//! After pair-verify completes, every byte on the connection travels in
//! ChaCha20-Poly1305 frames:
//!
//! ```text
//! +----------------+------------------+----------+
//! | Length (2 LE)  | Ciphertext (N)   | Tag (16) |
//! +----------------+------------------+----------+
//! ```
//!
//! - Length: plaintext size, at most 1024, also the AAD
//! - Nonce: 4 zero bytes then the per-direction counter, little-endian
//!
//! The accessory seals with the AccessoryToController key and opens with the
//! ControllerToAccessory key.

use hapd_core::error::{CryptoError, Error, Result};
use hapd_crypto::chacha::{frame_size, parse_frame_length, FrameCipher, LENGTH_PREFIX_LEN};
use hapd_crypto::keys::TrafficKeys;

/// Accessory end of an encrypted session.
pub struct SessionCipher {
    cipher: FrameCipher,
    /// Bytes of an incomplete inbound frame.
    partial: Vec<u8>,
}

impl SessionCipher {
    pub fn new(keys: &TrafficKeys) -> Self {
        Self::with_keys(
            *keys.accessory_to_controller.as_bytes(),
            *keys.controller_to_accessory.as_bytes(),
        )
    }

    /// Create a channel with explicit keys.
    pub fn with_keys(seal_key: [u8; 32], open_key: [u8; 32]) -> Self {
        Self {
            cipher: FrameCipher::new(seal_key, open_key),
            partial: Vec::new(),
        }
    }

    /// Encrypt plaintext into one frame per 1024-byte block.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.seal(plaintext).map_err(Error::Crypto)
    }

    /// Decrypt a buffer of whole frames.
    pub fn decrypt(&mut self, framed: &[u8]) -> Result<Vec<u8>> {
        self.cipher.open(framed).map_err(Error::Crypto)
    }

    /// Feed bytes as they arrive from the socket.
    ///
    /// Returns the plaintext of every frame completed by `data`; a trailing
    /// incomplete frame is kept until more bytes arrive. A frame that fails
    /// authentication poisons the channel: the error is returned and the
    /// buffered bytes are discarded.
    pub fn decrypt_stream(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.partial.extend_from_slice(data);

        let mut plaintext = Vec::new();
        let mut offset = 0;
        while let Some(size) = frame_size(&self.partial[offset..]) {
            if self.partial.len() - offset < size {
                break;
            }
            let block_len = parse_frame_length(&self.partial[offset..]).unwrap_or(0);
            let body = &self.partial[offset + LENGTH_PREFIX_LEN..offset + size];
            match self.cipher.open_block(body, block_len) {
                Ok(block) => plaintext.extend_from_slice(&block),
                Err(e) => {
                    self.partial.clear();
                    return Err(Error::Crypto(e));
                }
            }
            offset += size;
        }

        self.partial.drain(..offset);
        Ok(plaintext)
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.partial.len()
    }

    /// Current write nonce counter.
    pub fn write_nonce(&self) -> u64 {
        self.cipher.seal_counter()
    }

    /// Current read nonce counter.
    pub fn read_nonce(&self) -> u64 {
        self.cipher.open_counter()
    }

    /// Total size of the frame at the head of `data`, length prefix included.
    pub fn parse_frame_length(data: &[u8]) -> Option<usize> {
        frame_size(data)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("write_nonce", &self.write_nonce())
            .field("read_nonce", &self.read_nonce())
            .field("buffered", &self.partial.len())
            .finish()
    }
}

/// True when `err` means the peer sent a forged or corrupted frame.
pub fn is_tamper(err: &Error) -> bool {
    matches!(
        err,
        Error::Crypto(CryptoError::AuthTagMismatch) | Error::Crypto(CryptoError::Decryption(_))
    )
}
