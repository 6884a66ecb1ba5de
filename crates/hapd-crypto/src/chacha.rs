//! ChaCha20-Poly1305 AEAD for pairing messages and session frames.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hapd_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

/// Largest plaintext carried by one frame.
pub const MAX_FRAME_PLAINTEXT: usize = 0x400;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Length prefix of a frame.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Nonces of the encrypted handshake messages.
pub mod nonces {
    pub const PAIR_SETUP_M5: &[u8] = b"PS-Msg05";
    pub const PAIR_SETUP_M6: &[u8] = b"PS-Msg06";
    pub const PAIR_VERIFY_M2: &[u8] = b"PV-Msg02";
    pub const PAIR_VERIFY_M3: &[u8] = b"PV-Msg03";
}

/// Frame cipher with one auto-incrementing nonce counter per direction.
///
/// Frames are `[u16_le len][ciphertext][16-byte tag]` with AAD = len.
#[derive(ZeroizeOnDrop)]
pub struct FrameCipher {
    seal_key: [u8; 32],
    open_key: [u8; 32],
    #[zeroize(skip)]
    seal_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    open_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    seal_counter: u64,
    #[zeroize(skip)]
    open_counter: u64,
}

impl FrameCipher {
    /// Create cipher sealing with `seal_key` and opening with `open_key`.
    pub fn new(seal_key: [u8; 32], open_key: [u8; 32]) -> Self {
        let seal_cipher = ChaCha20Poly1305::new(&seal_key.into());
        let open_cipher = ChaCha20Poly1305::new(&open_key.into());
        Self {
            seal_key,
            open_key,
            seal_cipher,
            open_cipher,
            seal_counter: 0,
            open_counter: 0,
        }
    }

    /// Encrypt plaintext into one or more frames.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::Encryption("Empty plaintext".to_string()));
        }

        let frames = plaintext.len().div_ceil(MAX_FRAME_PLAINTEXT);
        let mut out =
            Vec::with_capacity(plaintext.len() + frames * (LENGTH_PREFIX_LEN + TAG_LEN));

        for block in plaintext.chunks(MAX_FRAME_PLAINTEXT) {
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = build_nonce_from_counter(self.seal_counter);
            let payload = Payload {
                msg: block,
                aad: &aad,
            };

            let ciphertext_with_tag = self
                .seal_cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

            out.extend_from_slice(&aad);
            out.extend_from_slice(&ciphertext_with_tag);
            self.seal_counter += 1;
        }

        Ok(out)
    }

    /// Decrypt a single frame body (ciphertext and tag) of `block_len` bytes.
    ///
    /// The counter only advances when the tag verifies.
    pub fn open_block(
        &mut self,
        ciphertext_with_tag: &[u8],
        block_len: u16,
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_with_tag.len() != block_len as usize + TAG_LEN {
            return Err(CryptoError::Decryption(
                "Ciphertext block length mismatch".to_string(),
            ));
        }

        let aad = block_len.to_le_bytes();
        let nonce = build_nonce_from_counter(self.open_counter);
        let payload = Payload {
            msg: ciphertext_with_tag,
            aad: &aad,
        };

        let plaintext = self
            .open_cipher
            .decrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| {
                tracing::debug!(counter = self.open_counter, block_len, "Frame tag mismatch");
                CryptoError::AuthTagMismatch
            })?;

        self.open_counter += 1;
        Ok(plaintext)
    }

    /// Decrypt a buffer holding whole frames.
    pub fn open(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < LENGTH_PREFIX_LEN + TAG_LEN {
            return Err(CryptoError::Decryption("Data too short for frame".to_string()));
        }

        let mut out = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let Some(block_len) = parse_frame_length(&data[offset..]) else {
                return Err(CryptoError::Decryption(
                    "Incomplete length prefix".to_string(),
                ));
            };
            offset += LENGTH_PREFIX_LEN;

            let block_end = offset + block_len as usize + TAG_LEN;
            if block_end > data.len() {
                return Err(CryptoError::Decryption(
                    "Incomplete ciphertext block".to_string(),
                ));
            }

            out.extend_from_slice(&self.open_block(&data[offset..block_end], block_len)?);
            offset = block_end;
        }

        Ok(out)
    }

    /// Get current sealing nonce counter.
    pub fn seal_counter(&self) -> u64 {
        self.seal_counter
    }

    /// Get current opening nonce counter.
    pub fn open_counter(&self) -> u64 {
        self.open_counter
    }
}

/// Read the little-endian length prefix of a frame.
pub fn parse_frame_length(data: &[u8]) -> Option<u16> {
    if data.len() < LENGTH_PREFIX_LEN {
        return None;
    }
    Some(u16::from_le_bytes([data[0], data[1]]))
}

/// Total size of the frame starting at `data`, if the prefix is present.
pub fn frame_size(data: &[u8]) -> Option<usize> {
    parse_frame_length(data).map(|len| LENGTH_PREFIX_LEN + len as usize + TAG_LEN)
}

/// Build 12-byte nonce from counter: 4 zero bytes then the counter LE.
pub fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt with explicit 12-byte nonce (for pairing messages).
///
/// Returns ciphertext with 16-byte auth tag appended.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(&(*key).into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))
}

/// Decrypt with explicit 12-byte nonce (for pairing messages).
///
/// Expects ciphertext with 16-byte auth tag appended.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "Ciphertext too short (missing tag)".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(&(*key).into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Create a 12-byte nonce from a string (right-aligned, left-padded with zeros).
///
/// `"PV-Msg02"` becomes `\x00\x00\x00\x00PV-Msg02`.
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}
