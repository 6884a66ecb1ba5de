//! Reference [`PairingStore`] implementations.
//!
//! [`FileStore`] keeps the device image layout:
//!
//! ```text
//! fixed block (0x6c bytes)
//!   0x00  u32 LE   storage version (2)
//!   0x04  u32 LE   flags, bit 0 = accessory keys present
//!   0x08  [u8; 32] accessory LTPK
//!   0x28  [u8; 64] accessory LTSK (seed then public key)
//!   0x68  u32 BE   number of peer blocks
//! peer block (0x48 bytes), repeated
//!   0x00  [u8; 36] pairing identifier
//!   0x24  [u8; 32] peer LTPK
//!   0x44  u32 LE   flags
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hapd_core::error::{Result, StorageError};
use hapd_crypto::ed25519::IdentityKeyPair;

use crate::traits::{PairingStore, PeerRecord, PEER_ID_LEN};

pub const STORAGE_VERSION: u32 = 2;
pub const FIXED_BLOCK_SIZE: usize = 0x6c;
pub const PEER_BLOCK_SIZE: usize = 0x48;

const FLAGS_ADDR: usize = 0x04;
const LTPK_ADDR: usize = 0x08;
const LTSK_ADDR: usize = 0x28;
const COUNT_ADDR: usize = 0x68;
const PEER_KEY_ADDR: usize = 0x24;
const PEER_FLAGS_ADDR: usize = 0x44;
const FLAG_KEYS_PRESENT: u32 = 0b1;

/// Volatile store, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: Option<[u8; 64]>,
    peers: Vec<PeerRecord>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new peers once `capacity` are stored.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn peers(&self) -> &[PeerRecord] {
        &self.peers
    }
}

impl PairingStore for MemoryStore {
    fn have_long_term_keys(&self) -> bool {
        self.keys.is_some()
    }

    fn long_term_keys(&self) -> Result<Option<IdentityKeyPair>> {
        match &self.keys {
            Some(secret) => Ok(Some(IdentityKeyPair::from_secret(secret)?)),
            None => Ok(None),
        }
    }

    fn set_long_term_keys(&mut self, keys: &IdentityKeyPair) -> Result<()> {
        self.keys = Some(keys.secret_bytes());
        Ok(())
    }

    fn add_peer(&mut self, peer: &PeerRecord) -> Result<()> {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.id == peer.id) {
            *existing = *peer;
            return Ok(());
        }
        if let Some(capacity) = self.capacity {
            if self.peers.len() >= capacity {
                return Err(StorageError::Full(capacity).into());
            }
        }
        self.peers.push(*peer);
        Ok(())
    }

    fn retrieve_peer(&self, id: &[u8]) -> Result<Option<PeerRecord>> {
        Ok(self.peers.iter().find(|p| p.id.as_slice() == id).copied())
    }

    fn remove_peer(&mut self, id: &[u8]) -> Result<bool> {
        match self.peers.iter().position(|p| p.id.as_slice() == id) {
            Some(index) => {
                self.peers.swap_remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// Store backed by a single image file.
///
/// The whole image is held in memory and rewritten through a temporary file
/// and a rename on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    image: Vec<u8>,
    capacity: Option<usize>,
}

impl FileStore {
    /// Open the image at `path`, formatting it when absent or of another
    /// version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existing = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StorageError::Io(e).into()),
        };

        let mut store = Self {
            path,
            image: Vec::new(),
            capacity: None,
        };

        match existing {
            Some(image) if read_u32_le(&image, 0) == Some(STORAGE_VERSION) => {
                validate_image(&image)?;
                tracing::debug!(
                    path = %store.path.display(),
                    peers = peer_count_of(&image),
                    "Opened pairing store"
                );
                store.image = image;
            }
            _ => store.format()?,
        }

        Ok(store)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Erase everything and write an empty image.
    pub fn format(&mut self) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "Formatting pairing store");
        let mut image = vec![0u8; FIXED_BLOCK_SIZE];
        image[0..4].copy_from_slice(&STORAGE_VERSION.to_le_bytes());
        self.commit(image)
    }

    /// Raw image, as written to disk.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    fn flags(&self) -> u32 {
        read_u32_le(&self.image, FLAGS_ADDR).unwrap_or(0)
    }

    fn peer_block(&self, index: usize) -> &[u8] {
        let start = FIXED_BLOCK_SIZE + index * PEER_BLOCK_SIZE;
        &self.image[start..start + PEER_BLOCK_SIZE]
    }

    fn find_peer(&self, id: &[u8]) -> Option<usize> {
        (0..self.peer_count()).find(|&i| &self.peer_block(i)[..PEER_ID_LEN] == id)
    }

    fn commit(&mut self, image: Vec<u8>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(StorageError::Io)?;
            file.write_all(&image).map_err(StorageError::Io)?;
            file.sync_all().map_err(StorageError::Io)?;
        }
        fs::rename(&tmp, &self.path).map_err(StorageError::Io)?;
        self.image = image;
        Ok(())
    }
}

impl PairingStore for FileStore {
    fn have_long_term_keys(&self) -> bool {
        self.flags() & FLAG_KEYS_PRESENT != 0
    }

    fn long_term_keys(&self) -> Result<Option<IdentityKeyPair>> {
        if !self.have_long_term_keys() {
            return Ok(None);
        }
        let mut secret = [0u8; 64];
        secret.copy_from_slice(&self.image[LTSK_ADDR..LTSK_ADDR + 64]);
        let keys = IdentityKeyPair::from_secret(&secret)?;
        if keys.public_key()[..] != self.image[LTPK_ADDR..LTPK_ADDR + 32] {
            return Err(StorageError::Corrupt("LTPK does not match LTSK".to_string()).into());
        }
        Ok(Some(keys))
    }

    fn set_long_term_keys(&mut self, keys: &IdentityKeyPair) -> Result<()> {
        let mut image = self.image.clone();
        image[LTPK_ADDR..LTPK_ADDR + 32].copy_from_slice(&keys.public_key());
        image[LTSK_ADDR..LTSK_ADDR + 64].copy_from_slice(&keys.secret_bytes());
        let flags = self.flags() | FLAG_KEYS_PRESENT;
        image[FLAGS_ADDR..FLAGS_ADDR + 4].copy_from_slice(&flags.to_le_bytes());
        self.commit(image)
    }

    fn add_peer(&mut self, peer: &PeerRecord) -> Result<()> {
        let mut block = [0u8; PEER_BLOCK_SIZE];
        block[..PEER_ID_LEN].copy_from_slice(&peer.id);
        block[PEER_KEY_ADDR..PEER_KEY_ADDR + 32].copy_from_slice(&peer.public_key);
        block[PEER_FLAGS_ADDR..].copy_from_slice(&peer.flags.to_le_bytes());

        let mut image = self.image.clone();
        if let Some(index) = self.find_peer(&peer.id) {
            let start = FIXED_BLOCK_SIZE + index * PEER_BLOCK_SIZE;
            image[start..start + PEER_BLOCK_SIZE].copy_from_slice(&block);
            return self.commit(image);
        }

        let count = self.peer_count();
        if let Some(capacity) = self.capacity {
            if count >= capacity {
                return Err(StorageError::Full(capacity).into());
            }
        }
        image.truncate(FIXED_BLOCK_SIZE + count * PEER_BLOCK_SIZE);
        image.extend_from_slice(&block);
        write_count(&mut image, count + 1);
        self.commit(image)?;
        tracing::debug!(peer = %peer.id_lossy(), "Peer persisted");
        Ok(())
    }

    fn retrieve_peer(&self, id: &[u8]) -> Result<Option<PeerRecord>> {
        Ok(self.find_peer(id).map(|index| {
            let block = self.peer_block(index);
            let mut record = PeerRecord::new([0; PEER_ID_LEN], [0; 32]);
            record.id.copy_from_slice(&block[..PEER_ID_LEN]);
            record
                .public_key
                .copy_from_slice(&block[PEER_KEY_ADDR..PEER_KEY_ADDR + 32]);
            record.flags = read_u32_le(block, PEER_FLAGS_ADDR).unwrap_or(0);
            record
        }))
    }

    fn remove_peer(&mut self, id: &[u8]) -> Result<bool> {
        let Some(index) = self.find_peer(id) else {
            return Ok(false);
        };

        let count = self.peer_count();
        let mut image = self.image.clone();
        let slot = FIXED_BLOCK_SIZE + index * PEER_BLOCK_SIZE;
        let last = FIXED_BLOCK_SIZE + (count - 1) * PEER_BLOCK_SIZE;
        if slot != last {
            image.copy_within(last..last + PEER_BLOCK_SIZE, slot);
        }
        image.truncate(last);
        write_count(&mut image, count - 1);
        self.commit(image)?;
        Ok(true)
    }

    fn peer_count(&self) -> usize {
        peer_count_of(&self.image)
    }
}

fn read_u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn peer_count_of(image: &[u8]) -> usize {
    image
        .get(COUNT_ADDR..COUNT_ADDR + 4)
        .map(|raw| u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
        .unwrap_or(0)
}

fn write_count(image: &mut [u8], count: usize) {
    image[COUNT_ADDR..COUNT_ADDR + 4].copy_from_slice(&(count as u32).to_be_bytes());
}

fn validate_image(image: &[u8]) -> Result<()> {
    if image.len() < FIXED_BLOCK_SIZE {
        return Err(StorageError::Corrupt(format!(
            "fixed block is {} bytes, expected {}",
            image.len(),
            FIXED_BLOCK_SIZE
        ))
        .into());
    }
    let needed = FIXED_BLOCK_SIZE + peer_count_of(image) * PEER_BLOCK_SIZE;
    if image.len() < needed {
        return Err(StorageError::Corrupt(format!(
            "image is {} bytes, {} peer blocks need {}",
            image.len(),
            peer_count_of(image),
            needed
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hapd_core::error::Error;
    use tempfile::TempDir;

    fn peer(tag: u8) -> PeerRecord {
        PeerRecord::new([tag; PEER_ID_LEN], [tag.wrapping_add(1); 32])
    }

    fn temp_store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("pairings.bin")).unwrap();
        (dir, store)
    }

    mod memory_store {
        use super::*;

        #[test]
        fn keys_round_trip() {
            let mut store = MemoryStore::new();
            assert!(!store.have_long_term_keys());
            assert!(store.long_term_keys().unwrap().is_none());

            let keys = IdentityKeyPair::generate();
            store.set_long_term_keys(&keys).unwrap();
            assert!(store.have_long_term_keys());
            let loaded = store.long_term_keys().unwrap().unwrap();
            assert_eq!(loaded.public_key(), keys.public_key());
        }

        #[test]
        fn add_replaces_existing_id() {
            let mut store = MemoryStore::new();
            store.add_peer(&peer(1)).unwrap();
            let mut updated = peer(1);
            updated.public_key = [0xEE; 32];
            store.add_peer(&updated).unwrap();

            assert_eq!(store.peer_count(), 1);
            let found = store.retrieve_peer(&[1; PEER_ID_LEN]).unwrap().unwrap();
            assert_eq!(found.public_key, [0xEE; 32]);
        }

        #[test]
        fn capacity_is_enforced() {
            let mut store = MemoryStore::with_capacity(1);
            store.add_peer(&peer(1)).unwrap();
            let err = store.add_peer(&peer(2)).unwrap_err();
            assert!(matches!(err, Error::Storage(StorageError::Full(1))));
        }

        #[test]
        fn remove_reports_presence() {
            let mut store = MemoryStore::new();
            store.add_peer(&peer(1)).unwrap();
            assert!(store.remove_peer(&[1; PEER_ID_LEN]).unwrap());
            assert!(!store.remove_peer(&[1; PEER_ID_LEN]).unwrap());
            assert_eq!(store.peer_count(), 0);
        }
    }

    mod file_layout {
        use super::*;

        #[test]
        fn new_image_is_formatted() {
            let (_dir, store) = temp_store();
            let image = store.image();
            assert_eq!(image.len(), FIXED_BLOCK_SIZE);
            assert_eq!(&image[0..4], &[2, 0, 0, 0]);
            assert_eq!(store.peer_count(), 0);
            assert!(!store.have_long_term_keys());
        }

        #[test]
        fn keys_set_flag_and_fields() {
            let (_dir, mut store) = temp_store();
            let keys = IdentityKeyPair::generate();
            store.set_long_term_keys(&keys).unwrap();

            let image = store.image();
            assert_eq!(image[FLAGS_ADDR], 1);
            assert_eq!(&image[LTPK_ADDR..LTPK_ADDR + 32], &keys.public_key());
            assert_eq!(&image[LTSK_ADDR..LTSK_ADDR + 32], &keys.seed());
            assert_eq!(&image[LTSK_ADDR + 32..LTSK_ADDR + 64], &keys.public_key());
        }

        #[test]
        fn peer_blocks_follow_fixed_block() {
            let (_dir, mut store) = temp_store();
            let mut record = peer(b'A');
            record.flags = 0x0102_0304;
            store.add_peer(&record).unwrap();

            let image = store.image();
            assert_eq!(image.len(), FIXED_BLOCK_SIZE + PEER_BLOCK_SIZE);
            assert_eq!(&image[COUNT_ADDR..COUNT_ADDR + 4], &[0, 0, 0, 1]);
            let block = &image[FIXED_BLOCK_SIZE..];
            assert_eq!(&block[..PEER_ID_LEN], &[b'A'; PEER_ID_LEN]);
            assert_eq!(&block[PEER_KEY_ADDR..PEER_KEY_ADDR + 32], &[b'B'; 32]);
            assert_eq!(&block[PEER_FLAGS_ADDR..], &[4, 3, 2, 1]);
        }

        #[test]
        fn remove_moves_last_block_into_slot() {
            let (_dir, mut store) = temp_store();
            store.add_peer(&peer(1)).unwrap();
            store.add_peer(&peer(2)).unwrap();
            store.add_peer(&peer(3)).unwrap();

            assert!(store.remove_peer(&[1; PEER_ID_LEN]).unwrap());
            assert_eq!(store.peer_count(), 2);
            assert_eq!(store.image().len(), FIXED_BLOCK_SIZE + 2 * PEER_BLOCK_SIZE);
            assert_eq!(store.image()[FIXED_BLOCK_SIZE], 3);
            assert!(store.retrieve_peer(&[2; PEER_ID_LEN]).unwrap().is_some());
            assert!(store.retrieve_peer(&[1; PEER_ID_LEN]).unwrap().is_none());
        }
    }

    mod file_persistence {
        use super::*;

        #[test]
        fn reopen_preserves_contents() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("pairings.bin");
            let keys = IdentityKeyPair::generate();
            {
                let mut store = FileStore::open(&path).unwrap();
                store.set_long_term_keys(&keys).unwrap();
                store.add_peer(&peer(9)).unwrap();
            }

            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.peer_count(), 1);
            let loaded = store.long_term_keys().unwrap().unwrap();
            assert_eq!(loaded.public_key(), keys.public_key());
            let found = store.retrieve_peer(&[9; PEER_ID_LEN]).unwrap().unwrap();
            assert_eq!(found, peer(9));
        }

        #[test]
        fn unknown_version_is_formatted() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("pairings.bin");
            let mut stale = vec![0xAA; FIXED_BLOCK_SIZE + PEER_BLOCK_SIZE];
            stale[0..4].copy_from_slice(&1u32.to_le_bytes());
            fs::write(&path, &stale).unwrap();

            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.peer_count(), 0);
            assert!(!store.have_long_term_keys());
            assert_eq!(fs::read(&path).unwrap().len(), FIXED_BLOCK_SIZE);
        }

        #[test]
        fn truncated_image_is_corrupt() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("pairings.bin");
            let mut image = vec![0u8; FIXED_BLOCK_SIZE];
            image[0..4].copy_from_slice(&STORAGE_VERSION.to_le_bytes());
            image[COUNT_ADDR..COUNT_ADDR + 4].copy_from_slice(&3u32.to_be_bytes());
            fs::write(&path, &image).unwrap();

            let err = FileStore::open(&path).unwrap_err();
            assert!(matches!(err, Error::Storage(StorageError::Corrupt(_))));
        }

        #[test]
        fn capacity_is_enforced() {
            let (_dir, store) = temp_store();
            let mut store = store.with_capacity(1);
            store.add_peer(&peer(1)).unwrap();
            store.add_peer(&peer(1)).unwrap();
            assert!(store.add_peer(&peer(2)).is_err());
        }
    }
}
