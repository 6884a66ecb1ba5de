//! # hapd-pairing
//!
//! Accessory-side pairing for paired-controller transports.
//!
//! This crate implements:
//! - Pair-setup (SRP-6a, M1-M6) and pair-verify (X25519 + Ed25519, M1-M4)
//! - The cooperative event scheduler both handshakes run on
//! - Chunked modular exponentiation driven by scheduler events
//! - The encrypted session channel used after pair-verify
//! - Persistence and transport traits with reference stores

mod cipher;
mod event;
mod expmod;
mod identity;
mod manager;
mod outbox;
mod pair_setup;
mod pair_verify;
mod scheduler;
mod session;
mod storage;
mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cipher::{is_tamper, SessionCipher};
pub use event::{ConnectionId, Event, EventKind, ExpModStage, ExpModTarget, JobId, Route};
pub use expmod::ExpModEngine;
pub use identity::AccessoryIdentity;
pub use manager::{error_code, PairingManager, Queue};
pub use outbox::{flush, Outbound, Outbox};
pub use scheduler::{EventQueue, ListenerId, Scheduler};
pub use session::{
    CryptoFrame, FrameData, FramePurpose, PairSession, Sealing, SetupExchange, VerifyExchange,
};
pub use storage::{FileStore, MemoryStore, FIXED_BLOCK_SIZE, PEER_BLOCK_SIZE, STORAGE_VERSION};
pub use traits::{PairingStore, PeerRecord, Transport, PEER_ID_LEN};
