//! # hapd-crypto
//!
//! Wire encoding and cryptographic primitives for accessory pairing.
//!
//! This crate provides:
//! - TLV8 chains with transparent fragment reassembly
//! - SRP-6a (3072-bit) for pair-setup, with resumable exponentiation
//! - Curve25519 ECDH and Ed25519 signatures for pair-verify
//! - ChaCha20-Poly1305 for handshake messages and session frames
//! - HKDF-SHA512 key derivation
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod expmod;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::FrameCipher;
pub use expmod::{ExpModJob, ExpModRequest, Progress};
pub use keys::{EncryptionKey, SharedSecret, TrafficKeys};
pub use srp::{SrpClient, SrpVerifier};
pub use tlv::{Tlv8, TlvError, TlvType};
