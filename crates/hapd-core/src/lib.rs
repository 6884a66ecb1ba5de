//! # hapd-core
//!
//! Types shared across the pairing core crates.
//!
//! This crate provides:
//! - The error taxonomy used by the codec, crypto and pairing layers
//! - Accessory configuration loading and validation

pub mod config;
pub mod error;

pub use config::AccessoryConfig;
pub use error::{
    ConfigError, CryptoError, Error, PairingError, ParseError, Result, StorageError,
};
