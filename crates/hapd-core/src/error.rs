//! Error types for the accessory pairing core.

use thiserror::Error;

/// Primary error type for all pairing core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Protocol faults raised while running pair-setup or pair-verify.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("SRP proof verification failed")]
    SrpVerificationFailed,

    #[error("Invalid controller public key")]
    InvalidPublicKey,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Pairing state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: u8, actual: u8 },

    #[error("Missing required TLV type: {0:#04x}")]
    MissingTlv(u8),

    #[error("Invalid pairing state: {0}")]
    InvalidState(String),

    #[error("Controller {0} is not paired")]
    UnknownPeer(String),

    #[error("Connection is already paired")]
    AlreadyPaired,

    #[error("Another controller is pairing")]
    Busy,

    #[error("No room for another pairing")]
    MaxPeers,

    #[error("Accessory long-term keys are not available")]
    Unavailable,

    #[error("Unknown connection {0}")]
    UnknownConnection(u64),

    #[error("Connection {0} has not completed pair-verify")]
    NotVerified(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,

    #[error("Invalid modulus: {0}")]
    InvalidModulus(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("SRP step out of order: {0}")]
    SrpOrder(&'static str),
}

/// Parsing errors for wire formats and stored images.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Persistence failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage image: {0}")]
    Corrupt(String),

    #[error("Storage is full ({0} records)")]
    Full(usize),
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
