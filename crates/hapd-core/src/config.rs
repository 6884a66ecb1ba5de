//! Accessory configuration.
//!
//! Values come from built-in defaults, an optional TOML file and a small set
//! of `HAPD_*` environment overrides, in that order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Setup codes the pairing protocol forbids.
const TRIVIAL_SETUP_CODES: &[&str] = &[
    "000-00-000",
    "111-11-111",
    "222-22-222",
    "333-33-333",
    "444-44-444",
    "555-55-555",
    "666-66-666",
    "777-77-777",
    "888-88-888",
    "999-99-999",
    "123-45-678",
    "876-54-321",
];

pub const ENV_SETUP_CODE: &str = "HAPD_SETUP_CODE";
pub const ENV_ACCESSORY_ID: &str = "HAPD_ACCESSORY_ID";
pub const ENV_STORAGE_PATH: &str = "HAPD_STORAGE_PATH";

/// Identity and policy of one accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    /// Human readable name.
    pub device_name: String,
    /// Model string.
    pub model: String,
    /// Stable accessory identifier, six colon separated hex pairs.
    pub accessory_id: String,
    /// Setup code shown on the accessory label, `NNN-NN-NNN`.
    pub setup_code: String,
    /// Where pairings and long-term keys live. `None` keeps them in memory.
    pub storage_path: Option<PathBuf>,
    /// Spread modular exponentiation over scheduler ticks.
    pub chunked_math: bool,
    /// Maximum number of stored controller pairings.
    pub max_peers: usize,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            device_name: "HomeKit Device".to_string(),
            model: "HomeKitDevice1,1".to_string(),
            accessory_id: "F6:A4:35:E3:0B:07".to_string(),
            setup_code: "816-32-958".to_string(),
            storage_path: None,
            chunked_math: true,
            max_peers: 16,
        }
    }
}

impl AccessoryConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            accessory_id = %config.accessory_id,
            "loaded accessory config"
        );
        Ok(config)
    }

    /// Apply `HAPD_*` overrides using the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(code) = lookup(ENV_SETUP_CODE) {
            self.setup_code = code;
        }
        if let Some(id) = lookup(ENV_ACCESSORY_ID) {
            self.accessory_id = id;
        }
        if let Some(path) = lookup(ENV_STORAGE_PATH) {
            self.storage_path = Some(PathBuf::from(path));
        }
    }

    pub fn with_setup_code(mut self, code: impl Into<String>) -> Self {
        self.setup_code = code.into();
        self
    }

    pub fn with_accessory_id(mut self, id: impl Into<String>) -> Self {
        self.accessory_id = id.into();
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_chunked_math(mut self, chunked: bool) -> Self {
        self.chunked_math = chunked;
        self
    }

    pub fn with_max_peers(mut self, max: usize) -> Self {
        self.max_peers = max;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_setup_code(&self.setup_code)?;
        validate_accessory_id(&self.accessory_id)?;

        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be > 0".to_string()));
        }
        if self.device_name.is_empty() {
            return Err(ConfigError::Invalid("device_name must not be empty".to_string()));
        }
        Ok(())
    }
}

fn validate_setup_code(code: &str) -> Result<(), ConfigError> {
    let bytes = code.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            3 | 6 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return Err(ConfigError::Invalid(format!(
            "setup_code {:?} is not of the form NNN-NN-NNN",
            code
        )));
    }
    if TRIVIAL_SETUP_CODES.contains(&code) {
        return Err(ConfigError::Invalid(format!(
            "setup_code {} is too trivial",
            code
        )));
    }
    Ok(())
}

fn validate_accessory_id(id: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = id.split(':').collect();
    let ok = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    if !ok {
        return Err(ConfigError::Invalid(format!(
            "accessory_id {:?} must be six colon separated hex pairs",
            id
        )));
    }
    Ok(())
}
