use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration (loaded from objcrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjcryptConfig {
    pub logging: LoggingConfig,
    pub encryption: EncryptionConfig,
    pub checksum: ChecksumConfig,
    pub keys: KeysConfig,
}

impl ObjcryptConfig {
    /// Read and parse a TOML config file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info). RUST_LOG takes precedence.
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Symmetric content cipher settings for new encryptions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Content cipher id (default: AES/CTR/NoPadding)
    pub algorithm: String,
    /// Content key size in bits: 128 or 256 (default: 128)
    pub key_size_bits: u32,
    /// Decrypt objects whose metadata carries no signature (default: false)
    pub allow_unsigned: bool,
}

/// What to do when an object carries no reference checksum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingChecksumPolicy {
    /// Not every backend returns checksums; read without validation.
    #[default]
    Skip,
    /// Refuse to hand out an unvalidated stream.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    /// Algorithm for transport checksums (default: SHA1)
    pub algorithm: String,
    /// Policy when the reference checksum is absent (default: skip)
    pub missing_reference: MissingChecksumPolicy,
}

/// Master key material, as PEM files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Decryption keys (PKCS#8 or PKCS#1 PEM private keys)
    pub key_files: Vec<PathBuf>,
    /// Key used for new encryptions; also registered for decryption
    pub active_key: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: "AES/CTR/NoPadding".into(),
            key_size_bits: 128,
            allow_unsigned: false,
        }
    }
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            algorithm: "SHA1".into(),
            missing_reference: MissingChecksumPolicy::Skip,
        }
    }
}
