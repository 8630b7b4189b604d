//! Transform config tag codec and metadata field helpers
//!
//! The config tag persisted with every encrypted object:
//! ```text
//! <class>/<version>        e.g. EncryptionTransform/1.0
//! ```
//! Decoding fails closed: an unknown class or a version newer than this
//! implementation is an error, never a best-effort parse.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use objcrypt_core::metadata::SIGNED_FIELDS;
use objcrypt_core::{Metadata, TransformError, TransformResult};

/// The only transform class this crate produces and accepts
pub const ENCRYPTION_CLASS: &str = "EncryptionTransform";

/// Version written by new encryptions
pub const CURRENT_VERSION: &str = "1.0";

/// Versions this implementation can decrypt
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    pub class: String,
    pub version: String,
}

impl TransformConfig {
    /// The tag written by new encryptions.
    pub fn current() -> Self {
        Self {
            class: ENCRYPTION_CLASS.to_string(),
            version: CURRENT_VERSION.to_string(),
        }
    }
}

impl fmt::Display for TransformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(&self.class, &self.version))
    }
}

impl FromStr for TransformConfig {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

pub fn encode(class: &str, version: &str) -> String {
    format!("{class}{SEPARATOR}{version}")
}

pub fn decode(tag: &str) -> TransformResult<TransformConfig> {
    let mut parts = tag.split(SEPARATOR);
    let (Some(class), Some(version), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(TransformError::Config(format!(
            "invalid transform configuration: {tag}"
        )));
    };
    if class != ENCRYPTION_CLASS {
        return Err(TransformError::Config(format!(
            "unsupported transform class: {class}"
        )));
    }
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(TransformError::Config(format!(
            "unsupported {class} version: {version}"
        )));
    }
    Ok(TransformConfig {
        class: class.to_string(),
        version: version.to_string(),
    })
}

/// Fetch a required text field.
pub fn require<'a>(metadata: &'a Metadata, field: &str) -> TransformResult<&'a str> {
    metadata
        .get(field)
        .map(String::as_str)
        .ok_or_else(|| TransformError::Config(format!("missing metadata field: {field}")))
}

pub fn put_binary(metadata: &mut Metadata, field: &str, bytes: &[u8]) {
    metadata.insert(field.to_string(), STANDARD.encode(bytes));
}

/// Fetch and base64-decode a required binary field.
pub fn get_binary(metadata: &Metadata, field: &str) -> TransformResult<Vec<u8>> {
    STANDARD
        .decode(require(metadata, field)?)
        .map_err(|e| TransformError::Config(format!("metadata field {field} is not base64: {e}")))
}

/// The byte string covered by the metadata signature: every signed field
/// present, as `name:value\n`, in `SIGNED_FIELDS` order.
pub fn canonical_signing_input(metadata: &Metadata) -> String {
    let mut out = String::new();
    for field in SIGNED_FIELDS {
        if let Some(value) = metadata.get(*field) {
            out.push_str(field);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
    }
    out
}
