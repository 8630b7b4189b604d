//! Master key registry: fingerprint → RSA key pair, plus the active key
//!
//! The ring is shared read-mostly across every upload and download:
//! registration happens at setup, lookups happen per object. Both maps sit
//! behind `parking_lot::RwLock`, so a `KeyRing` can live in an `Arc` and be
//! handed to any number of concurrent transforms.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use objcrypt_core::{TransformError, TransformResult};

/// Keys below this modulus length are refused outright.
pub const MIN_KEY_BITS: usize = 1024;

/// Keys of exactly this length are accepted with a warning.
pub const WEAK_KEY_BITS: usize = 1024;

/// An RSA master key pair. The public half is derived from the private key.
pub struct MasterKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl MasterKeyPair {
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// Parse a PEM private key, PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1
    /// (`BEGIN RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> TransformResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|_| TransformError::Key("not an RSA private key in PEM form".into()))?;
        Ok(Self::from_private_key(private))
    }

    pub fn from_pem_file(path: &Path) -> TransformResult<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem).map_err(|e| match e {
            TransformError::Key(msg) => TransformError::Key(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Generate a fresh key pair. Slow for large moduli; entropy comes from
    /// the operating system.
    pub fn generate(bits: usize) -> TransformResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| TransformError::Key(format!("RSA key generation failed: {e}")))?;
        Ok(Self::from_private_key(private))
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// RSA key length, defined as the bit length of the modulus
    pub fn modulus_bits(&self) -> usize {
        self.public.n().bits()
    }

    /// Lowercase hex SHA-1 of the PKCS#1 DER public key (40 chars).
    pub fn fingerprint(&self) -> TransformResult<String> {
        let der = self
            .public
            .to_pkcs1_der()
            .map_err(|e| TransformError::Key(format!("encoding public key: {e}")))?;
        Ok(hex::encode(Sha1::digest(der.as_bytes())))
    }
}

impl std::fmt::Debug for MasterKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyPair")
            .field("modulus_bits", &self.modulus_bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrength {
    /// Exactly 1024 bits: usable, but should be replaced.
    Weak,
    Strong,
}

/// Outcome of a successful `KeyRing::register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub fingerprint: String,
    pub strength: KeyStrength,
}

/// Apply the modulus length policy to a key pair.
pub fn check_key_size(pair: &MasterKeyPair) -> TransformResult<KeyStrength> {
    let bits = pair.modulus_bits();
    if bits < MIN_KEY_BITS {
        return Err(TransformError::Key(format!(
            "the minimum RSA key size supported is {MIN_KEY_BITS} bits; this key is {bits} bits"
        )));
    }
    if bits == WEAK_KEY_BITS {
        tracing::warn!(
            bits,
            "1024-bit RSA master key: accepted, but upgrade to 2048 bits or more"
        );
        return Ok(KeyStrength::Weak);
    }
    Ok(KeyStrength::Strong)
}

#[derive(Default)]
pub struct KeyRing {
    keys: RwLock<HashMap<String, Arc<MasterKeyPair>>>,
    active: RwLock<Option<String>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key for decryption. Re-registering a key replaces it.
    pub fn register(&self, pair: MasterKeyPair) -> TransformResult<Registration> {
        let strength = check_key_size(&pair)?;
        let fingerprint = pair.fingerprint()?;
        tracing::info!(
            fingerprint = %fingerprint,
            bits = pair.modulus_bits(),
            "master key registered"
        );
        self.keys.write().insert(fingerprint.clone(), Arc::new(pair));
        Ok(Registration {
            fingerprint,
            strength,
        })
    }

    /// Register a key and make it the encryption key for new objects.
    pub fn register_active(&self, pair: MasterKeyPair) -> TransformResult<Registration> {
        let registration = self.register(pair)?;
        self.set_active(&registration.fingerprint)?;
        Ok(registration)
    }

    pub fn set_active(&self, fingerprint: &str) -> TransformResult<()> {
        if !self.contains(fingerprint) {
            return Err(unknown_fingerprint(fingerprint));
        }
        *self.active.write() = Some(fingerprint.to_string());
        tracing::debug!(fingerprint, "active master key set");
        Ok(())
    }

    pub fn lookup(&self, fingerprint: &str) -> TransformResult<Arc<MasterKeyPair>> {
        self.keys
            .read()
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| unknown_fingerprint(fingerprint))
    }

    /// The key new encryptions are wrapped under.
    pub fn active(&self) -> TransformResult<Arc<MasterKeyPair>> {
        let fingerprint = self
            .active
            .read()
            .clone()
            .ok_or_else(|| TransformError::Key("no active master key configured".into()))?;
        self.lookup(&fingerprint)
    }

    pub fn active_fingerprint(&self) -> Option<String> {
        self.active.read().clone()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.keys.read().contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Registered fingerprints, sorted
    pub fn fingerprints(&self) -> Vec<String> {
        let mut all: Vec<String> = self.keys.read().keys().cloned().collect();
        all.sort_unstable();
        all
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("fingerprints", &self.fingerprints())
            .field("active", &self.active_fingerprint())
            .finish()
    }
}

fn unknown_fingerprint(fingerprint: &str) -> TransformError {
    TransformError::Key(format!("unknown fingerprint: {fingerprint}"))
}
