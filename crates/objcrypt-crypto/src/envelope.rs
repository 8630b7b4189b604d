//! Envelope encryption: per-object content key, wrapped under an RSA master key
//!
//! ```text
//! master key pair (RSA, in the KeyRing)
//!   └── wrapped content key = RSA-OAEP-SHA256(public, content key)
//!         └── ciphertext = AES-CTR(content key, IV, plaintext)
//! ```
//!
//! Every failure on the unwrap and signature-check paths collapses into the
//! same `TransformError::decryption_failed()`, so a caller cannot tell a wrong
//! key from corrupt bytes.

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use objcrypt_core::metadata::{ENC_ALGORITHM, ENC_KEY_SIZE};
use objcrypt_core::{Metadata, TransformError, TransformResult};

use crate::config::canonical_signing_input;
use crate::keyring::{KeyRing, MasterKeyPair};

/// The only content cipher id written or accepted
pub const AES_CTR: &str = "AES/CTR/NoPadding";

/// AES block size; the IV is one full counter block.
pub const IV_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeySize {
    #[default]
    Aes128,
    Aes256,
}

impl KeySize {
    pub fn bits(&self) -> u32 {
        match self {
            KeySize::Aes128 => 128,
            KeySize::Aes256 => 256,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }

    pub fn from_bits(bits: u32) -> TransformResult<Self> {
        match bits {
            128 => Ok(KeySize::Aes128),
            256 => Ok(KeySize::Aes256),
            other => Err(TransformError::Config(format!(
                "unsupported content key size: {other} bits"
            ))),
        }
    }
}

/// Content cipher selection: AES-CTR with a 128- or 256-bit key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CipherSpec {
    pub key_size: KeySize,
}

impl CipherSpec {
    pub fn new(algorithm: &str, key_size_bits: u32) -> TransformResult<Self> {
        check_algorithm(algorithm)?;
        Ok(Self {
            key_size: KeySize::from_bits(key_size_bits)?,
        })
    }

    pub fn algorithm(&self) -> &'static str {
        AES_CTR
    }

    /// Read the cipher fields of an encrypted object. A missing key size
    /// means 128 bits.
    pub fn from_metadata(metadata: &Metadata) -> TransformResult<Self> {
        let algorithm = crate::config::require(metadata, ENC_ALGORITHM)?;
        let bits = match metadata.get(ENC_KEY_SIZE) {
            Some(raw) => raw.parse().map_err(|_| {
                TransformError::Config(format!("invalid {ENC_KEY_SIZE}: {raw}"))
            })?,
            None => KeySize::Aes128.bits(),
        };
        Self::new(algorithm, bits)
    }

    pub fn write_metadata(&self, metadata: &mut Metadata) {
        metadata.insert(ENC_ALGORITHM.to_string(), self.algorithm().to_string());
        metadata.insert(ENC_KEY_SIZE.to_string(), self.key_size.bits().to_string());
    }
}

fn check_algorithm(algorithm: &str) -> TransformResult<()> {
    if algorithm.eq_ignore_ascii_case(AES_CTR) {
        Ok(())
    } else {
        Err(TransformError::Config(format!(
            "unsupported content cipher: {algorithm}"
        )))
    }
}

/// A per-object symmetric key and its IV. Zeroized on drop.
pub struct ContentKey {
    key: Vec<u8>,
    iv: [u8; IV_SIZE],
    spec: CipherSpec,
}

impl ContentKey {
    /// Fresh random key and IV from the operating system RNG.
    pub fn generate(spec: CipherSpec) -> Self {
        let mut key = vec![0u8; spec.key_size.bytes()];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv, spec }
    }

    pub fn from_parts(key: &[u8], iv: &[u8], spec: CipherSpec) -> TransformResult<Self> {
        if key.len() != spec.key_size.bytes() {
            return Err(TransformError::decryption_failed());
        }
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| {
            TransformError::Config(format!("IV must be {IV_SIZE} bytes, got {}", iv.len()))
        })?;
        Ok(Self {
            key: key.to_vec(),
            iv,
            spec,
        })
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    pub fn spec(&self) -> CipherSpec {
        self.spec
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("key", &"[REDACTED]")
            .field("spec", &self.spec)
            .finish()
    }
}

/// Generate a content key and wrap it under `active`.
///
/// Returns the key, the wrapped key bytes and the fingerprint of the
/// wrapping key.
pub fn encrypt_init(
    active: &MasterKeyPair,
    spec: CipherSpec,
) -> TransformResult<(ContentKey, Vec<u8>, String)> {
    let key = ContentKey::generate(spec);
    let wrapped = wrap_key(active.public_key(), &key)?;
    let fingerprint = active.fingerprint()?;
    tracing::debug!(
        fingerprint = %fingerprint,
        key_bits = spec.key_size.bits(),
        "content key generated and wrapped"
    );
    Ok((key, wrapped, fingerprint))
}

/// Wrap a content key with RSA-OAEP (SHA-256).
pub fn wrap_key(public: &RsaPublicKey, key: &ContentKey) -> TransformResult<Vec<u8>> {
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.key_bytes())
        .map_err(|e| TransformError::Crypto(format!("content key wrap failed: {e}")))
}

/// Recover the content key of an object wrapped under `fingerprint`.
pub fn decrypt_init(
    ring: &KeyRing,
    fingerprint: &str,
    wrapped: &[u8],
    iv: &[u8],
    spec: CipherSpec,
) -> TransformResult<ContentKey> {
    let pair = ring.lookup(fingerprint)?;
    let unwrapped = Zeroizing::new(
        pair.private_key()
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| TransformError::decryption_failed())?,
    );
    let key = ContentKey::from_parts(&unwrapped, iv, spec)?;
    tracing::debug!(fingerprint, "content key unwrapped");
    Ok(key)
}

/// RSASSA-PKCS1-v1_5 (SHA-256) over the canonical encryption fields.
pub fn sign(pair: &MasterKeyPair, metadata: &Metadata) -> TransformResult<Vec<u8>> {
    let hashed = Sha256::digest(canonical_signing_input(metadata).as_bytes());
    pair.private_key()
        .sign_with_rng(&mut OsRng, Pkcs1v15Sign::new::<Sha256>(), &hashed)
        .map_err(|e| TransformError::Crypto(format!("metadata signing failed: {e}")))
}

pub fn verify(pair: &MasterKeyPair, metadata: &Metadata, signature: &[u8]) -> TransformResult<()> {
    let hashed = Sha256::digest(canonical_signing_input(metadata).as_bytes());
    pair.public_key()
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        .map_err(|_| TransformError::decryption_failed())
}
