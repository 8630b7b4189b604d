//! objcrypt-crypto: at-rest envelope encryption for object storage
//!
//! Architecture: per-object content key, wrapped under an RSA master key,
//! stored alongside the object in its metadata
//!
//! Pipeline: plaintext → SHA-1 (recorded) → AES-CTR → upload, metadata signed
//!
//! Key hierarchy:
//! ```text
//! KeyRing (fingerprint = SHA-1 of PKCS#1 public key DER)
//!   └── Master Key Pair (RSA ≥ 1024-bit, one marked active)
//!         ├── Wrapped Content Key: RSA-OAEP-SHA256 (per-object, 128/256-bit random)
//!         │     └── Content: AES-CTR (key=content_key, iv=random_128bit)
//!         └── Metadata Signature: RSASSA-PKCS1-v1_5-SHA256 over the x-emc-enc-* fields
//! ```

pub mod config;
pub mod envelope;
pub mod factory;
pub mod keyring;
pub mod stream;

pub use config::{TransformConfig, CURRENT_VERSION, ENCRYPTION_CLASS};
pub use envelope::{decrypt_init, encrypt_init, CipherSpec, ContentKey, KeySize};
pub use factory::{FactorySettings, InputTransform, OutputTransform, TransformFactory};
pub use keyring::{KeyRing, KeyStrength, MasterKeyPair, Registration};
pub use stream::{decrypt_stream, encrypt_stream, CipherReader, CipherWriter};
