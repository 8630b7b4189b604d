//! Transform factory: builds encrypting and decrypting streams for objects
//!
//! The factory holds only immutable settings. Master keys live in a
//! `KeyRing` that every call receives explicitly, so one factory can serve
//! any number of concurrent requests.
//!
//! Write path (`output_transform`):
//! ```text
//! plaintext ─► ChecksummedReader (SHA-1) ─► CipherReader (AES-CTR) ─► ciphertext
//! ```
//! Read path (`input_transform`):
//! ```text
//! ciphertext ─► CipherReader (AES-CTR) ─► ChecksummedReader (verify SHA-1) ─► plaintext
//! ```

use std::io::{self, Read};
use std::sync::Arc;

use objcrypt_checksum::{ChecksumAlgorithm, ChecksumValue, ChecksummedReader, RunningChecksum};
use objcrypt_core::config::{MissingChecksumPolicy, ObjcryptConfig};
use objcrypt_core::metadata::{
    is_encryption_field, ENC_IV, ENC_KEY_ID, ENC_METADATA_SIGNATURE, ENC_OBJECT_KEY,
    ENC_UNENCRYPTED_SHA1, ENC_UNENCRYPTED_SIZE, TRANSFORM_CONFIG,
};
use objcrypt_core::{Metadata, TransformError, TransformResult};

use crate::config::{self, get_binary, put_binary, require, TransformConfig};
use crate::envelope::{self, CipherSpec, ContentKey};
use crate::keyring::{check_key_size, KeyRing, MasterKeyPair};
use crate::stream::{decrypt_stream_at, encrypt_stream_at, CipherReader};

/// Integrity digest recorded over the plaintext
const PLAINTEXT_DIGEST: ChecksumAlgorithm = ChecksumAlgorithm::Sha1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactorySettings {
    /// Cipher for new encryptions
    pub cipher: CipherSpec,
    /// Applied when an object carries no plaintext checksum
    pub missing_checksum: MissingChecksumPolicy,
    /// Accept metadata without `x-emc-enc-metadata-signature`
    pub allow_unsigned: bool,
}

impl FactorySettings {
    pub fn from_config(config: &ObjcryptConfig) -> TransformResult<Self> {
        Ok(Self {
            cipher: CipherSpec::new(
                &config.encryption.algorithm,
                config.encryption.key_size_bits,
            )?,
            missing_checksum: config.checksum.missing_reference,
            allow_unsigned: config.encryption.allow_unsigned,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformFactory {
    settings: FactorySettings,
}

impl TransformFactory {
    pub fn new(settings: FactorySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FactorySettings {
        &self.settings
    }

    /// Encrypt a new object under the ring's active key.
    ///
    /// Encryption fields already present in `metadata` are replaced; other
    /// fields pass through untouched.
    pub fn output_transform<R: Read>(
        &self,
        ring: &KeyRing,
        plaintext: R,
        mut metadata: Metadata,
    ) -> TransformResult<OutputTransform<R>> {
        let active = ring.active().map_err(|e| match e {
            TransformError::Key(msg) => TransformError::Config(msg),
            other => other,
        })?;
        let spec = self.settings.cipher;
        let (key, wrapped, fingerprint) = envelope::encrypt_init(&active, spec)?;

        metadata.retain(|name, _| !is_encryption_field(name));
        metadata.insert(TRANSFORM_CONFIG.into(), TransformConfig::current().to_string());
        metadata.insert(ENC_KEY_ID.into(), fingerprint);
        put_binary(&mut metadata, ENC_OBJECT_KEY, &wrapped);
        put_binary(&mut metadata, ENC_IV, key.iv());
        spec.write_metadata(&mut metadata);

        let checksummed = ChecksummedReader::accumulating(plaintext, PLAINTEXT_DIGEST);
        let reader = encrypt_stream_at(&key, checksummed, 0)?;
        Ok(OutputTransform {
            reader,
            metadata,
            signer: active,
        })
    }

    /// Continue encrypting an object at byte `offset`, reusing the content
    /// key recorded in `metadata`.
    ///
    /// `checksum` must be the accumulator handed back by the previous range
    /// (`OutputTransform::finish_range`), covering exactly bytes `[0, offset)`.
    pub fn resume_output_transform<R: Read>(
        &self,
        ring: &KeyRing,
        plaintext: R,
        metadata: Metadata,
        offset: u64,
        checksum: RunningChecksum,
    ) -> TransformResult<OutputTransform<R>> {
        if checksum.algorithm() != PLAINTEXT_DIGEST {
            return Err(TransformError::Config(format!(
                "resumed checksum must be {PLAINTEXT_DIGEST}, got {}",
                checksum.algorithm()
            )));
        }
        if checksum.byte_count() != offset {
            return Err(TransformError::Config(format!(
                "checksum covers {} bytes but the range starts at {offset}",
                checksum.byte_count()
            )));
        }
        config::decode(require(&metadata, TRANSFORM_CONFIG)?)?;
        let (key, signer) = self.open_envelope(ring, &metadata)?;

        let checksummed = ChecksummedReader::resume(plaintext, checksum);
        let reader = encrypt_stream_at(&key, checksummed, offset)?;
        tracing::debug!(offset, "output transform resumed");
        Ok(OutputTransform {
            reader,
            metadata,
            signer,
        })
    }

    /// Decrypt a whole object. The plaintext is checked against the recorded
    /// SHA-1 when the stream ends.
    pub fn input_transform<R: Read>(
        &self,
        ring: &KeyRing,
        config: &str,
        metadata: &Metadata,
        ciphertext: R,
    ) -> TransformResult<InputTransform<R>> {
        config::decode(config)?;
        let (key, _) = self.open_envelope(ring, metadata)?;
        let plaintext = decrypt_stream_at(&key, ciphertext, 0)?;

        let reader = match metadata.get(ENC_UNENCRYPTED_SHA1) {
            Some(digest) => {
                let size = require(metadata, ENC_UNENCRYPTED_SIZE)?;
                let size: u64 = size.parse().map_err(|_| {
                    TransformError::Config(format!("invalid {ENC_UNENCRYPTED_SIZE}: {size}"))
                })?;
                let reference = ChecksumValue::new(PLAINTEXT_DIGEST, digest, size)
                    .map_err(|e| TransformError::Config(e.to_string()))?;
                ChecksummedReader::verifying(plaintext, reference)
            }
            None => match self.settings.missing_checksum {
                MissingChecksumPolicy::Skip => {
                    tracing::debug!("object carries no plaintext checksum, validation skipped");
                    ChecksummedReader::accumulating(plaintext, PLAINTEXT_DIGEST)
                }
                MissingChecksumPolicy::Fail => {
                    return Err(TransformError::Config(format!(
                        "missing metadata field: {ENC_UNENCRYPTED_SHA1}"
                    )))
                }
            },
        };
        Ok(InputTransform { reader })
    }

    /// Decrypt a ciphertext range beginning at byte `offset` of the object.
    ///
    /// A partial read cannot be validated; the returned stream never checks
    /// the plaintext checksum.
    pub fn input_transform_range<R: Read>(
        &self,
        ring: &KeyRing,
        config: &str,
        metadata: &Metadata,
        ciphertext: R,
        offset: u64,
    ) -> TransformResult<InputTransform<R>> {
        config::decode(config)?;
        let (key, _) = self.open_envelope(ring, metadata)?;
        let plaintext = decrypt_stream_at(&key, ciphertext, offset)?;
        Ok(InputTransform {
            reader: ChecksummedReader::accumulating(plaintext, PLAINTEXT_DIGEST),
        })
    }

    /// Re-wrap an object's content key under `new_active` and re-sign the
    /// metadata. The ciphertext does not change.
    pub fn rekey(
        &self,
        ring: &KeyRing,
        metadata: &Metadata,
        new_active: &MasterKeyPair,
    ) -> TransformResult<Metadata> {
        check_key_size(new_active)?;
        config::decode(require(metadata, TRANSFORM_CONFIG)?)?;
        let (key, _) = self.open_envelope(ring, metadata)?;

        let previous = require(metadata, ENC_KEY_ID)?;
        let fingerprint = new_active.fingerprint()?;
        let wrapped = envelope::wrap_key(new_active.public_key(), &key)?;

        let mut updated = metadata.clone();
        updated.insert(ENC_KEY_ID.into(), fingerprint.clone());
        put_binary(&mut updated, ENC_OBJECT_KEY, &wrapped);
        let signature = envelope::sign(new_active, &updated)?;
        put_binary(&mut updated, ENC_METADATA_SIGNATURE, &signature);

        tracing::info!(from = previous, to = %fingerprint, "object rekeyed");
        Ok(updated)
    }

    /// Resolve the wrapping key, check the metadata signature, and unwrap
    /// the content key.
    fn open_envelope(
        &self,
        ring: &KeyRing,
        metadata: &Metadata,
    ) -> TransformResult<(ContentKey, Arc<MasterKeyPair>)> {
        let fingerprint = require(metadata, ENC_KEY_ID)?;
        let wrapped = get_binary(metadata, ENC_OBJECT_KEY)?;
        let iv = get_binary(metadata, ENC_IV)?;
        let spec = CipherSpec::from_metadata(metadata)?;

        let pair = ring.lookup(fingerprint)?;
        if metadata.contains_key(ENC_METADATA_SIGNATURE) {
            let signature = get_binary(metadata, ENC_METADATA_SIGNATURE)?;
            envelope::verify(&pair, metadata, &signature)?;
        } else if self.settings.allow_unsigned {
            tracing::warn!(fingerprint, "metadata is unsigned, accepted by configuration");
        } else {
            tracing::debug!(fingerprint, "metadata signature missing");
            return Err(TransformError::decryption_failed());
        }
        let key = envelope::decrypt_init(ring, fingerprint, &wrapped, &iv, spec)?;
        Ok((key, pair))
    }
}

/// Encrypting stream over a plaintext source.
///
/// Read it to end-of-stream, then call `finish` for the final metadata.
pub struct OutputTransform<R> {
    reader: CipherReader<ChecksummedReader<R>>,
    metadata: Metadata,
    signer: Arc<MasterKeyPair>,
}

impl<R: Read> OutputTransform<R> {
    /// Metadata populated so far: key, IV and cipher fields. Size, SHA-1
    /// and signature appear only after `finish`.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Value for `x-emc-transform-config`
    pub fn config_tag(&self) -> String {
        TransformConfig::current().to_string()
    }

    /// Plaintext checksum over the bytes consumed so far
    pub fn checksum(&self) -> ChecksumValue {
        self.reader.get_ref().checksum()
    }

    pub fn finish(self) -> TransformResult<Metadata> {
        self.finish_range().map(|(metadata, _)| metadata)
    }

    /// Finalize, also handing back the plaintext accumulator so the next
    /// range can be encrypted with `resume_output_transform`.
    pub fn finish_range(self) -> TransformResult<(Metadata, RunningChecksum)> {
        if !self.reader.get_ref().is_complete() {
            return Err(TransformError::Incomplete(
                "plaintext stream has not reached end-of-stream".into(),
            ));
        }
        let mut metadata = self.metadata;
        let running = self.reader.into_inner().into_checksum();
        let value = running.value();
        metadata.insert(ENC_UNENCRYPTED_SIZE.into(), value.byte_count().to_string());
        metadata.insert(ENC_UNENCRYPTED_SHA1.into(), value.digest().to_string());

        let signature = envelope::sign(&self.signer, &metadata)?;
        put_binary(&mut metadata, ENC_METADATA_SIGNATURE, &signature);
        tracing::debug!(bytes = value.byte_count(), "output transform finished");
        Ok((metadata, running))
    }
}

impl<R: Read> Read for OutputTransform<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Decrypting stream over a ciphertext source.
///
/// A plaintext checksum mismatch surfaces as an `io::Error` at
/// end-of-stream; `TransformError::from` turns it back into
/// `TransformError::Checksum`.
pub struct InputTransform<R> {
    reader: ChecksummedReader<CipherReader<R>>,
}

impl<R: Read> InputTransform<R> {
    /// Whether the plaintext is validated at end-of-stream
    pub fn is_verifying(&self) -> bool {
        self.reader.is_verifying()
    }

    /// Plaintext checksum over the bytes produced so far
    pub fn checksum(&self) -> ChecksumValue {
        self.reader.checksum()
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner().into_inner()
    }
}

impl<R: Read> Read for InputTransform<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}
