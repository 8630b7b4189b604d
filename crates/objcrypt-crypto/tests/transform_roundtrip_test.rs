//! Integration tests for the transform factory.
//!
//! Drives whole objects through `output_transform` / `input_transform` the
//! way an object store client would: ciphertext in one buffer, metadata in a
//! map, keys in a shared `KeyRing`.

use std::io::{Cursor, Read};

use objcrypt_checksum::RunningChecksum;
use objcrypt_core::config::MissingChecksumPolicy;
use objcrypt_core::metadata::{
    ENC_IV, ENC_KEY_ID, ENC_METADATA_SIGNATURE, ENC_OBJECT_KEY, ENC_UNENCRYPTED_SHA1,
    ENC_UNENCRYPTED_SIZE, TRANSFORM_CONFIG,
};
use objcrypt_core::{Metadata, TransformError};
use objcrypt_crypto::config::put_binary;
use objcrypt_crypto::{envelope, FactorySettings, KeyRing, KeyStrength, MasterKeyPair, TransformFactory};
use proptest::prelude::*;

const PRIMARY: &str = include_str!("fixtures/primary-2048.pem");
const SECONDARY: &str = include_str!("fixtures/secondary-2048.pem");

fn key(pem: &str) -> MasterKeyPair {
    MasterKeyPair::from_pem(pem).expect("fixture key")
}

fn ring_with_active(pem: &str) -> KeyRing {
    let ring = KeyRing::new();
    ring.register_active(key(pem)).unwrap();
    ring
}

/// Encrypt `plaintext` completely; returns (ciphertext, final metadata).
fn encrypt(factory: &TransformFactory, ring: &KeyRing, plaintext: &[u8]) -> (Vec<u8>, Metadata) {
    let mut metadata = Metadata::new();
    metadata.insert("content-type".into(), "application/octet-stream".into());

    let mut output = factory
        .output_transform(ring, Cursor::new(plaintext.to_vec()), metadata)
        .unwrap();
    let mut ciphertext = Vec::new();
    output.read_to_end(&mut ciphertext).unwrap();
    (ciphertext, output.finish().unwrap())
}

fn decrypt(
    factory: &TransformFactory,
    ring: &KeyRing,
    metadata: &Metadata,
    ciphertext: &[u8],
) -> Result<Vec<u8>, TransformError> {
    let config = metadata
        .get(TRANSFORM_CONFIG)
        .cloned()
        .unwrap_or_default();
    let mut input =
        factory.input_transform(ring, &config, metadata, Cursor::new(ciphertext.to_vec()))?;
    let mut plaintext = Vec::new();
    input.read_to_end(&mut plaintext)?;
    Ok(plaintext)
}

#[test]
fn hello_roundtrip_with_2048_bit_key() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();

    let (ciphertext, metadata) = encrypt(&factory, &ring, b"hello");

    assert_eq!(metadata[TRANSFORM_CONFIG], "EncryptionTransform/1.0");
    assert!(!metadata[ENC_OBJECT_KEY].is_empty());
    assert_eq!(metadata[ENC_KEY_ID], ring.active_fingerprint().unwrap());
    assert_eq!(metadata[ENC_UNENCRYPTED_SIZE], "5");
    assert_eq!(
        metadata[ENC_UNENCRYPTED_SHA1],
        "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
    );
    assert!(metadata.contains_key(ENC_METADATA_SIGNATURE));
    assert_eq!(metadata["content-type"], "application/octet-stream");
    assert_ne!(ciphertext, b"hello");

    assert_eq!(decrypt(&factory, &ring, &metadata, &ciphertext).unwrap(), b"hello");
}

#[test]
fn hello_roundtrip_with_generated_key() {
    let ring = KeyRing::new();
    let registration = ring
        .register_active(MasterKeyPair::generate(2048).unwrap())
        .unwrap();
    assert_eq!(registration.strength, KeyStrength::Strong);
    assert_eq!(ring.active_fingerprint().unwrap(), registration.fingerprint);

    let factory = TransformFactory::default();
    let (ciphertext, metadata) = encrypt(&factory, &ring, b"hello");
    assert_eq!(metadata[ENC_KEY_ID], registration.fingerprint);
    assert_eq!(decrypt(&factory, &ring, &metadata, &ciphertext).unwrap(), b"hello");
}

#[test]
fn metadata_before_finish_has_envelope_fields_only() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let output = factory
        .output_transform(&ring, Cursor::new(b"payload".to_vec()), Metadata::new())
        .unwrap();

    let metadata = output.metadata();
    assert_eq!(output.config_tag(), metadata[TRANSFORM_CONFIG]);
    assert!(metadata.contains_key(ENC_IV));
    assert!(metadata.contains_key(ENC_OBJECT_KEY));
    assert!(!metadata.contains_key(ENC_UNENCRYPTED_SHA1));
    assert!(!metadata.contains_key(ENC_METADATA_SIGNATURE));
}

#[test]
fn finish_before_end_of_stream_is_incomplete() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let mut output = factory
        .output_transform(&ring, Cursor::new(vec![7u8; 4096]), Metadata::new())
        .unwrap();

    let mut partial = [0u8; 100];
    output.read_exact(&mut partial).unwrap();
    assert!(matches!(output.finish(), Err(TransformError::Incomplete(_))));
}

#[test]
fn no_active_key_is_config_error() {
    let ring = KeyRing::new();
    ring.register(key(PRIMARY)).unwrap();
    let result = TransformFactory::default().output_transform(&ring, Cursor::new(Vec::new()), Metadata::new());
    assert!(matches!(result, Err(TransformError::Config(_))));
}

#[test]
fn wrong_key_fails() {
    let factory = TransformFactory::default();
    let (ciphertext, metadata) = encrypt(&factory, &ring_with_active(PRIMARY), b"secret");

    // Ring that only knows the other key: the fingerprint is unresolvable.
    let other = ring_with_active(SECONDARY);
    let err = decrypt(&factory, &other, &metadata, &ciphertext).unwrap_err();
    assert!(matches!(err, TransformError::Key(_)));

    // Fingerprint pointed at the other key: the signature no longer
    // verifies, and with signatures waived the unwrap fails instead. Both
    // report the same generic error.
    let mut forged = metadata.clone();
    forged.insert(ENC_KEY_ID.into(), other.active_fingerprint().unwrap());
    let err = decrypt(&factory, &other, &forged, &ciphertext).unwrap_err();
    assert_eq!(err.to_string(), "crypto error: decryption failed");

    forged.remove(ENC_METADATA_SIGNATURE);
    let lenient = TransformFactory::new(FactorySettings {
        allow_unsigned: true,
        ..FactorySettings::default()
    });
    let err = decrypt(&lenient, &other, &forged, &ciphertext).unwrap_err();
    assert_eq!(err.to_string(), "crypto error: decryption failed");
}

#[test]
fn unsigned_metadata_is_rejected() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (mut ciphertext, mut metadata) = encrypt(&factory, &ring, b"pay alice 100");

    // Drop everything that would catch a flipped byte, then flip one.
    metadata.remove(ENC_METADATA_SIGNATURE);
    metadata.remove(ENC_UNENCRYPTED_SHA1);
    metadata.remove(ENC_UNENCRYPTED_SIZE);
    ciphertext[10] ^= b'1' ^ b'9';

    let err = decrypt(&factory, &ring, &metadata, &ciphertext).unwrap_err();
    assert!(matches!(err, TransformError::Crypto(_)), "got {err:?}");
    assert_eq!(err.to_string(), "crypto error: decryption failed");

    let result = factory.input_transform_range(
        &ring,
        &metadata[TRANSFORM_CONFIG],
        &metadata,
        Cursor::new(ciphertext.clone()),
        0,
    );
    assert!(matches!(result, Err(TransformError::Crypto(_))));
    assert!(matches!(
        factory.rekey(&ring, &metadata, &key(PRIMARY)),
        Err(TransformError::Crypto(_))
    ));
}

#[test]
fn unsigned_metadata_accepted_when_allowed() {
    let ring = ring_with_active(PRIMARY);
    let (ciphertext, mut metadata) = encrypt(&TransformFactory::default(), &ring, b"old object");
    metadata.remove(ENC_METADATA_SIGNATURE);

    let lenient = TransformFactory::new(FactorySettings {
        allow_unsigned: true,
        ..FactorySettings::default()
    });
    assert_eq!(
        decrypt(&lenient, &ring, &metadata, &ciphertext).unwrap(),
        b"old object"
    );
}

#[test]
fn tampered_metadata_fails_signature_check() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (ciphertext, mut metadata) = encrypt(&factory, &ring, b"signed fields");

    metadata.insert(ENC_UNENCRYPTED_SIZE.into(), "12".into());
    let err = decrypt(&factory, &ring, &metadata, &ciphertext).unwrap_err();
    assert!(matches!(err, TransformError::Crypto(_)));
}

#[test]
fn tampered_ciphertext_fails_checksum_at_end_of_stream() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (mut ciphertext, metadata) = encrypt(&factory, &ring, b"integrity matters here");

    ciphertext[3] ^= 0x20;
    match decrypt(&factory, &ring, &metadata, &ciphertext).unwrap_err() {
        TransformError::Checksum(mismatch) => {
            assert!(mismatch.expected.starts_with("SHA1/22/"));
            assert_ne!(mismatch.expected, mismatch.actual);
        }
        other => panic!("expected checksum error, got {other:?}"),
    }
}

#[test]
fn missing_envelope_fields_are_config_errors() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (ciphertext, metadata) = encrypt(&factory, &ring, b"fields");

    for field in [ENC_KEY_ID, ENC_OBJECT_KEY, ENC_IV] {
        let mut stripped = metadata.clone();
        stripped.remove(field);
        let err = decrypt(&factory, &ring, &stripped, &ciphertext).unwrap_err();
        assert!(
            matches!(err, TransformError::Config(_)),
            "removing {field} gave {err:?}"
        );
    }
}

#[test]
fn unsupported_config_tag_is_rejected() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (ciphertext, metadata) = encrypt(&factory, &ring, b"tag");

    for tag in ["EncryptionTransform/2.0", "EncryptionTransform", "Other/1.0"] {
        let result = factory.input_transform(&ring, tag, &metadata, Cursor::new(ciphertext.clone()));
        assert!(matches!(result, Err(TransformError::Config(_))), "{tag}");
    }
}

#[test]
fn missing_plaintext_checksum_policy() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (ciphertext, mut metadata) = encrypt(&factory, &ring, b"legacy object");
    metadata.remove(ENC_UNENCRYPTED_SHA1);
    metadata.remove(ENC_UNENCRYPTED_SIZE);
    metadata.remove(ENC_METADATA_SIGNATURE);
    let signature = envelope::sign(&key(PRIMARY), &metadata).unwrap();
    put_binary(&mut metadata, ENC_METADATA_SIGNATURE, &signature);

    // skip (default)
    assert_eq!(
        decrypt(&factory, &ring, &metadata, &ciphertext).unwrap(),
        b"legacy object"
    );

    let strict = TransformFactory::new(FactorySettings {
        missing_checksum: MissingChecksumPolicy::Fail,
        ..FactorySettings::default()
    });
    let err = decrypt(&strict, &ring, &metadata, &ciphertext).unwrap_err();
    assert!(matches!(err, TransformError::Config(_)));
}

#[test]
fn rekey_rewraps_without_touching_ciphertext() {
    let factory = TransformFactory::default();
    let ring = ring_with_active(PRIMARY);
    let (ciphertext, metadata) = encrypt(&factory, &ring, b"rotate me");
    let original = ciphertext.clone();

    ring.register(key(SECONDARY)).unwrap();
    let rekeyed = factory.rekey(&ring, &metadata, &key(SECONDARY)).unwrap();
    assert_ne!(rekeyed[ENC_KEY_ID], metadata[ENC_KEY_ID]);
    assert_ne!(rekeyed[ENC_OBJECT_KEY], metadata[ENC_OBJECT_KEY]);
    assert_eq!(rekeyed[ENC_IV], metadata[ENC_IV]);

    // A ring holding only the new key decrypts the untouched ciphertext.
    let only_new = ring_with_active(SECONDARY);
    assert_eq!(
        decrypt(&factory, &only_new, &rekeyed, &ciphertext).unwrap(),
        b"rotate me"
    );
    assert_eq!(ciphertext, original);

    // ...and can no longer read the old metadata.
    assert!(decrypt(&factory, &only_new, &metadata, &ciphertext).is_err());
}

#[test]
fn rekey_requires_current_key() {
    let factory = TransformFactory::default();
    let (_, metadata) = encrypt(&factory, &ring_with_active(PRIMARY), b"orphan");

    let ring = ring_with_active(SECONDARY);
    let err = factory.rekey(&ring, &metadata, &key(SECONDARY)).unwrap_err();
    assert!(matches!(err, TransformError::Key(_)));
}

#[test]
fn resumed_ranges_match_single_pass() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let body: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 256) as u8).collect();
    let (first, second) = body.split_at(4321);

    let mut output = factory
        .output_transform(&ring, Cursor::new(first.to_vec()), Metadata::new())
        .unwrap();
    let mut ciphertext = Vec::new();
    output.read_to_end(&mut ciphertext).unwrap();
    let (metadata, running) = output.finish_range().unwrap();

    let mut output = factory
        .resume_output_transform(
            &ring,
            Cursor::new(second.to_vec()),
            metadata,
            first.len() as u64,
            running,
        )
        .unwrap();
    output.read_to_end(&mut ciphertext).unwrap();
    let metadata = output.finish().unwrap();

    assert_eq!(metadata[ENC_UNENCRYPTED_SIZE], body.len().to_string());
    assert_eq!(decrypt(&factory, &ring, &metadata, &ciphertext).unwrap(), body);
}

#[test]
fn resume_rejects_misaligned_checksum() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let (_, metadata) = encrypt(&factory, &ring, b"0123456789");

    let running = RunningChecksum::new(objcrypt_checksum::ChecksumAlgorithm::Sha1);
    let result =
        factory.resume_output_transform(&ring, Cursor::new(b"more".to_vec()), metadata, 10, running);
    assert!(matches!(result, Err(TransformError::Config(_))));
}

#[test]
fn range_read_decrypts_from_offset() {
    let ring = ring_with_active(PRIMARY);
    let factory = TransformFactory::default();
    let body: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
    let (ciphertext, metadata) = encrypt(&factory, &ring, &body);

    let offset = 123;
    let mut input = factory
        .input_transform_range(
            &ring,
            &metadata[TRANSFORM_CONFIG],
            &metadata,
            Cursor::new(ciphertext[offset..300].to_vec()),
            offset as u64,
        )
        .unwrap();
    assert!(!input.is_verifying());
    let mut plaintext = Vec::new();
    input.read_to_end(&mut plaintext).unwrap();
    assert_eq!(plaintext, &body[offset..300]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Arbitrary payloads survive the round trip at arbitrary read sizes.
    #[test]
    fn roundtrip_arbitrary_payloads(
        payload in proptest::collection::vec(any::<u8>(), 0..8192),
        read_size in 1usize..1024,
        wide in any::<bool>(),
    ) {
        let ring = ring_with_active(PRIMARY);
        let factory = TransformFactory::new(FactorySettings {
            cipher: objcrypt_crypto::CipherSpec::new("AES/CTR/NoPadding", if wide { 256 } else { 128 }).unwrap(),
            ..FactorySettings::default()
        });

        let mut output = factory
            .output_transform(&ring, Cursor::new(payload.clone()), Metadata::new())
            .unwrap();
        let mut ciphertext = Vec::new();
        let mut buf = vec![0u8; read_size];
        loop {
            let n = output.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            ciphertext.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(ciphertext.len(), payload.len());
        let metadata = output.finish().unwrap();

        let plaintext = decrypt(&factory, &ring, &metadata, &ciphertext).unwrap();
        prop_assert_eq!(plaintext, payload);
    }
}
