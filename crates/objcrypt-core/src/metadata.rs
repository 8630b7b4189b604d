use std::collections::BTreeMap;

/// Object metadata as exchanged with the transport layer.
///
/// Ordered so that the canonical signing input is stable.
pub type Metadata = BTreeMap<String, String>;

/// Transform config tag, `<class>/<version>`
pub const TRANSFORM_CONFIG: &str = "x-emc-transform-config";

/// Fingerprint of the master key that wrapped the content key
pub const ENC_KEY_ID: &str = "x-emc-enc-key-id";

/// Wrapped content key (base64)
pub const ENC_OBJECT_KEY: &str = "x-emc-enc-object-key";

/// Initial counter block (base64)
pub const ENC_IV: &str = "x-emc-enc-iv";

/// Symmetric algorithm id, e.g. `AES/CTR/NoPadding`
pub const ENC_ALGORITHM: &str = "x-emc-enc-algorithm";

/// Content key size in bits
pub const ENC_KEY_SIZE: &str = "x-emc-enc-key-size";

/// Plaintext length in bytes (decimal)
pub const ENC_UNENCRYPTED_SIZE: &str = "x-emc-enc-unencrypted-size";

/// Plaintext SHA-1 (hex)
pub const ENC_UNENCRYPTED_SHA1: &str = "x-emc-enc-unencrypted-sha1";

/// RSA signature over the encryption fields (base64)
pub const ENC_METADATA_SIGNATURE: &str = "x-emc-enc-metadata-signature";

/// Transport-level checksum header, `<ALG>/<bytes>/<hex>`
pub const WS_CHECKSUM: &str = "x-emc-wschecksum";

/// Fields covered by the metadata signature, in signing order.
pub const SIGNED_FIELDS: &[&str] = &[
    ENC_ALGORITHM,
    ENC_IV,
    ENC_KEY_ID,
    ENC_KEY_SIZE,
    ENC_OBJECT_KEY,
    ENC_UNENCRYPTED_SHA1,
    ENC_UNENCRYPTED_SIZE,
    TRANSFORM_CONFIG,
];

/// Every field written by the encryption transform.
pub fn is_encryption_field(name: &str) -> bool {
    name == ENC_METADATA_SIGNATURE || SIGNED_FIELDS.contains(&name)
}
