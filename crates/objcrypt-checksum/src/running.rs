//! Incremental checksums over arbitrarily chunked input
//!
//! A `RunningChecksum` can be fed in as many `update` calls as the I/O layer
//! produces and still yields the digest of the concatenated bytes. For
//! multi-request (range) uploads, pass the same accumulator across every
//! request in byte-offset order; a value read midway covers only the bytes
//! fed so far.

use std::fmt;
use std::str::FromStr;

use digest::Digest;
use objcrypt_core::ChecksumMismatch;
use thiserror::Error;

/// Digest algorithms accepted for checksums.
///
/// Atmos-era servers also emit `SHA0`; it has no implementation here and
/// parses as unknown, which callers treat as "skip validation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "MD5",
            ChecksumAlgorithm::Sha1 => "SHA1",
            ChecksumAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Md5 => 16,
            ChecksumAlgorithm::Sha1 => 20,
            ChecksumAlgorithm::Sha256 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MD5" => Ok(ChecksumAlgorithm::Md5),
            "SHA1" | "SHA-1" => Ok(ChecksumAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Ok(ChecksumAlgorithm::Sha256),
            _ => Err(ChecksumParseError::UnknownAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumParseError {
    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("malformed checksum value '{0}' (expected <ALG>/<bytes>/<hex>)")]
    Malformed(String),
}

/// A finished checksum: algorithm, hex digest, and how many bytes it covers.
///
/// Text form is `<ALG>/<bytes>/<hex>`, e.g. `SHA1/5/aaf4c61d...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    digest: String,
    byte_count: u64,
}

impl ChecksumValue {
    /// Build a value from a hex digest. The hex is normalized to lowercase.
    pub fn new(
        algorithm: ChecksumAlgorithm,
        digest_hex: &str,
        byte_count: u64,
    ) -> Result<Self, ChecksumParseError> {
        let digest = digest_hex.trim().to_ascii_lowercase();
        let valid = digest.len() == algorithm.digest_len() * 2
            && digest.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(ChecksumParseError::Malformed(digest_hex.to_string()));
        }
        Ok(Self {
            algorithm,
            digest,
            byte_count,
        })
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Compare `actual` against `self` as the reference value.
    ///
    /// Values computed with different algorithms never reconcile.
    pub fn reconcile(&self, actual: &ChecksumValue) -> Result<(), ChecksumMismatch> {
        if self == actual {
            return Ok(());
        }
        Err(ChecksumMismatch {
            expected: self.to_string(),
            actual: actual.to_string(),
        })
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.algorithm, self.byte_count, self.digest)
    }
}

impl FromStr for ChecksumValue {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let [alg, count, digest] = parts.as_slice() else {
            return Err(ChecksumParseError::Malformed(s.to_string()));
        };
        let algorithm: ChecksumAlgorithm = alg.parse()?;
        let byte_count: u64 = count
            .parse()
            .map_err(|_| ChecksumParseError::Malformed(s.to_string()))?;
        ChecksumValue::new(algorithm, digest, byte_count)
            .map_err(|_| ChecksumParseError::Malformed(s.to_string()))
    }
}

#[derive(Clone)]
enum DigestState {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl DigestState {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => DigestState::Md5(md5::Md5::new()),
            ChecksumAlgorithm::Sha1 => DigestState::Sha1(sha1::Sha1::new()),
            ChecksumAlgorithm::Sha256 => DigestState::Sha256(sha2::Sha256::new()),
        }
    }

    #[inline]
    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Md5(h) => h.update(data),
            DigestState::Sha1(h) => h.update(data),
            DigestState::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            DigestState::Md5(h) => h.finalize().to_vec(),
            DigestState::Sha1(h) => h.finalize().to_vec(),
            DigestState::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// Mutable digest accumulator with a cumulative byte count.
///
/// Not synchronized: one caller feeds it, in stream order.
#[derive(Clone)]
pub struct RunningChecksum {
    algorithm: ChecksumAlgorithm,
    state: DigestState,
    byte_count: u64,
}

impl RunningChecksum {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            state: DigestState::new(algorithm),
            byte_count: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
        self.byte_count += data.len() as u64;
    }

    /// Snapshot of the digest over everything fed so far. Does not reset.
    pub fn value(&self) -> ChecksumValue {
        ChecksumValue {
            algorithm: self.algorithm,
            digest: hex::encode(self.state.clone().finalize()),
            byte_count: self.byte_count,
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }
}

impl fmt::Debug for RunningChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningChecksum")
            .field("algorithm", &self.algorithm)
            .field("byte_count", &self.byte_count)
            .finish()
    }
}

/// One-shot checksum of an in-memory buffer.
pub fn checksum_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> ChecksumValue {
    let mut running = RunningChecksum::new(algorithm);
    running.update(data);
    running.value()
}
