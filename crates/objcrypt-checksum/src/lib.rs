//! objcrypt-checksum: incremental integrity checksums for object streams
//!
//! # Overview
//! - `running`: `RunningChecksum` accumulator (MD5, SHA-1, SHA-256) and the
//!   `ChecksumValue` wire form `<ALG>/<bytes>/<hex>`
//! - `stream`: `ChecksummedReader` / `ChecksummedWriter` wrappers that feed
//!   every byte through an accumulator, validating at end-of-stream on read

pub mod running;
pub mod stream;

pub use running::{
    checksum_bytes, ChecksumAlgorithm, ChecksumParseError, ChecksumValue, RunningChecksum,
};
pub use stream::{checksum_reader, ChecksummedReader, ChecksummedWriter};
