pub mod config;
pub mod error;
pub mod metadata;

pub use error::{ChecksumMismatch, TransformError, TransformResult};
pub use metadata::Metadata;
