//! Stream wrappers that feed every byte through a `RunningChecksum`
//!
//! - `ChecksummedReader` (read path): optionally validates against a
//!   reference value. The comparison happens when the inner reader reports
//!   end-of-stream, never earlier: a partial read cannot be validated.
//! - `ChecksummedWriter` (write path): accumulates the bytes on their way to
//!   the transport so the caller can send the final value as a header.

use std::io::{self, Read, Write};

use crate::running::{ChecksumAlgorithm, ChecksumParseError, ChecksumValue, RunningChecksum};

pub struct ChecksummedReader<R> {
    inner: R,
    running: RunningChecksum,
    reference: Option<ChecksumValue>,
    finished: bool,
}

impl<R: Read> ChecksummedReader<R> {
    /// Accumulate only; nothing is validated.
    pub fn accumulating(inner: R, algorithm: ChecksumAlgorithm) -> Self {
        Self::resume(inner, RunningChecksum::new(algorithm))
    }

    /// Continue an accumulator handed over from a previous range request.
    pub fn resume(inner: R, running: RunningChecksum) -> Self {
        Self {
            inner,
            running,
            reference: None,
            finished: false,
        }
    }

    /// Validate against `reference` when the stream ends.
    pub fn verifying(inner: R, reference: ChecksumValue) -> Self {
        Self {
            inner,
            running: RunningChecksum::new(reference.algorithm()),
            reference: Some(reference),
            finished: false,
        }
    }

    /// Validate against a header value as received from the server.
    ///
    /// A missing reference, or one naming an algorithm we cannot compute,
    /// turns validation off (not all backends return checksums). A reference
    /// with a known algorithm but a malformed body is rejected.
    pub fn from_reference(
        inner: R,
        reference: Option<&str>,
        fallback: ChecksumAlgorithm,
    ) -> Result<Self, ChecksumParseError> {
        let Some(raw) = reference else {
            tracing::debug!("no reference checksum supplied, validation skipped");
            return Ok(Self::accumulating(inner, fallback));
        };
        match raw.parse::<ChecksumValue>() {
            Ok(value) => Ok(Self::verifying(inner, value)),
            Err(ChecksumParseError::UnknownAlgorithm(alg)) => {
                tracing::debug!(algorithm = %alg, "unrecognized checksum algorithm, validation skipped");
                Ok(Self::accumulating(inner, fallback))
            }
            Err(e) => Err(e),
        }
    }

    /// Whether this reader will compare against a reference at end-of-stream
    pub fn is_verifying(&self) -> bool {
        self.reference.is_some()
    }

    /// True once the inner reader reported end-of-stream
    pub fn is_complete(&self) -> bool {
        self.finished
    }

    /// Checksum over the bytes read so far
    pub fn checksum(&self) -> ChecksumValue {
        self.running.value()
    }

    /// Hand the accumulator on (e.g. to the next range request).
    pub fn into_checksum(self) -> RunningChecksum {
        self.running
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        if let Some(reference) = &self.reference {
            let actual = self.running.value();
            reference.reconcile(&actual).map_err(|mismatch| {
                tracing::warn!(
                    expected = %mismatch.expected,
                    actual = %mismatch.actual,
                    "checksum mismatch at end of stream"
                );
                io::Error::from(mismatch)
            })?;
            tracing::debug!(checksum = %actual, "checksum verified");
        }
        Ok(())
    }
}

impl<R: Read> Read for ChecksummedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.finish()?;
        } else {
            self.running.update(&buf[..n]);
        }
        Ok(n)
    }
}

pub struct ChecksummedWriter<W> {
    inner: W,
    running: RunningChecksum,
}

impl<W: Write> ChecksummedWriter<W> {
    pub fn new(inner: W, algorithm: ChecksumAlgorithm) -> Self {
        Self::resume(inner, RunningChecksum::new(algorithm))
    }

    /// Continue an accumulator from a previous range request.
    pub fn resume(inner: W, running: RunningChecksum) -> Self {
        Self { inner, running }
    }

    /// Checksum over everything written so far; send it with the request.
    pub fn checksum(&self) -> ChecksumValue {
        self.running.value()
    }

    pub fn into_parts(self) -> (W, RunningChecksum) {
        (self.inner, self.running)
    }
}

impl<W: Write> Write for ChecksummedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.running.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Drain a reader and return its checksum.
pub fn checksum_reader<R: Read>(reader: R, algorithm: ChecksumAlgorithm) -> io::Result<ChecksumValue> {
    let mut reader = ChecksummedReader::accumulating(reader, algorithm);
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.checksum())
}
