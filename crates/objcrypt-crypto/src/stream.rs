//! AES-CTR stream adapters
//!
//! CTR is its own inverse, so one reader type serves both directions. The
//! keystream can be positioned at any byte offset, which is what makes range
//! reads and range-appended writes possible without touching earlier bytes.

use std::io::{self, Read, Write};

use aes::{Aes128, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr128BE;

use objcrypt_core::{TransformError, TransformResult};

use crate::envelope::{ContentKey, KeySize};

enum Keystream {
    Aes128(Ctr128BE<Aes128>),
    Aes256(Ctr128BE<Aes256>),
}

impl Keystream {
    fn new(key: &ContentKey, offset: u64) -> TransformResult<Self> {
        let mut keystream = match key.spec().key_size {
            KeySize::Aes128 => Keystream::Aes128(
                Ctr128BE::new_from_slices(key.key_bytes(), key.iv())
                    .map_err(|_| TransformError::decryption_failed())?,
            ),
            KeySize::Aes256 => Keystream::Aes256(
                Ctr128BE::new_from_slices(key.key_bytes(), key.iv())
                    .map_err(|_| TransformError::decryption_failed())?,
            ),
        };
        if offset > 0 {
            keystream.seek(offset)?;
        }
        Ok(keystream)
    }

    fn seek(&mut self, offset: u64) -> TransformResult<()> {
        let result = match self {
            Keystream::Aes128(c) => c.try_seek(offset),
            Keystream::Aes256(c) => c.try_seek(offset),
        };
        result.map_err(|_| TransformError::Crypto(format!("keystream offset out of range: {offset}")))
    }

    #[inline]
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Pull-direction cipher: every byte read from `inner` comes out XORed with
/// the keystream.
pub struct CipherReader<R> {
    inner: R,
    keystream: Keystream,
}

impl<R: Read> CipherReader<R> {
    pub fn new(key: &ContentKey, inner: R) -> TransformResult<Self> {
        Self::at(key, inner, 0)
    }

    /// Start the keystream at byte `offset` of the object.
    pub fn at(key: &ContentKey, inner: R, offset: u64) -> TransformResult<Self> {
        Ok(Self {
            inner,
            keystream: Keystream::new(key, offset)?,
        })
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.keystream.apply(&mut buf[..n]);
        Ok(n)
    }
}

/// Push-direction cipher for callers that write into a sink.
pub struct CipherWriter<W> {
    inner: W,
    keystream: Keystream,
    scratch: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(key: &ContentKey, inner: W) -> TransformResult<Self> {
        Self::at(key, inner, 0)
    }

    pub fn at(key: &ContentKey, inner: W, offset: u64) -> TransformResult<Self> {
        Ok(Self {
            inner,
            keystream: Keystream::new(key, offset)?,
            scratch: Vec::new(),
        })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CipherWriter<W> {
    // All-or-nothing: the keystream has advanced past `buf` once it is
    // applied, so a short write to `inner` cannot be reported back.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.keystream.apply(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn encrypt_stream<R: Read>(key: &ContentKey, plaintext: R) -> TransformResult<CipherReader<R>> {
    CipherReader::new(key, plaintext)
}

pub fn decrypt_stream<R: Read>(key: &ContentKey, ciphertext: R) -> TransformResult<CipherReader<R>> {
    CipherReader::new(key, ciphertext)
}

/// Encrypt a plaintext range that starts at byte `offset` of the object.
pub fn encrypt_stream_at<R: Read>(
    key: &ContentKey,
    plaintext: R,
    offset: u64,
) -> TransformResult<CipherReader<R>> {
    CipherReader::at(key, plaintext, offset)
}

/// Decrypt a ciphertext range that starts at byte `offset` of the object.
pub fn decrypt_stream_at<R: Read>(
    key: &ContentKey,
    ciphertext: R,
    offset: u64,
) -> TransformResult<CipherReader<R>> {
    CipherReader::at(key, ciphertext, offset)
}
