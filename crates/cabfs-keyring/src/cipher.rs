//! Content-cipher framing: a fixed 30-byte header over AES-CTR payloads
//!
//! Frame layout:
//! ```text
//! [2 bytes: magic 06 03][12 bytes: reserved][16 bytes: IV]
//! [N bytes: AES-CTR ciphertext]
//! ```
//!
//! The same frame wraps the KEK table, each content-key record, and every
//! encrypted file payload; only the key differs per layer.

use std::io::{self, Read, Write};

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use md5::{Digest, Md5};

use crate::error::KeyringError;

/// Size of the frame header preceding every encrypted region.
pub const HEADER_SIZE: usize = 30;
/// The fixed magic pair opening every frame.
pub const MAGIC: [u8; 2] = [0x06, 0x03];

const IV_OFFSET: usize = 14;
const IV_SIZE: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Counter-mode keystream over any of the block cipher's key sizes. The
/// master key's length is decided by the credential, not the container, so
/// all three are accepted.
enum KeyStream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

impl KeyStream {
    fn new(key: &[u8], iv: &[u8; IV_SIZE]) -> Result<Self, KeyringError> {
        let stream = match key.len() {
            16 => Aes128Ctr::new_from_slices(key, iv).map(KeyStream::Aes128),
            24 => Aes192Ctr::new_from_slices(key, iv).map(KeyStream::Aes192),
            32 => Aes256Ctr::new_from_slices(key, iv).map(KeyStream::Aes256),
            _ => return Err(KeyringError::Format("invalid cipher key size")),
        };
        stream.map_err(|_| KeyringError::Format("invalid cipher key size"))
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            KeyStream::Aes128(c) => c.apply_keystream(buf),
            KeyStream::Aes192(c) => c.apply_keystream(buf),
            KeyStream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Streaming decrypter for one framed region.
///
/// The keystream is applied to whatever each `read` returns, so arbitrarily
/// large payloads decrypt incrementally without buffering.
pub struct CipherReader<R> {
    inner: R,
    stream: KeyStream,
}

impl<R: Read> CipherReader<R> {
    /// Read and validate the frame header from `inner`, then wrap it in a
    /// decrypter keyed with `key` and the header's IV.
    ///
    /// Fails before producing any plaintext: a short header or a wrong magic
    /// pair is a format error.
    pub fn open(mut inner: R, key: &[u8]) -> Result<Self, KeyringError> {
        let mut header = [0u8; HEADER_SIZE];
        inner.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => KeyringError::Format("truncated frame header"),
            _ => KeyringError::Io(e),
        })?;

        if header[..2] != MAGIC {
            return Err(KeyringError::Format("invalid frame magic"));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&header[IV_OFFSET..]);

        Ok(Self {
            inner,
            stream: KeyStream::new(key, &iv)?,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stream.apply(&mut buf[..n]);
        Ok(n)
    }
}

/// Write a frame and the encrypted `plaintext` to `out`.
///
/// The IV is the MD5 digest of the plaintext, making captured frames
/// reproducible bit for bit. Only the credential-dump and fixture tooling
/// writes frames; the extraction path is read-only.
pub fn seal<W: Write>(mut out: W, key: &[u8], plaintext: &[u8]) -> Result<(), KeyringError> {
    let mut header = [0u8; HEADER_SIZE];
    header[..2].copy_from_slice(&MAGIC);
    header[IV_OFFSET..].copy_from_slice(&Md5::digest(plaintext));

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&header[IV_OFFSET..]);
    let mut stream = KeyStream::new(key, &iv)?;

    out.write_all(&header)?;
    let mut chunk = [0u8; 8192];
    for part in plaintext.chunks(chunk.len()) {
        let body = &mut chunk[..part.len()];
        body.copy_from_slice(part);
        stream.apply(body);
        out.write_all(body)?;
    }
    Ok(())
}
