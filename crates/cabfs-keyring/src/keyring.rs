//! Key-hierarchy container: header, entry table, master key, KEK table
//!
//! Container layout (all integers big-endian):
//! ```text
//! 0    header (168 bytes)
//! 168  entry table: entry_count × 20-byte records
//! ...  master-key ciphertext (128 bytes, opaque to us)
//! ...  KEK table: one frame under the master key, entry_count × 32 bytes
//! ...  content-key records: 62-byte frames, addressed per entry
//! ```
//!
//! The master-key and KEK-table offsets stored in the header are relative to
//! the file position of the field that declares them. Entry KEK offsets are
//! relative to the entry's own table position and are re-based against the
//! start of the decrypted KEK table before slicing.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{self, CipherReader};
use crate::error::KeyringError;
use crate::source::KeySource;
use crate::KEY_SIZE;

pub(crate) const HEADER_SIZE: u32 = 168;
pub(crate) const ENTRY_SIZE: u32 = 20;
pub(crate) const MASTER_SIZE: usize = 128;
pub(crate) const CEK_RECORD_SIZE: u32 = 62;

/// File positions of the header fields that offsets are declared relative to.
pub(crate) const MASTER_OFFSET_FIELD: u32 = 152;
pub(crate) const KEK_TABLE_OFFSET_FIELD: u32 = 160;

const NAME_CAPACITY: usize = 64;

/// A resolved per-entry content key. Zeroized on drop.
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// One entry of the key table, fully determined at parse time.
#[derive(Debug, Clone, Copy)]
struct KeyEntry {
    kek_offset: u32,
    cek_offset: u32,
}

/// An opened key-hierarchy container. Owns the plaintext master key and the
/// decrypted KEK table for the lifetime of one extraction session; both are
/// read-only after `open` and zeroized on drop.
pub struct Keyring<R> {
    rd: R,

    entries: Vec<KeyEntry>,
    keks: Zeroizing<Vec<u8>>,

    kek_base: u32,
    head_size: u32,

    master: Zeroizing<Vec<u8>>,
    code: String,
    version: String,
}

impl<R: Read + Seek> Keyring<R> {
    /// Parse and validate the container, unwrap the master key through
    /// `source`, and decrypt the KEK table.
    ///
    /// Any structural violation is a [`KeyringError::Format`]; an owner code
    /// that differs from the credential's is [`KeyringError::OwnerMismatch`];
    /// credential failures propagate unchanged.
    pub fn open(mut rd: R, source: &dyn KeySource) -> Result<Self, KeyringError> {
        rd.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        rd.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => KeyringError::Format("truncated header"),
            _ => KeyringError::Io(e),
        })?;

        let head_size = be32(&header, 0);
        let code = name_field(&header[4..72]);
        let version = name_field(&header[72..140]);
        let entry_count = be32(&header, 140);
        let master_offset = be32(&header, 152);
        let master_size = be32(&header, 156);
        let kek_table_offset = be32(&header, 160);
        let kek_table_size = be32(&header, 164);

        if master_size as usize != MASTER_SIZE {
            return Err(KeyringError::Format("invalid master key size"));
        }
        if kek_table_size as usize != cipher::HEADER_SIZE {
            return Err(KeyringError::Format("invalid kek table header size"));
        }
        if code != source.owner_code() {
            return Err(KeyringError::OwnerMismatch {
                container: code,
                credential: source.owner_code().to_string(),
            });
        }

        // Declared offsets and counts come from the medium; cross-check every
        // region against the bytes actually present before reading it.
        let len = rd.seek(SeekFrom::End(0))?;
        let table_end = u64::from(HEADER_SIZE) + u64::from(entry_count) * u64::from(ENTRY_SIZE);
        if table_end > len {
            return Err(KeyringError::Format("entry table past end of container"));
        }
        let master_pos = u64::from(master_offset) + u64::from(MASTER_OFFSET_FIELD);
        if master_pos + MASTER_SIZE as u64 > len {
            return Err(KeyringError::Format("master key past end of container"));
        }
        let kek_pos = u64::from(kek_table_offset) + u64::from(KEK_TABLE_OFFSET_FIELD);
        let kek_table_len =
            cipher::HEADER_SIZE as u64 + u64::from(entry_count) * KEY_SIZE as u64;
        if kek_pos + kek_table_len > len {
            return Err(KeyringError::Format("kek table past end of container"));
        }

        rd.seek(SeekFrom::Start(u64::from(HEADER_SIZE)))?;
        let mut table = vec![0u8; entry_count as usize * ENTRY_SIZE as usize];
        rd.read_exact(&mut table)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for record in table.chunks_exact(ENTRY_SIZE as usize) {
            if be32(record, 4) as usize != KEY_SIZE {
                return Err(KeyringError::Format("invalid kek size"));
            }
            if be32(record, 16) != CEK_RECORD_SIZE {
                return Err(KeyringError::Format("invalid content key record size"));
            }
            entries.push(KeyEntry {
                kek_offset: be32(record, 0),
                cek_offset: be32(record, 8),
            });
        }

        rd.seek(SeekFrom::Start(master_pos))?;
        let mut wrapped = [0u8; MASTER_SIZE];
        rd.read_exact(&mut wrapped)?;
        let master = Zeroizing::new(source.unwrap_master(&wrapped)?);

        rd.seek(SeekFrom::Start(kek_pos))?;
        let mut keks = Zeroizing::new(vec![0u8; entry_count as usize * KEY_SIZE]);
        let mut frame = CipherReader::open(&mut rd, &master)?;
        frame.read_exact(&mut keks).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => KeyringError::Format("truncated kek table"),
            _ => KeyringError::Io(e),
        })?;
        let kek_base = kek_pos as u32 + cipher::HEADER_SIZE as u32;

        debug!(code, version, entries = entry_count, "keyring opened");

        Ok(Self {
            rd,
            entries,
            keks,
            kek_base,
            head_size,
            master,
            code,
            version,
        })
    }

    /// Decrypt and return the content key for `key_id`.
    ///
    /// Ids at or past the entry count fail with [`KeyringError::KeyNotFound`];
    /// an entry whose stored offset re-bases outside the KEK table is a
    /// format error.
    pub fn resolve(&mut self, key_id: u32) -> Result<ContentKey, KeyringError> {
        let entry = *self
            .entries
            .get(key_id as usize)
            .ok_or(KeyringError::KeyNotFound(key_id))?;

        let pos = (u64::from(entry.kek_offset)
            + u64::from(HEADER_SIZE)
            + u64::from(ENTRY_SIZE) * u64::from(key_id))
        .checked_sub(u64::from(self.kek_base))
        .filter(|p| p + KEY_SIZE as u64 <= self.keks.len() as u64)
        .ok_or(KeyringError::Format("kek offset out of range"))? as usize;
        let kek = &self.keks[pos..pos + KEY_SIZE];

        self.rd.seek(SeekFrom::Start(
            u64::from(self.head_size) + u64::from(entry.cek_offset),
        ))?;
        let record = (&mut self.rd).take(u64::from(CEK_RECORD_SIZE));

        let mut key = ContentKey {
            bytes: [0u8; KEY_SIZE],
        };
        CipherReader::open(record, kek)?
            .read_exact(&mut key.bytes)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    KeyringError::Format("truncated content key record")
                }
                _ => KeyringError::Io(e),
            })?;
        Ok(key)
    }

    /// Wrap `rd` according to a manifest entry's key index. Index 0 is the
    /// stored-unencrypted sentinel and returns the reader untouched.
    pub fn decrypting_reader<T: Read>(
        &mut self,
        rd: T,
        key_id: u32,
    ) -> Result<MaybeDecrypted<T>, KeyringError> {
        if key_id == 0 {
            return Ok(MaybeDecrypted::Plain(rd));
        }
        let key = self.resolve(key_id)?;
        Ok(MaybeDecrypted::Decrypted(CipherReader::open(
            rd,
            key.as_bytes(),
        )?))
    }

    pub fn owner_code(&self) -> &str {
        &self.code
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn master_key(&self) -> &[u8] {
        &self.master
    }

    pub fn entry_count(&self) -> u32 {
        self.entries.len() as u32
    }
}

/// A byte stream that is either passed through or decrypted, depending on
/// the entry's key index.
pub enum MaybeDecrypted<R> {
    Plain(R),
    Decrypted(CipherReader<R>),
}

impl<R: Read> Read for MaybeDecrypted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MaybeDecrypted::Plain(rd) => rd.read(buf),
            MaybeDecrypted::Decrypted(rd) => rd.read(buf),
        }
    }
}

fn be32(b: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(b[offset..offset + 4].try_into().unwrap())
}

/// Length-prefixed fixed-capacity string field; the stored length is clamped
/// to the 64-byte capacity.
fn name_field(field: &[u8]) -> String {
    let len = (be32(field, 0) as usize).min(NAME_CAPACITY);
    String::from_utf8_lossy(&field[4..4 + len]).into_owned()
}
