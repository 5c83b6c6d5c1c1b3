//! Keyed path obfuscation: logical filenames to sharded on-disk locations

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

use crate::error::ExtractError;

type HmacSha1 = Hmac<Sha1>;

/// Length of the keyed-hash digest behind every sharded path.
pub const DIGEST_SIZE: usize = 20;
/// `h/h/h/h` plus 36 hex characters.
pub const SHARDED_PATH_LEN: usize = 43;

const KEY_SUFFIX: &[u8] = b"test";

/// Derives per-owner sharded storage paths from logical filenames.
///
/// The keyed-hash state is reset after every call, but it is still mutated
/// during one; clone the obfuscator for concurrent callers rather than
/// sharing an instance.
#[derive(Clone)]
pub struct PathObfuscator {
    mac: HmacSha1,
}

impl PathObfuscator {
    /// The hash key is itself derived from the owner code, so every owner
    /// gets a disjoint shard layout.
    pub fn new(owner_code: &str) -> Self {
        let mut key = Sha1::new();
        key.update(owner_code.as_bytes());
        key.update(KEY_SUFFIX);
        let mac = HmacSha1::new_from_slice(&key.finalize()).expect("hmac accepts any key length");
        Self { mac }
    }

    /// Sharded path for a logical filename. Deterministic per
    /// `(owner, path)` pair.
    pub fn obfuscate(&mut self, path: &str) -> String {
        self.mac.update(path.as_bytes());
        let digest: [u8; DIGEST_SIZE] = self.mac.finalize_reset().into_bytes().into();
        format_digest(&digest)
    }
}

/// Format a raw 20-byte digest as its fixed 43-character sharded path; used
/// directly for manifest entries that carry a storage-digest override.
pub fn shard_path(digest: &[u8]) -> Result<String, ExtractError> {
    let digest: &[u8; DIGEST_SIZE] = digest
        .try_into()
        .map_err(|_| ExtractError::DigestLength(digest.len()))?;
    Ok(format_digest(digest))
}

/// The first two digest bytes become four single-hex-digit directory levels;
/// the remaining 18 bytes are the final component.
fn format_digest(digest: &[u8; DIGEST_SIZE]) -> String {
    const TBL: &[u8; 16] = b"0123456789abcdef";
    let hex = |n: u8| char::from(TBL[n as usize]);

    let mut out = String::with_capacity(SHARDED_PATH_LEN);
    out.push(hex(digest[0] >> 4));
    out.push('/');
    out.push(hex(digest[0] & 15));
    out.push('/');
    out.push(hex(digest[1] >> 4));
    out.push('/');
    out.push(hex(digest[1] & 15));
    for b in &digest[2..] {
        out.push(hex(b >> 4));
        out.push(hex(b & 15));
    }
    out
}
