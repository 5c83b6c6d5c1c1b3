//! cabfs-keyring: key-hierarchy container parsing and content-key resolution
//!
//! Key hierarchy:
//! ```text
//! master key (unwrapped once per session by the KeySource credential)
//!   └── KEK table: one cipher frame under the master key, 32 bytes per entry
//!         └── content keys: 62-byte frames, one per entry, under each KEK
//!               └── file payloads: frames under the resolved content key
//! ```
//!
//! Every encrypted region shares the same framing: a 30-byte header (magic +
//! IV) followed by an AES-CTR payload. The master key itself is the one
//! exception — it is an opaque asymmetric-wrapped blob only the credential
//! can open.

pub mod cipher;
pub mod error;
pub mod keyring;
pub mod source;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use cipher::{seal, CipherReader};
pub use error::KeyringError;
pub use keyring::{ContentKey, Keyring, MaybeDecrypted};
pub use source::{CredentialError, KeySource, MemoryKeySource};

/// Size of a KEK and of a resolved content key, in bytes.
pub const KEY_SIZE: usize = 32;
