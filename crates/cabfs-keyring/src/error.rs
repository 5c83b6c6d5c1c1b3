use thiserror::Error;

use crate::source::CredentialError;

#[derive(Debug, Error)]
pub enum KeyringError {
    /// Malformed or tampered container or frame. Unrecoverable for this
    /// container; never retried.
    #[error("malformed container: {0}")]
    Format(&'static str),

    #[error("container owner {container:?} does not match credential owner {credential:?}")]
    OwnerMismatch {
        container: String,
        credential: String,
    },

    #[error("content key {0} not found")]
    KeyNotFound(u32),

    /// KeySource failure, surfaced verbatim. The keyring never interprets
    /// credential errors.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
