use thiserror::Error;

use cabfs_keyring::KeyringError;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid storage digest length: {0}")]
    DigestLength(usize),

    #[error(transparent)]
    Keyring(#[from] KeyringError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
