//! Crypto error types.

/// Errors from key and certificate handling.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
