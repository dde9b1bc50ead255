//! Client certificate refresh: signer interface, backoff policy and the
//! scheduler actor.

pub mod backoff;
pub mod scheduler;
pub mod signer;

pub use backoff::BackoffPolicy;
pub use scheduler::{
    CertificateRefreshScheduler, RefreshError, RefreshHandle, RefreshSettings, RefreshState,
};
pub use signer::{ApiCertificateSigner, ApiSignerConfig, CertificateSigner, SignerError};
