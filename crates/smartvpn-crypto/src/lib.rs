//! `SmartVPN` key material
//!
//! Everything the client needs to authenticate a tunnel, kept apart from the
//! networking code:
//!
//! - **Keys**: X25519 key pair, rendered base64 the way WireGuard expects
//! - **Certificate**: short-lived client certificate with server-computed
//!   refresh and expiry times
//! - **Store**: capability-scoped secret store with distinct "missing" and
//!   "corrupt" failure kinds, in-memory and file-backed

pub mod certificate;
pub mod error;
pub mod keys;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub use certificate::test_certificate;
pub use certificate::{VpnCertificate, unix_secs};
pub use error::CryptoError;
pub use keys::VpnKeys;
pub use store::{FileSecretStore, MemorySecretStore, SecretStore, StoreError};
