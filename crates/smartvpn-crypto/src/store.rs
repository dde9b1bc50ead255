//! Secret store for the client certificate and key pair.
//!
//! The store is the single source of truth for certificate freshness: the
//! refresh scheduler re-reads it on every firing instead of trusting cached
//! state. Failures distinguish an absent item from one that exists but can
//! no longer be decoded, since the two lead to different recovery paths.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::certificate::VpnCertificate;
use crate::error::CryptoError;
use crate::keys::VpnKeys;

const CERTIFICATE_FILE: &str = "certificate.json";
const KEYS_FILE: &str = "wireguard.key";

/// Errors returned by a [`SecretStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("secret not found")]
    Missing,

    #[error("stored secret is corrupt: {0}")]
    Corrupt(String),

    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Capability-scoped storage for the client's certificate and key pair.
pub trait SecretStore: Send + Sync {
    fn certificate(&self) -> Result<VpnCertificate, StoreError>;
    fn store_certificate(&self, certificate: &VpnCertificate) -> Result<(), StoreError>;
    fn keys(&self) -> Result<VpnKeys, StoreError>;
    fn store_keys(&self, keys: &VpnKeys) -> Result<(), StoreError>;
    /// Remove both certificate and keys.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local store; used by tests and by embedders that persist
/// secrets themselves.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    inner: Mutex<MemorySecrets>,
}

#[derive(Debug, Default)]
struct MemorySecrets {
    certificate: Option<VpnCertificate>,
    keys: Option<VpnKeys>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemorySecrets>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store lock poisoned".into()))
    }
}

impl SecretStore for MemorySecretStore {
    fn certificate(&self) -> Result<VpnCertificate, StoreError> {
        self.lock()?.certificate.clone().ok_or(StoreError::Missing)
    }

    fn store_certificate(&self, certificate: &VpnCertificate) -> Result<(), StoreError> {
        self.lock()?.certificate = Some(certificate.clone());
        Ok(())
    }

    fn keys(&self) -> Result<VpnKeys, StoreError> {
        self.lock()?.keys.clone().ok_or(StoreError::Missing)
    }

    fn store_keys(&self, keys: &VpnKeys) -> Result<(), StoreError> {
        self.lock()?.keys = Some(keys.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut secrets = self.lock()?;
        secrets.certificate = None;
        secrets.keys = None;
        Ok(())
    }
}

/// Directory-backed store: `certificate.json` plus a raw 32-byte
/// `wireguard.key`, both owner-only on Unix.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.smartvpn`, or `./.smartvpn` when the home directory is unknown.
    pub fn default_dir(home: Option<&Path>) -> PathBuf {
        home.map_or_else(|| PathBuf::from("."), Path::to_path_buf)
            .join(".smartvpn")
    }

    fn certificate_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_FILE)
    }

    fn keys_path(&self) -> PathBuf {
        self.dir.join(KEYS_FILE)
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

impl SecretStore for FileSecretStore {
    fn certificate(&self) -> Result<VpnCertificate, StoreError> {
        let path = self.certificate_path();
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::Missing),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let certificate: VpnCertificate = serde_json::from_str(&data)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        certificate
            .check()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(certificate)
    }

    fn store_certificate(&self, certificate: &VpnCertificate) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(certificate)
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize certificate: {e}")))?;
        let path = self.certificate_path();
        std::fs::write(&path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<VpnKeys, StoreError> {
        let path = self.keys_path();
        if !path.exists() {
            return Err(StoreError::Missing);
        }
        VpnKeys::load_from_file(&path).map_err(|e| match e {
            CryptoError::IoError(io) if io.kind() != std::io::ErrorKind::PermissionDenied => {
                StoreError::Io(io)
            }
            other => StoreError::Corrupt(other.to_string()),
        })
    }

    fn store_keys(&self, keys: &VpnKeys) -> Result<(), StoreError> {
        keys.save_to_file(&self.keys_path()).map_err(|e| match e {
            CryptoError::IoError(io) => StoreError::Io(io),
            other => StoreError::Corrupt(other.to_string()),
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        remove_if_present(&self.certificate_path())?;
        remove_if_present(&self.keys_path())
    }
}
