//! Memory of the last protocol that worked, used as a negotiation fallback.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use smartvpn_core::VpnProtocol;

const HISTORY_FILE: &str = "protocol_history.json";

pub trait ProtocolHistory: Send + Sync {
    fn last_working(&self) -> Option<VpnProtocol>;
    fn record(&self, protocol: VpnProtocol);
}

#[derive(Debug, Default)]
pub struct MemoryProtocolHistory {
    last: Mutex<Option<VpnProtocol>>,
}

impl MemoryProtocolHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last(protocol: VpnProtocol) -> Self {
        Self {
            last: Mutex::new(Some(protocol)),
        }
    }
}

impl ProtocolHistory for MemoryProtocolHistory {
    fn last_working(&self) -> Option<VpnProtocol> {
        self.last.lock().ok().and_then(|last| *last)
    }

    fn record(&self, protocol: VpnProtocol) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(protocol);
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryRecord {
    last_working: Option<VpnProtocol>,
}

/// History persisted as `protocol_history.json`, normally in the same
/// directory as the secret store. An unreadable file counts as no history.
#[derive(Debug, Clone)]
pub struct FileProtocolHistory {
    path: PathBuf,
}

impl FileProtocolHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// History file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HISTORY_FILE))
    }

    fn load(&self) -> std::io::Result<HistoryRecord> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HistoryRecord::default());
            }
            Err(e) => return Err(e),
        };
        serde_json::from_str(&data).map_err(std::io::Error::other)
    }

    fn save(&self, record: &HistoryRecord) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, json)
    }
}

impl ProtocolHistory for FileProtocolHistory {
    fn last_working(&self) -> Option<VpnProtocol> {
        match self.load() {
            Ok(record) => record.last_working,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable protocol history"
                );
                None
            }
        }
    }

    fn record(&self, protocol: VpnProtocol) {
        let record = HistoryRecord {
            last_working: Some(protocol),
        };
        match self.save(&record) {
            Ok(()) => debug!(%protocol, "Recorded working protocol"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist protocol history"
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn file_history_survives_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileProtocolHistory::in_dir(&dir.path().join("state"));
        assert_eq!(history.last_working(), None);

        history.record(VpnProtocol::OpenVpnTcp);
        history.record(VpnProtocol::Ikev2);

        let reopened = FileProtocolHistory::in_dir(&dir.path().join("state"));
        assert_eq!(reopened.last_working(), Some(VpnProtocol::Ikev2));
        let raw = std::fs::read_to_string(dir.path().join("state").join(HISTORY_FILE)).unwrap();
        assert!(raw.contains("\"ikev2\""));
    }

    #[test]
    fn corrupt_history_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILE), "{not json").unwrap();
        let history = FileProtocolHistory::in_dir(dir.path());

        assert_eq!(history.last_working(), None);
        // Recording replaces the corrupt file.
        history.record(VpnProtocol::WireGuard);
        assert_eq!(history.last_working(), Some(VpnProtocol::WireGuard));
    }

    #[test]
    fn memory_history_keeps_latest() {
        let history = MemoryProtocolHistory::new();
        assert_eq!(history.last_working(), None);
        history.record(VpnProtocol::WireGuard);
        assert_eq!(history.last_working(), Some(VpnProtocol::WireGuard));
        assert_eq!(
            MemoryProtocolHistory::with_last(VpnProtocol::Ikev2).last_working(),
            Some(VpnProtocol::Ikev2)
        );
    }
}
