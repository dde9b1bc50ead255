//! Short-lived client certificate.
//!
//! The server decides both when the certificate stops being valid and when
//! the client should start renewing it; `refresh_time` is always strictly
//! earlier than `valid_until`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// A signed client certificate plus its server-computed timing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnCertificate {
    /// Signed certificate blob (PEM), opaque to the client.
    certificate: String,
    /// Expiry, Unix seconds.
    valid_until: u64,
    /// Server-suggested renewal time, Unix seconds.
    refresh_time: u64,
}

impl std::fmt::Debug for VpnCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnCertificate")
            .field("certificate_len", &self.certificate.len())
            .field("valid_until", &self.valid_until)
            .field("refresh_time", &self.refresh_time)
            .finish()
    }
}

impl VpnCertificate {
    pub fn new(
        certificate: impl Into<String>,
        valid_until: u64,
        refresh_time: u64,
    ) -> Result<Self, CryptoError> {
        let cert = Self {
            certificate: certificate.into(),
            valid_until,
            refresh_time,
        };
        cert.check()?;
        Ok(cert)
    }

    /// Re-check invariants, e.g. after deserialising from storage.
    pub fn check(&self) -> Result<(), CryptoError> {
        if self.certificate.is_empty() {
            return Err(CryptoError::InvalidCertificate("empty certificate".into()));
        }
        if self.refresh_time >= self.valid_until {
            return Err(CryptoError::InvalidCertificate(format!(
                "refresh time {} is not before expiry {}",
                self.refresh_time, self.valid_until
            )));
        }
        Ok(())
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    pub fn valid_until(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.valid_until)
    }

    pub fn refresh_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.refresh_time)
    }

    /// The moment the client should renew: `refresh_time - skew`.
    pub fn refresh_due_at(&self, skew: Duration) -> SystemTime {
        self.refresh_time()
            .checked_sub(skew)
            .unwrap_or(UNIX_EPOCH)
    }

    /// Whether renewal is due at `now` given `skew`.
    pub fn needs_refresh(&self, now: SystemTime, skew: Duration) -> bool {
        self.refresh_due_at(skew) <= now
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.valid_until() <= now
    }
}

/// Seconds since the Unix epoch for `time`, clamped at zero.
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Certificate due for renewal at `refresh_time` and valid for `lifetime`
/// beyond it.
#[cfg(any(test, feature = "test-utils"))]
#[allow(clippy::expect_used)]
pub fn test_certificate(refresh_time: SystemTime, lifetime: Duration) -> VpnCertificate {
    let refresh = unix_secs(refresh_time);
    VpnCertificate::new(
        format!("-----BEGIN CERTIFICATE-----\ntest-{refresh}\n-----END CERTIFICATE-----\n"),
        refresh + lifetime.as_secs().max(1),
        refresh,
    )
    .expect("test certificate timing is consistent")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    #[test]
    fn rejects_refresh_not_before_expiry() {
        assert!(VpnCertificate::new(PEM, 1_000, 1_000).is_err());
        assert!(VpnCertificate::new(PEM, 1_000, 2_000).is_err());
        assert!(VpnCertificate::new("", 2_000, 1_000).is_err());
        assert!(VpnCertificate::new(PEM, 2_000, 1_000).is_ok());
    }

    #[test]
    fn refresh_due_subtracts_skew() {
        let cert = VpnCertificate::new(PEM, 10_000, 5_000).unwrap();
        let skew = Duration::from_secs(60);
        let due = cert.refresh_due_at(skew);
        assert_eq!(unix_secs(due), 4_940);

        assert!(!cert.needs_refresh(UNIX_EPOCH + Duration::from_secs(4_939), skew));
        assert!(cert.needs_refresh(UNIX_EPOCH + Duration::from_secs(4_940), skew));
    }

    #[test]
    fn skew_larger_than_refresh_time_clamps_to_epoch() {
        let cert = VpnCertificate::new(PEM, 100, 30).unwrap();
        assert_eq!(cert.refresh_due_at(Duration::from_secs(60)), UNIX_EPOCH);
    }

    #[test]
    fn expiry_is_inclusive() {
        let cert = VpnCertificate::new(PEM, 100, 50).unwrap();
        assert!(!cert.is_expired(UNIX_EPOCH + Duration::from_secs(99)));
        assert!(cert.is_expired(UNIX_EPOCH + Duration::from_secs(100)));
    }

    #[test]
    fn debug_does_not_print_blob() {
        let cert = VpnCertificate::new(PEM, 100, 50).unwrap();
        assert!(!format!("{cert:?}").contains("BEGIN CERTIFICATE"));
    }
}
