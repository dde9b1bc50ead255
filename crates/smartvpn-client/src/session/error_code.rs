//! Control-channel error codes and the recovery each one calls for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fault reported by the control channel of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionErrorCode {
    CertificateExpired,
    CertificateNotProvided,
    BadCertificateSignature,
    CertificateRevoked,
    KeyUsedMultipleTimes,
    MaxSessionsFree,
    MaxSessionsBasic,
    MaxSessionsPlus,
    MaxSessionsPro,
    MaxSessionsVisionary,
    MaxSessionsUnknown,
    ServerError,
    PolicyViolationDelinquent,
    PolicyViolationLowPlan,
    UserTorrentNotAllowed,
    UserBadBehavior,
    RestrictedServer,
    /// Internal status the control channel should never report to a
    /// signed-in client.
    GuestSession,
}

impl SessionErrorCode {
    pub const ALL: [Self; 18] = [
        Self::CertificateExpired,
        Self::CertificateNotProvided,
        Self::BadCertificateSignature,
        Self::CertificateRevoked,
        Self::KeyUsedMultipleTimes,
        Self::MaxSessionsFree,
        Self::MaxSessionsBasic,
        Self::MaxSessionsPlus,
        Self::MaxSessionsPro,
        Self::MaxSessionsVisionary,
        Self::MaxSessionsUnknown,
        Self::ServerError,
        Self::PolicyViolationDelinquent,
        Self::PolicyViolationLowPlan,
        Self::UserTorrentNotAllowed,
        Self::UserBadBehavior,
        Self::RestrictedServer,
        Self::GuestSession,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CertificateExpired => "certificate-expired",
            Self::CertificateNotProvided => "certificate-not-provided",
            Self::BadCertificateSignature => "bad-certificate-signature",
            Self::CertificateRevoked => "certificate-revoked",
            Self::KeyUsedMultipleTimes => "key-used-multiple-times",
            Self::MaxSessionsFree => "max-sessions-free",
            Self::MaxSessionsBasic => "max-sessions-basic",
            Self::MaxSessionsPlus => "max-sessions-plus",
            Self::MaxSessionsPro => "max-sessions-pro",
            Self::MaxSessionsVisionary => "max-sessions-visionary",
            Self::MaxSessionsUnknown => "max-sessions-unknown",
            Self::ServerError => "server-error",
            Self::PolicyViolationDelinquent => "policy-violation-delinquent",
            Self::PolicyViolationLowPlan => "policy-violation-low-plan",
            Self::UserTorrentNotAllowed => "user-torrent-not-allowed",
            Self::UserBadBehavior => "user-bad-behavior",
            Self::RestrictedServer => "restricted-server",
            Self::GuestSession => "guest-session",
        }
    }
}

impl fmt::Display for SessionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown session error code: {s}"))
    }
}

/// Alert shown after a policy disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAlert {
    MaxSessions,
    ServerError,
    DelinquentUser,
    SubscriptionRequired,
}

/// What the session handler does about an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Renew the certificate, then re-authenticate the control channel.
    RefreshCertificate,
    /// Throw away keys and certificate, obtain new ones, reconnect from
    /// scratch through the preparer.
    RegenerateKeys,
    Disconnect(Option<DisconnectAlert>),
    /// The control channel recovers by itself.
    Wait,
}

/// Recovery policy for `code`.
pub const fn recovery_for(code: SessionErrorCode) -> RecoveryAction {
    use SessionErrorCode as C;
    match code {
        C::CertificateExpired | C::CertificateNotProvided => RecoveryAction::RefreshCertificate,
        C::BadCertificateSignature | C::CertificateRevoked | C::KeyUsedMultipleTimes => {
            RecoveryAction::RegenerateKeys
        }
        C::MaxSessionsFree
        | C::MaxSessionsBasic
        | C::MaxSessionsPlus
        | C::MaxSessionsPro
        | C::MaxSessionsVisionary
        | C::MaxSessionsUnknown => RecoveryAction::Disconnect(Some(DisconnectAlert::MaxSessions)),
        C::ServerError => RecoveryAction::Disconnect(Some(DisconnectAlert::ServerError)),
        C::PolicyViolationDelinquent => {
            RecoveryAction::Disconnect(Some(DisconnectAlert::DelinquentUser))
        }
        C::PolicyViolationLowPlan => {
            RecoveryAction::Disconnect(Some(DisconnectAlert::SubscriptionRequired))
        }
        C::UserTorrentNotAllowed | C::UserBadBehavior | C::GuestSession => {
            RecoveryAction::Disconnect(None)
        }
        C::RestrictedServer => RecoveryAction::Wait,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn certificate_problems_map_to_refresh_or_regeneration() {
        assert_eq!(
            recovery_for(SessionErrorCode::CertificateExpired),
            RecoveryAction::RefreshCertificate
        );
        assert_eq!(
            recovery_for(SessionErrorCode::CertificateNotProvided),
            RecoveryAction::RefreshCertificate
        );
        for code in [
            SessionErrorCode::BadCertificateSignature,
            SessionErrorCode::CertificateRevoked,
            SessionErrorCode::KeyUsedMultipleTimes,
        ] {
            assert_eq!(recovery_for(code), RecoveryAction::RegenerateKeys, "{code}");
        }
    }

    #[test]
    fn every_max_sessions_variant_disconnects_with_alert() {
        let max_sessions: Vec<_> = SessionErrorCode::ALL
            .into_iter()
            .filter(|c| c.as_str().starts_with("max-sessions"))
            .collect();
        assert_eq!(max_sessions.len(), 6);
        for code in max_sessions {
            assert_eq!(
                recovery_for(code),
                RecoveryAction::Disconnect(Some(DisconnectAlert::MaxSessions))
            );
        }
    }

    #[test]
    fn policy_and_misuse_codes() {
        assert_eq!(
            recovery_for(SessionErrorCode::PolicyViolationLowPlan),
            RecoveryAction::Disconnect(Some(DisconnectAlert::SubscriptionRequired))
        );
        assert_eq!(
            recovery_for(SessionErrorCode::PolicyViolationDelinquent),
            RecoveryAction::Disconnect(Some(DisconnectAlert::DelinquentUser))
        );
        assert_eq!(
            recovery_for(SessionErrorCode::UserTorrentNotAllowed),
            RecoveryAction::Disconnect(None)
        );
        assert_eq!(recovery_for(SessionErrorCode::GuestSession), RecoveryAction::Disconnect(None));
        assert_eq!(recovery_for(SessionErrorCode::RestrictedServer), RecoveryAction::Wait);
    }

    #[test]
    fn names_parse_and_serialize_consistently() {
        for code in SessionErrorCode::ALL {
            assert_eq!(code.as_str().parse::<SessionErrorCode>().unwrap(), code);
            assert_eq!(
                serde_json::to_string(&code).unwrap(),
                format!("\"{}\"", code.as_str())
            );
        }
        assert!("certificate-melted".parse::<SessionErrorCode>().is_err());
    }
}
