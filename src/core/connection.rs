use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use gocardless::{Error as RemoteError, Recovery};

/// Length of the access window granted by a fresh consent.
pub const ACCESS_WINDOW_DAYS: i64 = 90;
/// How far ahead of expiry a connection counts as expiring soon.
pub const EXPIRY_WARNING_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Pending,
    Linked,
    Expired,
    Suspended,
}

impl ConnectionStatus {
    /// Maps a requisition status code onto the local lifecycle.
    pub fn from_requisition(code: &str) -> Self {
        match code {
            "CR" => ConnectionStatus::Pending,
            "LN" => ConnectionStatus::Linked,
            "EX" | "RJ" | "UA" => ConnectionStatus::Expired,
            "SU" => ConnectionStatus::Suspended,
            _ => ConnectionStatus::Pending,
        }
    }

    /// Status forced by a failed import, if the failure is one that says
    /// something about the consent itself.
    pub fn after_failure(err: &RemoteError) -> Option<Self> {
        match err.recovery() {
            Recovery::ExpireConnection => Some(ConnectionStatus::Expired),
            Recovery::SuspendConnection => Some(ConnectionStatus::Suspended),
            Recovery::AlreadyGone | Recovery::Fail => None,
        }
    }

    pub fn needs_reauth(&self) -> bool {
        matches!(self, ConnectionStatus::Expired | ConnectionStatus::Suspended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Linked => "linked",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConnectionStatus::Pending),
            "linked" => Ok(ConnectionStatus::Linked),
            "expired" => Ok(ConnectionStatus::Expired),
            "suspended" => Ok(ConnectionStatus::Suspended),
            s => Err(anyhow::anyhow!("unknown connection status {}", s)),
        }
    }
}

/// A consent-based link to one institution.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub tenant_id: String,
    pub requisition_id: String,
    pub institution_id: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub access_valid_until: Option<DateTime<Utc>>,
    pub institution_logo_url: Option<String>,
    pub institution_country: Option<String>,
    pub raw_payload: serde_json::Value,
    pub raw_institution_payload: serde_json::Value,
    pub scheduled_for_deletion: bool,
}

impl Connection {
    /// A connection for a consent the user just completed.
    pub fn linked(
        tenant_id: &str,
        requisition_id: &str,
        institution_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            tenant_id: tenant_id.to_string(),
            requisition_id: requisition_id.to_string(),
            institution_id: institution_id.to_string(),
            name: name.to_string(),
            status: ConnectionStatus::Linked,
            access_valid_until: Some(now + Duration::days(ACCESS_WINDOW_DAYS)),
            institution_logo_url: None,
            institution_country: None,
            raw_payload: serde_json::json!({}),
            raw_institution_payload: serde_json::json!({}),
            scheduled_for_deletion: false,
        }
    }

    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_valid_until.map_or(false, |until| until < now)
    }

    pub fn is_access_expiring_soon(&self, now: DateTime<Utc>) -> bool {
        self.access_valid_until
            .map_or(false, |until| until < now + Duration::days(EXPIRY_WARNING_DAYS))
    }

    /// Points the connection at a freshly consented requisition.
    pub fn reconnect(&mut self, requisition_id: &str, now: DateTime<Utc>) {
        self.requisition_id = requisition_id.to_string();
        self.status = ConnectionStatus::Linked;
        self.access_valid_until = Some(now + Duration::days(ACCESS_WINDOW_DAYS));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn connection(valid_until: Option<DateTime<Utc>>) -> Connection {
        Connection {
            access_valid_until: valid_until,
            ..Connection::linked("tenant", "req_1", "BANK", "Bank", Utc::now())
        }
    }

    #[test]
    fn maps_requisition_status_codes() {
        let tests = vec![
            ("CR", ConnectionStatus::Pending),
            ("LN", ConnectionStatus::Linked),
            ("EX", ConnectionStatus::Expired),
            ("SU", ConnectionStatus::Suspended),
            ("RJ", ConnectionStatus::Expired),
            ("UA", ConnectionStatus::Expired),
            ("GC", ConnectionStatus::Pending),
        ];

        for (code, expected) in tests {
            assert_eq!(ConnectionStatus::from_requisition(code), expected, "{}", code);
        }
    }

    #[test]
    fn failures_force_status_only_for_consent_errors() {
        let expired = gocardless::classify(400, json!({"type": "EUA_EXPIRED"}));
        let reauth = gocardless::classify(400, json!({"type": "ACCESS_INVALID"}));
        let other = gocardless::classify(500, json!({"detail": "boom"}));
        let missing = gocardless::classify(404, json!({}));

        assert_eq!(
            ConnectionStatus::after_failure(&expired),
            Some(ConnectionStatus::Expired)
        );
        assert_eq!(
            ConnectionStatus::after_failure(&reauth),
            Some(ConnectionStatus::Suspended)
        );
        assert_eq!(ConnectionStatus::after_failure(&other), None);
        assert_eq!(ConnectionStatus::after_failure(&missing), None);
    }

    #[test]
    fn access_expired_boundary() {
        let now = Utc::now();

        assert!(connection(Some(now - Duration::seconds(1))).is_access_expired(now));
        assert!(!connection(Some(now + Duration::seconds(1))).is_access_expired(now));
        assert!(!connection(None).is_access_expired(now));
    }

    #[test]
    fn access_expiring_soon_boundary() {
        let now = Utc::now();

        assert!(connection(Some(now + Duration::days(6))).is_access_expiring_soon(now));
        assert!(!connection(Some(now + Duration::days(8))).is_access_expiring_soon(now));
        assert!(!connection(None).is_access_expiring_soon(now));
    }

    #[test]
    fn reconnect_resets_the_access_window() {
        let now = Utc::now();
        let mut conn = connection(Some(now - Duration::days(1)));
        conn.status = ConnectionStatus::Suspended;
        let id = conn.id.clone();

        conn.reconnect("req_2", now);

        assert_eq!(conn.id, id);
        assert_eq!(conn.requisition_id, "req_2");
        assert_eq!(conn.status, ConnectionStatus::Linked);
        assert_eq!(
            conn.access_valid_until,
            Some(now + Duration::days(ACCESS_WINDOW_DAYS))
        );
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::Linked,
            ConnectionStatus::Expired,
            ConnectionStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<ConnectionStatus>().unwrap(), status);
        }
        assert!("active".parse::<ConnectionStatus>().is_err());
    }
}
