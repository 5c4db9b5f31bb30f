//! Typed records for each shared document.
//!
//! Fields default when absent so documents written by older or foreign
//! writers still load.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::store::Mapping;

/// `locks.json`: file name → lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub user: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

/// `metadata.json`: file name → metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadata {
    pub description: String,
    pub author: String,
    pub created_at: String,
    pub revision: String,
    pub history: Vec<RevisionRecord>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionRecord {
    pub revision: String,
    pub user: String,
    pub timestamp: String,
    pub message: String,
}

/// `roles.json`: username → role, optionally time-bound or delegated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleAssignment {
    Plain(String),
    Delegated {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inherits_from: Option<String>,
    },
}

impl RoleAssignment {
    pub fn role(&self) -> &str {
        match self {
            RoleAssignment::Plain(role) | RoleAssignment::Delegated { role, .. } => role,
        }
    }

    pub fn until(&self) -> Option<&str> {
        match self {
            RoleAssignment::Plain(_) => None,
            RoleAssignment::Delegated { until, .. } => until.as_deref(),
        }
    }

    /// A time-bound role whose `until` parses and lies before `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.until()
            .and_then(|until| OffsetDateTime::parse(until, &Rfc3339).ok())
            .is_some_and(|until| until < now)
    }
}

/// `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub revision_separator: String,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            revision_separator: "-".into(),
            extra: Mapping::new(),
        }
    }
}

/// `subscriptions.json`: part number → usernames.
pub type SubscriptionMap = BTreeMap<String, Vec<String>>;

/// `notifications.json`: username → notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    #[default]
    Info,
    Checkout,
    Checkin,
    Revision,
    RoleChange,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Checkout => "checkout",
            NotificationKind::Checkin => "checkin",
            NotificationKind::Revision => "revision",
            NotificationKind::RoleChange => "role_change",
            NotificationKind::Other(other) => other,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "info" => NotificationKind::Info,
            "checkout" => NotificationKind::Checkout,
            "checkin" => NotificationKind::Checkin,
            "revision" => NotificationKind::Revision,
            "role_change" => NotificationKind::RoleChange,
            _ => NotificationKind::Other(s),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `parts.json`: part number → part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Part {
    pub description: String,
    pub current_rev: String,
}

/// One entry of the append-only `audit.json` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    #[serde(default)]
    pub changes: Value,
    pub by: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Current UTC time as RFC 3339.
pub(crate) fn now_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
