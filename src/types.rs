//! Core types for the notification inbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Opaque notification identifier, stable across push and poll delivery.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        NotificationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationId({})", self.0)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(s: &str) -> Self {
        NotificationId(s.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(s: String) -> Self {
        NotificationId(s)
    }
}

/// Notification type as sent by the server.
///
/// Unrecognized values are kept verbatim in `Other` so newer servers never
/// break older clients.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ContractSigned,
    ContractApproved,
    ContractDeclined,
    ContractGenerated,
    PartnerCreated,
    LeadStatusChange,
    LeadAssigned,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::ContractSigned => "contract_signed",
            NotificationKind::ContractApproved => "contract_approved",
            NotificationKind::ContractDeclined => "contract_declined",
            NotificationKind::ContractGenerated => "contract_generated",
            NotificationKind::PartnerCreated => "partner_created",
            NotificationKind::LeadStatusChange => "lead_status_change",
            NotificationKind::LeadAssigned => "lead_assigned",
            NotificationKind::Other(raw) => raw,
        }
    }

    /// True for types this client has no template for.
    pub fn is_unknown(&self) -> bool {
        matches!(self, NotificationKind::Other(_))
    }
}

impl From<&str> for NotificationKind {
    fn from(s: &str) -> Self {
        match s {
            "contract_signed" => NotificationKind::ContractSigned,
            "contract_approved" => NotificationKind::ContractApproved,
            "contract_declined" | "contract_rejected" => NotificationKind::ContractDeclined,
            "contract_generated" => NotificationKind::ContractGenerated,
            "partner_created" => NotificationKind::PartnerCreated,
            "lead_status_change" | "lead_status_changed" => NotificationKind::LeadStatusChange,
            "lead_assigned" => NotificationKind::LeadAssigned,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NotificationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NotificationKind::from(raw.as_str()))
    }
}

/// A single notification in the inbox.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: NotificationId,

    #[serde(rename = "type")]
    pub kind: NotificationKind,

    /// Type-specific fields (`contractId`, `partnerId`, ...).
    pub data: Map<String, Value>,

    pub read: bool,

    pub created_at: DateTime<Utc>,

    /// True when the payload carried no timestamp and `created_at` is the
    /// time the record was received.
    #[serde(skip)]
    pub created_at_estimated: bool,

    /// Raw fields used when no template exists for `kind`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl NotificationRecord {
    /// Create an unread record with no data.
    pub fn new(
        id: impl Into<NotificationId>,
        kind: impl Into<NotificationKind>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data: Map::new(),
            read: false,
            created_at,
            created_at_estimated: false,
            title: None,
            message: None,
            action_url: None,
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Mark `created_at` as a receive time rather than a server timestamp.
    pub fn with_estimated_time(mut self) -> Self {
        self.created_at_estimated = true;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    /// String value of a data field, if present and scalar.
    pub fn data_str(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Inbox order: newest first, ties broken by id.
    pub fn inbox_order(a: &Self, b: &Self) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Point-in-time view of the inbox handed to subscribers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxSnapshot {
    /// Records, newest first.
    pub records: Vec<NotificationRecord>,
    /// Always equal to the number of unread entries in `records`.
    pub unread_count: usize,
    /// Bumped on every observable change.
    pub revision: u64,
}

impl InboxSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
