//! Notification dispatch types (spec §4.6, C6).

use serde_json::Value;

/// The kind of notification being dispatched, mirroring `SubscriptionStatus.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Handshake after a successful subscription request (spec §4.5 lifecycle).
    Handshake,
    /// Periodic liveness ping when no events are due (spec §4.6).
    Heartbeat,
    /// One or more `SubscriptionEvent`s ready for delivery.
    EventNotification,
    /// Response to a client-initiated status query (not triggered by the dispatcher).
    QueryStatus,
}

impl NotificationKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Heartbeat => "heartbeat",
            Self::EventNotification => "event-notification",
            Self::QueryStatus => "query-status",
        }
    }
}

/// Outcome of one delivery attempt to a channel.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn ok(status_code: Option<u16>) -> Self {
        Self { success: true, status_code, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, status_code: None, error: Some(error.into()) }
    }
}

/// The fully-assembled payload handed to a channel adapter: a serialized
/// Bundle plus the small amount of framing metadata a channel needs (email
/// subject line, Zulip topic) that doesn't belong inside the FHIR content
/// itself.
#[derive(Debug, Clone)]
pub struct NotificationBundle {
    pub bundle: Value,
    pub subject: String,
}
