use serde::Serialize;

/// Severity of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationType {
    Info,
    Success,
    /// Something degraded but kept working, e.g. the software decode fallback.
    Warning,
    Error,
}

/// A notification payload pushed to the web UI.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    pub notification_type: NotificationType,
    pub message: String,
}
