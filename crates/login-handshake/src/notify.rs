//! User-facing notifications and caller hooks.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message for the notification subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// Notification subsystem as seen by the controller.
///
/// Called synchronously from whichever task produced the outcome, so
/// implementations should hand off rather than block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default notifier: logs through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(level = ?notification.level, "{}", notification.message)
            }
            NotificationLevel::Warning => warn!("{}", notification.message),
            NotificationLevel::Error => error!("{}", notification.message),
        }
    }
}

/// Callback type for terminal outcomes.
pub type OutcomeCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback type for attempt failures, given the user-facing reason.
pub type FailureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Caller-supplied outcome hooks. Each fires at most once per attempt.
#[derive(Clone, Default)]
pub struct HandshakeHooks {
    pub on_success: Option<OutcomeCallback>,
    pub on_timeout: Option<OutcomeCallback>,
    pub on_failure: Option<FailureCallback>,
}

impl HandshakeHooks {
    pub(crate) fn success(&self) {
        if let Some(cb) = &self.on_success {
            cb();
        }
    }

    pub(crate) fn timeout(&self) {
        if let Some(cb) = &self.on_timeout {
            cb();
        }
    }

    pub(crate) fn failure(&self, reason: &str) {
        if let Some(cb) = &self.on_failure {
            cb(reason);
        }
    }
}

impl std::fmt::Debug for HandshakeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeHooks")
            .field("on_success", &self.on_success.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
