//! Handshake error types.

use crate::session::CredentialField;
use login_challenge_types::Method;
use thiserror::Error;

/// Failure of a single channel call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel to the daemon is gone.
    #[error("Channel disconnected")]
    Disconnected,

    /// The daemon answered the call with an error.
    #[error("{method} failed: {message}")]
    Remote { method: Method, message: String },

    /// The call did not complete in time.
    #[error("Channel call timed out")]
    Timeout,
}

impl ChannelError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout)
    }
}

/// Handshake error type.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// A required form field is empty. Reported before any channel call.
    #[error("{0} is required")]
    MissingField(CredentialField),

    /// A multi-step sequence is already running.
    #[error("A login step is already in progress")]
    Busy,

    /// Channel call failure
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The daemon skipped a step the protocol requires
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The step lost its attempt to a cancellation, reset, terminal outcome
    /// or newer challenge while it was in flight.
    #[error("Login step superseded")]
    Superseded,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HandshakeError {
    /// Returns true if the error was raised locally without touching the
    /// channel or the attempt state.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            HandshakeError::MissingField(_) | HandshakeError::Busy | HandshakeError::Config(_)
        )
    }

    /// Message suitable for the notification subsystem.
    pub fn user_message(&self) -> String {
        match self {
            HandshakeError::MissingField(field) => format!("Please enter your {}.", field.label()),
            HandshakeError::Busy => "A login attempt is already in progress.".to_string(),
            HandshakeError::Channel(e) => format!("Could not reach the login service: {}", e),
            HandshakeError::Protocol(_) | HandshakeError::Json(_) => {
                "Authentication failed. Please try again.".to_string()
            }
            HandshakeError::Superseded => "The login step was interrupted.".to_string(),
            HandshakeError::Config(e) => format!("Login is misconfigured: {}", e),
        }
    }
}

/// Result type alias using HandshakeError.
pub type HandshakeResult<T> = Result<T, HandshakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_local() {
        assert!(HandshakeError::MissingField(CredentialField::Username).is_local());
        assert!(HandshakeError::Busy.is_local());
    }

    #[test]
    fn test_channel_errors_are_not_local() {
        assert!(!HandshakeError::Channel(ChannelError::Disconnected).is_local());
        assert!(!HandshakeError::Protocol("missing challenge".to_string()).is_local());
    }

    #[test]
    fn test_protocol_errors_surface_generic_message() {
        let err = HandshakeError::Protocol("no username challenge".to_string());
        assert_eq!(err.user_message(), "Authentication failed. Please try again.");
    }

    #[test]
    fn test_missing_field_message_names_the_field() {
        let err = HandshakeError::MissingField(CredentialField::Password);
        assert_eq!(err.user_message(), "Please enter your password.");
    }

    #[test]
    fn test_remote_error_names_the_method() {
        let err = ChannelError::Remote {
            method: Method::StartLogin,
            message: "daemon busy".to_string(),
        };
        assert_eq!(err.to_string(), "auth.start_login failed: daemon busy");
        assert!(!err.is_timeout());
        assert!(ChannelError::Timeout.is_timeout());
    }
}
