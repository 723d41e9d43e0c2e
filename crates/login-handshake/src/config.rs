//! Configuration for the handshake controller.

use crate::error::{HandshakeError, HandshakeResult};
use crate::session::Mode;
use login_challenge_types::FlowId;
use std::time::Duration;

/// Which login flow the target identity provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Username, password, then optional second factor or device approval.
    Interactive,
    /// Delegated authorization: URL out-of-band, pasted code back.
    AuthorizationCode,
}

impl FlowKind {
    /// Manual input state to fall back to when device approval times out.
    pub fn fallback_mode(&self) -> Option<Mode> {
        match self {
            FlowKind::Interactive => Some(Mode::AwaitingSecondFactor),
            FlowKind::AuthorizationCode => None,
        }
    }
}

/// Handshake controller configuration.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Flow shape of the target
    pub flow: FlowKind,

    /// Declared flow identifier used to scope push topics
    pub flow_id: FlowId,

    /// Poll bound after submitting the username
    pub username_poll_timeout: Duration,

    /// Poll bound after submitting the password (provider risk evaluation
    /// may take a while)
    pub password_poll_timeout: Duration,

    /// Poll bound after submitting a second-factor or email code
    pub code_poll_timeout: Duration,

    /// How long to wait for out-of-band approval before falling back
    pub device_approval_timeout: Duration,

    /// Delay before acknowledging a device confirmation challenge, so the
    /// daemon observes its own challenge write first
    pub device_ack_delay: Duration,

    /// Extra local slack on top of each poll bound before the poll is
    /// treated as empty
    pub poll_grace: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::new(FlowId::from("default"), FlowKind::Interactive)
    }
}

impl HandshakeConfig {
    /// Create a configuration with default timings.
    pub fn new(flow_id: FlowId, flow: FlowKind) -> Self {
        Self {
            flow,
            flow_id,
            username_poll_timeout: Duration::from_secs(30),
            password_poll_timeout: Duration::from_secs(60),
            code_poll_timeout: Duration::from_secs(30),
            device_approval_timeout: Duration::from_secs(60),
            device_ack_delay: Duration::from_millis(500),
            poll_grace: Duration::from_secs(5),
        }
    }

    /// Create a configuration whose timings can be overridden via
    /// environment variables.
    pub fn from_env(flow_id: FlowId, flow: FlowKind) -> HandshakeResult<Self> {
        Self::from_lookup(flow_id, flow, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(flow_id: FlowId, flow: FlowKind, lookup: F) -> HandshakeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(flow_id, flow);

        let secs = |key: &str, current: Duration| -> HandshakeResult<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| HandshakeError::Config(format!("{}: {}", key, e))),
                None => Ok(current),
            }
        };

        config.username_poll_timeout =
            secs("HANDSHAKE_USERNAME_POLL_SECS", config.username_poll_timeout)?;
        config.password_poll_timeout =
            secs("HANDSHAKE_PASSWORD_POLL_SECS", config.password_poll_timeout)?;
        config.code_poll_timeout = secs("HANDSHAKE_CODE_POLL_SECS", config.code_poll_timeout)?;
        config.device_approval_timeout = secs(
            "HANDSHAKE_DEVICE_APPROVAL_TIMEOUT_SECS",
            config.device_approval_timeout,
        )?;
        config.poll_grace = secs("HANDSHAKE_POLL_GRACE_SECS", config.poll_grace)?;

        if let Some(raw) = lookup("HANDSHAKE_DEVICE_ACK_DELAY_MS") {
            let ms = raw.trim().parse::<u64>().map_err(|e| {
                HandshakeError::Config(format!("HANDSHAKE_DEVICE_ACK_DELAY_MS: {}", e))
            })?;
            config.device_ack_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject timings that would make a flow unusable.
    pub fn validate(&self) -> HandshakeResult<()> {
        let bounds = [
            ("username_poll_timeout", self.username_poll_timeout),
            ("password_poll_timeout", self.password_poll_timeout),
            ("code_poll_timeout", self.code_poll_timeout),
            ("device_approval_timeout", self.device_approval_timeout),
        ];

        for (name, value) in bounds {
            if value.is_zero() {
                return Err(HandshakeError::Config(format!("{} must be non-zero", name)));
            }
        }

        if self.flow_id.as_str().trim().is_empty() {
            return Err(HandshakeError::Config("flow_id must not be empty".to_string()));
        }

        Ok(())
    }
}
