//! Wire types for daemon-mediated login handshakes.
//!
//! The daemon speaks a JSON-RPC-like protocol: four request/response
//! methods plus two push topics. Everything here is plain data so both the
//! controller and any daemon-side shim can share one definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Canned credential value that acknowledges a device confirmation
/// challenge. The daemon blocks on the identity provider until it sees it.
pub const DEVICE_CONFIRMATION_ACK: &str = "confirm";

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Opaque token scoping one login attempt on one daemon.
    SessionId
);

opaque_id!(
    /// Unique per challenge issuance. Never answered twice.
    ChallengeId
);

opaque_id!(
    /// Declared flow identifier (one per identity provider integration).
    /// Push topics are namespaced by it.
    FlowId
);

/// What the daemon needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Username,
    Password,
    TwoFactor,
    EmailCode,
    /// Out-of-band approval on a separate device.
    DeviceConfirmation,
    /// Delegated authorization: the user opens a URL and pastes back a code.
    AuthorizationUrl,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Username => "username",
            ChallengeKind::Password => "password",
            ChallengeKind::TwoFactor => "two_factor",
            ChallengeKind::EmailCode => "email_code",
            ChallengeKind::DeviceConfirmation => "device_confirmation",
            ChallengeKind::AuthorizationUrl => "authorization_url",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a multi-step credential exchange, as issued by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub challenge_id: ChallengeId,
    pub kind: ChallengeKind,
    /// Passed through unmodified with the submission.
    pub server_key_material: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<Url>,
    pub created_at: DateTime<Utc>,
    /// Informational. The daemon enforces expiry.
    pub expires_at: DateTime<Utc>,
}

/// Daemon methods consumed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "auth.start_login")]
    StartLogin,
    #[serde(rename = "auth.provide_credential")]
    ProvideCredential,
    #[serde(rename = "auth.wait_for_challenge")]
    WaitForChallenge,
    #[serde(rename = "auth.cancel_login")]
    CancelLogin,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::StartLogin => "auth.start_login",
            Method::ProvideCredential => "auth.provide_credential",
            Method::WaitForChallenge => "auth.wait_for_challenge",
            Method::CancelLogin => "auth.cancel_login",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Params for `auth.start_login` and `auth.cancel_login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub session_id: SessionId,
}

/// Params for `auth.provide_credential`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvideCredentialParams {
    pub session_id: SessionId,
    pub challenge_id: ChallengeId,
    pub server_key_material: String,
    pub kind: ChallengeKind,
    pub value: String,
}

impl ProvideCredentialParams {
    /// Bind a value to exactly the challenge it answers.
    pub fn answering(session_id: SessionId, challenge: &Challenge, value: impl Into<String>) -> Self {
        Self {
            session_id,
            challenge_id: challenge.challenge_id.clone(),
            server_key_material: challenge.server_key_material.clone(),
            kind: challenge.kind,
            value: value.into(),
        }
    }
}

/// Params for `auth.wait_for_challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForChallengeParams {
    pub session_id: SessionId,
    pub timeout_ms: u64,
}

/// Push topics. Each is scoped by a [`FlowId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEvent {
    CredentialChallenge,
    AuthStateChanged,
}

impl PushEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushEvent::CredentialChallenge => "credential_challenge",
            PushEvent::AuthStateChanged => "auth_state_changed",
        }
    }
}

/// A push event name within a declared flow, e.g. `steam.credential_challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventTopic {
    pub flow: FlowId,
    pub event: PushEvent,
}

impl EventTopic {
    pub fn new(flow: FlowId, event: PushEvent) -> Self {
        Self { flow, event }
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.flow, self.event.as_str())
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.flow, self.event.as_str())
    }
}

/// Payload of the `credential_challenge` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialChallengePush {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowId>,
    pub challenge: Challenge,
}

/// Daemon-side login state as reported by the `auth_state_changed` push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonAuthState {
    Authenticated,
    NotAuthenticated,
}

/// Payload of the `auth_state_changed` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStateChangedPush {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowId>,
    pub state: DaemonAuthState,
}
