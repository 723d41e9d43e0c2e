//! Session tracker: the per-attempt state of one login handshake.
//!
//! All mutation goes through [`SessionState`] methods so the derived
//! [`Mode`] can never drift from the pending challenge. The controller keeps
//! one instance behind a lock and never holds it across an await.

use login_challenge_types::{Challenge, ChallengeId, ChallengeKind};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::time::Instant;
use url::Url;

/// What the presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    AwaitingCredentials,
    AwaitingSecondFactor,
    AwaitingEmailCode,
    AwaitingDeviceApproval,
    AwaitingAuthorizationCode,
    Busy,
}

impl Mode {
    /// The single mode a challenge kind maps to.
    pub fn for_challenge(kind: ChallengeKind) -> Mode {
        match kind {
            ChallengeKind::Username | ChallengeKind::Password => Mode::AwaitingCredentials,
            ChallengeKind::TwoFactor => Mode::AwaitingSecondFactor,
            ChallengeKind::EmailCode => Mode::AwaitingEmailCode,
            ChallengeKind::DeviceConfirmation => Mode::AwaitingDeviceApproval,
            ChallengeKind::AuthorizationUrl => Mode::AwaitingAuthorizationCode,
        }
    }

    /// Returns true if the user is expected to type something.
    pub fn needs_input(&self) -> bool {
        matches!(
            self,
            Mode::AwaitingCredentials
                | Mode::AwaitingSecondFactor
                | Mode::AwaitingEmailCode
                | Mode::AwaitingAuthorizationCode
        )
    }
}

/// User-entered values, keyed by the credential they answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialField {
    Username,
    Password,
    TwoFactorCode,
    EmailCode,
    AuthorizationCode,
}

impl CredentialField {
    /// Field that answers a challenge kind, if any.
    pub fn for_challenge(kind: ChallengeKind) -> Option<CredentialField> {
        match kind {
            ChallengeKind::Username => Some(CredentialField::Username),
            ChallengeKind::Password => Some(CredentialField::Password),
            ChallengeKind::TwoFactor => Some(CredentialField::TwoFactorCode),
            ChallengeKind::EmailCode => Some(CredentialField::EmailCode),
            ChallengeKind::AuthorizationUrl => Some(CredentialField::AuthorizationCode),
            ChallengeKind::DeviceConfirmation => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CredentialField::Username => "username",
            CredentialField::Password => "password",
            CredentialField::TwoFactorCode => "two-factor code",
            CredentialField::EmailCode => "email code",
            CredentialField::AuthorizationCode => "authorization code",
        }
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome the controller is waiting to learn from a push alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushWait {
    #[default]
    Nothing,
    /// start-login returned nothing; the first challenge comes by push.
    InitialChallenge,
    /// An authorization code was submitted and the daemon is processing it.
    CodeProcessing,
}

/// Result of offering a challenge to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supersede {
    /// Same challenge delivered again (poll and push both carried it), or
    /// one that was already answered. Nothing changed.
    Duplicate,
    Applied { from: Mode, to: Mode },
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub busy: bool,
    pub pending_kind: Option<ChallengeKind>,
    pub pending_challenge_id: Option<ChallengeId>,
    pub email: Option<String>,
    pub authorization_url: Option<Url>,
    pub has_started_attempt: bool,
    pub awaiting_code_processing: bool,
    #[serde(skip)]
    pub awaiting_device_approval_since: Option<Instant>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionState::default().snapshot()
    }
}

/// Mutable per-attempt state.
#[derive(Debug, Default)]
pub struct SessionState {
    pending: Option<Challenge>,
    fallback: Option<Mode>,
    busy: bool,
    push_wait: PushWait,
    fields: HashMap<CredentialField, String>,
    has_started_attempt: bool,
    awaiting_device_approval_since: Option<Instant>,
    answered: HashSet<ChallengeId>,
    epoch: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derived mode. Pending challenge first, then the busy sequence, then
    /// the manual fallback.
    pub fn mode(&self) -> Mode {
        if let Some(challenge) = &self.pending {
            return Mode::for_challenge(challenge.kind);
        }
        if self.busy {
            return Mode::Busy;
        }
        self.fallback.unwrap_or(Mode::Idle)
    }

    pub fn pending(&self) -> Option<&Challenge> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self, id: &ChallengeId) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|challenge| &challenge.challenge_id == id)
    }

    pub fn fallback(&self) -> Option<Mode> {
        self.fallback
    }

    pub fn set_fallback(&mut self, fallback: Option<Mode>) {
        self.fallback = fallback;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn push_wait(&self) -> PushWait {
        self.push_wait
    }

    pub fn set_push_wait(&mut self, wait: PushWait) {
        self.push_wait = wait;
    }

    pub fn has_started_attempt(&self) -> bool {
        self.has_started_attempt
    }

    pub fn awaiting_device_approval_since(&self) -> Option<Instant> {
        self.awaiting_device_approval_since
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Start a new attempt and return its epoch.
    pub fn begin_attempt(&mut self) -> u64 {
        self.epoch += 1;
        self.has_started_attempt = true;
        self.busy = true;
        self.fallback = None;
        self.answered.clear();
        self.epoch
    }

    /// Make `challenge` the pending one. Last write wins regardless of kind.
    pub fn supersede(&mut self, challenge: Challenge) -> Supersede {
        if self.is_pending(&challenge.challenge_id) || self.answered.contains(&challenge.challenge_id)
        {
            return Supersede::Duplicate;
        }

        let from = self.mode();
        let entering_approval = challenge.kind == ChallengeKind::DeviceConfirmation;
        self.pending = Some(challenge);
        self.fallback = None;

        self.awaiting_device_approval_since = if entering_approval {
            Some(Instant::now())
        } else {
            None
        };

        Supersede::Applied {
            from,
            to: self.mode(),
        }
    }

    /// Record that a submission for `id` is going out. False if it already
    /// went out once.
    pub fn mark_answered(&mut self, id: &ChallengeId) -> bool {
        self.answered.insert(id.clone())
    }

    pub fn was_answered(&self, id: &ChallengeId) -> bool {
        self.answered.contains(id)
    }

    pub fn field(&self, field: CredentialField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// True when the field holds something other than whitespace.
    pub fn has_required_field(&self, field: CredentialField) -> bool {
        self.field(field)
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Value to submit for a filled field. Only the username is trimmed;
    /// passwords and codes go out exactly as typed.
    pub fn submission_value(&self, field: CredentialField) -> Option<String> {
        if !self.has_required_field(field) {
            return None;
        }
        let raw = self.field(field)?;
        let value = match field {
            CredentialField::Username => raw.trim(),
            _ => raw,
        };
        Some(value.to_string())
    }

    pub fn set_field(&mut self, field: CredentialField, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    pub fn clear_field(&mut self, field: CredentialField) {
        self.fields.remove(&field);
    }

    /// Terminal transition: success, failure, cancellation, timeout or reset.
    /// Everything goes except the epoch, which moves on so in-flight
    /// continuations of the old attempt drop themselves.
    pub fn clear_terminal(&mut self) {
        self.pending = None;
        self.fallback = None;
        self.busy = false;
        self.push_wait = PushWait::Nothing;
        self.fields.clear();
        self.has_started_attempt = false;
        self.awaiting_device_approval_since = None;
        self.answered.clear();
        self.epoch += 1;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode(),
            busy: self.busy,
            pending_kind: self.pending.as_ref().map(|c| c.kind),
            pending_challenge_id: self.pending.as_ref().map(|c| c.challenge_id.clone()),
            email: self.pending.as_ref().and_then(|c| c.email.clone()),
            authorization_url: self
                .pending
                .as_ref()
                .and_then(|c| c.authorization_url.clone()),
            has_started_attempt: self.has_started_attempt,
            awaiting_code_processing: self.push_wait == PushWait::CodeProcessing,
            awaiting_device_approval_since: self.awaiting_device_approval_since,
        }
    }
}
