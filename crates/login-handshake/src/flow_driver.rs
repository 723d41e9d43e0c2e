//! Flow driver: the request/response side of a login attempt.
//!
//! `authenticate()` advances the flow by one user-visible step. Depending on
//! what is pending that can be several daemon round trips (username then
//! password), a single submission, or nothing at all when the outcome can
//! only arrive by push.
//!
//! Every await is followed by an epoch check. If the attempt was resolved,
//! cancelled or reset in the meantime the step reports
//! [`StepOutcome::Superseded`] and touches nothing.

use crate::channel::DaemonChannel;
use crate::config::FlowKind;
use crate::controller::HandshakeCore;
use crate::error::{HandshakeError, HandshakeResult};
use crate::notify::Notification;
use crate::session::{CredentialField, Mode, PushWait, SessionState};
use login_challenge_types::{Challenge, ChallengeKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a call to `authenticate()` achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The login completed during this step.
    Authenticated,
    /// The user has to provide more input for the given mode.
    NeedsInput(Mode),
    /// The outcome will arrive by push (device approval, code processing,
    /// or the first challenge of an authorization-code login).
    AwaitingPush,
    /// The attempt was resolved or abandoned elsewhere while this step was
    /// in flight.
    Superseded,
}

impl StepOutcome {
    fn for_mode(mode: Mode) -> Self {
        if mode.needs_input() {
            StepOutcome::NeedsInput(mode)
        } else {
            StepOutcome::AwaitingPush
        }
    }
}

enum Plan {
    Run { epoch: u64, step: Step },
    Done(StepOutcome),
}

enum Step {
    /// Fresh interactive login. `prefill` is the code entered in the manual
    /// fallback after a device-approval timeout.
    Login { prefill: Option<String> },
    /// Fresh authorization-code login.
    Authorize,
    /// Answer whatever is pending.
    Continue,
}

/// How an empty poll was resolved.
enum EmptyPoll {
    /// Device approval is pending; the push decides.
    Deferred,
    /// A push delivered a new challenge while the poll was out.
    Fresh(ChallengeKind),
    /// Trusted as success and already declared.
    Succeeded,
    /// Nothing pending and an empty poll is not trusted at this stage.
    Exhausted,
}

fn require(state: &SessionState, field: CredentialField) -> HandshakeResult<String> {
    state
        .submission_value(field)
        .ok_or(HandshakeError::MissingField(field))
}

fn fallback_field(mode: Mode) -> Option<CredentialField> {
    match mode {
        Mode::AwaitingSecondFactor => Some(CredentialField::TwoFactorCode),
        Mode::AwaitingEmailCode => Some(CredentialField::EmailCode),
        _ => None,
    }
}

impl<C: DaemonChannel> HandshakeCore<C> {
    pub(crate) async fn authenticate(self: &Arc<Self>) -> HandshakeResult<StepOutcome> {
        let (epoch, step) = match self.plan() {
            Ok(Plan::Run { epoch, step }) => (epoch, step),
            Ok(Plan::Done(outcome)) => return Ok(outcome),
            Err(e) => {
                if let HandshakeError::MissingField(_) = e {
                    self.notifier.notify(Notification::error(e.user_message()));
                }
                return Err(e);
            }
        };

        let result = match step {
            Step::Login { prefill } => self.login(epoch, prefill).await,
            Step::Authorize => self.authorize(epoch).await,
            Step::Continue => self.drive(epoch, None).await,
        };

        let result = match result {
            Ok(outcome) => Ok(outcome),
            Err(HandshakeError::Superseded) => Err(HandshakeError::Superseded),
            Err(e) => Err(self.abort_attempt(epoch, e)),
        };

        self.finish_step(epoch);

        match result {
            Err(HandshakeError::Superseded) => {
                debug!(session_id = %self.session_id(), "Login step superseded");
                Ok(StepOutcome::Superseded)
            }
            other => other,
        }
    }

    /// Pick the step from the current state. Validation happens before any
    /// state change so a missing field leaves everything as it was.
    fn plan(&self) -> HandshakeResult<Plan> {
        let mut state = self.state.lock();

        if state.is_busy() {
            return Err(HandshakeError::Busy);
        }

        let Some(kind) = state.pending().map(|challenge| challenge.kind) else {
            let step = match self.config.flow {
                FlowKind::Interactive => {
                    require(&state, CredentialField::Username)?;
                    require(&state, CredentialField::Password)?;
                    let prefill = match state.fallback().and_then(fallback_field) {
                        Some(field) => Some(require(&state, field)?),
                        None => None,
                    };
                    Step::Login { prefill }
                }
                FlowKind::AuthorizationCode => Step::Authorize,
            };

            let epoch = state.begin_attempt();
            if matches!(step, Step::Authorize) {
                state.set_push_wait(PushWait::InitialChallenge);
            }
            self.publish(&state);

            info!(
                session_id = %self.session_id(),
                flow = ?self.config.flow,
                epoch,
                "Starting login attempt"
            );

            return Ok(Plan::Run { epoch, step });
        };

        let Some(field) = CredentialField::for_challenge(kind) else {
            // Device confirmation: nothing to type, the push decides.
            return Ok(Plan::Done(StepOutcome::AwaitingPush));
        };
        require(&state, field)?;

        let epoch = if state.has_started_attempt() {
            state.set_busy(true);
            state.epoch()
        } else {
            state.begin_attempt()
        };
        self.publish(&state);

        Ok(Plan::Run {
            epoch,
            step: Step::Continue,
        })
    }

    /// Busy spans the whole sequence; it drops once the step returns unless
    /// the attempt is now waiting on a push.
    fn finish_step(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.is_current(epoch) && state.push_wait() == PushWait::Nothing && state.is_busy() {
            state.set_busy(false);
            self.publish(&state);
        }
    }

    fn ensure_current(&self, epoch: u64) -> HandshakeResult<()> {
        if self.state.lock().is_current(epoch) {
            Ok(())
        } else {
            Err(HandshakeError::Superseded)
        }
    }

    fn current_outcome(&self, epoch: u64) -> HandshakeResult<StepOutcome> {
        let state = self.state.lock();
        if !state.is_current(epoch) {
            return Err(HandshakeError::Superseded);
        }
        Ok(StepOutcome::for_mode(state.mode()))
    }

    async fn login(self: &Arc<Self>, epoch: u64, prefill: Option<String>) -> HandshakeResult<StepOutcome> {
        let first = self.client.start_login().await?;
        self.ensure_current(epoch)?;

        let Some(first) = first else {
            return Err(HandshakeError::Protocol(
                "start_login returned no challenge".to_string(),
            ));
        };

        let kind = first.kind;
        let mode = self.route_challenge(first, Some(epoch))?;

        match kind {
            ChallengeKind::Username | ChallengeKind::Password => self.drive(epoch, prefill).await,
            other => {
                warn!(
                    session_id = %self.session_id(),
                    kind = %other,
                    "Login started without a credentials challenge"
                );
                Ok(StepOutcome::for_mode(mode))
            }
        }
    }

    async fn authorize(self: &Arc<Self>, epoch: u64) -> HandshakeResult<StepOutcome> {
        let first = self.client.start_login().await?;
        self.ensure_current(epoch)?;

        match first {
            Some(challenge) => {
                let mode = self.route_challenge(challenge, Some(epoch))?;
                Ok(StepOutcome::for_mode(mode))
            }
            None => {
                debug!(
                    session_id = %self.session_id(),
                    "No authorization challenge yet, waiting for push"
                );
                Ok(StepOutcome::AwaitingPush)
            }
        }
    }

    /// Answer pending challenges until the user has to act or the outcome
    /// is known.
    async fn drive(self: &Arc<Self>, epoch: u64, mut prefill: Option<String>) -> HandshakeResult<StepOutcome> {
        loop {
            let challenge = {
                let state = self.state.lock();
                if !state.is_current(epoch) {
                    return Err(HandshakeError::Superseded);
                }
                match state.pending() {
                    Some(challenge) => challenge.clone(),
                    None => return Ok(StepOutcome::for_mode(state.mode())),
                }
            };

            let answered = challenge.kind;
            let (bound, trust_empty, value) = match answered {
                ChallengeKind::DeviceConfirmation => return Ok(StepOutcome::AwaitingPush),
                ChallengeKind::AuthorizationUrl => {
                    return self.submit_authorization_code(epoch, &challenge).await;
                }
                ChallengeKind::Username => (
                    self.config.username_poll_timeout,
                    false,
                    self.field_value(epoch, CredentialField::Username)?,
                ),
                ChallengeKind::Password => (
                    self.config.password_poll_timeout,
                    true,
                    self.field_value(epoch, CredentialField::Password)?,
                ),
                ChallengeKind::TwoFactor | ChallengeKind::EmailCode => {
                    let value = match prefill.take() {
                        Some(code) => Some(code),
                        None => match CredentialField::for_challenge(answered) {
                            Some(field) => self.field_value(epoch, field)?,
                            None => None,
                        },
                    };
                    (self.config.code_poll_timeout, true, value)
                }
            };

            let Some(value) = value else {
                return self.current_outcome(epoch);
            };

            self.submit(epoch, &challenge, &value).await?;
            let polled = self.poll(epoch, bound).await?;

            let next = match polled {
                Some(next) => {
                    let kind = next.kind;
                    self.route_challenge(next, Some(epoch))?;
                    kind
                }
                None => match self.resolve_empty_poll(epoch, trust_empty)? {
                    EmptyPoll::Deferred => return Ok(StepOutcome::AwaitingPush),
                    EmptyPoll::Succeeded => return Ok(StepOutcome::Authenticated),
                    EmptyPoll::Exhausted => {
                        return Err(HandshakeError::Protocol(format!(
                            "no challenge followed the {} submission",
                            answered
                        )));
                    }
                    EmptyPoll::Fresh(kind) => kind,
                },
            };

            let proceed = match (answered, next) {
                (ChallengeKind::Username, ChallengeKind::Password) => true,
                (ChallengeKind::Password, ChallengeKind::TwoFactor | ChallengeKind::EmailCode) => {
                    prefill.is_some()
                }
                _ => false,
            };

            if !proceed {
                return self.current_outcome(epoch);
            }
        }
    }

    fn field_value(&self, epoch: u64, field: CredentialField) -> HandshakeResult<Option<String>> {
        let state = self.state.lock();
        if !state.is_current(epoch) {
            return Err(HandshakeError::Superseded);
        }
        Ok(state.submission_value(field))
    }

    /// Claim `challenge` for submission: it must still be pending in this
    /// attempt and never answered before.
    fn claim_submission(
        &self,
        epoch: u64,
        challenge: &Challenge,
        push_wait: PushWait,
    ) -> HandshakeResult<()> {
        let mut state = self.state.lock();
        if !state.is_current(epoch) || !state.is_pending(&challenge.challenge_id) {
            return Err(HandshakeError::Superseded);
        }
        if !state.mark_answered(&challenge.challenge_id) {
            return Err(HandshakeError::Superseded);
        }
        if push_wait != PushWait::Nothing {
            state.set_push_wait(push_wait);
            self.publish(&state);
        }
        Ok(())
    }

    async fn submit(&self, epoch: u64, challenge: &Challenge, value: &str) -> HandshakeResult<()> {
        self.claim_submission(epoch, challenge, PushWait::Nothing)?;

        debug!(
            session_id = %self.session_id(),
            challenge_id = %challenge.challenge_id,
            kind = %challenge.kind,
            "Submitting credential"
        );

        self.client.provide_credential(challenge, value).await?;
        self.ensure_current(epoch)
    }

    async fn poll(&self, epoch: u64, bound: Duration) -> HandshakeResult<Option<Challenge>> {
        let polled = self.client.wait_for_challenge(bound).await?;
        self.ensure_current(epoch)?;
        Ok(polled)
    }

    /// An empty poll only means success when nothing else could still be
    /// coming. In device approval it is a benign poll timeout and the push
    /// decides.
    fn resolve_empty_poll(&self, epoch: u64, trust_empty: bool) -> HandshakeResult<EmptyPoll> {
        let started = {
            let mut state = self.state.lock();
            if !state.is_current(epoch) {
                return Err(HandshakeError::Superseded);
            }

            if let Some(pending) = state.pending() {
                if pending.kind == ChallengeKind::DeviceConfirmation {
                    debug!(
                        session_id = %self.session_id(),
                        "Empty poll during device approval, deferring to push"
                    );
                    return Ok(EmptyPoll::Deferred);
                }
                if !state.was_answered(&pending.challenge_id) {
                    return Ok(EmptyPoll::Fresh(pending.kind));
                }
            }

            if !trust_empty {
                return Ok(EmptyPoll::Exhausted);
            }

            self.clear_for_success(&mut state)
        };

        self.report_success(started);
        Ok(EmptyPoll::Succeeded)
    }

    /// Submit the pasted code against the original authorization challenge.
    /// No poll follows: the daemon answers with an authenticated push or a
    /// new authorization challenge.
    async fn submit_authorization_code(
        self: &Arc<Self>,
        epoch: u64,
        challenge: &Challenge,
    ) -> HandshakeResult<StepOutcome> {
        let Some(code) = self.field_value(epoch, CredentialField::AuthorizationCode)? else {
            return self.current_outcome(epoch);
        };

        // Flag first: the verdict may be pushed before the call returns.
        self.claim_submission(epoch, challenge, PushWait::CodeProcessing)?;

        info!(
            session_id = %self.session_id(),
            challenge_id = %challenge.challenge_id,
            "Submitting authorization code"
        );

        self.client.provide_credential(challenge, &code).await?;

        let state = self.state.lock();
        if !state.is_current(epoch) {
            return Err(HandshakeError::Superseded);
        }
        if state.push_wait() == PushWait::CodeProcessing {
            Ok(StepOutcome::AwaitingPush)
        } else {
            Ok(StepOutcome::for_mode(state.mode()))
        }
    }
}
