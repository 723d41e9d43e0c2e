//! Event bridge: turns daemon pushes into session transitions.
//!
//! One listener task per push topic. Payloads for another session (or
//! another declared flow) are dropped before anything is touched.
//! [`HandshakeCore::route_challenge`] is also the path the flow driver uses
//! for challenges it receives synchronously, so both sources land in the
//! tracker the same way.

use crate::channel::DaemonChannel;
use crate::controller::HandshakeCore;
use crate::error::{HandshakeError, HandshakeResult};
use crate::notify::Notification;
use crate::session::{CredentialField, Mode, PushWait, Supersede};
use login_challenge_types::{
    AuthStateChangedPush, Challenge, ChallengeKind, CredentialChallengePush, DaemonAuthState,
    EventTopic, FlowId, PushEvent, SessionId, DEVICE_CONFIRMATION_ACK,
};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LOGIN_FAILED_MESSAGE: &str = "Login failed. Check your details and try again.";
const CODE_REJECTED_MESSAGE: &str =
    "The authorization code was invalid or expired. Open the link again and paste the new code.";

/// Live push subscriptions for one controller.
pub struct EventBridge {
    tasks: Vec<JoinHandle<()>>,
}

impl EventBridge {
    pub(crate) fn attach<C: DaemonChannel>(core: &Arc<HandshakeCore<C>>) -> Self {
        let flow = core.config.flow_id.clone();
        let channel = core.client.channel();

        let challenge_topic = EventTopic::new(flow.clone(), PushEvent::CredentialChallenge);
        let state_topic = EventTopic::new(flow, PushEvent::AuthStateChanged);

        let challenge_rx = channel.subscribe(&challenge_topic);
        let state_rx = channel.subscribe(&state_topic);

        let tasks = vec![
            spawn_listener(
                Arc::downgrade(core),
                challenge_topic,
                challenge_rx,
                |core, push: CredentialChallengePush| core.on_challenge_push(push),
            ),
            spawn_listener(
                Arc::downgrade(core),
                state_topic,
                state_rx,
                |core, push: AuthStateChangedPush| core.on_auth_state_push(push),
            ),
        ];

        Self { tasks }
    }

    /// Stop listening. Pushes already being handled run to completion.
    pub fn detach(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

fn spawn_listener<C, P, F>(
    weak: Weak<HandshakeCore<C>>,
    topic: EventTopic,
    mut rx: broadcast::Receiver<serde_json::Value>,
    handle: F,
) -> JoinHandle<()>
where
    C: DaemonChannel,
    P: DeserializeOwned + Send + 'static,
    F: Fn(&Arc<HandshakeCore<C>>, P) + Send + 'static,
{
    tokio::spawn(async move {
        debug!(topic = %topic, "Push listener started");
        loop {
            let raw = match rx.recv().await {
                Ok(raw) => raw,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "Push listener lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!(topic = %topic, "Push topic closed");
                    break;
                }
            };

            let Some(core) = weak.upgrade() else {
                break;
            };

            match serde_json::from_value::<P>(raw) {
                Ok(payload) => handle(&core, payload),
                Err(e) => warn!(topic = %topic, error = %e, "Dropping undecodable push"),
            }
        }
    })
}

/// User-facing prompt for a newly pending challenge.
fn challenge_message(challenge: &Challenge) -> String {
    match challenge.kind {
        ChallengeKind::Username | ChallengeKind::Password => {
            "Enter your username and password.".to_string()
        }
        ChallengeKind::TwoFactor => "Enter the code from your authenticator app.".to_string(),
        ChallengeKind::EmailCode => match &challenge.email {
            Some(email) => format!("Enter the code sent to {}.", email),
            None => "Enter the code sent to your email.".to_string(),
        },
        ChallengeKind::DeviceConfirmation => {
            "Approve the sign-in on your mobile device.".to_string()
        }
        ChallengeKind::AuthorizationUrl => {
            "Open the authorization link, then paste the code it gives you.".to_string()
        }
    }
}

impl<C: DaemonChannel> HandshakeCore<C> {
    fn accepts(&self, session_id: &SessionId, flow: Option<&FlowId>) -> bool {
        if session_id != self.session_id() {
            debug!(
                session_id = %self.session_id(),
                foreign = %session_id,
                "Dropping push for another session"
            );
            return false;
        }

        if let Some(flow) = flow {
            if flow != &self.config.flow_id {
                debug!(
                    session_id = %self.session_id(),
                    flow = %flow,
                    "Dropping push for another flow"
                );
                return false;
            }
        }

        true
    }

    pub(crate) fn on_challenge_push(self: &Arc<Self>, push: CredentialChallengePush) {
        if !self.accepts(&push.session_id, push.flow.as_ref()) {
            return;
        }

        debug!(
            session_id = %self.session_id(),
            challenge_id = %push.challenge.challenge_id,
            kind = %push.challenge.kind,
            "Challenge pushed"
        );

        // Pushes are not tied to an attempt, so no epoch to check.
        let _ = self.route_challenge(push.challenge, None);
    }

    pub(crate) fn on_auth_state_push(self: &Arc<Self>, push: AuthStateChangedPush) {
        if !self.accepts(&push.session_id, push.flow.as_ref()) {
            return;
        }

        match push.state {
            DaemonAuthState::Authenticated => {
                self.declare_success();
            }
            DaemonAuthState::NotAuthenticated => {
                self.declare_failure(LOGIN_FAILED_MESSAGE);
            }
        }
    }

    /// Make `challenge` the pending one and apply everything that follows
    /// from the new mode. With `expected_epoch`, the challenge is only
    /// applied to that attempt.
    ///
    /// Returns the mode afterwards. A duplicate delivery changes nothing.
    pub(crate) fn route_challenge(
        self: &Arc<Self>,
        challenge: Challenge,
        expected_epoch: Option<u64>,
    ) -> HandshakeResult<Mode> {
        let acknowledge = (challenge.kind == ChallengeKind::DeviceConfirmation)
            .then(|| challenge.clone());
        let message = challenge_message(&challenge);
        let challenge_id = challenge.challenge_id.clone();
        let kind = challenge.kind;

        let (mode, epoch, rejected) = {
            let mut state = self.state.lock();

            if let Some(epoch) = expected_epoch {
                if !state.is_current(epoch) {
                    return Err(HandshakeError::Superseded);
                }
            }

            let push_wait = state.push_wait();
            let (from, to) = match state.supersede(challenge) {
                Supersede::Duplicate => {
                    debug!(
                        session_id = %self.session_id(),
                        challenge_id = %challenge_id,
                        "Ignoring duplicate challenge"
                    );
                    return Ok(state.mode());
                }
                Supersede::Applied { from, to } => (from, to),
            };

            let rejected =
                kind == ChallengeKind::AuthorizationUrl && push_wait == PushWait::CodeProcessing;

            if push_wait != PushWait::Nothing {
                state.set_push_wait(PushWait::Nothing);
                state.set_busy(false);
            }

            if rejected {
                state.clear_field(CredentialField::AuthorizationCode);
            }

            let epoch = state.epoch();
            if to == Mode::AwaitingDeviceApproval {
                self.arm_approval_timeout(epoch);
            } else {
                self.timeout.disarm();
            }

            self.publish(&state);

            info!(
                session_id = %self.session_id(),
                challenge_id = %challenge_id,
                kind = %kind,
                from = ?from,
                to = ?to,
                "Challenge routed"
            );

            (to, epoch, rejected)
        };

        if rejected {
            warn!(
                session_id = %self.session_id(),
                challenge_id = %challenge_id,
                "Authorization code rejected"
            );
            self.notifier.notify(Notification::error(CODE_REJECTED_MESSAGE));
        } else {
            self.notifier.notify(Notification::info(message));
        }

        if let Some(challenge) = acknowledge {
            self.spawn_device_acknowledgement(challenge, epoch);
        }

        Ok(mode)
    }

    /// Answer a device confirmation with the canned acknowledgement after a
    /// short delay, so the daemon sees its own challenge write first.
    fn spawn_device_acknowledgement(self: &Arc<Self>, challenge: Challenge, epoch: u64) {
        let core = Arc::downgrade(self);
        let delay = self.config.device_ack_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(core) = core.upgrade() else {
                return;
            };

            {
                let mut state = core.state.lock();
                if !state.is_current(epoch) || !state.is_pending(&challenge.challenge_id) {
                    debug!(
                        session_id = %core.session_id(),
                        challenge_id = %challenge.challenge_id,
                        "Device confirmation no longer pending, skipping acknowledgement"
                    );
                    return;
                }
                if !state.mark_answered(&challenge.challenge_id) {
                    return;
                }
            }

            match core
                .client
                .provide_credential(&challenge, DEVICE_CONFIRMATION_ACK)
                .await
            {
                Ok(()) => debug!(
                    session_id = %core.session_id(),
                    challenge_id = %challenge.challenge_id,
                    "Device confirmation acknowledged"
                ),
                Err(e) => warn!(
                    session_id = %core.session_id(),
                    challenge_id = %challenge.challenge_id,
                    error = %e,
                    "Failed to acknowledge device confirmation"
                ),
            }
        });
    }
}
