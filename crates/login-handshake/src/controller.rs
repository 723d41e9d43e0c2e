//! Handshake controller: shared core plus the presentation-facing surface.
//!
//! [`HandshakeCore`] is shared between the flow driver (caller task), the
//! event bridge (push listener tasks) and the timeout supervisor (timer
//! task). Every path that ends an attempt goes through the terminal
//! operations here, so an outcome is reported at most once.

use crate::channel::{DaemonChannel, DaemonClient};
use crate::config::HandshakeConfig;
use crate::error::{HandshakeError, HandshakeResult};
use crate::event_bridge::EventBridge;
use crate::flow_driver::StepOutcome;
use crate::notify::{HandshakeHooks, Notification, Notifier, TracingNotifier};
use crate::session::{CredentialField, Mode, SessionSnapshot, SessionState};
use crate::timeout::TimeoutSupervisor;
use login_challenge_types::SessionId;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// State and collaborators shared by every task working on one session.
pub(crate) struct HandshakeCore<C> {
    pub(crate) client: DaemonClient<C>,
    pub(crate) config: HandshakeConfig,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) timeout: Arc<TimeoutSupervisor>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) hooks: HandshakeHooks,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<C: DaemonChannel> HandshakeCore<C> {
    pub(crate) fn session_id(&self) -> &SessionId {
        self.client.session_id()
    }

    /// Publish the state to watchers. Called with the state lock held so
    /// snapshots are never published out of order.
    pub(crate) fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }

    pub(crate) fn mode(&self) -> Mode {
        self.state.lock().mode()
    }

    /// Tell the daemon to drop the attempt. Never awaited by local state.
    pub(crate) fn spawn_cancel_login(self: &Arc<Self>) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            match core.client.cancel_login().await {
                Ok(()) => debug!(session_id = %core.session_id(), "Daemon cancelled login"),
                Err(e) => debug!(
                    session_id = %core.session_id(),
                    error = %e,
                    "Best-effort cancel_login failed"
                ),
            }
        });
    }

    /// Terminal clear for a success. Returns whether an attempt had started,
    /// which is also what decides if the success is reported.
    pub(crate) fn clear_for_success(&self, state: &mut SessionState) -> bool {
        let started = state.has_started_attempt();
        state.clear_terminal();
        self.timeout.disarm();
        self.publish(state);
        started
    }

    /// Report a success cleared by [`clear_for_success`](Self::clear_for_success).
    pub(crate) fn report_success(&self, started: bool) -> bool {
        if !started {
            debug!(
                session_id = %self.session_id(),
                "Success observed with no attempt in progress"
            );
            return false;
        }

        info!(session_id = %self.session_id(), "Login succeeded");
        self.notifier.notify(Notification::success("Signed in successfully."));
        self.hooks.success();
        true
    }

    /// Shared success path for pushes and empty polls. Safe to call more
    /// than once; only the first call after an attempt started reports.
    pub(crate) fn declare_success(&self) -> bool {
        let started = {
            let mut state = self.state.lock();
            self.clear_for_success(&mut state)
        };
        self.report_success(started)
    }

    /// Daemon-reported failure. Ignored unless an attempt had started, so an
    /// idle daemon's state report never shows up as a failed login.
    pub(crate) fn declare_failure(&self, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if !state.has_started_attempt() {
                debug!(
                    session_id = %self.session_id(),
                    "Ignoring failure report with no attempt in progress"
                );
                return false;
            }
            state.clear_terminal();
            self.timeout.disarm();
            self.publish(&state);
        }

        warn!(session_id = %self.session_id(), reason = %reason, "Login failed");
        self.notifier.notify(Notification::error(reason));
        self.hooks.failure(reason);
        true
    }

    /// Abort the attempt started at `epoch` after a channel failure or
    /// protocol violation. Returns the error to hand back to the caller, or
    /// [`HandshakeError::Superseded`] if the attempt was already over.
    pub(crate) fn abort_attempt(&self, epoch: u64, error: HandshakeError) -> HandshakeError {
        {
            let mut state = self.state.lock();
            if !state.is_current(epoch) {
                debug!(
                    session_id = %self.session_id(),
                    error = %error,
                    "Dropping error from a finished attempt"
                );
                return HandshakeError::Superseded;
            }
            state.clear_terminal();
            self.timeout.disarm();
            self.publish(&state);
        }

        let message = error.user_message();
        warn!(session_id = %self.session_id(), error = %error, "Login attempt aborted");
        self.notifier.notify(Notification::error(message.clone()));
        self.hooks.failure(&message);
        error
    }

    /// User cancellation. Local state is cleared immediately; the daemon is
    /// told in the background.
    pub(crate) fn cancel(self: &Arc<Self>) {
        let had_attempt = {
            let mut state = self.state.lock();
            let had_attempt = state.has_started_attempt() || state.pending().is_some();
            state.clear_terminal();
            self.timeout.disarm();
            self.publish(&state);
            had_attempt
        };

        if had_attempt {
            info!(session_id = %self.session_id(), "Login cancelled");
            self.spawn_cancel_login();
        }
    }

    /// Clear local state without involving the daemon.
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        state.clear_terminal();
        self.timeout.disarm();
        self.publish(&state);
        debug!(session_id = %self.session_id(), "Handshake state reset");
    }
}

/// Controller for one session's login handshake.
///
/// Created with [`HandshakeController::builder`]. Dropping it detaches the
/// push subscriptions, disarms the approval timer and invalidates any step
/// still in flight.
pub struct HandshakeController<C: DaemonChannel> {
    core: Arc<HandshakeCore<C>>,
    bridge: Mutex<Option<EventBridge>>,
}

impl<C: DaemonChannel> HandshakeController<C> {
    pub fn builder(channel: Arc<C>, session_id: impl Into<SessionId>) -> HandshakeBuilder<C> {
        HandshakeBuilder {
            channel,
            session_id: session_id.into(),
            config: HandshakeConfig::default(),
            notifier: Arc::new(TracingNotifier),
            hooks: HandshakeHooks::default(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.core.session_id()
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.core.config
    }

    pub fn mode(&self) -> Mode {
        self.core.mode()
    }

    /// True while a multi-step sequence is running.
    pub fn is_busy(&self) -> bool {
        self.core.state.lock().is_busy()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.state.lock().snapshot()
    }

    /// Subscribe to snapshots. The receiver sees the latest state on every
    /// change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.core.snapshots.subscribe()
    }

    pub fn set_field(&self, field: CredentialField, value: impl Into<String>) {
        self.core.state.lock().set_field(field, value);
    }

    pub fn field(&self, field: CredentialField) -> Option<String> {
        self.core.state.lock().field(field).map(str::to_string)
    }

    pub fn clear_field(&self, field: CredentialField) {
        self.core.state.lock().clear_field(field);
    }

    /// Advance the flow by one step using the current form contents.
    ///
    /// After a device-approval timeout the interactive flow falls back to
    /// code entry, and the next call requires that code. Call [`reset`]
    /// first to retry with username and password alone.
    ///
    /// [`reset`]: HandshakeController::reset
    pub async fn authenticate(&self) -> HandshakeResult<StepOutcome> {
        self.core.authenticate().await
    }

    /// Cancel the attempt. Must be called from within a tokio runtime.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn reset(&self) {
        self.core.reset();
    }

    /// True while push listeners are running.
    pub fn is_listening(&self) -> bool {
        self.bridge
            .lock()
            .as_ref()
            .is_some_and(EventBridge::is_attached)
    }

    /// Release subscriptions and timers. Idempotent.
    pub fn deactivate(&self) {
        let bridge = self.bridge.lock().take();
        if let Some(mut bridge) = bridge {
            bridge.detach();
            info!(session_id = %self.session_id(), "Handshake controller deactivated");
        }
        self.core.reset();
    }
}

impl<C: DaemonChannel> Drop for HandshakeController<C> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Builder for [`HandshakeController`].
pub struct HandshakeBuilder<C> {
    channel: Arc<C>,
    session_id: SessionId,
    config: HandshakeConfig,
    notifier: Arc<dyn Notifier>,
    hooks: HandshakeHooks,
}

impl<C: DaemonChannel> HandshakeBuilder<C> {
    pub fn config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_timeout = Some(Arc::new(callback));
        self
    }

    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.on_failure = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration, subscribe to the flow's push topics and
    /// return the live controller. Must be called from within a tokio
    /// runtime.
    pub fn activate(self) -> HandshakeResult<HandshakeController<C>> {
        self.config.validate()?;

        let state = SessionState::new();
        let (snapshots, _) = watch::channel(state.snapshot());
        let client = DaemonClient::new(self.channel, self.session_id, self.config.poll_grace);

        let core = Arc::new(HandshakeCore {
            client,
            config: self.config,
            state: Mutex::new(state),
            timeout: TimeoutSupervisor::new(),
            notifier: self.notifier,
            hooks: self.hooks,
            snapshots,
        });

        let bridge = EventBridge::attach(&core);

        info!(
            session_id = %core.session_id(),
            flow_id = %core.config.flow_id,
            flow = ?core.config.flow,
            "Handshake controller activated"
        );

        Ok(HandshakeController {
            core,
            bridge: Mutex::new(Some(bridge)),
        })
    }
}
