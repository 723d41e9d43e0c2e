//! Test harness: a controller wired to a [`ScriptedDaemon`] with recording
//! hooks and notifier.

use crate::config::{FlowKind, HandshakeConfig};
use crate::controller::HandshakeController;
use crate::session::CredentialField;
use crate::sim::{RecordingNotifier, ScriptedDaemon};
use login_challenge_types::{Challenge, DaemonAuthState, FlowId, SessionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SESSION: &str = "session-a";
pub const FLOW: &str = "steam";

pub struct Harness {
    pub daemon: Arc<ScriptedDaemon>,
    pub notifier: Arc<RecordingNotifier>,
    pub controller: HandshakeController<ScriptedDaemon>,
    successes: Arc<AtomicUsize>,
    timeouts: Arc<AtomicUsize>,
    failures: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn interactive() -> Self {
        Self::with_config(HandshakeConfig::new(FlowId::from(FLOW), FlowKind::Interactive))
    }

    pub fn authorization() -> Self {
        Self::with_config(HandshakeConfig::new(
            FlowId::from(FLOW),
            FlowKind::AuthorizationCode,
        ))
    }

    pub fn with_config(config: HandshakeConfig) -> Self {
        let daemon = Arc::new(ScriptedDaemon::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let successes = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));

        let controller = {
            let successes = successes.clone();
            let timeouts = timeouts.clone();
            let failures = failures.clone();

            HandshakeController::builder(daemon.clone(), SESSION)
                .config(config)
                .notifier(notifier.clone())
                .on_success(move || {
                    successes.fetch_add(1, Ordering::SeqCst);
                })
                .on_timeout(move || {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                })
                .on_failure(move |reason| failures.lock().push(reason.to_string()))
                .activate()
                .unwrap()
        };

        Self {
            daemon,
            notifier,
            controller,
            successes,
            timeouts,
            failures,
        }
    }

    pub fn session_id(&self) -> SessionId {
        SessionId::from(SESSION)
    }

    pub fn flow_id(&self) -> FlowId {
        FlowId::from(FLOW)
    }

    pub fn fill(&self, field: CredentialField, value: &str) {
        self.controller.set_field(field, value);
    }

    pub fn fill_credentials(&self) {
        self.fill(CredentialField::Username, "gaben");
        self.fill(CredentialField::Password, "hunter2");
    }

    pub fn push_challenge(&self, challenge: &Challenge) {
        self.daemon
            .push_challenge(&self.flow_id(), &self.session_id(), challenge);
    }

    pub fn push_auth_state(&self, state: DaemonAuthState) {
        self.daemon
            .push_auth_state(&self.flow_id(), &self.session_id(), state);
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

/// Let spawned tasks (push listeners, acknowledgements) run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance virtual time and let everything woken by it run.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}
