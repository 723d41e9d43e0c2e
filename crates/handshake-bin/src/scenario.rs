//! Scripted scenarios.
//!
//! Each scenario loads replies into a [`ScriptedDaemon`], drives the
//! controller the way a login form would, and plays the daemon's side of
//! any pushes (approval on the phone, verdict on a pasted code).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use login_challenge_types::{ChallengeKind, DaemonAuthState, Method};
use login_handshake::sim::{authorization_challenge, challenge, Reply, ScriptedDaemon};
use login_handshake::{
    CredentialField, FlowKind, HandshakeConfig, HandshakeController, Mode, Notification,
    NotificationLevel, Notifier, SessionSnapshot, StepOutcome,
};
use tokio::sync::mpsc;
use tracing::info;

const AUTHORIZATION_URL: &str = "https://login.example.com/oauth/authorize?state=sim";
const APPROVAL_DELAY: Duration = Duration::from_secs(3);
const VERDICT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub enum Scenario {
    /// Username, password, then a second-factor code.
    Interactive,
    /// Password accepted, approval arrives on the phone.
    DeviceApproval,
    /// Approval never arrives; fall back to entering the code.
    DeviceTimeout,
    /// Browser authorization, pasted code accepted.
    AuthorizationCode,
    /// First pasted code rejected, second accepted.
    AuthorizationRejected,
}

impl Scenario {
    pub fn flow(&self) -> FlowKind {
        match self {
            Scenario::Interactive | Scenario::DeviceApproval | Scenario::DeviceTimeout => {
                FlowKind::Interactive
            }
            Scenario::AuthorizationCode | Scenario::AuthorizationRejected => {
                FlowKind::AuthorizationCode
            }
        }
    }
}

/// Terminal report from the controller's hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Success,
    Timeout,
    Failure(String),
}

/// What the scenario ended with.
#[derive(Debug)]
pub enum Outcome {
    Authenticated { timeouts: usize },
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Authenticated { timeouts: 0 } => write!(f, "authenticated"),
            Outcome::Authenticated { timeouts } => {
                write!(f, "authenticated after {timeouts} approval timeout(s)")
            }
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Prints notifications the way a toast would show them.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        let tag = match notification.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Success => "ok",
            NotificationLevel::Warning => "warn",
            NotificationLevel::Error => "error",
        };
        println!("  [{tag}] {}", notification.message);
    }
}

struct Run {
    daemon: Arc<ScriptedDaemon>,
    controller: HandshakeController<ScriptedDaemon>,
    terminals: mpsc::UnboundedReceiver<Terminal>,
    limit: Duration,
}

impl Run {
    fn start(config: HandshakeConfig, session_id: String) -> anyhow::Result<Self> {
        let daemon = Arc::new(ScriptedDaemon::new());
        let (tx, terminals) = mpsc::unbounded_channel();
        let limit = config.device_approval_timeout + Duration::from_secs(10);

        let on_success = tx.clone();
        let on_timeout = tx.clone();
        let controller = HandshakeController::builder(daemon.clone(), session_id)
            .config(config)
            .notifier(Arc::new(ConsoleNotifier))
            .on_success(move || {
                let _ = on_success.send(Terminal::Success);
            })
            .on_timeout(move || {
                let _ = on_timeout.send(Terminal::Timeout);
            })
            .on_failure(move |reason| {
                let _ = tx.send(Terminal::Failure(reason.to_string()));
            })
            .activate()
            .context("failed to activate handshake controller")?;

        Ok(Self {
            daemon,
            controller,
            terminals,
            limit,
        })
    }

    async fn step(&self) -> anyhow::Result<StepOutcome> {
        let outcome = self.controller.authenticate().await?;
        println!("  step -> {outcome:?}");
        Ok(outcome)
    }

    async fn next_terminal(&mut self) -> anyhow::Result<Terminal> {
        tokio::time::timeout(self.limit, self.terminals.recv())
            .await
            .context("no terminal outcome before the scenario deadline")?
            .context("controller dropped its hooks")
    }

    async fn wait_for(&self, pred: impl FnMut(&SessionSnapshot) -> bool) -> anyhow::Result<()> {
        let mut rx = self.controller.watch();
        tokio::time::timeout(self.limit, rx.wait_for(pred))
            .await
            .context("state never reached")?
            .context("controller went away")?;
        Ok(())
    }

    /// Emit an auth-state push after `delay`, as the daemon would.
    fn push_auth_state_after(&self, delay: Duration, state: DaemonAuthState) {
        let daemon = self.daemon.clone();
        let flow = self.controller.config().flow_id.clone();
        let session = self.controller.session_id().clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            daemon.push_auth_state(&flow, &session, state);
        });
    }

    fn fill_credentials(&self) {
        self.controller.set_field(CredentialField::Username, "sim-user");
        self.controller.set_field(CredentialField::Password, "sim-password");
    }

    fn script_credentials(&self, then: ChallengeKind) {
        self.daemon
            .script(Method::StartLogin, Reply::challenge(&challenge(ChallengeKind::Username)));
        self.daemon.script(
            Method::WaitForChallenge,
            Reply::challenge(&challenge(ChallengeKind::Password)),
        );
        self.daemon
            .script(Method::WaitForChallenge, Reply::challenge(&challenge(then)));
    }
}

pub async fn run(
    scenario: Scenario,
    config: HandshakeConfig,
    session_id: String,
) -> anyhow::Result<Outcome> {
    let mut run = Run::start(config, session_id)?;

    let mut transitions = run.controller.watch();
    let printer = tokio::spawn(async move {
        while transitions.changed().await.is_ok() {
            let snapshot = transitions.borrow_and_update().clone();
            let busy = if snapshot.busy { " (busy)" } else { "" };
            println!("  mode -> {:?}{busy}", snapshot.mode);
        }
    });

    info!(?scenario, "scenario started");
    let outcome = match scenario {
        Scenario::Interactive => interactive(&mut run).await,
        Scenario::DeviceApproval => device_approval(&mut run).await,
        Scenario::DeviceTimeout => device_timeout(&mut run).await,
        Scenario::AuthorizationCode => authorization_code(&mut run, false).await,
        Scenario::AuthorizationRejected => authorization_code(&mut run, true).await,
    };
    info!(?scenario, ok = outcome.is_ok(), "scenario finished");

    run.controller.deactivate();
    printer.abort();
    outcome
}

async fn finish(run: &mut Run, timeouts: usize) -> anyhow::Result<Outcome> {
    match run.next_terminal().await? {
        Terminal::Success => Ok(Outcome::Authenticated { timeouts }),
        Terminal::Failure(reason) => Ok(Outcome::Failed(reason)),
        Terminal::Timeout => bail!("unexpected approval timeout"),
    }
}

async fn interactive(run: &mut Run) -> anyhow::Result<Outcome> {
    run.script_credentials(ChallengeKind::TwoFactor);
    run.daemon.script(Method::WaitForChallenge, Reply::none());

    run.fill_credentials();
    if run.step().await? != StepOutcome::NeedsInput(Mode::AwaitingSecondFactor) {
        bail!("expected a second-factor prompt");
    }

    run.controller
        .set_field(CredentialField::TwoFactorCode, "123456");
    run.step().await?;
    finish(run, 0).await
}

async fn device_approval(run: &mut Run) -> anyhow::Result<Outcome> {
    run.script_credentials(ChallengeKind::DeviceConfirmation);

    run.fill_credentials();
    if run.step().await? != StepOutcome::AwaitingPush {
        bail!("expected to wait for device approval");
    }

    println!("  (approving on the phone in {}s)", APPROVAL_DELAY.as_secs());
    run.push_auth_state_after(APPROVAL_DELAY, DaemonAuthState::Authenticated);
    finish(run, 0).await
}

async fn device_timeout(run: &mut Run) -> anyhow::Result<Outcome> {
    run.script_credentials(ChallengeKind::DeviceConfirmation);

    run.fill_credentials();
    run.step().await?;
    println!(
        "  (no approval; timing out after {}s)",
        run.controller.config().device_approval_timeout.as_secs()
    );

    if run.next_terminal().await? != Terminal::Timeout {
        bail!("expected the approval to time out");
    }
    let fallback = run.controller.mode();
    println!("  fallback -> {fallback:?}");

    // Second attempt with the code typed into the fallback prompt.
    run.script_credentials(ChallengeKind::TwoFactor);
    run.daemon.script(Method::WaitForChallenge, Reply::none());
    run.fill_credentials();
    run.controller
        .set_field(CredentialField::TwoFactorCode, "123456");
    run.step().await?;
    finish(run, 1).await
}

async fn authorization_code(run: &mut Run, reject_first: bool) -> anyhow::Result<Outcome> {
    run.daemon.script(
        Method::StartLogin,
        Reply::challenge(&authorization_challenge(AUTHORIZATION_URL)),
    );

    run.step().await?;
    if let Some(url) = run.controller.snapshot().authorization_url {
        println!("  open: {url}");
    }

    run.controller
        .set_field(CredentialField::AuthorizationCode, "expired-or-valid-code");
    if run.step().await? != StepOutcome::AwaitingPush {
        bail!("expected the code to be processed by the daemon");
    }

    if reject_first {
        let flow = run.controller.config().flow_id.clone();
        let session = run.controller.session_id().clone();
        run.daemon.push_challenge(
            &flow,
            &session,
            &authorization_challenge(AUTHORIZATION_URL),
        );
        run.wait_for(|s| s.mode == Mode::AwaitingAuthorizationCode && !s.busy)
            .await?;

        run.controller
            .set_field(CredentialField::AuthorizationCode, "fresh-code");
        run.step().await?;
    }

    run.push_auth_state_after(VERDICT_DELAY, DaemonAuthState::Authenticated);
    finish(run, 0).await
}
