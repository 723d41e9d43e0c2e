//! Device-approval timeout supervisor.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐   Arm    ┌─────────────────┐
//! │    Disarmed     │ ───────► │      Armed      │ ──┐
//! └─────────────────┘          └────────┬────────┘   │ Arm (supersede)
//!          ▲                            │  ◄─────────┘
//!          │      Disarm / Expire       │
//!          └────────────────────────────┘
//! ```
//!
//! Expire from Disarmed is rejected by the machine, which is what keeps a
//! late or superseded timer task from firing a second time.

use crate::controller::HandshakeCore;
use crate::channel::DaemonChannel;
use crate::notify::Notification;
use crate::session::Mode;
use parking_lot::Mutex;
use rust_fsm::*;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub approval_timer(Disarmed)

    Disarmed => {
        Arm => Armed
    },
    Armed => {
        Arm => Armed,
        Disarm => Disarmed,
        Expire => Disarmed
    }
}

pub use approval_timer::Input as ApprovalTimerInput;
pub use approval_timer::State as ApprovalTimerState;
pub use approval_timer::StateMachine as ApprovalTimer;

struct TimerSlot {
    machine: ApprovalTimer,
    generation: u64,
    deadline: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

/// Handed to the expiry callback of one arming.
pub struct ExpiryTicket {
    supervisor: Weak<TimeoutSupervisor>,
    generation: u64,
}

impl ExpiryTicket {
    /// Claim the expiry. True at most once per arming, and never once that
    /// arming was disarmed or superseded.
    pub fn claim(&self) -> bool {
        match self.supervisor.upgrade() {
            Some(supervisor) => supervisor.claim(self.generation),
            None => false,
        }
    }
}

/// Bounded wait that can be armed, re-armed and disarmed without ever
/// double-firing.
pub struct TimeoutSupervisor {
    slot: Mutex<TimerSlot>,
}

impl TimeoutSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(TimerSlot {
                machine: ApprovalTimer::new(),
                generation: 0,
                deadline: None,
                task: None,
            }),
        })
    }

    /// Arm (or re-arm) the timer. A previous arming is superseded, never
    /// stacked. `on_expire` runs on the timer task and must call
    /// [`ExpiryTicket::claim`] before acting.
    pub fn arm<F>(self: &Arc<Self>, timeout: Duration, on_expire: F)
    where
        F: FnOnce(ExpiryTicket) + Send + 'static,
    {
        let mut slot = self.slot.lock();

        if let Err(e) = slot.machine.consume(&ApprovalTimerInput::Arm) {
            warn!(error = ?e, state = ?slot.machine.state(), "Cannot arm approval timer");
            return;
        }

        if let Some(task) = slot.task.take() {
            task.abort();
        }

        slot.generation += 1;
        let deadline = Instant::now() + timeout;
        slot.deadline = Some(deadline);

        let ticket = ExpiryTicket {
            supervisor: Arc::downgrade(self),
            generation: slot.generation,
        };

        debug!(
            generation = slot.generation,
            timeout_ms = timeout.as_millis() as u64,
            "Approval timer armed"
        );

        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expire(ticket);
        }));
    }

    /// Disarm. Returns false if nothing was armed.
    pub fn disarm(&self) -> bool {
        let mut slot = self.slot.lock();

        if slot.machine.consume(&ApprovalTimerInput::Disarm).is_err() {
            return false;
        }

        slot.generation += 1;
        slot.deadline = None;
        if let Some(task) = slot.task.take() {
            task.abort();
        }

        debug!(generation = slot.generation, "Approval timer disarmed");
        true
    }

    pub fn is_armed(&self) -> bool {
        *self.slot.lock().machine.state() == ApprovalTimerState::Armed
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.slot.lock().deadline
    }

    fn claim(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock();

        if slot.generation != generation {
            return false;
        }

        if slot.machine.consume(&ApprovalTimerInput::Expire).is_err() {
            return false;
        }

        slot.deadline = None;
        // The claiming task is the one stored here; let it finish.
        slot.task = None;
        true
    }
}

impl Drop for TimeoutSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.slot.get_mut().task.take() {
            task.abort();
        }
    }
}

impl<C: DaemonChannel> HandshakeCore<C> {
    /// Arm the approval timer for the current epoch.
    pub(crate) fn arm_approval_timeout(self: &Arc<Self>, epoch: u64) {
        let core = Arc::downgrade(self);
        self.timeout
            .arm(self.config.device_approval_timeout, move |ticket| {
                if let Some(core) = core.upgrade() {
                    core.on_device_approval_timeout(ticket, epoch);
                }
            });
    }

    /// Out-of-band approval never arrived: cancel on the daemon, clear, fall
    /// back to manual input, tell the user, tell the caller.
    fn on_device_approval_timeout(self: &Arc<Self>, ticket: ExpiryTicket, epoch: u64) {
        let fallback = self.config.flow.fallback_mode();

        {
            let mut state = self.state.lock();
            if !ticket.claim() {
                return;
            }
            if !state.is_current(epoch) || state.mode() != Mode::AwaitingDeviceApproval {
                debug!(
                    session_id = %self.session_id(),
                    "Approval timer expired after the approval step was left"
                );
                return;
            }

            self.spawn_cancel_login();
            state.clear_terminal();
            state.set_fallback(fallback);
            self.publish(&state);
        }

        info!(
            session_id = %self.session_id(),
            timeout_secs = self.config.device_approval_timeout.as_secs(),
            fallback = ?fallback,
            "Device approval timed out"
        );

        let message = match fallback {
            Some(_) => "Device approval timed out. Enter the code from your authenticator instead.",
            None => "Device approval timed out. Please start the login again.",
        };
        self.notifier.notify(Notification::warning(message));
        self.hooks.timeout();
    }
}
