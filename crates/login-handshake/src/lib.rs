//! Login handshake: client-side controller for daemon-mediated logins.
//!
//! A remote daemon performs the actual login against an identity provider
//! and asks for credentials one challenge at a time. This crate drives that
//! exchange for one session and keeps a single, derived [`Mode`] for the
//! presentation layer, reconciling two independent sources of truth:
//!
//! - request/response calls (start, provide credential, bounded polls)
//! - pushes (new challenges, authenticated / not authenticated)
//!
//! # Core Invariants
//!
//! 1. **One pending challenge**: a new challenge always supersedes the old one
//! 2. **Derived mode**: mode is a pure function of the session state
//! 3. **One outcome**: success, failure and timeout fire at most once per attempt
//! 4. **Session isolation**: pushes for another session never touch state
//!
//! # Architecture
//!
//! ```text
//!            authenticate()                     pushes
//! caller ──────────────────► FlowDriver    EventBridge ◄──── daemon
//!                                │              │
//!                                ▼              ▼
//!                            SessionState (one lock) ──► watch<SessionSnapshot>
//!                                │
//!                                ▼
//!                        TimeoutSupervisor (device approval)
//! ```

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod event_bridge;
pub mod flow_driver;
pub mod notify;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod timeout;

#[cfg(test)]
mod tests;

pub use channel::{ChannelResult, DaemonChannel, DaemonClient};
pub use config::{FlowKind, HandshakeConfig};
pub use controller::{HandshakeBuilder, HandshakeController};
pub use error::{ChannelError, HandshakeError, HandshakeResult};
pub use event_bridge::EventBridge;
pub use flow_driver::StepOutcome;
pub use notify::{HandshakeHooks, Notification, NotificationLevel, Notifier, TracingNotifier};
pub use session::{CredentialField, Mode, SessionSnapshot};
pub use timeout::TimeoutSupervisor;
