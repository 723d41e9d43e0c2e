//! Behaviour tests for the handshake controller.
//!
//! All tests run on a paused clock so the 30/60 second bounds elapse in
//! virtual time.
//!
//! - `harness.rs`            - Controller wired to a scripted daemon
//! - `interactive.rs`        - Username, password and code submission
//! - `device_approval.rs`    - Out-of-band approval, acknowledgement, timeout
//! - `authorization_code.rs` - Delegated authorization-code flow
//! - `reconciliation.rs`     - Pushes, session isolation, terminal outcomes

mod authorization_code;
mod device_approval;
pub(crate) mod harness;
