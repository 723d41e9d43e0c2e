//! Out-of-band device approval: acknowledgement, approval by push, timeout.

use super::harness::{advance, settle, Harness};
use crate::error::{ChannelError, HandshakeError};
use crate::flow_driver::StepOutcome;
use crate::notify::NotificationLevel;
use crate::session::{CredentialField, Mode};
use crate::sim::{challenge_with_id, Reply};
use login_challenge_types::{ChallengeKind, DaemonAuthState, Method, DEVICE_CONFIRMATION_ACK};
use std::time::Duration;

/// Script a login whose password step ends in a device confirmation.
fn script_device_login(h: &Harness, device_id: &str) {
    h.daemon.script(
        Method::StartLogin,
        Reply::challenge(&challenge_with_id("user-1", ChallengeKind::Username)),
    );
    h.daemon.script(
        Method::WaitForChallenge,
        Reply::challenge(&challenge_with_id("pass-1", ChallengeKind::Password)),
    );
    h.daemon.script(
        Method::WaitForChallenge,
        Reply::challenge(&challenge_with_id(device_id, ChallengeKind::DeviceConfirmation)),
    );
}

async fn enter_device_approval(h: &Harness) {
    script_device_login(h, "device-1");
    h.fill_credentials();

    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(outcome, StepOutcome::AwaitingPush);
    assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);
    assert!(!h.controller.is_busy());
}

// =============================================================================
// Acknowledgement
// =============================================================================

/// The confirmation is acknowledged with the canned value after the delay,
/// bound to the device challenge.
#[tokio::test(start_paused = true)]
async fn test_device_confirmation_is_acknowledged_after_delay() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;

    advance(Duration::from_millis(400)).await;
    assert_eq!(h.daemon.count(Method::ProvideCredential), 2);

    advance(Duration::from_millis(200)).await;
    let provided = h.daemon.provided();
    assert_eq!(provided.len(), 3);
    assert_eq!(provided[2].challenge_id.as_str(), "device-1");
    assert_eq!(provided[2].value, DEVICE_CONFIRMATION_ACK);
    assert_eq!(provided[2].kind, ChallengeKind::DeviceConfirmation);

    // Still waiting on the push.
    assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);
    assert!(h.controller.snapshot().awaiting_device_approval_since.is_some());
}

/// A failed acknowledgement is logged; the mode stays put and nothing is
/// reported as a failure.
#[tokio::test(start_paused = true)]
async fn test_acknowledgement_failure_keeps_mode() {
    let h = Harness::interactive();
    h.daemon.script(Method::ProvideCredential, Reply::ack());
    h.daemon.script(Method::ProvideCredential, Reply::ack());
    h.daemon.script(
        Method::ProvideCredential,
        Reply::Fail(ChannelError::Remote {
            method: Method::ProvideCredential,
            message: "challenge not found".to_string(),
        }),
    );
    enter_device_approval(&h).await;

    advance(Duration::from_secs(1)).await;

    assert_eq!(h.daemon.count(Method::ProvideCredential), 3);
    assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);
    assert!(h.failures().is_empty());
    assert_eq!(h.notifier.count(NotificationLevel::Error), 0);
}

/// Calling authenticate during approval has nothing to submit.
#[tokio::test(start_paused = true)]
async fn test_authenticate_during_approval_awaits_push() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;
    let calls = h.daemon.calls().len();

    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(outcome, StepOutcome::AwaitingPush);
    assert_eq!(h.daemon.calls().len(), calls);
}

// =============================================================================
// Approval by push
// =============================================================================

/// Approved at 59 seconds: success fires once, the timeout never does.
#[tokio::test(start_paused = true)]
async fn test_approval_just_before_timeout_succeeds() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;

    advance(Duration::from_secs(59)).await;
    assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);

    h.push_auth_state(DaemonAuthState::Authenticated);
    settle().await;

    assert_eq!(h.successes(), 1);
    assert_eq!(h.controller.mode(), Mode::Idle);

    advance(Duration::from_secs(120)).await;
    assert_eq!(h.timeouts(), 0);
    assert_eq!(h.successes(), 1);
    assert_eq!(h.daemon.count(Method::CancelLogin), 0);
    assert_eq!(h.notifier.count(NotificationLevel::Warning), 0);
}

/// The poll after the password comes back empty while the device
/// confirmation arrived by push. That empty poll is not a success.
#[tokio::test(start_paused = true)]
async fn test_empty_poll_during_approval_defers_to_push() {
    let h = Harness::interactive();
    h.daemon.script(
        Method::StartLogin,
        Reply::challenge(&challenge_with_id("user-1", ChallengeKind::Username)),
    );
    h.daemon.script(
        Method::WaitForChallenge,
        Reply::challenge(&challenge_with_id("pass-1", ChallengeKind::Password)),
    );
    h.daemon.script(
        Method::WaitForChallenge,
        Reply::after(Duration::from_secs(5), Reply::none()),
    );
    h.fill_credentials();

    let (outcome, _) = tokio::join!(h.controller.authenticate(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.push_challenge(&challenge_with_id(
            "device-1",
            ChallengeKind::DeviceConfirmation,
        ));
    });

    assert_eq!(outcome.unwrap(), StepOutcome::AwaitingPush);
    assert_eq!(h.successes(), 0);
    assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);
    assert!(h.controller.snapshot().has_started_attempt);

    h.push_auth_state(DaemonAuthState::Authenticated);
    settle().await;
    assert_eq!(h.successes(), 1);
}

// =============================================================================
// Timeout
// =============================================================================

/// No push within 60 seconds: timeout fires once, the daemon is told to
/// cancel, and the mode falls back to manual code entry.
#[tokio::test(start_paused = true)]
async fn test_approval_timeout_falls_back_to_code_entry() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;

    advance(Duration::from_secs(59)).await;
    assert_eq!(h.timeouts(), 0);

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.timeouts(), 1);
    assert_eq!(h.controller.mode(), Mode::AwaitingSecondFactor);
    assert_eq!(h.daemon.count(Method::CancelLogin), 1);
    assert_eq!(h.notifier.count(NotificationLevel::Warning), 1);
    assert_eq!(h.successes(), 0);
    assert!(h.failures().is_empty());

    let snapshot = h.controller.snapshot();
    assert!(snapshot.pending_kind.is_none());
    assert!(!snapshot.has_started_attempt);
    assert!(snapshot.awaiting_device_approval_since.is_none());
    assert!(h.controller.field(CredentialField::Password).is_none());

    advance(Duration::from_secs(300)).await;
    assert_eq!(h.timeouts(), 1);
    assert_eq!(h.daemon.count(Method::CancelLogin), 1);
}

/// Retrying with username and password alone after a timeout takes a reset
/// to drop the code-entry fallback.
#[tokio::test(start_paused = true)]
async fn test_reset_after_timeout_allows_plain_retry() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;
    advance(Duration::from_secs(61)).await;
    assert_eq!(h.controller.mode(), Mode::AwaitingSecondFactor);

    h.controller.reset();
    assert_eq!(h.controller.mode(), Mode::Idle);

    script_device_login(&h, "device-2");
    h.fill_credentials();
    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(outcome, StepOutcome::AwaitingPush);
    assert_eq!(h.daemon.count(Method::StartLogin), 2);
}

/// A late authenticated push after the timeout does not report success for
/// the abandoned attempt.
#[tokio::test(start_paused = true)]
async fn test_push_after_timeout_is_not_a_second_outcome() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;

    advance(Duration::from_secs(61)).await;
    assert_eq!(h.timeouts(), 1);

    h.push_auth_state(DaemonAuthState::Authenticated);
    settle().await;
    assert_eq!(h.successes(), 0);
}

/// After the fallback the next attempt needs the code up front and submits
/// it as soon as the second-factor challenge shows up.
#[tokio::test(start_paused = true)]
async fn test_fallback_code_is_submitted_on_next_attempt() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;
    advance(Duration::from_secs(61)).await;
    assert_eq!(h.controller.mode(), Mode::AwaitingSecondFactor);

    h.fill_credentials();
    let err = h.controller.authenticate().await.unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::MissingField(CredentialField::TwoFactorCode)
    ));
    assert_eq!(h.daemon.count(Method::StartLogin), 1);

    h.daemon.script(
        Method::StartLogin,
        Reply::challenge(&challenge_with_id("user-2", ChallengeKind::Username)),
    );
    h.daemon.script(
        Method::WaitForChallenge,
        Reply::challenge(&challenge_with_id("pass-2", ChallengeKind::Password)),
    );
    h.daemon.script(
        Method::WaitForChallenge,
        Reply::challenge(&challenge_with_id("tfa-2", ChallengeKind::TwoFactor)),
    );
    h.fill(CredentialField::TwoFactorCode, "246810");

    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(outcome, StepOutcome::Authenticated);

    let provided = h.daemon.provided();
    let code = provided.last().unwrap();
    assert_eq!(code.challenge_id.as_str(), "tfa-2");
    assert_eq!(code.value, "246810");
    assert_eq!(h.successes(), 1);
    assert_eq!(h.timeouts(), 1);
}

/// Re-entering approval re-arms rather than stacks; leaving it disarms.
/// However often that happens, expiry fires once.
#[tokio::test(start_paused = true)]
async fn test_arm_disarm_churn_times_out_once() {
    let h = Harness::interactive();

    for round in 0..4 {
        h.push_challenge(&challenge_with_id(
            &format!("device-{}", round),
            ChallengeKind::DeviceConfirmation,
        ));
        settle().await;
        assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);

        advance(Duration::from_secs(40)).await;
        h.push_challenge(&challenge_with_id(
            &format!("pass-{}", round),
            ChallengeKind::Password,
        ));
        settle().await;
        assert_eq!(h.controller.mode(), Mode::AwaitingCredentials);
    }
    assert_eq!(h.timeouts(), 0);

    h.push_challenge(&challenge_with_id("device-final", ChallengeKind::DeviceConfirmation));
    settle().await;
    advance(Duration::from_secs(40)).await;
    h.push_challenge(&challenge_with_id("device-again", ChallengeKind::DeviceConfirmation));
    settle().await;

    // The first arming would have fired at 60s; the re-arm moved it.
    advance(Duration::from_secs(30)).await;
    assert_eq!(h.timeouts(), 0);

    advance(Duration::from_secs(31)).await;
    assert_eq!(h.timeouts(), 1);
    assert_ne!(h.controller.mode(), Mode::AwaitingDeviceApproval);

    advance(Duration::from_secs(600)).await;
    assert_eq!(h.timeouts(), 1);
}

/// The authorization-code flow has no manual code to fall back to, so the
/// timeout lands in Idle.
#[tokio::test(start_paused = true)]
async fn test_authorization_flow_timeout_falls_back_to_idle() {
    let h = Harness::authorization();
    h.push_challenge(&challenge_with_id("device-1", ChallengeKind::DeviceConfirmation));
    settle().await;
    assert_eq!(h.controller.mode(), Mode::AwaitingDeviceApproval);

    advance(Duration::from_secs(61)).await;
    assert_eq!(h.timeouts(), 1);
    assert_eq!(h.controller.mode(), Mode::Idle);
}

/// Cancelling during approval disarms the timer and tells the daemon.
#[tokio::test(start_paused = true)]
async fn test_cancel_during_approval_disarms_timer() {
    let h = Harness::interactive();
    enter_device_approval(&h).await;

    advance(Duration::from_secs(10)).await;
    h.controller.cancel();
    settle().await;

    assert_eq!(h.controller.mode(), Mode::Idle);
    assert_eq!(h.daemon.count(Method::CancelLogin), 1);

    advance(Duration::from_secs(120)).await;
    assert_eq!(h.timeouts(), 0);
    assert_eq!(h.successes(), 0);
}
