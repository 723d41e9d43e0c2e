//! Delegated authorization-code login.

use super::harness::{settle, Harness};
use crate::error::{ChannelError, HandshakeError};
use crate::flow_driver::StepOutcome;
use crate::notify::NotificationLevel;
use crate::session::{CredentialField, Mode};
use crate::sim::{authorization_challenge, Reply};
use login_challenge_types::{DaemonAuthState, Method};

const AUTH_URL: &str = "https://auth.example.com/authorize?state=abc";

/// Start the flow with the authorization challenge returned directly.
async fn start_with_url(h: &Harness) -> login_challenge_types::Challenge {
    let challenge = authorization_challenge(AUTH_URL);
    h.daemon
        .script(Method::StartLogin, Reply::challenge(&challenge));

    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::NeedsInput(Mode::AwaitingAuthorizationCode)
    );
    challenge
}

// =============================================================================
// Start
// =============================================================================

/// start_login may hand back the URL directly.
#[tokio::test(start_paused = true)]
async fn test_authorization_url_returned_directly() {
    let h = Harness::authorization();
    start_with_url(&h).await;

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.mode, Mode::AwaitingAuthorizationCode);
    assert_eq!(
        snapshot.authorization_url.map(|u| u.to_string()).as_deref(),
        Some(AUTH_URL)
    );
    assert!(!snapshot.busy);
    assert!(snapshot.has_started_attempt);
}

/// Or nothing, in which case the attempt stays busy until the push.
#[tokio::test(start_paused = true)]
async fn test_authorization_url_by_push() {
    let h = Harness::authorization();

    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(outcome, StepOutcome::AwaitingPush);
    assert!(h.controller.is_busy());
    assert_eq!(h.controller.mode(), Mode::Busy);

    h.push_challenge(&authorization_challenge(AUTH_URL));
    settle().await;

    assert_eq!(h.controller.mode(), Mode::AwaitingAuthorizationCode);
    assert!(!h.controller.is_busy());
    assert_eq!(h.notifier.count(NotificationLevel::Error), 0);
}

/// The push can beat the start_login response; the late response is a
/// duplicate and changes nothing.
#[tokio::test(start_paused = true)]
async fn test_push_before_start_response_is_not_duplicated() {
    let h = Harness::authorization();
    let challenge = authorization_challenge(AUTH_URL);
    h.daemon.script(
        Method::StartLogin,
        Reply::after(
            std::time::Duration::from_secs(2),
            Reply::challenge(&challenge),
        ),
    );

    let (outcome, _) = tokio::join!(h.controller.authenticate(), async {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        h.push_challenge(&challenge);
    });

    assert_eq!(
        outcome.unwrap(),
        StepOutcome::NeedsInput(Mode::AwaitingAuthorizationCode)
    );
    assert_eq!(h.notifier.count(NotificationLevel::Info), 1);
    assert!(!h.controller.is_busy());
}

// =============================================================================
// Code submission
// =============================================================================

/// The pasted code goes out bound to the original challenge and no poll
/// follows; the authenticated push completes the login.
#[tokio::test(start_paused = true)]
async fn test_code_submission_waits_for_push() {
    let h = Harness::authorization();
    let challenge = start_with_url(&h).await;

    h.fill(CredentialField::AuthorizationCode, "  code-123 ");
    let outcome = h.controller.authenticate().await.unwrap();
    assert_eq!(outcome, StepOutcome::AwaitingPush);

    let provided = h.daemon.provided();
    assert_eq!(provided.len(), 1);
    assert_eq!(provided[0].challenge_id, challenge.challenge_id);
    assert_eq!(provided[0].value, "code-123");
    assert_eq!(h.daemon.count(Method::WaitForChallenge), 0);

    let snapshot = h.controller.snapshot();
    assert!(snapshot.awaiting_code_processing);
    assert!(snapshot.busy);
    assert!(matches!(
        h.controller.authenticate().await,
        Err(HandshakeError::Busy)
    ));

    h.push_auth_state(DaemonAuthState::Authenticated);
    settle().await;

    assert_eq!(h.successes(), 1);
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.mode, Mode::Idle);
    assert!(!snapshot.awaiting_code_processing);
    assert!(!snapshot.busy);
}

/// A new authorization challenge while the code is processed is a
/// rejection: specific message, code cleared, flag reset, no success.
#[tokio::test(start_paused = true)]
async fn test_rejected_code_asks_for_a_new_one() {
    let h = Harness::authorization();
    start_with_url(&h).await;

    h.fill(CredentialField::AuthorizationCode, "expired-code");
    h.controller.authenticate().await.unwrap();

    h.push_challenge(&authorization_challenge(
        "https://auth.example.com/authorize?state=def",
    ));
    settle().await;

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.mode, Mode::AwaitingAuthorizationCode);
    assert!(!snapshot.awaiting_code_processing);
    assert!(!snapshot.busy);
    assert!(h
        .controller
        .field(CredentialField::AuthorizationCode)
        .is_none());

    let errors = h.notifier.messages(NotificationLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("invalid or expired"));
    // Only the initial issuance produced the generic prompt.
    assert_eq!(h.notifier.count(NotificationLevel::Info), 1);
    assert_eq!(h.successes(), 0);
    assert!(h.failures().is_empty());

    // The next code goes against the new challenge.
    h.fill(CredentialField::AuthorizationCode, "fresh-code");
    assert_eq!(
        h.controller.authenticate().await.unwrap(),
        StepOutcome::AwaitingPush
    );
    let provided = h.daemon.provided();
    assert_eq!(provided.len(), 2);
    assert_eq!(provided[1].value, "fresh-code");
    assert_eq!(
        Some(provided[1].challenge_id.clone()),
        h.controller.snapshot().pending_challenge_id
    );
}

/// The verdict can arrive before provide_credential returns.
#[tokio::test(start_paused = true)]
async fn test_rejection_before_submit_returns() {
    let h = Harness::authorization();
    start_with_url(&h).await;
    h.daemon.script(
        Method::ProvideCredential,
        Reply::after(std::time::Duration::from_secs(3), Reply::ack()),
    );
    h.fill(CredentialField::AuthorizationCode, "bad-code");

    let (outcome, _) = tokio::join!(h.controller.authenticate(), async {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        h.push_challenge(&authorization_challenge(AUTH_URL));
    });

    assert_eq!(
        outcome.unwrap(),
        StepOutcome::NeedsInput(Mode::AwaitingAuthorizationCode)
    );
    assert!(!h.controller.is_busy());
    assert_eq!(h.notifier.count(NotificationLevel::Error), 1);
}

/// An empty pasted code never reaches the daemon.
#[tokio::test(start_paused = true)]
async fn test_missing_code_is_reported_locally() {
    let h = Harness::authorization();
    start_with_url(&h).await;

    let err = h.controller.authenticate().await.unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::MissingField(CredentialField::AuthorizationCode)
    ));
    assert_eq!(h.daemon.count(Method::ProvideCredential), 0);
    assert!(!h.controller.snapshot().awaiting_code_processing);
}

/// A failed submission aborts the attempt.
#[tokio::test(start_paused = true)]
async fn test_submission_failure_aborts() {
    let h = Harness::authorization();
    start_with_url(&h).await;
    h.daemon
        .script(Method::ProvideCredential, Reply::Fail(ChannelError::Timeout));
    h.fill(CredentialField::AuthorizationCode, "code-123");

    let err = h.controller.authenticate().await.unwrap_err();
    assert!(matches!(err, HandshakeError::Channel(ChannelError::Timeout)));

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.mode, Mode::Idle);
    assert!(!snapshot.awaiting_code_processing);
    assert!(!snapshot.busy);
    assert_eq!(h.failures().len(), 1);
}
