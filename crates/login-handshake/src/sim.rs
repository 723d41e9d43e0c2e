//! Scripted in-process daemon.
//!
//! Provides:
//! - ScriptedDaemon: a [`DaemonChannel`] that records calls, answers from
//!   per-method reply scripts and emits pushes on demand
//! - RecordingNotifier: keeps every notification for inspection
//! - challenge builders

use crate::channel::{ChannelResult, DaemonChannel};
use crate::error::ChannelError;
use crate::notify::{Notification, NotificationLevel, Notifier};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use login_challenge_types::{
    AuthStateChangedPush, Challenge, ChallengeId, ChallengeKind, CredentialChallengePush,
    DaemonAuthState, EventTopic, FlowId, Method, ProvideCredentialParams, PushEvent, SessionId,
    WaitForChallengeParams,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;
use uuid::Uuid;

const PUSH_CAPACITY: usize = 64;

/// Build a challenge with a fresh id.
pub fn challenge(kind: ChallengeKind) -> Challenge {
    challenge_with_id(&format!("ch-{}", Uuid::new_v4()), kind)
}

/// Build a challenge with a fixed id.
pub fn challenge_with_id(id: &str, kind: ChallengeKind) -> Challenge {
    let now = Utc::now();
    Challenge {
        challenge_id: ChallengeId::from(id),
        kind,
        server_key_material: format!("km-{}", id),
        email: None,
        authorization_url: None,
        created_at: now,
        expires_at: now + ChronoDuration::minutes(5),
    }
}

/// Build an authorization challenge pointing at `url`.
pub fn authorization_challenge(url: &str) -> Challenge {
    let mut challenge = challenge(ChallengeKind::AuthorizationUrl);
    challenge.authorization_url = Url::parse(url).ok();
    challenge
}

/// Scripted answer to one call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with this value.
    Json(Value),
    /// Fail the call.
    Fail(ChannelError),
    /// Wait, then apply the inner reply.
    After(Duration, Box<Reply>),
    /// Never respond.
    Hang,
}

impl Reply {
    pub fn challenge(challenge: &Challenge) -> Self {
        match serde_json::to_value(challenge) {
            Ok(value) => Reply::Json(value),
            Err(e) => Reply::Fail(ChannelError::Remote {
                method: Method::WaitForChallenge,
                message: e.to_string(),
            }),
        }
    }

    /// `null`: no challenge.
    pub fn none() -> Self {
        Reply::Json(Value::Null)
    }

    pub fn ack() -> Self {
        Reply::Json(json!({ "ok": true }))
    }

    pub fn after(delay: Duration, reply: Reply) -> Self {
        Reply::After(delay, Box::new(reply))
    }

    async fn resolve(self) -> ChannelResult<Value> {
        let mut reply = self;
        loop {
            match reply {
                Reply::Json(value) => return Ok(value),
                Reply::Fail(e) => return Err(e),
                Reply::After(delay, next) => {
                    tokio::time::sleep(delay).await;
                    reply = *next;
                }
                Reply::Hang => return std::future::pending().await,
            }
        }
    }
}

/// One recorded `invoke`.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub params: Value,
}

/// In-process stand-in for the daemon.
///
/// Without a script, start_login answers `null`, provide_credential and
/// cancel_login acknowledge, and wait_for_challenge sleeps for the requested
/// bound before answering `null` (a real daemon's empty poll).
#[derive(Default)]
pub struct ScriptedDaemon {
    calls: Mutex<Vec<RecordedCall>>,
    scripts: Mutex<HashMap<Method, VecDeque<Reply>>>,
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl ScriptedDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unscripted call to `method`.
    pub fn script(&self, method: Method, reply: Reply) {
        self.scripts
            .lock()
            .entry(method)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    /// Every `provide_credential` call, decoded.
    pub fn provided(&self) -> Vec<ProvideCredentialParams> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == Method::ProvideCredential)
            .filter_map(|call| serde_json::from_value(call.params.clone()).ok())
            .collect()
    }

    /// Send a raw payload on a topic. Returns the number of listeners.
    pub fn push_raw(&self, topic: &EventTopic, payload: Value) -> usize {
        self.sender(topic).send(payload).unwrap_or(0)
    }

    pub fn push_challenge(&self, flow: &FlowId, session_id: &SessionId, challenge: &Challenge) -> usize {
        let push = CredentialChallengePush {
            session_id: session_id.clone(),
            flow: Some(flow.clone()),
            challenge: challenge.clone(),
        };
        let topic = EventTopic::new(flow.clone(), PushEvent::CredentialChallenge);
        match serde_json::to_value(&push) {
            Ok(payload) => self.push_raw(&topic, payload),
            Err(_) => 0,
        }
    }

    pub fn push_auth_state(&self, flow: &FlowId, session_id: &SessionId, state: DaemonAuthState) -> usize {
        let push = AuthStateChangedPush {
            session_id: session_id.clone(),
            flow: Some(flow.clone()),
            state,
        };
        let topic = EventTopic::new(flow.clone(), PushEvent::AuthStateChanged);
        match serde_json::to_value(&push) {
            Ok(payload) => self.push_raw(&topic, payload),
            Err(_) => 0,
        }
    }

    fn sender(&self, topic: &EventTopic) -> broadcast::Sender<Value> {
        self.topics
            .lock()
            .entry(topic.name())
            .or_insert_with(|| broadcast::channel(PUSH_CAPACITY).0)
            .clone()
    }

    fn default_reply(method: Method, params: &Value) -> Reply {
        match method {
            Method::StartLogin => Reply::none(),
            Method::ProvideCredential | Method::CancelLogin => Reply::ack(),
            Method::WaitForChallenge => {
                let bound = serde_json::from_value::<WaitForChallengeParams>(params.clone())
                    .map(|p| Duration::from_millis(p.timeout_ms))
                    .unwrap_or_default();
                Reply::after(bound, Reply::none())
            }
        }
    }
}

#[async_trait]
impl DaemonChannel for ScriptedDaemon {
    async fn invoke(&self, method: Method, params: Value) -> ChannelResult<Value> {
        debug!(method = %method, "Scripted daemon call");

        self.calls.lock().push(RecordedCall {
            method,
            params: params.clone(),
        });

        let scripted = self
            .scripts
            .lock()
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        let reply = scripted.unwrap_or_else(|| Self::default_reply(method, &params));

        reply.resolve().await
    }

    fn subscribe(&self, topic: &EventTopic) -> broadcast::Receiver<Value> {
        self.sender(topic).subscribe()
    }
}

/// Notifier that keeps everything it is told.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn messages(&self, level: NotificationLevel) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.level == level)
            .map(|n| n.message.clone())
            .collect()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.messages(level).len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}
