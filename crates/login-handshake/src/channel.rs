//! The channel capability and a typed client over it.
//!
//! Transport, reconnection and channel-level auth all live beneath
//! [`DaemonChannel`]. The controller only ever sees `invoke` and `subscribe`.

use crate::error::{ChannelError, HandshakeResult};
use async_trait::async_trait;
use login_challenge_types::{
    Challenge, EventTopic, Method, ProvideCredentialParams, SessionId, SessionParams,
    WaitForChallengeParams,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Result type for raw channel calls.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Request/response plus push capability exposed by the transport.
///
/// Implementations may interleave responses and pushes arbitrarily; nothing
/// is assumed about ordering between them.
#[async_trait]
pub trait DaemonChannel: Send + Sync + 'static {
    /// Invoke a daemon method with JSON params.
    async fn invoke(&self, method: Method, params: serde_json::Value)
        -> ChannelResult<serde_json::Value>;

    /// Subscribe to a push topic. Dropping the receiver unsubscribes.
    fn subscribe(&self, topic: &EventTopic) -> broadcast::Receiver<serde_json::Value>;
}

/// Typed wrapper over a [`DaemonChannel`] for one session.
pub struct DaemonClient<C> {
    channel: Arc<C>,
    session_id: SessionId,
    poll_grace: Duration,
}

impl<C: DaemonChannel> DaemonClient<C> {
    pub fn new(channel: Arc<C>, session_id: SessionId, poll_grace: Duration) -> Self {
        Self {
            channel,
            session_id,
            poll_grace,
        }
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// `auth.start_login`. The daemon may answer with the first challenge or
    /// with nothing, in which case the challenge arrives by push.
    pub async fn start_login(&self) -> HandshakeResult<Option<Challenge>> {
        let params = SessionParams {
            session_id: self.session_id.clone(),
        };
        self.call(Method::StartLogin, &params).await
    }

    /// `auth.provide_credential`, bound to exactly the challenge it answers.
    pub async fn provide_credential(&self, challenge: &Challenge, value: &str) -> HandshakeResult<()> {
        let params = ProvideCredentialParams::answering(self.session_id.clone(), challenge, value);
        let payload = serde_json::to_value(&params)?;
        self.channel
            .invoke(Method::ProvideCredential, payload)
            .await?;
        Ok(())
    }

    /// `auth.wait_for_challenge` with a bound. Expiry on either side
    /// resolves to no challenge rather than an error.
    pub async fn wait_for_challenge(&self, bound: Duration) -> HandshakeResult<Option<Challenge>> {
        let params = WaitForChallengeParams {
            session_id: self.session_id.clone(),
            timeout_ms: u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
        };
        let payload = serde_json::to_value(&params)?;

        let response = match tokio::time::timeout(
            bound + self.poll_grace,
            self.channel.invoke(Method::WaitForChallenge, payload),
        )
        .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(e)) if e.is_timeout() => {
                debug!(session_id = %self.session_id, "Challenge poll timed out on the channel");
                return Ok(None);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!(
                    session_id = %self.session_id,
                    bound_ms = params.timeout_ms,
                    "Challenge poll exceeded its bound"
                );
                return Ok(None);
            }
        };

        Ok(serde_json::from_value(response)?)
    }

    /// `auth.cancel_login`. Best effort; callers usually ignore the result.
    pub async fn cancel_login(&self) -> HandshakeResult<()> {
        let params = SessionParams {
            session_id: self.session_id.clone(),
        };
        let payload = serde_json::to_value(&params)?;
        self.channel.invoke(Method::CancelLogin, payload).await?;
        Ok(())
    }

    async fn call<P, R>(&self, method: Method, params: &P) -> HandshakeResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(params)?;
        let response = self.channel.invoke(method, payload).await?;
        Ok(serde_json::from_value(response)?)
    }
}
