//! Pub/sub fan-out between relay processes.
//!
//! Routers publish serialized messages to named channels; every session
//! holds one [`Subscription`] covering its own channels and forwards whatever
//! arrives to its socket. Delivery is at-most-once per subscriber.

mod local;
mod redis;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use courier_proto::Channel;
use tokio::sync::mpsc;

pub use self::{
    local::LocalBus,
    redis::{ReconnectPolicy, RedisBus},
};

/// Errors from a pub/sub backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// A publish was not accepted by the bus
    #[error("publish to {channel} failed: {reason}")]
    Publish {
        /// Target channel
        channel: String,
        /// Backend detail
        reason: String,
    },

    /// A subscription could not be established
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// The bus could not be reached at all
    #[error("pub/sub unavailable: {0}")]
    Unavailable(String),
}

/// One payload received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel the payload was published to
    pub channel: Channel,
    /// Serialized message, forwarded verbatim
    pub payload: Arc<str>,
}

/// Live multi-channel subscription.
///
/// Dropping it (or calling [`Subscription::close`]) releases every channel.
pub struct Subscription {
    channels: Vec<Channel>,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Assemble a subscription from a delivery queue and a release hook.
    pub fn new(
        channels: Vec<Channel>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { channels, receiver, on_close: Some(Box::new(on_close)) }
    }

    /// Channels this subscription listens on.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Next delivery. `None` once the backend has gone away for good.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Release every channel.
    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(release) = self.on_close.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("channels", &self.channels).finish_non_exhaustive()
    }
}

/// Publish/subscribe backend.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Publish `payload` on `channel`.
    ///
    /// Returns how many subscribers the bus handed it to. Zero is not an
    /// error: offline recipients read history later.
    async fn publish(&self, channel: &Channel, payload: Arc<str>) -> Result<usize, BridgeError>;

    /// Subscribe to every channel in `channels` at once.
    ///
    /// Deliveries from all channels arrive on the one returned subscription,
    /// in publish order per channel.
    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BridgeError>;
}
