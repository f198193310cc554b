//! Redis pub/sub bridge.
//!
//! Publishing goes through a shared [`ConnectionManager`]. Each subscription
//! owns a dedicated pub/sub connection driven by a background task; if that
//! connection drops, the task reconnects with capped exponential backoff and
//! resubscribes to the same channels. Messages published while it is down are
//! not replayed.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_proto::Channel;
use futures_util::StreamExt;
use redis::{
    AsyncCommands, Client, RedisResult,
    aio::{ConnectionManager, PubSub as RedisPubSub},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BridgeError, Delivery, PubSub, Subscription};

/// Backoff applied between resubscribe attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial_backoff: Duration::from_millis(100), max_backoff: Duration::from_secs(10) }
    }
}

impl ReconnectPolicy {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Cross-process bus on a Redis server.
pub struct RedisBus {
    client: Client,
    publisher: ConnectionManager,
    policy: ReconnectPolicy,
}

impl RedisBus {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, BridgeError> {
        Self::with_policy(url, ReconnectPolicy::default()).await
    }

    /// Connect with a custom resubscribe backoff.
    pub async fn with_policy(url: &str, policy: ReconnectPolicy) -> Result<Self, BridgeError> {
        let client = Client::open(url).map_err(|e| BridgeError::Unavailable(e.to_string()))?;
        let publisher = client
            .get_connection_manager()
            .await
            .map_err(|e| BridgeError::Unavailable(e.to_string()))?;
        Ok(Self { client, publisher, policy })
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn publish(&self, channel: &Channel, payload: Arc<str>) -> Result<usize, BridgeError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, usize>(channel.to_string(), &*payload).await.map_err(|e| {
            BridgeError::Publish { channel: channel.to_string(), reason: e.to_string() }
        })
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BridgeError> {
        // First connection is made inline so the caller sees subscribe errors.
        let pubsub = open(&self.client, channels)
            .await
            .map_err(|e| BridgeError::Subscribe(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(pump(
            self.client.clone(),
            channels.to_vec(),
            pubsub,
            sender,
            cancel.clone(),
            self.policy,
        ));

        Ok(Subscription::new(channels.to_vec(), receiver, move || cancel.cancel()))
    }
}

async fn open(client: &Client, channels: &[Channel]) -> RedisResult<RedisPubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    for channel in channels {
        pubsub.subscribe(channel.to_string()).await?;
    }
    Ok(pubsub)
}

async fn pump(
    client: Client,
    channels: Vec<Channel>,
    mut pubsub: RedisPubSub,
    sender: mpsc::UnboundedSender<Delivery>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
) {
    loop {
        {
            let mut stream = pubsub.on_message();
            loop {
                let msg = tokio::select! {
                    () = cancel.cancelled() => return,
                    msg = stream.next() => msg,
                };
                let Some(msg) = msg else { break };

                let channel = match msg.get_channel_name().parse::<Channel>() {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(error = %e, "ignoring message on unrecognized channel");
                        continue;
                    },
                };
                let payload = match msg.get_payload::<String>() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(%channel, error = %e, "ignoring undecodable pub/sub payload");
                        continue;
                    },
                };

                if sender.send(Delivery { channel, payload: payload.into() }).is_err() {
                    return;
                }
            }
        }

        warn!(channels = channels.len(), "pub/sub connection lost, resubscribing");

        let mut backoff = policy.initial_backoff;
        pubsub = loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {},
            }
            match open(&client, &channels).await {
                Ok(pubsub) => break pubsub,
                Err(e) => {
                    debug!(error = %e, ?backoff, "resubscribe attempt failed");
                    backoff = policy.next(backoff);
                },
            }
        };
        info!(channels = channels.len(), "pub/sub resubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };

        let second = policy.next(policy.initial_backoff);
        let third = policy.next(second);
        let fourth = policy.next(third);

        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(third, Duration::from_millis(350));
        assert_eq!(fourth, Duration::from_millis(350));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy =
            ReconnectPolicy { initial_backoff: Duration::MAX, max_backoff: Duration::MAX };

        assert_eq!(policy.next(policy.initial_backoff), Duration::MAX);
        assert_eq!(policy.next(Duration::MAX / 2 + Duration::from_secs(1)), Duration::MAX);
    }
}
