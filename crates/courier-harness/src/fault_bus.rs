//! Pub/sub wrappers for observing and breaking fan-out.

#![allow(clippy::disallowed_types, reason = "short critical sections, never held across await")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use courier_proto::{Channel, Message};
use courier_server::{LocalBus, PubSub, Subscription, bridge::BridgeError};

/// A [`LocalBus`] that remembers every publish.
#[derive(Clone, Default)]
pub struct RecordingBus {
    inner: LocalBus,
    published: Arc<Mutex<Vec<(Channel, Arc<str>)>>>,
}

impl RecordingBus {
    /// Wrap a fresh local bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(channel, payload)` published so far, in order.
    pub fn published(&self) -> Vec<(Channel, Arc<str>)> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Channels published to so far, in order.
    pub fn channels(&self) -> Vec<Channel> {
        self.published().into_iter().map(|(channel, _)| channel).collect()
    }

    /// Published payloads decoded as messages. Undecodable payloads are
    /// skipped.
    pub fn messages(&self) -> Vec<Message> {
        self.published().iter().filter_map(|(_, payload)| Message::decode(payload).ok()).collect()
    }

    /// Number of publishes.
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl PubSub for RecordingBus {
    async fn publish(&self, channel: &Channel, payload: Arc<str>) -> Result<usize, BridgeError> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel.clone(), Arc::clone(&payload)));
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BridgeError> {
        self.inner.subscribe(channels).await
    }
}

/// A [`LocalBus`] whose publishes or subscribes can be made to fail.
#[derive(Clone, Default)]
pub struct FailingBus {
    inner: LocalBus,
    fail_publish: Arc<AtomicBool>,
    fail_subscribe: Arc<AtomicBool>,
}

impl FailingBus {
    /// Healthy until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later publish fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::Release);
    }

    /// Make every later subscribe fail (or succeed again).
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl PubSub for FailingBus {
    async fn publish(&self, channel: &Channel, payload: Arc<str>) -> Result<usize, BridgeError> {
        if self.fail_publish.load(Ordering::Acquire) {
            return Err(BridgeError::Publish {
                channel: channel.to_string(),
                reason: "injected publish failure".to_string(),
            });
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BridgeError> {
        if self.fail_subscribe.load(Ordering::Acquire) {
            return Err(BridgeError::Subscribe("injected subscribe failure".to_string()));
        }
        self.inner.subscribe(channels).await
    }
}

#[cfg(test)]
mod tests {
    use courier_proto::UserId;

    use super::*;

    #[tokio::test]
    async fn recording_bus_records_and_delivers() {
        let bus = RecordingBus::new();
        let channel = Channel::User(UserId::new("u1"));
        let mut subscription = bus.subscribe(std::slice::from_ref(&channel)).await.unwrap();

        let delivered = bus.publish(&channel, Arc::from("payload")).await.unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(bus.channels(), vec![channel]);
        assert_eq!(&*subscription.recv().await.unwrap().payload, "payload");
    }

    #[tokio::test]
    async fn failing_bus_can_recover() {
        let bus = FailingBus::new();
        bus.set_fail_publish(true);
        assert!(bus.publish(&Channel::Broadcast, Arc::from("x")).await.is_err());

        bus.set_fail_publish(false);
        assert_eq!(bus.publish(&Channel::Broadcast, Arc::from("x")).await.unwrap(), 0);

        bus.set_fail_subscribe(true);
        assert!(matches!(
            bus.subscribe(&[Channel::Broadcast]).await,
            Err(BridgeError::Subscribe(_))
        ));
    }
}
