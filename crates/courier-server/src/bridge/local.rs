use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use courier_proto::Channel;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{BridgeError, Delivery, PubSub, Subscription};

/// In-process bus.
///
/// Stands in for Redis when every session lives in one process, and lets the
/// harness run several routers against one shared bus. Clones share state.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<LocalBusInner>,
}

#[derive(Default)]
struct LocalBusInner {
    channels: DashMap<Channel, Vec<Subscriber>>,
    next_id: AtomicU64,
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.inner.channels.get(channel).map_or(0, |subs| subs.len())
    }
}

impl LocalBusInner {
    fn release(&self, id: u64, channels: &[Channel]) {
        for channel in channels {
            if let Some(mut subs) = self.channels.get_mut(channel) {
                subs.retain(|s| s.id != id);
            }
            self.channels.remove_if(channel, |_, subs| subs.is_empty());
        }
    }
}

#[async_trait]
impl PubSub for LocalBus {
    async fn publish(&self, channel: &Channel, payload: Arc<str>) -> Result<usize, BridgeError> {
        let Some(mut subs) = self.inner.channels.get_mut(channel) else {
            return Ok(0);
        };

        subs.retain(|s| {
            let delivery = Delivery { channel: channel.clone(), payload: Arc::clone(&payload) };
            s.sender.send(delivery).is_ok()
        });
        Ok(subs.len())
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BridgeError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut unique = channels.to_vec();
        unique.sort();
        unique.dedup();

        for channel in &unique {
            self.inner
                .channels
                .entry(channel.clone())
                .or_default()
                .push(Subscriber { id, sender: sender.clone() });
        }

        let weak: Weak<LocalBusInner> = Arc::downgrade(&self.inner);
        let held = unique.clone();
        Ok(Subscription::new(unique, receiver, move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(id, &held);
            }
        }))
    }
}
