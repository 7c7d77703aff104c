//! In-process message bus for coordinator/agent traffic.
//!
//! Channels are created on first use and named by [`Channel`]: one per
//! agent, one per task, plus a broadcast channel. Each channel keeps its
//! full message log (for late-subscriber replay) and a set of subscribers
//! backed by bounded mpsc queues.
//!
//! Delivery guarantees:
//! - per-channel FIFO: the channel lock is held across the whole fan-out,
//!   so no subscriber ever observes two messages reordered;
//! - no loss under pressure: a full subscriber queue blocks the publisher
//!   (backpressure) instead of dropping;
//! - a dropped receiver is pruned on the next publish.

mod message;
mod mirror;

pub use message::{Channel, Message, MessageType};
pub use mirror::MirrorWriter;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Default)]
struct ChannelState {
    log: Vec<Message>,
    subscribers: Vec<mpsc::Sender<Message>>,
}

/// Multi-channel pub/sub bus.
#[derive(Debug)]
pub struct MessageBus {
    channels: RwLock<HashMap<String, Arc<Mutex<ChannelState>>>>,
    capacity: usize,
    mirror: Option<MirrorWriter>,
}

impl MessageBus {
    /// Create a bus with the given per-subscriber queue capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            mirror: None,
        }
    }

    /// Attach a markdown mirror; every published message is also appended
    /// there.
    pub fn with_mirror(mut self, mirror: MirrorWriter) -> Self {
        self.mirror = Some(mirror);
        self
    }

    fn channel_state(&self, channel: &Channel) -> Arc<Mutex<ChannelState>> {
        let key = channel.to_string();
        if let Some(state) = self.channels.read().get(&key) {
            return Arc::clone(state);
        }
        let mut channels = self.channels.write();
        Arc::clone(channels.entry(key).or_default())
    }

    /// Publish a message to a channel.
    ///
    /// Blocks (asynchronously) while any subscriber's queue is full. The
    /// mirror write failing is logged, never fatal: losing a line of the
    /// human-readable export must not stall coordination.
    pub async fn publish(&self, channel: Channel, message: Message) {
        let state = self.channel_state(&channel);
        let mut state = state.lock().await;

        if let Some(mirror) = &self.mirror
            && let Err(e) = mirror.append(&channel.to_string(), &message)
        {
            tracing::warn!(channel = %channel, error = %e, "message mirror write failed");
        }

        state.log.push(message.clone());

        // Fan out under the channel lock to keep per-channel FIFO order.
        let mut open = Vec::with_capacity(state.subscribers.len());
        for sender in state.subscribers.drain(..) {
            if sender.send(message.clone()).await.is_ok() {
                open.push(sender);
            }
        }
        state.subscribers = open;
    }

    /// Subscribe to a channel.
    ///
    /// Only messages published after this call are delivered; use
    /// [`MessageBus::replay`] to catch up on history first.
    pub async fn subscribe(&self, channel: Channel) -> mpsc::Receiver<Message> {
        let state = self.channel_state(&channel);
        let (tx, rx) = mpsc::channel(self.capacity);
        state.lock().await.subscribers.push(tx);
        rx
    }

    /// Messages published to a channel after `since` (all of them when
    /// `since` is `None`), in publication order.
    pub async fn replay(
        &self,
        channel: Channel,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Message> {
        let state = self.channel_state(&channel);
        let state = state.lock().await;
        state
            .log
            .iter()
            .filter(|msg| since.is_none_or(|cutoff| msg.ts > cutoff))
            .cloned()
            .collect()
    }

    /// Number of messages ever published to a channel.
    pub async fn channel_len(&self, channel: Channel) -> usize {
        let state = self.channel_state(&channel);
        state.lock().await.log.len()
    }
}
