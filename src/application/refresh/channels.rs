//! Per-document fan-out of refresh status events.
//!
//! One `tokio::sync::broadcast` channel per document, created on first
//! subscription and kept for the life of the registry. Publishing never
//! creates a channel and never waits on receivers; a receiver that falls more
//! than `capacity` events behind skips the oldest ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use metrics::gauge;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::documents::{DocumentId, RefreshStatusEvent};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
const METRIC_REFRESH_LISTENERS: &str = "pinfall_refresh_listeners";

struct RefreshChannel {
    sender: broadcast::Sender<RefreshStatusEvent>,
    listeners: AtomicUsize,
}

/// Registry of refresh channels keyed by document.
///
/// Built once by the composition root and shared through `Arc`.
pub struct RefreshChannelRegistry {
    channels: DashMap<DocumentId, RefreshChannel>,
    capacity: usize,
}

impl RefreshChannelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join the channel for `document`, creating it if needed.
    ///
    /// The returned listener releases itself when dropped.
    pub fn subscribe(self: &Arc<Self>, document: &DocumentId) -> RefreshListener {
        let receiver = {
            let channel = self
                .channels
                .entry(document.clone())
                .or_insert_with(|| RefreshChannel {
                    sender: broadcast::channel(self.capacity).0,
                    listeners: AtomicUsize::new(0),
                });
            let receiver = channel.sender.subscribe();
            let listeners = channel.listeners.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(document = %document, listeners, "Refresh listener subscribed");
            receiver
        };
        gauge!(METRIC_REFRESH_LISTENERS).increment(1.0);

        RefreshListener {
            registry: Arc::clone(self),
            document: document.clone(),
            receiver,
        }
    }

    /// Deliver `event` to current subscribers. Returns how many received it.
    pub fn publish(&self, document: &DocumentId, event: RefreshStatusEvent) -> usize {
        let Some(channel) = self.channels.get(document) else {
            debug!(document = %document, status = %event.status, "No refresh channel, event dropped");
            return 0;
        };
        channel.sender.send(event).unwrap_or(0)
    }

    /// Record that one listener on `document` went away.
    pub fn release_listener(&self, document: &DocumentId) {
        let Some(channel) = self.channels.get(document) else {
            return;
        };
        let released = channel
            .listeners
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        if released {
            gauge!(METRIC_REFRESH_LISTENERS).decrement(1.0);
            debug!(document = %document, "Refresh listener released");
        }
    }

    pub fn listener_count(&self, document: &DocumentId) -> usize {
        self.channels
            .get(document)
            .map(|channel| channel.listeners.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn has_channel(&self, document: &DocumentId) -> bool {
        self.channels.contains_key(document)
    }
}

impl Default for RefreshChannelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// A live subscription to one document's refresh events.
pub struct RefreshListener {
    registry: Arc<RefreshChannelRegistry>,
    document: DocumentId,
    receiver: broadcast::Receiver<RefreshStatusEvent>,
}

impl RefreshListener {
    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub async fn recv(&mut self) -> Result<RefreshStatusEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<RefreshStatusEvent, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for RefreshListener {
    fn drop(&mut self) {
        self.registry.release_listener(&self.document);
    }
}
