//! Fan-out mechanism that streams [`ProgressFrame`]s to any number of
//! subscribers per `task_id` (§4.3). Built directly on
//! `tokio::sync::broadcast`: each subscriber gets its own receiver cursor,
//! so a slow subscriber lags independently rather than blocking the
//! publisher — `tokio::sync::broadcast::Receiver::recv` surfaces a lag as
//! `RecvError::Lagged(n)`, which callers treat as "skip ahead", matching
//! the "drop the oldest non-terminal frames on overflow" requirement.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::domain::ProgressFrame;

const CHANNEL_CAPACITY: usize = 256;

pub struct Broadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<ProgressFrame>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channel_for(&self, task_id: &str) -> broadcast::Sender<ProgressFrame> {
        let mut channels = self.channels.lock().expect("broadcaster lock poisoned");
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes a frame to every current subscriber of `task_id`. A
    /// publish with no subscribers is a no-op (the broadcast channel's send
    /// error in that case carries no information callers need).
    pub fn publish(&self, task_id: &str, frame: ProgressFrame) {
        let _ = self.channel_for(task_id).send(frame);
    }

    /// Returns a fresh receiver attached to `task_id`'s channel. The caller
    /// (the Task Registry) is responsible for emitting the attach-time
    /// `connection` + `progress`/`waiting` frames before forwarding frames
    /// read from this receiver, since only the registry knows whether the
    /// task currently exists.
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<ProgressFrame> {
        self.channel_for(task_id).subscribe()
    }

    /// Drops the channel for `task_id` once its terminal frame has been
    /// published and the eviction grace period has elapsed. Any receiver
    /// still attached simply observes the sender being dropped as a closed
    /// stream on its next `recv`.
    pub fn remove(&self, task_id: &str) {
        self.channels.lock().expect("broadcaster lock poisoned").remove(task_id);
    }
}
