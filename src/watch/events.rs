//! Change events and their delivery to subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: a full
//! queue drops the event with a warning and a closed queue is pruned.

use log::{debug, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::quota::QuotaInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// A normalized create/modify/delete/rename under the root.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub change_kind: ChangeKind,
    /// Destination of a rename; `None` for every other kind.
    pub new_path: Option<PathBuf>,
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    pub fn new(change_kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            change_kind,
            new_path: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            path: from.into(),
            change_kind: ChangeKind::Renamed,
            new_path: Some(to.into()),
            timestamp: SystemTime::now(),
        }
    }

    pub(crate) fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Same kind and paths, ignoring the timestamp.
    pub fn same_change(&self, other: &ChangeEvent) -> bool {
        self.change_kind == other.change_kind
            && self.path == other.path
            && self.new_path == other.new_path
    }
}

/// Events delivered to store subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    QuotaWarningRaised {
        current_usage: u64,
        quota_limit: u64,
        usage_percentage: f64,
    },
    FileSystemChanged(ChangeEvent),
}

impl StoreEvent {
    pub fn quota_warning(info: &QuotaInfo) -> Self {
        StoreEvent::QuotaWarningRaised {
            current_usage: info.current_usage_bytes,
            quota_limit: info.max_quota_bytes,
            usage_percentage: info.usage_percentage,
        }
    }
}

pub type SubscriberId = u64;

/// Receiving half handed to a subscriber.
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<StoreEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        self.receiver.try_recv().ok()
    }
}

pub struct EventBus {
    subscribers: Mutex<Vec<(SubscriberId, mpsc::Sender<StoreEvent>)>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.lock().push((id, tx));
        }
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Delivers to every live subscriber. Never fails.
    pub fn publish(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber {id} queue full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {id} went away");
                false
            }
        });
    }

    /// Drops every subscriber; their receivers see end-of-stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.lock().clear();
    }
}
