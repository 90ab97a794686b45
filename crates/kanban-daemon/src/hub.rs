//! Fanout of outbound frames to every live subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One serialized outbound message, shared by every subscriber it goes to.
pub type Frame = Arc<str>;

pub type SubscriberId = u64;

/// Sending half of one subscriber's bounded queue.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    tx: mpsc::Sender<Frame>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Tracks live subscriber queues and pushes frames to all of them.
///
/// `broadcast` never awaits a subscriber: it copies the current handle list,
/// releases the lock, and `try_send`s to each queue. A queue that is closed
/// (receiver gone) or full (subscriber not keeping up) is removed. The
/// subscriber observes the removal as the end of its queue and can rejoin
/// with a fresh snapshot.
pub struct FanoutHub {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Frame>>>,
}

impl FanoutHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh subscriber queue. The handle is not live until
    /// [`register`](Self::register)ed.
    pub fn handle(&self) -> (SubscriberHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (SubscriberHandle { id, tx }, rx)
    }

    pub fn register(&self, handle: SubscriberHandle) {
        self.lock().insert(handle.id, handle.tx);
        tracing::debug!(subscriber = handle.id, "hub: subscriber registered");
    }

    /// Queue `first` on a handle that is not yet live, then register it.
    /// No broadcast can reach the queue before `first` does. Returns `false`
    /// (and leaves the handle unregistered) if `first` was not accepted.
    pub fn register_with_first(&self, handle: SubscriberHandle, first: Frame) -> bool {
        if !self.offer(handle.id, &handle.tx, first) {
            return false;
        }
        self.register(handle);
        true
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "hub: subscriber unregistered");
        }
        removed
    }

    /// Push `frame` to every registered subscriber. Returns how many queues
    /// accepted it.
    pub fn broadcast(&self, frame: Frame) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<Frame>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in &targets {
            if self.offer(*id, tx, Arc::clone(&frame)) {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.lock();
            for id in dead {
                subscribers.remove(&id);
            }
        }
        delivered
    }

    /// Push `frame` to one subscriber, with the same failure policy as
    /// [`broadcast`](Self::broadcast).
    pub fn send_to(&self, id: SubscriberId, frame: Frame) -> bool {
        let Some(tx) = self.lock().get(&id).cloned() else {
            return false;
        };
        let ok = self.offer(id, &tx, frame);
        if !ok {
            self.lock().remove(&id);
        }
        ok
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn offer(&self, id: SubscriberId, tx: &mpsc::Sender<Frame>, frame: Frame) -> bool {
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    subscriber = id,
                    capacity = self.capacity,
                    "hub: subscriber queue full, dropping subscriber"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = id, "hub: subscriber gone, dropping");
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Frame>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
