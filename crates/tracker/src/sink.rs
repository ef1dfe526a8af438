//! Ordered fan-out of committed event batches
//!
//! Producers push batches into a bounded queue. One consumer thread drains
//! every queued batch per wake-up, concatenates them and hands the result to
//! each listener in registration order. Listener failures are logged and never
//! stop the loop.

use crossbeam_channel::{Receiver, Sender};
use fstrack_core::{EventsConfig, FileEvent};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Event sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink is closed")]
    Closed,
    #[error("failed to start event consumer: {0}")]
    Spawn(#[from] std::io::Error),
}

type SyncListener = Arc<dyn Fn(&[FileEvent]) -> anyhow::Result<()> + Send + Sync>;
type AsyncListener =
    Arc<dyn Fn(Arc<[FileEvent]>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Sync(SyncListener),
    Async(AsyncListener),
}

struct Shared {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    /// Batches emitted but not yet dispatched
    pending: AtomicUsize,
}

impl Shared {
    fn dispatch(&self, events: Vec<FileEvent>) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        let events: Arc<[FileEvent]> = events.into();

        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &listener {
                Listener::Sync(f) => f(&events),
                Listener::Async(f) => pollster::block_on(f(Arc::clone(&events))),
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("event listener failed: {:#}", e),
                Err(_) => warn!("event listener panicked"),
            }
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.write().retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Bounded, single-consumer event queue
pub struct EventSink {
    shared: Arc<Shared>,
    sender: RwLock<Option<Sender<Vec<FileEvent>>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl EventSink {
    /// Start a sink and its consumer thread
    pub fn new(config: &EventsConfig) -> Result<Self, SinkError> {
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
        });

        let consumer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("fstrack-events".to_string())
                .spawn(move || run_consumer(receiver, shared))?
        };
        info!(capacity = config.queue_capacity, "event sink started");

        Ok(Self {
            shared,
            sender: RwLock::new(Some(sender)),
            consumer: Mutex::new(Some(consumer)),
            poll_interval: config.poll_interval(),
        })
    }

    /// Queue a batch; blocks only while the queue is full
    pub fn emit(&self, events: Vec<FileEvent>) -> Result<(), SinkError> {
        let sender = self.sender.read();
        let sender = sender.as_ref().ok_or(SinkError::Closed)?;

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(events).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    /// Register a listener called on the consumer thread
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[FileEvent]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Listener::Sync(Arc::new(listener)))
    }

    /// Register an asynchronous listener, awaited on the consumer thread
    pub fn subscribe_async<F, Fut>(&self, listener: F) -> Subscription
    where
        F: Fn(Arc<[FileEvent]>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Listener::Async(Arc::new(
            move |events| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(listener(events)) },
        )))
    }

    fn register(&self, listener: Listener) -> Subscription {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.shared.listeners.write().push((id, listener));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    /// Wait until every emitted batch has been dispatched
    ///
    /// Polls; meant for tests and shutdown, not as a barrier between producers.
    pub fn wait_complete(&self) {
        while self.shared.pending.load(Ordering::SeqCst) > 0 {
            if self.consumer.lock().as_ref().map_or(true, |h| h.is_finished()) {
                break;
            }
            thread::sleep(self.poll_interval);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Close the queue and wait for the consumer to drain it and exit
    pub fn shutdown(&self) {
        if self.sender.write().take().is_none() {
            return;
        }
        if let Some(handle) = self.consumer.lock().take() {
            if handle.join().is_err() {
                warn!("event consumer thread panicked");
            }
        }
        info!("event sink stopped");
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_consumer(receiver: Receiver<Vec<FileEvent>>, shared: Arc<Shared>) {
    while let Ok(first) = receiver.recv() {
        let mut batches = 1;
        let mut events = first;
        while let Ok(more) = receiver.try_recv() {
            events.extend(more);
            batches += 1;
        }

        if !events.is_empty() {
            debug!(events = events.len(), batches, "dispatching events");
            shared.dispatch(events);
        }
        shared.pending.fetch_sub(batches, Ordering::SeqCst);
    }
}

/// Listener registration; dropping it unsubscribes
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    /// Detach the listener now
    ///
    /// Consumes the subscription; removal happens in its `Drop` impl, same as
    /// letting it go out of scope. A batch already being dispatched may still
    /// reach the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}
