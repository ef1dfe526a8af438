//! Bounded resource pool with lazy creation
//!
//! Items are created on demand by a [`ResourceFactory`] until `max_size` items
//! exist. After that, callers either get `None` (non-blocking) or wait on the
//! return queue until another holder releases an item or the pool is disposed.

use crossbeam_channel::{select, Receiver, Sender};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by [`ResourcePool`] acquisition
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was disposed while (or before) a blocking acquire was waiting
    #[error("resource pool was disposed while waiting for an item")]
    Cancelled,
    /// Non-blocking acquire on a disposed pool
    #[error("resource pool has been disposed")]
    Disposed,
    /// The factory failed to create a new item
    #[error("failed to create pooled resource: {0}")]
    Create(#[source] anyhow::Error),
}

type SyncFactory<T> = Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>;
type AsyncFactory<T> = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type BeforeReturn<T> = Box<dyn Fn(&mut T) -> anyhow::Result<()> + Send + Sync>;

/// Creation strategy, chosen once when the pool is built
pub enum ResourceFactory<T> {
    /// Items are created synchronously on the acquiring thread
    Sync(SyncFactory<T>),
    /// Items are created by a future, driven to completion on the acquiring thread
    Async(AsyncFactory<T>),
}

impl<T> ResourceFactory<T> {
    /// Build a synchronous factory
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// Build an asynchronous factory
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Async(Box::new(move || -> BoxFuture<'static, anyhow::Result<T>> {
            Box::pin(f())
        }))
    }

    fn create(&self) -> anyhow::Result<T> {
        match self {
            Self::Sync(f) => f(),
            Self::Async(f) => pollster::block_on(f()),
        }
    }
}

/// Bounded pool of reusable resources
pub struct ResourcePool<T> {
    max_size: usize,
    factory: ResourceFactory<T>,
    /// Number of live items; the lock also serializes creation
    created: Mutex<usize>,
    returned_tx: Sender<T>,
    returned_rx: Receiver<T>,
    /// One token per discarded item while someone waits, so waiters retry
    /// creation
    freed_tx: Sender<()>,
    freed_rx: Receiver<()>,
    waiters: AtomicUsize,
    /// Dropping the sender wakes every blocked waiter
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
    disposed: AtomicBool,
    before_return: Option<BeforeReturn<T>>,
}

impl<T> ResourcePool<T> {
    /// Create a pool holding at most `max_size` live items
    pub fn new(max_size: usize, factory: ResourceFactory<T>) -> Self {
        let (returned_tx, returned_rx) = crossbeam_channel::unbounded();
        let (freed_tx, freed_rx) = crossbeam_channel::unbounded();
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(0);
        Self {
            max_size: max_size.max(1),
            factory,
            created: Mutex::new(0),
            returned_tx,
            returned_rx,
            freed_tx,
            freed_rx,
            waiters: AtomicUsize::new(0),
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx,
            disposed: AtomicBool::new(false),
            before_return: None,
        }
    }

    /// Register a callback run on every item returned through a [`PooledItem`]
    ///
    /// If the callback fails the item is discarded and its capacity slot freed.
    pub fn with_before_return<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_return = Some(Box::new(f));
        self
    }

    /// Maximum number of live items
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of items created so far (and not discarded)
    pub fn created(&self) -> usize {
        *self.created.lock()
    }

    /// Number of items currently sitting in the return queue
    pub fn available(&self) -> usize {
        self.returned_rx.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Acquire an item, waiting for a release when the pool is at capacity
    pub fn acquire(&self) -> Result<T, PoolError> {
        match self.acquire_inner(true)? {
            Some(item) => Ok(item),
            None => Err(PoolError::Cancelled),
        }
    }

    /// Acquire an item without waiting; `Ok(None)` when the pool is at capacity
    pub fn try_acquire(&self) -> Result<Option<T>, PoolError> {
        self.acquire_inner(false)
    }

    fn acquire_inner(&self, blocking: bool) -> Result<Option<T>, PoolError> {
        if self.is_disposed() {
            return Err(if blocking {
                PoolError::Cancelled
            } else {
                PoolError::Disposed
            });
        }

        if let Ok(item) = self.returned_rx.try_recv() {
            return Ok(Some(item));
        }

        if let Some(item) = self.try_create()? {
            return Ok(Some(item));
        }

        if !blocking {
            return Ok(None);
        }

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = self.wait_for_item();
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result.map(Some)
    }

    fn wait_for_item(&self) -> Result<T, PoolError> {
        // A discard between the first attempt and registering as a waiter
        // sent no token
        if let Some(item) = self.try_create()? {
            return Ok(item);
        }

        loop {
            select! {
                recv(self.returned_rx) -> item => return match item {
                    Ok(item) if !self.is_disposed() => Ok(item),
                    _ => Err(PoolError::Cancelled),
                },
                recv(self.freed_rx) -> _ => {
                    if self.is_disposed() {
                        return Err(PoolError::Cancelled);
                    }
                    if let Some(item) = self.try_create()? {
                        return Ok(item);
                    }
                }
                recv(self.cancel_rx) -> _ => return Err(PoolError::Cancelled),
            }
        }
    }

    fn try_create(&self) -> Result<Option<T>, PoolError> {
        let mut created = self.created.lock();
        if *created >= self.max_size {
            return Ok(None);
        }

        let item = self.factory.create().map_err(PoolError::Create)?;
        *created += 1;
        debug!(created = *created, max = self.max_size, "pool created resource");
        Ok(Some(item))
    }

    /// Return an item to the pool; dropped instead if the pool is disposed
    pub fn release(&self, item: T) {
        if self.is_disposed() {
            return;
        }
        // The pool owns the receiver, so this cannot fail while `self` is alive
        let _ = self.returned_tx.send(item);
    }

    /// Forget an item that will never come back, freeing its capacity slot
    pub fn discard(&self, item: T) {
        drop(item);
        {
            let mut created = self.created.lock();
            *created = created.saturating_sub(1);
        }
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _ = self.freed_tx.send(());
        }
    }

    fn return_scoped(&self, mut item: T) {
        if let Some(before_return) = &self.before_return {
            if let Err(e) = before_return(&mut item) {
                warn!("discarding pooled resource: {:#}", e);
                self.discard(item);
                return;
            }
        }
        self.release(item);
    }

    /// Dispose the pool, cancelling every blocked waiter
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_tx.lock().take();
        while self.returned_rx.try_recv().is_ok() {}
        debug!("resource pool disposed");
    }
}

impl<T> ResourcePool<T> {
    /// Acquire an item that returns itself to the pool when dropped
    pub fn acquire_scoped(self: &Arc<Self>) -> Result<PooledItem<T>, PoolError> {
        let item = self.acquire()?;
        Ok(PooledItem::new(Arc::clone(self), item))
    }

    /// Non-blocking variant of [`ResourcePool::acquire_scoped`]
    pub fn try_acquire_scoped(self: &Arc<Self>) -> Result<Option<PooledItem<T>>, PoolError> {
        Ok(self
            .try_acquire()?
            .map(|item| PooledItem::new(Arc::clone(self), item)))
    }
}

impl<T> Drop for ResourcePool<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Scope-bound handle to a pooled item
///
/// The item goes back to its pool exactly once, either on [`PooledItem::release`]
/// or on drop.
pub struct PooledItem<T> {
    pool: Arc<ResourcePool<T>>,
    item: Option<T>,
}

impl<T> PooledItem<T> {
    fn new(pool: Arc<ResourcePool<T>>, item: T) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    /// Return the item to the pool now
    pub fn release(mut self) {
        self.return_to_pool();
    }

    /// Drop the item instead of returning it, freeing its capacity slot
    pub fn discard(mut self) {
        if let Some(item) = self.item.take() {
            self.pool.discard(item);
        }
    }

    fn return_to_pool(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.return_scoped(item);
        }
    }
}

impl<T> Deref for PooledItem<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `None` after release/discard, both of which consume `self`
        self.item.as_ref().expect("pooled item already returned")
    }
}

impl<T> DerefMut for PooledItem<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item already returned")
    }
}

impl<T> Drop for PooledItem<T> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}
