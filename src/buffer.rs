//! Append-only event buffer.
//!
//! The buffer is a singly linked chain of [`BufferItem`]s. Each item holds one
//! appended batch and a write-once link to its successor. The buffer itself
//! only tracks the tail; readers hold `Arc<BufferItem>` cursors and walk
//! forward independently. Items that no cursor references anymore are freed
//! by reference counting.
//!
//! Resolved links are read without locking. Only replacing the tail is
//! serialized, and every link carries a one-shot wake signal so any number of
//! readers blocked on the same item are released by a single append.

use crate::context::Context;
use crate::error::{Result, StreamError};
use crate::types::{Event, Index};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Write-once forward reference.
struct Link {
    next: OnceLock<Arc<BufferItem>>,
    /// Dropped (never sent on) once `next` is set, which disconnects `ready`.
    notify: Mutex<Option<Sender<()>>>,
    ready: Receiver<()>,
}

impl Link {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            next: OnceLock::new(),
            notify: Mutex::new(Some(tx)),
            ready: rx,
        }
    }

    /// Resolve the link. Returns false if it was already resolved.
    fn resolve(&self, item: Arc<BufferItem>) -> bool {
        if self.next.set(item).is_err() {
            return false;
        }
        self.notify.lock().take();
        true
    }
}

/// One batch of events plus the link to the next batch.
///
/// An `Arc<BufferItem>` is a cursor. Its events never change; only the link
/// is resolved, exactly once, by the append that follows it.
pub struct BufferItem {
    events: Arc<[Event]>,
    /// Terminal error. A buffer accepts no appends after an error item.
    err: Option<StreamError>,
    link: Link,
}

impl BufferItem {
    fn new(events: Arc<[Event]>, err: Option<StreamError>) -> Self {
        Self {
            events,
            err,
            link: Link::new(),
        }
    }

    /// Events in this batch. Empty for the initial head of a buffer.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn shared_events(&self) -> Arc<[Event]> {
        Arc::clone(&self.events)
    }

    /// Terminal error carried by this item, if any.
    pub(crate) fn error(&self) -> Option<&StreamError> {
        self.err.as_ref()
    }

    /// Index of the last event in the batch, or 0 for an empty batch.
    pub fn index(&self) -> Index {
        self.events.last().map(|e| e.index).unwrap_or(0)
    }

    /// Advance to the successor, blocking until it is appended.
    ///
    /// Returns immediately if the successor is already known. Fails with
    /// `Cancelled` or `DeadlineExceeded` if `ctx` expires first; the cursor is
    /// unchanged and the call can be retried. If the successor is a terminal
    /// error item, that error is returned on every call.
    pub fn next(&self, ctx: &Context) -> Result<Arc<BufferItem>> {
        self.wait(ctx)?.checked()
    }

    /// Advance without interpreting the successor.
    ///
    /// Only `ctx` can make this fail; a terminal error item is returned as
    /// an item so the caller can tell it apart from its own timeout.
    pub(crate) fn next_item(&self, ctx: &Context) -> Result<Arc<BufferItem>> {
        self.wait(ctx).map(Arc::clone)
    }

    fn wait(&self, ctx: &Context) -> Result<&Arc<BufferItem>> {
        let timer = ctx.timer();
        loop {
            if let Some(next) = self.link.next.get() {
                return Ok(next);
            }
            select! {
                recv(self.link.ready) -> _ => {}
                recv(ctx.done()) -> _ => return Err(StreamError::Cancelled),
                recv(timer) -> _ => return Err(StreamError::DeadlineExceeded),
            }
        }
    }

    /// Non-blocking advance. `Ok(None)` if nothing has been appended yet.
    pub fn try_next(&self) -> Result<Option<Arc<BufferItem>>> {
        match self.link.next.get() {
            Some(next) => next.checked().map(Some),
            None => Ok(None),
        }
    }

    fn checked(self: &Arc<Self>) -> Result<Arc<BufferItem>> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(Arc::clone(self)),
        }
    }
}

impl fmt::Debug for BufferItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferItem")
            .field("events", &self.events.len())
            .field("index", &self.index())
            .field("err", &self.err)
            .field("resolved", &self.link.next.get().is_some())
            .finish()
    }
}

impl Drop for BufferItem {
    // Unlink iteratively so dropping a long unreferenced chain cannot
    // overflow the stack.
    fn drop(&mut self) {
        let mut next = self.link.next.take();
        while let Some(item) = next {
            match Arc::try_unwrap(item) {
                Ok(mut item) => next = item.link.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Append-only, multi-reader event buffer.
pub struct EventBuffer {
    /// The last appended item. Its link is always unresolved.
    tail: Mutex<Arc<BufferItem>>,
}

impl EventBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            tail: Mutex::new(Arc::new(BufferItem::new(Arc::from(Vec::new()), None))),
        }
    }

    /// Capture the current position.
    ///
    /// The returned cursor never moves: advancing from it yields exactly the
    /// batches appended after this call. O(1) and never blocks.
    pub fn head(&self) -> Arc<BufferItem> {
        Arc::clone(&self.tail.lock())
    }

    /// Whether any cursor into this buffer is still held.
    ///
    /// Every live cursor keeps the chain from its position to the tail
    /// alive, so the tail has more than one owner exactly while a reader
    /// exists. Once this returns false it stays false.
    pub(crate) fn has_readers(&self) -> bool {
        Arc::strong_count(&self.tail.lock()) > 1
    }

    /// Append one batch and wake all readers waiting at the old tail.
    pub fn append(&self, events: Vec<Event>) {
        self.append_item(BufferItem::new(Arc::from(events), None));
    }

    /// Append a batch that is already shared with another buffer.
    pub(crate) fn append_shared(&self, events: Arc<[Event]>) {
        self.append_item(BufferItem::new(events, None));
    }

    /// Terminate the buffer with an error.
    ///
    /// Every reader that reaches this point receives `err`. Later appends
    /// are dropped.
    pub fn append_err(&self, err: StreamError) {
        self.append_item(BufferItem::new(Arc::from(Vec::new()), Some(err)));
    }

    fn append_item(&self, item: BufferItem) {
        let item = Arc::new(item);
        let mut tail = self.tail.lock();
        if let Some(err) = &tail.err {
            warn!(error = %err, "append to terminated buffer ignored");
            return;
        }
        let resolved = tail.link.resolve(Arc::clone(&item));
        debug_assert!(resolved, "buffer tail was already linked");
        *tail = item;
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuffer")
            .field("tail", &*self.tail.lock())
            .finish()
    }
}
