//! Snapshot splicing.
//!
//! An [`EventSnapshot`] joins a point-in-time snapshot with the live updates
//! that race it. A background thread runs the snapshot function into a
//! private buffer, appends an end-of-snapshot marker, then relays every live
//! event whose index is above the snapshot index. Live events at or below the
//! snapshot index are already reflected in the snapshot and are dropped, no
//! matter when they were physically appended.

use crate::buffer::{BufferItem, EventBuffer};
use crate::context::Context;
use crate::error::{Result, SnapshotError, StreamError};
use crate::types::{Event, Index, SubscribeRequest};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Populates a buffer with the current state and returns the index that
/// state was captured at.
///
/// Implementations only append to the buffer; they must not read it.
pub trait SnapFn:
    Fn(&SubscribeRequest, &EventBuffer) -> std::result::Result<Index, SnapshotError>
    + Send
    + 'static
{
}

impl<T> SnapFn for T where
    T: Fn(&SubscribeRequest, &EventBuffer) -> std::result::Result<Index, SnapshotError>
        + Send
        + 'static
{
}

/// How often an idle relay checks whether anyone still reads its output.
const READER_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// One subscription's snapshot followed by its live updates.
///
/// Reading from [`head`](Self::head) yields the snapshot batches, a single
/// `EndOfSnapshot` marker carrying the snapshot index, then live batches.
/// The relay thread keeps running while the `EventSnapshot` or any cursor
/// taken from it is alive, and exits once none is left.
pub struct EventSnapshot {
    snap: Arc<BufferItem>,
}

impl EventSnapshot {
    /// Start a snapshot.
    ///
    /// `live` must be captured from the topic buffer no later than the moment
    /// `snap_fn` starts reading state, otherwise updates can be missed.
    pub fn new<F: SnapFn>(request: SubscribeRequest, live: Arc<BufferItem>, snap_fn: F) -> Self {
        let buffer = Arc::new(EventBuffer::new());
        let snap = buffer.head();

        let task = Splice {
            request,
            buffer: Arc::clone(&buffer),
        };
        let spawned = thread::Builder::new()
            .name("event-snapshot".to_string())
            .spawn(move || task.run(live, snap_fn));
        if let Err(e) = spawned {
            error!(error = %e, "failed to start snapshot thread");
            buffer.append_err(StreamError::SnapshotFailed(e.to_string()));
        }

        Self { snap }
    }

    /// Cursor positioned before the first snapshot batch.
    pub fn head(&self) -> Arc<BufferItem> {
        Arc::clone(&self.snap)
    }
}

struct Splice {
    request: SubscribeRequest,
    buffer: Arc<EventBuffer>,
}

impl Splice {
    fn run<F: SnapFn>(self, live: Arc<BufferItem>, snap_fn: F) {
        let topic = self.request.topic;
        let start = self.buffer.head();
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| snap_fn(&self.request, &*self.buffer)));
        let snap_index = match result {
            Ok(Ok(index)) => index,
            Ok(Err(e)) => {
                warn!(%topic, error = %e, "snapshot failed");
                let err = StreamError::SnapshotFailed(e.to_string());
                self.buffer.append_err(err);
                return;
            }
            Err(_) => {
                error!(%topic, "snapshot function panicked");
                let err = StreamError::SnapshotFailed("snapshot function panicked".to_string());
                self.buffer.append_err(err);
                return;
            }
        };
        drop(snap_fn);

        if let Err(err) = self.check_snapshot(start, snap_index) {
            self.buffer.append_err(err);
            return;
        }

        let marker = Event::end_of_snapshot(topic, snap_index);
        self.buffer.append(vec![marker]);
        debug!(%topic, index = snap_index, "snapshot complete");

        match self.relay(live, snap_index) {
            Ok(()) => debug!(%topic, "no readers left, relay stopped"),
            Err(err) => self.buffer.append_err(err),
        }
    }

    /// Every snapshot event must be at or below the snapshot index.
    ///
    /// Walks what the snapshot function appended after `start`. Only this
    /// thread writes the buffer, so the walk ends at the current tail.
    fn check_snapshot(&self, start: Arc<BufferItem>, snap_index: Index) -> Result<()> {
        let mut cursor = start;
        while let Some(next) = cursor.try_next()? {
            cursor = next;
            if let Some(event) = cursor.events().iter().find(|e| e.index > snap_index) {
                error!(
                    topic = %self.request.topic,
                    snapshot = snap_index,
                    got = event.index,
                    "snapshot event newer than snapshot index"
                );
                return Err(StreamError::IndexAfterSnapshot {
                    snapshot: snap_index,
                    got: event.index,
                });
            }
        }
        Ok(())
    }

    /// Forward live events newer than `snap_index` while anyone reads.
    ///
    /// Takes the capture cursor by value so items behind it are released as
    /// the walk moves on. Returns `Ok` once no reader is left and `Err` with
    /// the error that should terminate the spliced stream otherwise.
    fn relay(&self, live: Arc<BufferItem>, snap_index: Index) -> Result<()> {
        let mut cursor = live;
        let mut last_seen: Option<Index> = None;

        loop {
            if !self.buffer.has_readers() {
                return Ok(());
            }
            let ctx = Context::with_timeout(READER_CHECK_INTERVAL);
            cursor = match cursor.next_item(&ctx) {
                Ok(item) => item,
                Err(StreamError::DeadlineExceeded) => continue,
                Err(err) => return Err(err),
            };
            if let Some(err) = cursor.error() {
                return Err(err.clone());
            }
            let events = cursor.events();

            for event in events {
                if let Some(previous) = last_seen {
                    if event.index < previous {
                        error!(
                            topic = %self.request.topic,
                            previous,
                            got = event.index,
                            "live index went backwards"
                        );
                        return Err(StreamError::IndexRegression {
                            previous,
                            got: event.index,
                        });
                    }
                }
                last_seen = Some(event.index);
            }

            let fresh = events.iter().filter(|e| e.index > snap_index).count();
            if fresh == 0 {
                continue;
            }
            if fresh == events.len() {
                self.buffer.append_shared(cursor.shared_events());
            } else {
                self.buffer.append(
                    events
                        .iter()
                        .filter(|e| e.index > snap_index)
                        .cloned()
                        .collect(),
                );
            }
        }
    }
}
