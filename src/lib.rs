//! # Catalog Stream
//!
//! Event streaming core for a service catalog: consumers receive a
//! consistent snapshot of current state followed by every later change, with
//! no gaps and no duplicates, even though the snapshot is computed while
//! writes continue.
//!
//! ## Core Concepts
//!
//! - **EventBuffer**: Append-only chain of event batches with any number of
//!   independent readers
//! - **BufferItem**: A cursor; advancing blocks until the next batch exists
//!   or the [`Context`] expires
//! - **EventSnapshot**: Runs a snapshot function in the background and
//!   splices in live events newer than the snapshot index
//! - **EventPublisher**: One live buffer per topic, plus cached snapshots
//!
//! ## Example
//!
//! ```ignore
//! use catalog_stream::{Context, EventPublisher, SubscribeRequest, Topic};
//!
//! let publisher = EventPublisher::default();
//! let mut sub = publisher.subscribe(
//!     SubscribeRequest::new(Topic::ServiceHealth, "web"),
//!     |req, buf| {
//!         buf.append(current_state(req));
//!         Ok(current_index())
//!     },
//! );
//!
//! loop {
//!     let batch = sub.next(&Context::with_timeout(Duration::from_secs(30)))?;
//!     for event in batch {
//!         if event.is_end_of_snapshot() {
//!             println!("now live");
//!         }
//!     }
//! }
//! ```

pub mod buffer;
pub mod context;
pub mod error;
pub mod publisher;
pub mod snapshot;
pub mod types;

// Re-exports
pub use buffer::{BufferItem, EventBuffer};
pub use context::{CancelHandle, Context};
pub use error::{Result, SnapshotError, StreamError};
pub use publisher::{EventPublisher, PublisherConfig, Subscription};
pub use snapshot::{EventSnapshot, SnapFn};
pub use types::*;
