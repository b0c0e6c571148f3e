//! Per-topic live buffers and subscriptions.

use crate::buffer::{BufferItem, EventBuffer};
use crate::context::Context;
use crate::error::Result;
use crate::snapshot::{EventSnapshot, SnapFn};
use crate::types::{Event, SubscribeRequest, Topic};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Publisher configuration.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Max cached snapshots, keyed by topic and key.
    /// Default: 128
    pub snapshot_cache_size: usize,

    /// How long a snapshot may be handed to new subscribers (None = never).
    /// Default: 10s
    pub snapshot_cache_ttl: Option<Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            snapshot_cache_size: 128,
            snapshot_cache_ttl: Some(Duration::from_secs(10)),
        }
    }
}

struct CachedSnapshot {
    snapshot: Arc<EventSnapshot>,
    created: Instant,
}

/// Owns one live buffer per topic and hands out subscriptions.
pub struct EventPublisher {
    config: PublisherConfig,
    topics: RwLock<HashMap<Topic, Arc<EventBuffer>>>,
    snapshots: Mutex<LruCache<(Topic, String), CachedSnapshot>>,
}

impl EventPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        let cache_size = NonZeroUsize::new(config.snapshot_cache_size).unwrap_or(NonZeroUsize::MIN);

        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            snapshots: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Publish the events of one commit.
    ///
    /// Events are grouped by topic, keeping their relative order, and each
    /// group is appended to its topic buffer as a single batch.
    pub fn publish(&self, events: Vec<Event>) {
        let mut batches: Vec<(Topic, Vec<Event>)> = Vec::new();
        for event in events {
            match batches.iter_mut().find(|(topic, _)| *topic == event.topic) {
                Some((_, batch)) => batch.push(event),
                None => batches.push((event.topic, vec![event])),
            }
        }

        for (topic, batch) in batches {
            trace!(%topic, events = batch.len(), "publish");
            self.buffer(topic).append(batch);
        }

        // Expired snapshots keep relaying until dropped; don't wait for the
        // next subscribe to release them.
        self.evict_expired(&mut self.snapshots.lock());
    }

    /// Current position of a topic's live buffer.
    pub fn topic_head(&self, topic: Topic) -> Arc<BufferItem> {
        self.buffer(topic).head()
    }

    /// Subscribe to a topic.
    ///
    /// A fresh cached snapshot for the same topic and key is shared;
    /// otherwise the topic head is captured before `snap_fn` is started.
    pub fn subscribe<F: SnapFn>(&self, request: SubscribeRequest, snap_fn: F) -> Subscription {
        let key = (request.topic, request.key.clone());
        let mut cache = self.snapshots.lock();

        if self.config.snapshot_cache_ttl.is_some() {
            self.evict_expired(&mut cache);

            if let Some(cached) = cache.get(&key) {
                debug!(topic = %request.topic, key = %request.key, "reusing cached snapshot");
                return Subscription::new(request, Arc::clone(&cached.snapshot));
            }
        }

        let head = self.topic_head(request.topic);
        let snapshot = Arc::new(EventSnapshot::new(request.clone(), head, snap_fn));

        if self.config.snapshot_cache_ttl.is_some() {
            cache.put(
                key,
                CachedSnapshot {
                    snapshot: Arc::clone(&snapshot),
                    created: Instant::now(),
                },
            );
        }

        Subscription::new(request, snapshot)
    }

    /// Number of cached snapshots.
    pub fn cached_snapshots(&self) -> usize {
        self.snapshots.lock().len()
    }

    fn evict_expired(&self, cache: &mut LruCache<(Topic, String), CachedSnapshot>) {
        let Some(ttl) = self.config.snapshot_cache_ttl else {
            return;
        };
        let expired: Vec<_> = cache
            .iter()
            .filter(|(_, cached)| cached.created.elapsed() >= ttl)
            .map(|(stale, _)| stale.clone())
            .collect();
        for stale in expired {
            trace!(topic = %stale.0, key = %stale.1, "evicting expired snapshot");
            cache.pop(&stale);
        }
    }

    fn buffer(&self, topic: Topic) -> Arc<EventBuffer> {
        if let Some(buffer) = self.topics.read().get(&topic) {
            return Arc::clone(buffer);
        }
        let mut topics = self.topics.write();
        Arc::clone(topics.entry(topic).or_default())
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(PublisherConfig::default())
    }
}

/// A consumer's view of one snapshot-then-live stream.
pub struct Subscription {
    request: SubscribeRequest,
    snapshot: Arc<EventSnapshot>,
    cursor: Arc<BufferItem>,
}

impl Subscription {
    fn new(request: SubscribeRequest, snapshot: Arc<EventSnapshot>) -> Self {
        let cursor = snapshot.head();
        Self {
            request,
            snapshot,
            cursor,
        }
    }

    pub fn request(&self) -> &SubscribeRequest {
        &self.request
    }

    /// Wait for the next non-empty batch.
    ///
    /// On error the subscription stays where it was; a timed out or
    /// cancelled read can be retried.
    pub fn next(&mut self, ctx: &Context) -> Result<Vec<Event>> {
        loop {
            self.cursor = self.cursor.next(ctx)?;
            if !self.cursor.events().is_empty() {
                return Ok(self.cursor.events().to_vec());
            }
        }
    }

    /// Start over from the beginning of the snapshot.
    pub fn rewind(&mut self) {
        self.cursor = self.snapshot.head();
    }
}
