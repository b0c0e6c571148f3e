//! Property tests: spliced output depends only on indexes, never on when
//! live events were appended relative to the snapshot.

use catalog_stream::{
    Context, Event, EventBuffer, EventSnapshot, Index, Payload, SnapshotError, SubscribeRequest,
    Topic,
};
use proptest::prelude::*;
use std::time::Duration;

const SNAP_INDEX: Index = 1000;

/// Events carry their position in the key so output can be compared exactly.
fn event(index: Index, tag: &str) -> Event {
    Event::new(Topic::ServiceHealth, tag, index, Payload::EndOfSnapshot)
}

/// Read batches until `count` events (marker included) have been seen.
fn drain(es: &EventSnapshot, count: usize) -> Vec<Event> {
    let ctx = Context::with_timeout(Duration::from_secs(5));
    let mut cursor = es.head();
    let mut out = Vec::new();
    while out.len() < count {
        cursor = cursor.next(&ctx).expect("stream stalled");
        out.extend(cursor.events().iter().cloned());
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn splice_is_independent_of_timing(
        snapshot_size in 0usize..6,
        pre in 0usize..6,
        post in 0usize..8,
        early in 0usize..8,
        batch in 1usize..4,
    ) {
        let early = early.min(post);
        let live = EventBuffer::new();
        let head = live.head();

        let pre_events: Vec<Event> = (0..pre)
            .map(|i| event(SNAP_INDEX - (pre - i) as Index, &format!("pre-{}", i)))
            .collect();
        let post_events: Vec<Event> = (0..post)
            .map(|i| event(SNAP_INDEX + 1 + i as Index, &format!("post-{}", i)))
            .collect();

        // Everything below the snapshot index, plus some later events, lands
        // before the snapshot is even started.
        for chunk in pre_events.chunks(batch) {
            live.append(chunk.to_vec());
        }
        for chunk in post_events[..early].chunks(batch) {
            live.append(chunk.to_vec());
        }

        let es = EventSnapshot::new(
            SubscribeRequest::new(Topic::ServiceHealth, ""),
            head,
            move |_: &SubscribeRequest, buf: &EventBuffer| -> Result<Index, SnapshotError> {
                for i in 0..snapshot_size {
                    buf.append(vec![event(SNAP_INDEX, &format!("snap-{}", i))]);
                }
                Ok(SNAP_INDEX)
            },
        );

        for chunk in post_events[early..].chunks(batch) {
            live.append(chunk.to_vec());
        }

        let mut expected: Vec<Event> = (0..snapshot_size)
            .map(|i| event(SNAP_INDEX, &format!("snap-{}", i)))
            .collect();
        expected.push(Event::end_of_snapshot(Topic::ServiceHealth, SNAP_INDEX));
        expected.extend(post_events.iter().cloned());

        let got = drain(&es, expected.len());
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn readers_agree_on_order(batches in prop::collection::vec(1usize..5, 1..20)) {
        let buffer = EventBuffer::new();
        let first = buffer.head();
        let mut index = 0;
        for size in &batches {
            let batch = (0..*size)
                .map(|_| {
                    index += 1;
                    event(index, "")
                })
                .collect();
            buffer.append(batch);
        }
        let second = buffer.head();

        let mut cursor = first;
        let mut seen = Vec::new();
        while let Some(next) = cursor.try_next().unwrap() {
            seen.extend(next.events().iter().map(|e| e.index));
            cursor = next;
        }

        let expected: Vec<Index> = (1..=index).collect();
        prop_assert_eq!(seen, expected);
        prop_assert!(std::sync::Arc::ptr_eq(&cursor, &second));
    }
}
