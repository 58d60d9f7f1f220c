//! Timed album aggregation.
//!
//! Messages sharing a media group id are held in an in-memory bucket for the
//! aggregation window. A per-group guard serializes add/flush for one group;
//! independent groups proceed in parallel. Buckets exist only in memory and
//! live for at most the window plus one flusher tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use teltubby_protocol::{Batch, BatchMessage};

/// Result of submitting one message.
#[derive(Debug)]
pub enum AddOutcome {
    /// Batch is ready to process now (singleton, no group id).
    Ready(Batch),
    /// Message joined its bucket; the window has not elapsed.
    Pending,
    /// The group's bucket had already expired. The returned batch does NOT
    /// contain the submitted message - re-submit it to start a fresh bucket.
    Flushed(Batch),
}

struct Bucket {
    started_at: Instant,
    items: Vec<BatchMessage>,
    done: bool,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            items: Vec::new(),
            done: false,
        }
    }
}

pub struct AlbumAggregator {
    window: Duration,
    buckets: Mutex<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl AlbumAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a message; returns what the caller should do next.
    pub fn add(&self, message: BatchMessage) -> AddOutcome {
        let Some(group_id) = message.media_group_id.clone() else {
            return AddOutcome::Ready(Batch::singleton(message));
        };

        loop {
            let entry = {
                let mut buckets = self.buckets.lock().expect("album map poisoned");
                buckets
                    .entry(group_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(Instant::now()))))
                    .clone()
            };

            let mut bucket = entry.lock().expect("album bucket poisoned");
            if bucket.done {
                // A done bucket is never reopened; drop the stale entry and
                // start over with a fresh one.
                drop(bucket);
                self.remove_entry(&group_id, &entry);
                continue;
            }

            if bucket.started_at.elapsed() >= self.window && !bucket.items.is_empty() {
                // Expiry wins, and the arriving message is not swallowed by
                // the expiring bucket: it starts a new batch on re-submit.
                bucket.done = true;
                let items = std::mem::take(&mut bucket.items);
                drop(bucket);
                self.remove_entry(&group_id, &entry);
                return AddOutcome::Flushed(Batch::new(items));
            }

            bucket.items.push(message);
            return AddOutcome::Pending;
        }
    }

    /// Return and remove every bucket whose window has elapsed.
    ///
    /// Contended groups are skipped (an `add` is mid-flight there); the next
    /// flusher tick picks them up.
    pub fn flush_ready(&self) -> Vec<Batch> {
        let entries: Vec<(String, Arc<Mutex<Bucket>>)> = {
            let buckets = self.buckets.lock().expect("album map poisoned");
            buckets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let mut ready = Vec::new();
        for (group_id, entry) in entries {
            let Ok(mut bucket) = entry.try_lock() else {
                continue;
            };
            if bucket.done || bucket.items.is_empty() {
                continue;
            }
            if bucket.started_at.elapsed() >= self.window {
                bucket.done = true;
                let items = std::mem::take(&mut bucket.items);
                drop(bucket);
                self.remove_entry(&group_id, &entry);
                ready.push(Batch::new(items));
            }
        }
        ready
    }

    /// Number of live buckets (for the status surface).
    pub fn pending_groups(&self) -> usize {
        self.buckets.lock().expect("album map poisoned").len()
    }

    fn remove_entry(&self, group_id: &str, entry: &Arc<Mutex<Bucket>>) {
        let mut buckets = self.buckets.lock().expect("album map poisoned");
        if let Some(current) = buckets.get(group_id) {
            if Arc::ptr_eq(current, entry) {
                buckets.remove(group_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: i64, group: Option<&str>) -> BatchMessage {
        BatchMessage {
            message_id: id,
            chat_id: 7,
            chat_title: None,
            chat_username: Some("chan-a".to_string()),
            sender_id: 9,
            sender_username: Some("alice".to_string()),
            media_group_id: group.map(|g| g.to_string()),
            timestamp: Utc::now(),
            caption: None,
            caption_entities: vec![],
            entities: vec![],
            forward_origin: None,
            forward_origin_name: None,
            media: None,
        }
    }

    #[test]
    fn message_without_group_is_a_singleton() {
        let agg = AlbumAggregator::new(Duration::from_secs(10));
        match agg.add(msg(1, None)) {
            AddOutcome::Ready(batch) => assert_eq!(batch.messages.len(), 1),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(agg.pending_groups(), 0);
    }

    #[test]
    fn grouped_messages_wait_for_the_window() {
        let agg = AlbumAggregator::new(Duration::from_secs(10));
        assert!(matches!(agg.add(msg(1, Some("G1"))), AddOutcome::Pending));
        assert!(matches!(agg.add(msg(2, Some("G1"))), AddOutcome::Pending));
        assert_eq!(agg.pending_groups(), 1);
        assert!(agg.flush_ready().is_empty());
    }

    #[test]
    fn flush_releases_expired_buckets() {
        let agg = AlbumAggregator::new(Duration::from_millis(30));
        assert!(matches!(agg.add(msg(1, Some("G1"))), AddOutcome::Pending));
        assert!(matches!(agg.add(msg(2, Some("G1"))), AddOutcome::Pending));

        std::thread::sleep(Duration::from_millis(50));
        let batches = agg.flush_ready();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].messages.len(), 2);
        assert_eq!(agg.pending_groups(), 0);
        // Nothing left to flush.
        assert!(agg.flush_ready().is_empty());
    }

    #[test]
    fn expiring_bucket_does_not_swallow_the_arrival() {
        let agg = AlbumAggregator::new(Duration::from_millis(30));
        assert!(matches!(agg.add(msg(1, Some("G1"))), AddOutcome::Pending));

        std::thread::sleep(Duration::from_millis(50));
        let late = msg(2, Some("G1"));
        match agg.add(late.clone()) {
            AddOutcome::Flushed(batch) => {
                assert_eq!(batch.messages.len(), 1);
                assert_eq!(batch.messages[0].message_id, 1);
            }
            other => panic!("expected Flushed, got {other:?}"),
        }

        // The late arrival starts a fresh bucket on re-submit.
        assert!(matches!(agg.add(late), AddOutcome::Pending));
        assert_eq!(agg.pending_groups(), 1);
    }

    #[test]
    fn groups_are_independent() {
        let agg = AlbumAggregator::new(Duration::from_millis(30));
        assert!(matches!(agg.add(msg(1, Some("G1"))), AddOutcome::Pending));
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(agg.add(msg(2, Some("G2"))), AddOutcome::Pending));

        let batches = agg.flush_ready();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].messages[0].message_id, 1);
        // G2 still pending.
        assert_eq!(agg.pending_groups(), 1);
    }

    #[test]
    fn every_message_lands_in_exactly_one_batch() {
        let agg = AlbumAggregator::new(Duration::from_millis(40));
        for id in 0..5 {
            assert!(matches!(agg.add(msg(id, Some("G1"))), AddOutcome::Pending));
        }
        std::thread::sleep(Duration::from_millis(60));

        // A straggler arrives after the window: old batch flushes without it.
        let straggler = msg(99, Some("G1"));
        let AddOutcome::Flushed(first) = agg.add(straggler.clone()) else {
            panic!("expected Flushed");
        };
        assert_eq!(first.messages.len(), 5);
        assert!(matches!(agg.add(straggler), AddOutcome::Pending));

        std::thread::sleep(Duration::from_millis(60));
        let batches = agg.flush_ready();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].messages.len(), 1);
        assert_eq!(batches[0].messages[0].message_id, 99);
    }
}
