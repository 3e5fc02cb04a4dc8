use std::collections::HashMap;

use crate::envelope::RelayEnvelope;

/// Latest raw payload seen on one topic.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub payload: String,
    pub received_at: u64,
}

/// Last-value store keyed by full topic string.  Later messages overwrite,
/// never append, so this holds no history.
#[derive(Debug, Default)]
pub struct TopicCache {
    entries: HashMap<String, CacheEntry>,
}

impl TopicCache {
    pub fn new() -> Self {
        TopicCache::default()
    }

    pub fn insert(&mut self, topic: &str, payload: &str, received_at: u64) {
        self.entries.insert(
            topic.to_string(),
            CacheEntry {
                payload: payload.to_string(),
                received_at,
            },
        );
    }

    pub fn get(&self, topic: &str) -> Option<&CacheEntry> {
        self.entries.get(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the whole cache as relay envelopes.  Iteration order is
    /// arbitrary, replay consumers must not depend on it.
    pub fn snapshot(&self) -> Vec<RelayEnvelope> {
        self.entries
            .iter()
            .map(|(topic, entry)| RelayEnvelope {
                topic: topic.clone(),
                data: entry.payload.clone(),
                timestamp: entry.received_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_messages_overwrite() {
        let mut cache = TopicCache::new();
        cache.insert("teslamate/cars/1/speed", "12", 1);
        cache.insert("teslamate/cars/1/speed", "90", 2);

        assert_eq!(cache.len(), 1);
        let entry = cache.get("teslamate/cars/1/speed").unwrap();
        assert_eq!(entry.payload, "90");
        assert_eq!(entry.received_at, 2);
    }

    #[test]
    fn snapshot_carries_receipt_timestamps() {
        let mut cache = TopicCache::new();
        cache.insert("a", "1", 10);
        cache.insert("b", "2", 20);

        let mut snapshot = cache.snapshot();
        snapshot.sort_by(|x, y| x.topic.cmp(&y.topic));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].topic, "a");
        assert_eq!(snapshot[0].timestamp, 10);
        assert_eq!(snapshot[1].data, "2");
    }
}
