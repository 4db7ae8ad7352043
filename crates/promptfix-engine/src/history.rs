//! Bounded most-recent-first cache of past generations.

use promptfix_core::history::HistoryEntry;
use promptfix_core::protocol::HistoryPersistence;

pub const HISTORY_CAPACITY: usize = 5;

pub struct HistoryCache {
    entries: Vec<HistoryEntry>,
    store: Box<dyn HistoryPersistence>,
}

impl HistoryCache {
    /// Load once from `store`. Oversized or duplicated stored lists are
    /// normalized before use.
    pub fn load(store: Box<dyn HistoryPersistence>) -> Self {
        let mut entries: Vec<HistoryEntry> = Vec::with_capacity(HISTORY_CAPACITY);
        for entry in store.load() {
            if entries.len() == HISTORY_CAPACITY {
                break;
            }
            if !entries.iter().any(|e| e.intent == entry.intent) {
                entries.push(entry);
            }
        }
        tracing::debug!(count = entries.len(), "history loaded");
        Self { entries, store }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepend `entry`, replacing any entry with the same intent.
    pub fn insert(&mut self, entry: HistoryEntry) {
        self.entries.retain(|e| e.intent != entry.intent);
        self.entries.insert(0, entry);
        self.entries.truncate(HISTORY_CAPACITY);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    fn persist(&self) {
        if let Err(err) = self.store.save(&self.entries) {
            tracing::warn!("Failed to save history: {}", err);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory store that records every save.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub(crate) saved: Arc<Mutex<Vec<HistoryEntry>>>,
        pub(crate) saves: Arc<Mutex<usize>>,
        pub(crate) fail: bool,
    }

    impl MemoryStore {
        pub(crate) fn with_entries(entries: Vec<HistoryEntry>) -> Self {
            Self {
                saved: Arc::new(Mutex::new(entries)),
                ..Self::default()
            }
        }
    }

    impl HistoryPersistence for MemoryStore {
        fn load(&self) -> Vec<HistoryEntry> {
            self.saved.lock().unwrap().clone()
        }

        fn save(&self, entries: &[HistoryEntry]) -> anyhow::Result<()> {
            *self.saves.lock().unwrap() += 1;
            if self.fail {
                return Err(anyhow::anyhow!("disk full"));
            }
            *self.saved.lock().unwrap() = entries.to_vec();
            Ok(())
        }
    }

    fn entry(intent: &str) -> HistoryEntry {
        HistoryEntry::new(intent, format!("prompt for {intent}"), vec![])
    }

    fn intents(cache: &HistoryCache) -> Vec<&str> {
        cache.entries().iter().map(|e| e.intent.as_str()).collect()
    }

    #[test]
    fn test_insert_prepends_and_persists() {
        let store = MemoryStore::default();
        let mut cache = HistoryCache::load(Box::new(store.clone()));
        cache.insert(entry("a"));
        cache.insert(entry("b"));
        assert_eq!(intents(&cache), vec!["b", "a"]);
        assert_eq!(*store.saves.lock().unwrap(), 2);
        assert_eq!(store.saved.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut cache = HistoryCache::load(Box::new(MemoryStore::default()));
        for i in 0..8 {
            cache.insert(entry(&format!("intent {i}")));
            assert!(cache.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(cache.entries()[0].intent, "intent 7");
        assert_eq!(cache.entries()[4].intent, "intent 3");
    }

    #[test]
    fn test_duplicate_intent_moves_to_front() {
        let mut cache = HistoryCache::load(Box::new(MemoryStore::default()));
        for name in ["a", "b", "c"] {
            cache.insert(entry(name));
        }
        let mut again = entry("a");
        again.optimized_output = "newer".to_string();
        cache.insert(again);
        assert_eq!(intents(&cache), vec!["a", "c", "b"]);
        assert_eq!(cache.entries()[0].optimized_output, "newer");
    }

    #[test]
    fn test_duplicate_at_capacity_keeps_others() {
        let mut cache = HistoryCache::load(Box::new(MemoryStore::default()));
        for name in ["a", "b", "c", "d", "e"] {
            cache.insert(entry(name));
        }
        cache.insert(entry("a"));
        assert_eq!(intents(&cache), vec!["a", "e", "d", "c", "b"]);
    }

    #[test]
    fn test_load_normalizes_stored_list() {
        let stored = ["x", "y", "x", "z", "w", "v", "u"]
            .iter()
            .map(|i| entry(i))
            .collect();
        let cache = HistoryCache::load(Box::new(MemoryStore::with_entries(stored)));
        assert_eq!(intents(&cache), vec!["x", "y", "z", "w", "v"]);
    }

    #[test]
    fn test_clear_empties_and_persists() {
        let store = MemoryStore::with_entries(vec![entry("a")]);
        let mut cache = HistoryCache::load(Box::new(store.clone()));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_save_failure_is_not_fatal() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let mut cache = HistoryCache::load(Box::new(store.clone()));
        cache.insert(entry("a"));
        assert_eq!(cache.len(), 1);
        assert_eq!(*store.saves.lock().unwrap(), 1);
    }
}
