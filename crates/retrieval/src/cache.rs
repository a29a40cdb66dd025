//! Bounded TTL cache for retrieval results.
//!
//! Keyed by a hash of (query, strategy, max_results, neural flag).
//! Entries expire after the TTL and are LRU-evicted past capacity.
//! Invalidation by session id is best-effort; correctness never
//! depends on it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use sage_domain::query::{RetrievalResult, RetrievalStrategy};

struct CacheEntry {
    results: Vec<RetrievalResult>,
    inserted: Instant,
    last_used: Instant,
    /// Session ids surfaced by the cached results, for invalidation.
    sessions: Vec<String>,
}

pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl QueryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// The cache key for one retrieval request.
    pub fn key(
        query: &str,
        strategy: RetrievalStrategy,
        max_results: usize,
        use_neural: bool,
    ) -> String {
        let raw = format!("{query}\x1f{}\x1f{max_results}\x1f{use_neural}", strategy.as_str());
        let digest = Sha256::digest(raw.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<RetrievalResult>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if entry.inserted.elapsed() > self.ttl {
            entries.remove(key);
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.results.clone())
    }

    pub fn insert(&self, key: String, results: Vec<RetrievalResult>) {
        let sessions: Vec<String> = {
            let mut seen = Vec::new();
            for result in &results {
                if let Some(session) = result
                    .metadata
                    .get("session_id")
                    .and_then(|v| v.as_str())
                {
                    if !seen.iter().any(|s: &String| s == session) {
                        seen.push(session.to_owned());
                    }
                }
            }
            seen
        };

        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            CacheEntry {
                results,
                inserted: now,
                last_used: now,
                sessions,
            },
        );

        // LRU eviction past capacity.
        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }

    /// Drop every entry that surfaced content from `session_id`.
    pub fn invalidate_session(&self, session_id: &str) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.sessions.iter().any(|s| s == session_id));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn result(session: &str) -> RetrievalResult {
        RetrievalResult {
            content: "c".into(),
            role: "user".into(),
            similarity_score: 0.5,
            temporal_score: 0.5,
            context_score: 0.0,
            final_score: 0.5,
            metadata: serde_json::json!({"session_id": session}),
            reasoning: String::new(),
        }
    }

    #[test]
    fn keys_differ_by_every_component() {
        let base = QueryCache::key("q", RetrievalStrategy::HybridAdvanced, 10, true);
        assert_eq!(
            base,
            QueryCache::key("q", RetrievalStrategy::HybridAdvanced, 10, true)
        );
        assert_ne!(
            base,
            QueryCache::key("q2", RetrievalStrategy::HybridAdvanced, 10, true)
        );
        assert_ne!(
            base,
            QueryCache::key("q", RetrievalStrategy::SemanticFirst, 10, true)
        );
        assert_ne!(
            base,
            QueryCache::key("q", RetrievalStrategy::HybridAdvanced, 5, true)
        );
        assert_ne!(
            base,
            QueryCache::key("q", RetrievalStrategy::HybridAdvanced, 10, false)
        );
    }

    #[test]
    fn hit_within_ttl_returns_identical_list() {
        let cache = QueryCache::new(Duration::from_secs(60), 8);
        let key = QueryCache::key("q", RetrievalStrategy::HybridAdvanced, 10, false);
        cache.insert(key.clone(), vec![result("s1")]);

        let first = cache.get(&key).unwrap();
        let second = cache.get(&key).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn expired_entries_miss() {
        let cache = QueryCache::new(Duration::from_secs(0), 8);
        let key = QueryCache::key("q", RetrievalStrategy::HybridAdvanced, 10, false);
        cache.insert(key.clone(), vec![result("s1")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = QueryCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), vec![result("s1")]);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".into(), vec![result("s2")]);
        std::thread::sleep(Duration::from_millis(2));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".into(), vec![result("s3")]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn session_invalidation_is_targeted() {
        let cache = QueryCache::new(Duration::from_secs(60), 8);
        cache.insert("a".into(), vec![result("s1")]);
        cache.insert("b".into(), vec![result("s2")]);

        cache.invalidate_session("s1");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }
}
