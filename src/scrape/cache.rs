// src/scrape/cache.rs
//! TTL cache for parsed search results, keyed by URL + normalized query
//! params. Shared across adapters through `PoliteClient`; single-threaded
//! sequential use only.

use crate::scrape::types::ListingItem;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry {
    items: Vec<ListingItem>,
    expires_at: Instant,
}

pub struct ResponseCache {
    entries: HashMap<String, Entry>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
        }
    }

    /// Key = sha256 over the URL and the params sorted by name, so the same
    /// query hits regardless of param ordering.
    pub fn make_key(url: &str, params: &[(&str, String)]) -> String {
        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        for (k, v) in sorted {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"&");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Returns the cached result if present and fresh; evicts on expiry.
    pub fn get(&mut self, key: &str) -> Option<Vec<ListingItem>> {
        match self.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.items.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&mut self, key: String, items: Vec<ListingItem>) {
        self.set_with_ttl(key, items, self.default_ttl);
    }

    pub fn set_with_ttl(&mut self, key: String, items: Vec<ListingItem>, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                items,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Sweep eviction of every expired entry.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, e| now < e.expires_at);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
