// src/tracker.rs
//! Seen-item store over SQLite. Deduplicates listings across runs and keeps
//! a history of sent digests. Every operation commits immediately; there is
//! no cross-call transaction state.

use crate::scrape::types::ListingItem;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

pub struct ItemTracker {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub total_items_tracked: u64,
    pub items_sent_in_emails: u64,
    pub total_emails_sent: u64,
}

impl ItemTracker {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening tracker db {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().context("opening in-memory db")?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen_items (
                 id TEXT PRIMARY KEY,
                 url TEXT NOT NULL,
                 title TEXT,
                 source TEXT,
                 first_seen_at TEXT NOT NULL,
                 last_seen_at TEXT NOT NULL,
                 sent_in_email INTEGER DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS email_history (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 sent_at TEXT NOT NULL,
                 item_count INTEGER,
                 recipient TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_seen_items_first_seen
                 ON seen_items(first_seen_at);",
        )
        .context("creating tracker schema")?;
        Ok(Self { conn })
    }

    pub fn is_seen(&self, item_id: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM seen_items WHERE id = ?1")?;
        let seen = stmt.exists(params![item_id])?;
        Ok(seen)
    }

    /// Upsert: a repeat sighting refreshes `last_seen_at` only.
    /// `first_seen_at` and `sent_in_email` survive.
    pub fn mark_seen(&self, item: &ListingItem) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO seen_items
                 (id, url, title, source, first_seen_at, last_seen_at, sent_in_email)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)
             ON CONFLICT(id) DO UPDATE SET last_seen_at = ?5",
            params![item.id, item.url, item.title, item.source.as_str(), now],
        )?;
        Ok(())
    }

    /// Keep only listings this store has never recorded.
    pub fn filter_new_items(&self, items: Vec<ListingItem>) -> Result<Vec<ListingItem>> {
        let mut fresh = Vec::with_capacity(items.len());
        for item in items {
            if !self.is_seen(&item.id)? {
                fresh.push(item);
            }
        }
        Ok(fresh)
    }

    pub fn mark_sent(&self, item_ids: &[String]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE seen_items SET sent_in_email = 1 WHERE id = ?1")?;
        for id in item_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    /// Ids recorded but never delivered; the recovery hook after a send
    /// failure.
    pub fn get_unsent_items(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM seen_items WHERE sent_in_email = 0")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn record_email_sent(&self, item_count: usize, recipient: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO email_history (sent_at, item_count, recipient) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), item_count as i64, recipient],
        )?;
        Ok(())
    }

    /// Delete rows first seen strictly before the cutoff; returns how many
    /// were removed.
    pub fn cleanup_old_items(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let deleted = self.conn.execute(
            "DELETE FROM seen_items WHERE first_seen_at < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            tracing::info!(deleted, days, "cleaned up old tracked items");
        }
        Ok(deleted)
    }

    pub fn get_stats(&self) -> Result<TrackerStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(TrackerStats {
            total_items_tracked: count("SELECT COUNT(*) FROM seen_items")?,
            items_sent_in_emails: count(
                "SELECT COUNT(*) FROM seen_items WHERE sent_in_email = 1",
            )?,
            total_emails_sent: count("SELECT COUNT(*) FROM email_history")?,
        })
    }

    /// Wipe both tables. Backs the `--reset` flag.
    pub fn reset(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM seen_items; DELETE FROM email_history;")
            .context("resetting tracker")?;
        tracing::warn!("tracker store wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::types::Source;

    fn item(native_id: &str, title: &str) -> ListingItem {
        ListingItem::new(
            Source::Craigslist,
            native_id,
            title.to_string(),
            format!("https://example.org/{native_id}"),
        )
    }

    #[test]
    fn unseen_then_seen() {
        let tracker = ItemTracker::open_in_memory().unwrap();
        let it = item("123", "Plum chair");
        assert!(!tracker.is_seen(&it.id).unwrap());
        tracker.mark_seen(&it).unwrap();
        assert!(tracker.is_seen(&it.id).unwrap());
    }

    #[test]
    fn mark_seen_twice_preserves_first_seen_at() {
        let tracker = ItemTracker::open_in_memory().unwrap();
        let it = item("123", "Plum chair");
        tracker.mark_seen(&it).unwrap();

        let first: String = tracker
            .conn
            .query_row(
                "SELECT first_seen_at FROM seen_items WHERE id = ?1",
                params![it.id],
                |r| r.get(0),
            )
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.mark_seen(&it).unwrap();

        let (first2, last2): (String, String) = tracker
            .conn
            .query_row(
                "SELECT first_seen_at, last_seen_at FROM seen_items WHERE id = ?1",
                params![it.id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();

        assert_eq!(first, first2);
        assert!(last2 >= first2);
        assert_eq!(tracker.get_stats().unwrap().total_items_tracked, 1);
    }

    #[test]
    fn filter_new_items_drops_only_seen_ids() {
        let tracker = ItemTracker::open_in_memory().unwrap();
        tracker.mark_seen(&item("123", "seen one")).unwrap();

        let fresh = tracker
            .filter_new_items(vec![item("123", "seen one"), item("456", "new one")])
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "cl_456");
    }

    #[test]
    fn sent_tracking_and_stats() {
        let tracker = ItemTracker::open_in_memory().unwrap();
        tracker.mark_seen(&item("1", "a")).unwrap();
        tracker.mark_seen(&item("2", "b")).unwrap();

        assert_eq!(tracker.get_unsent_items().unwrap().len(), 2);

        tracker.mark_sent(&["cl_1".to_string()]).unwrap();
        tracker.record_email_sent(1, "buyer@example.org").unwrap();

        let unsent = tracker.get_unsent_items().unwrap();
        assert_eq!(unsent, vec!["cl_2".to_string()]);

        let stats = tracker.get_stats().unwrap();
        assert_eq!(stats.total_items_tracked, 2);
        assert_eq!(stats.items_sent_in_emails, 1);
        assert_eq!(stats.total_emails_sent, 1);
    }

    #[test]
    fn cleanup_deletes_strictly_older_rows_and_counts_them() {
        let tracker = ItemTracker::open_in_memory().unwrap();
        tracker.mark_seen(&item("old", "old item")).unwrap();
        tracker.mark_seen(&item("new", "new item")).unwrap();

        // Age one row past the retention window.
        let ancient = (Utc::now() - Duration::days(120)).to_rfc3339();
        tracker
            .conn
            .execute(
                "UPDATE seen_items SET first_seen_at = ?1 WHERE id = 'cl_old'",
                params![ancient],
            )
            .unwrap();

        let deleted = tracker.cleanup_old_items(90).unwrap();
        assert_eq!(deleted, 1);
        assert!(!tracker.is_seen("cl_old").unwrap());
        assert!(tracker.is_seen("cl_new").unwrap());

        // Nothing further to delete.
        assert_eq!(tracker.cleanup_old_items(90).unwrap(), 0);
    }

    #[test]
    fn reset_wipes_both_tables() {
        let tracker = ItemTracker::open_in_memory().unwrap();
        tracker.mark_seen(&item("1", "a")).unwrap();
        tracker.record_email_sent(1, "buyer@example.org").unwrap();

        tracker.reset().unwrap();

        let stats = tracker.get_stats().unwrap();
        assert_eq!(stats.total_items_tracked, 0);
        assert_eq!(stats.total_emails_sent, 0);
    }
}
