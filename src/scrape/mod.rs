// src/scrape/mod.rs
pub mod cache;
pub mod embedded;
pub mod net;
pub mod providers;
pub mod retry;
pub mod robots;
pub mod types;

use crate::scrape::types::{ListingItem, Marketplace};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scrape_items_total", "Listings parsed across all adapters.");
        describe_counter!("scrape_adapter_errors_total", "Adapter-level fan-out failures.");
        describe_counter!("scrape_term_errors_total", "Per-term search failures.");
        describe_gauge!("scrape_last_run_ts", "Unix ts when the scrape fan-out last ran.");
    });
}

/// Sequential fan-out over every adapter: one adapter at a time, one term at
/// a time. A hard failure in one adapter is logged and the loop proceeds to
/// the next; partial results are kept.
pub async fn scrape_all(
    adapters: &[Box<dyn Marketplace>],
    terms: &[String],
) -> Vec<ListingItem> {
    ensure_metrics_described();

    let mut all = Vec::new();
    for adapter in adapters {
        let items = adapter.search_all_terms(terms).await;
        counter!("scrape_items_total").increment(items.len() as u64);
        all.extend(items);
    }

    let now = chrono::Utc::now().timestamp().max(0) as f64;
    gauge!("scrape_last_run_ts").set(now);

    tracing::info!(total = all.len(), adapters = adapters.len(), "scrape fan-out done");
    all
}

/// Case-insensitive title exclusion filter for configured stop terms.
pub fn filter_excluded(items: Vec<ListingItem>, excluded_terms: &[String]) -> Vec<ListingItem> {
    if excluded_terms.is_empty() {
        return items;
    }
    let lowered: Vec<String> = excluded_terms.iter().map(|t| t.to_lowercase()).collect();
    items
        .into_iter()
        .filter(|item| {
            let title = item.title.to_lowercase();
            let hit = lowered.iter().find(|t| !t.is_empty() && title.contains(t.as_str()));
            if let Some(term) = hit {
                tracing::debug!(id = %item.id, term = %term, "excluded by stop term");
                return false;
            }
            true
        })
        .collect()
}
