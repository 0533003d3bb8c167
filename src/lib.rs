// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod analyze;
pub mod config;
pub mod notify;
pub mod pipeline;
pub mod rank;
pub mod scrape;
pub mod tracker;

// ---- Re-exports for stable public API ----
pub use crate::config::Config;
pub use crate::scrape::types::{ListingItem, Marketplace, Source};
pub use crate::tracker::ItemTracker;
