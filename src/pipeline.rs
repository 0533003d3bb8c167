// src/pipeline.rs
//! End-to-end run: scrape every marketplace, drop excluded and already-seen
//! listings, score colors, rank, enrich the winners, and deliver the digest.
//! Failures in any one source or in delivery never abort the run; a summary
//! is always logged.

use crate::analyze::color::ColorAnalyzer;
use crate::config::Config;
use crate::notify::email::EmailSender;
use crate::rank;
use crate::scrape::net::PoliteClient;
use crate::scrape::providers::{
    CraigslistAdapter, EbayAdapter, EtsyAdapter, FacebookAdapter, MercariAdapter,
    OfferUpAdapter, PoshmarkAdapter,
};
use crate::scrape::types::Marketplace;
use crate::scrape::{filter_excluded, scrape_all};
use crate::tracker::ItemTracker;
use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;

const CLEANUP_DAYS: i64 = 90;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_new_items_total", "Listings surviving the seen filter.");
        describe_counter!("pipeline_plum_items_total", "Listings passing the color gate.");
        describe_counter!("pipeline_emails_sent_total", "Digest emails delivered.");
    });
}

/// All seven marketplace adapters over one shared polite client.
pub fn build_adapters(cfg: &Config, net: Arc<PoliteClient>) -> Vec<Box<dyn Marketplace>> {
    vec![
        Box::new(CraigslistAdapter::new(
            net.clone(),
            cfg.target_zip.clone(),
            cfg.max_distance_miles,
        )),
        Box::new(OfferUpAdapter::new(
            net.clone(),
            cfg.offerup_location_slug.clone(),
            cfg.max_distance_miles,
        )),
        Box::new(MercariAdapter::new(net.clone())),
        Box::new(EbayAdapter::new(
            net.clone(),
            cfg.ebay_app_id.clone(),
            cfg.ebay_cert_id.clone(),
            cfg.target_zip.clone(),
            cfg.max_distance_miles,
        )),
        Box::new(EtsyAdapter::new(net.clone(), cfg.etsy_api_key.clone())),
        Box::new(PoshmarkAdapter::new(net.clone())),
        Box::new(FacebookAdapter::new(net, cfg.fb_session_cookie.as_deref())),
    ]
}

/// One full pipeline run. With `dry_run` the scrape/score/rank stages execute
/// but nothing is persisted and no email goes out.
pub async fn run(cfg: &Config, dry_run: bool) -> Result<()> {
    ensure_metrics_described();
    tracing::info!(dry_run, terms = cfg.search_terms.len(), "pipeline starting");

    let net = Arc::new(PoliteClient::new(&cfg.user_agents, cfg.request_delay)?);
    let adapters = build_adapters(cfg, net.clone());
    let tracker = ItemTracker::open(&cfg.db_path)?;
    let analyzer = ColorAnalyzer::new()?;

    // 1. Scrape everything, then drop stop-term titles.
    let all_items = scrape_all(&adapters, &cfg.search_terms).await;
    tracing::info!(total = all_items.len(), "scraping done");
    if all_items.is_empty() {
        tracing::info!("no items found, stopping");
        return Ok(());
    }
    let all_items = filter_excluded(all_items, &cfg.excluded_terms);

    // 2. Keep only listings never seen before.
    let before = all_items.len();
    let new_items = tracker.filter_new_items(all_items)?;
    counter!("pipeline_new_items_total").increment(new_items.len() as u64);
    tracing::info!(
        new = new_items.len(),
        duplicates = before - new_items.len(),
        "seen filter done"
    );
    if new_items.is_empty() {
        tracing::info!("no new items, stopping");
        return Ok(());
    }

    // 3. Color score and distance for each candidate.
    let mut scored_items = new_items;
    for (i, item) in scored_items.iter_mut().enumerate() {
        if i % 10 == 0 {
            tracing::debug!(progress = i, "analyzing colors");
        }
        item.color_score = analyzer.analyze_item(item).await;
        item.distance_miles = Some(rank::distance_for_location(
            item.location.as_deref(),
            cfg.max_distance_miles,
        ));
    }

    // 4+5. Color gate, composite ranking, top-N selection.
    let mut top_items = rank::rank_and_select(
        scored_items,
        cfg.max_distance_miles,
        cfg.max_items_per_email,
    );
    counter!("pipeline_plum_items_total").increment(top_items.len() as u64);
    tracing::info!(selected = top_items.len(), "ranking done");
    if top_items.is_empty() {
        tracing::info!("no plum-colored items, stopping");
        return Ok(());
    }

    // Deep details only for the winners; adapter lookup by source.
    for item in top_items.iter_mut() {
        if let Some(adapter) = adapters.iter().find(|a| a.source() == item.source) {
            if let Err(e) = adapter.enrich_details(item).await {
                tracing::debug!(error = ?e, id = %item.id, "detail enrichment failed");
            }
        }
    }

    if dry_run {
        for item in &top_items {
            tracing::info!(
                id = %item.id,
                title = %item.title,
                price = ?item.price,
                color = item.color_score,
                "dry-run pick"
            );
        }
        tracing::info!(selected = top_items.len(), "dry run complete, nothing persisted");
        return Ok(());
    }

    // 6. Record first, then deliver. A failed send leaves the rows unsent
    // so the next run can pick them up via get_unsent_items.
    for item in &top_items {
        tracker.mark_seen(item)?;
    }

    match EmailSender::from_env() {
        Ok(sender) => match sender.send_digest(&top_items).await {
            Ok(()) => {
                let ids: Vec<String> = top_items.iter().map(|i| i.id.clone()).collect();
                tracker.mark_sent(&ids)?;
                tracker.record_email_sent(top_items.len(), &sender.recipient())?;
                counter!("pipeline_emails_sent_total").increment(1);
                tracing::info!(items = top_items.len(), "digest delivered");
            }
            Err(e) => {
                tracing::error!(error = ?e, "digest delivery failed");
            }
        },
        Err(e) => {
            tracing::warn!(error = ?e, "email not configured, skipping delivery");
        }
    }

    tracker.cleanup_old_items(CLEANUP_DAYS)?;
    net.cache_cleanup();

    let stats = tracker.get_stats()?;
    tracing::info!(
        tracked = stats.total_items_tracked,
        sent = stats.items_sent_in_emails,
        emails = stats.total_emails_sent,
        "pipeline finished"
    );
    Ok(())
}
