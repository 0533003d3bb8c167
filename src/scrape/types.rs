// src/scrape/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Marketplace a listing came from. The id prefix keeps native ids from
/// colliding across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Craigslist,
    OfferUp,
    Mercari,
    Ebay,
    Etsy,
    Poshmark,
    Facebook,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Craigslist => "craigslist",
            Source::OfferUp => "offerup",
            Source::Mercari => "mercari",
            Source::Ebay => "ebay",
            Source::Etsy => "etsy",
            Source::Poshmark => "poshmark",
            Source::Facebook => "facebook",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Source::Craigslist => "cl",
            Source::OfferUp => "offerup",
            Source::Mercari => "mercari",
            Source::Ebay => "ebay",
            Source::Etsy => "etsy",
            Source::Poshmark => "poshmark",
            Source::Facebook => "fb",
        }
    }

    /// `"cl_12345"` for native id `"12345"`.
    pub fn scoped_id(&self, native_id: &str) -> String {
        format!("{}_{}", self.id_prefix(), native_id)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical normalized listing record produced by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingItem {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
    pub url: String,
    pub image_urls: Vec<String>,
    pub location: Option<String>,
    pub posted_date: Option<DateTime<Utc>>,
    pub source: Source,
    pub distance_miles: Option<f64>,
    pub color_score: f64,
    pub shippable: bool,
}

impl ListingItem {
    pub fn new(source: Source, native_id: &str, title: String, url: String) -> Self {
        Self {
            id: source.scoped_id(native_id),
            title,
            price: None,
            url,
            image_urls: Vec::new(),
            location: None,
            posted_date: Some(Utc::now()),
            source,
            distance_miles: None,
            color_score: 0.0,
            shippable: false,
        }
    }
}

/// Sticky fetch mode per adapter: once the API path fails (bad credential,
/// auth error, non-200) the adapter stays on HTML fallback for the rest of
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Api,
    HtmlFallback,
}

/// How an API call failed. `Sticky` failures (missing credential, auth
/// rejection, non-200) flip the adapter to HTML fallback for good;
/// `Transient` ones (connection errors, malformed bodies) cost only the
/// current call and leave API mode intact.
#[derive(Debug)]
pub enum ApiFailure {
    Sticky(anyhow::Error),
    Transient(anyhow::Error),
}

/// One marketplace integration. Adapters are interchangeable behind this
/// trait so the orchestrator can fan out uniformly.
#[async_trait::async_trait]
pub trait Marketplace: Send + Sync {
    fn name(&self) -> &'static str;

    fn source(&self) -> Source;

    /// Search the marketplace for one query. Transient failures degrade to
    /// an empty result inside the adapter; a returned `Err` means the whole
    /// call could not even be attempted.
    async fn search(&self, query: &str) -> Result<Vec<ListingItem>>;

    /// Iterate every configured term, de-duplicating by id within the run.
    async fn search_all_terms(&self, terms: &[String]) -> Vec<ListingItem> {
        let mut all = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for term in terms {
            tracing::info!(source = self.name(), term = %term, "searching");
            let items = match self.search(term).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = ?e, source = self.name(), term = %term, "search failed");
                    metrics::counter!("scrape_term_errors_total").increment(1);
                    continue;
                }
            };
            tracing::debug!(source = self.name(), term = %term, count = items.len(), "term done");
            for item in items {
                if seen_ids.insert(item.id.clone()) {
                    all.push(item);
                }
            }
        }

        tracing::info!(source = self.name(), unique = all.len(), "search_all_terms done");
        all
    }

    /// Deep enrichment for a single listing (full gallery, true post date,
    /// shipping scan). Default is a no-op; only some sources support it.
    async fn enrich_details(&self, _item: &mut ListingItem) -> Result<()> {
        Ok(())
    }
}

/// Best-effort price parse: strip currency symbols and commas, take the
/// first number. Absence or garbage yields `None`, never an error.
pub fn parse_price(text: &str) -> Option<f64> {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"([\d,]+(?:\.\d+)?)").unwrap());
    let caps = re.captures(text)?;
    let cleaned = caps.get(1)?.as_str().replace(',', "");
    let value: f64 = cleaned.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

const SHIPPING_WORDS: &[&str] = &[
    "ship", "shipping", "deliver", "delivery", "mail", "usps", "fedex", "ups",
];

/// Keyword scan over title/body text for shipping hints.
pub fn text_suggests_shipping(text: &str) -> bool {
    let lower = text.to_lowercase();
    SHIPPING_WORDS.iter().any(|w| lower.contains(w))
}

/// Normalize a scraped title: decode HTML entities, collapse whitespace.
pub fn normalize_title(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&decoded, " ").trim().to_string()
}
