// src/scrape/providers/etsy.rs
//! Etsy adapter. Open API v3 with a static `x-api-key` header when the key
//! is configured; sticky HTML fallback once the key is rejected. Transient
//! API failures only blank out the current call. Everything on Etsy ships.

use crate::scrape::cache::ResponseCache;
use crate::scrape::net::PoliteClient;
use crate::scrape::retry::retry_response;
use crate::scrape::types::{
    normalize_title, parse_price, ApiFailure, ListingItem, FetchMode, Marketplace, Source,
};
use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

const BASE_URL: &str = "https://www.etsy.com";
const API_URL: &str = "https://openapi.etsy.com/v3/application/listings/active";
const API_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
struct ActiveListings {
    #[serde(default)]
    results: Vec<ApiListing>,
}

#[derive(Debug, Deserialize)]
struct ApiListing {
    listing_id: u64,
    title: String,
    url: Option<String>,
    price: Option<ApiMoney>,
}

#[derive(Debug, Deserialize)]
struct ApiMoney {
    amount: i64,
    divisor: i64,
}

pub struct EtsyAdapter {
    net: Arc<PoliteClient>,
    api_key: Option<String>,
    mode: Mutex<FetchMode>,
}

impl EtsyAdapter {
    pub fn new(net: Arc<PoliteClient>, api_key: Option<String>) -> Self {
        let mode = if api_key.is_some() {
            FetchMode::Api
        } else {
            FetchMode::HtmlFallback
        };
        Self {
            net,
            api_key,
            mode: Mutex::new(mode),
        }
    }

    async fn mode(&self) -> FetchMode {
        *self.mode.lock().await
    }

    async fn downgrade(&self, reason: &str) {
        let mut mode = self.mode.lock().await;
        if *mode == FetchMode::Api {
            tracing::warn!(source = "etsy", reason, "downgrading to HTML fallback");
            *mode = FetchMode::HtmlFallback;
        }
    }

    /// Sticky failures flip the adapter to HTML fallback and return `None`
    /// so the caller falls through to scraping; transient ones cost only
    /// this call and come back as an empty result.
    async fn absorb_api_failure(&self, err: ApiFailure) -> Option<Vec<ListingItem>> {
        match err {
            ApiFailure::Sticky(e) => {
                self.downgrade(&e.to_string()).await;
                None
            }
            ApiFailure::Transient(e) => {
                tracing::warn!(source = "etsy", error = %e, "transient API failure, empty result");
                Some(Vec::new())
            }
        }
    }

    // ---- API path ----

    async fn search_api(&self, query: &str) -> Result<Vec<ListingItem>, ApiFailure> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiFailure::Sticky(anyhow!("ETSY_API_KEY not set")))?;

        let params: Vec<(&str, String)> = vec![
            ("keywords", query.to_string()),
            ("limit", API_PAGE_SIZE.to_string()),
            ("sort_on", "created".to_string()),
            ("sort_order", "desc".to_string()),
        ];

        let resp = retry_response(self.net.retry_policy(), || {
            let req = self
                .net
                .http()
                .get(API_URL)
                .header("x-api-key", api_key)
                .query(&params);
            async move { req.send().await.map_err(anyhow::Error::from) }
        })
        .await
        .map_err(ApiFailure::Transient)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiFailure::Sticky(anyhow!("etsy api auth error: {status}")));
        }
        if !status.is_success() {
            return Err(ApiFailure::Sticky(anyhow!("etsy api returned {status}")));
        }

        let parsed: ActiveListings = resp
            .json()
            .await
            .context("etsy api body")
            .map_err(ApiFailure::Transient)?;
        self.net.pause().await;

        Ok(parsed
            .results
            .into_iter()
            .filter_map(Self::from_api_listing)
            .collect())
    }

    fn from_api_listing(listing: ApiListing) -> Option<ListingItem> {
        let title = normalize_title(&listing.title);
        if title.is_empty() {
            return None;
        }
        let native_id = listing.listing_id.to_string();
        let url = listing
            .url
            .unwrap_or_else(|| format!("{BASE_URL}/listing/{native_id}"));

        let mut item = ListingItem::new(Source::Etsy, &native_id, title, url);
        item.price = listing.price.and_then(|p| {
            if p.divisor > 0 {
                Some(p.amount as f64 / p.divisor as f64)
            } else {
                None
            }
        });
        item.location = Some("Etsy Seller".to_string());
        item.shippable = true;
        Some(item)
    }

    // ---- HTML fallback ----

    fn card_selector() -> &'static Selector {
        static SEL: OnceCell<Selector> = OnceCell::new();
        SEL.get_or_init(|| {
            Selector::parse("[data-listing-id], .v2-listing-card, .listing-link")
                .expect("static selector")
        })
    }

    fn parse_card(card: ElementRef<'_>) -> Option<ListingItem> {
        static LINK: OnceCell<Selector> = OnceCell::new();
        static TITLE: OnceCell<Selector> = OnceCell::new();
        static PRICE: OnceCell<Selector> = OnceCell::new();
        static IMG: OnceCell<Selector> = OnceCell::new();

        let link_sel = LINK.get_or_init(|| {
            Selector::parse(r#"a[href*="/listing/"]"#).expect("static selector")
        });
        let title_sel = TITLE.get_or_init(|| {
            Selector::parse(r#"[class*="title"], h3, h2"#).expect("static selector")
        });
        let price_sel = PRICE.get_or_init(|| {
            Selector::parse(r#"[class*="price"], .currency-value"#).expect("static selector")
        });
        let img_sel = IMG.get_or_init(|| Selector::parse("img").expect("static selector"));

        let mut native_id = card.value().attr("data-listing-id").map(|s| s.to_string());

        let link = if card.value().name() == "a" {
            Some(card)
        } else {
            card.select(link_sel).next()
        }?;

        let mut url = link.value().attr("href").unwrap_or_default().to_string();
        if url.is_empty() {
            return None;
        }
        if native_id.is_none() {
            static RE_ID: OnceCell<regex::Regex> = OnceCell::new();
            let re_id = RE_ID.get_or_init(|| regex::Regex::new(r"/listing/(\d+)").unwrap());
            native_id = re_id
                .captures(&url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
        }
        let native_id = native_id?;

        if !url.starts_with("http") {
            url = format!("{BASE_URL}{url}");
        }
        // Drop tracking params.
        if let Some(q) = url.find('?') {
            url.truncate(q);
        }

        let mut title = card
            .select(title_sel)
            .next()
            .map(|el| normalize_title(&el.text().collect::<String>()))
            .unwrap_or_default();
        if title.is_empty() {
            title = link.value().attr("title").unwrap_or_default().to_string();
        }
        if title.is_empty() {
            return None;
        }

        let price = card
            .select(price_sel)
            .next()
            .and_then(|el| parse_price(&el.text().collect::<String>()));

        let mut image_urls = Vec::new();
        if let Some(img) = card.select(img_sel).next() {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .unwrap_or_default();
            if src.starts_with("http") {
                // Swap the size marker for a larger rendition.
                static RE_SIZE: OnceCell<regex::Regex> = OnceCell::new();
                let re_size = RE_SIZE.get_or_init(|| regex::Regex::new(r"_\d+x\d+").unwrap());
                image_urls.push(re_size.replace(src, "_680x").to_string());
            }
        }

        let mut item = ListingItem::new(Source::Etsy, &native_id, title, url);
        item.price = price;
        item.image_urls = image_urls;
        item.location = Some("Etsy Seller".to_string());
        item.shippable = true;
        Some(item)
    }

    async fn search_html(&self, query: &str) -> Result<Vec<ListingItem>> {
        let url = format!("{BASE_URL}/search");
        let params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("explicit", "1".to_string()),
            ("ship_to", "US".to_string()),
            ("order", "date_desc".to_string()),
        ];

        let key = ResponseCache::make_key(&url, &params);
        if let Some(cached) = self.net.cached(&key) {
            return Ok(cached);
        }

        let html = self.net.fetch_html(&url, &params).await?;
        let items: Vec<ListingItem> = {
            let document = Html::parse_document(&html);
            document
                .select(Self::card_selector())
                .filter_map(Self::parse_card)
                .collect()
        };

        self.net.store(key, items.clone());
        Ok(items)
    }
}

#[async_trait::async_trait]
impl Marketplace for EtsyAdapter {
    fn name(&self) -> &'static str {
        "etsy"
    }

    fn source(&self) -> Source {
        Source::Etsy
    }

    async fn search(&self, query: &str) -> Result<Vec<ListingItem>> {
        if self.mode().await == FetchMode::Api {
            match self.search_api(query).await {
                Ok(items) => return Ok(items),
                Err(err) => {
                    if let Some(items) = self.absorb_api_failure(err).await {
                        return Ok(items);
                    }
                }
            }
        }
        self.search_html(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_listing_maps_with_divisor_price() {
        let listing: ApiListing = serde_json::from_value(serde_json::json!({
            "listing_id": 987654,
            "title": "Aubergine ceramic planter",
            "url": "https://www.etsy.com/listing/987654/aubergine-planter",
            "price": {"amount": 4250, "divisor": 100, "currency_code": "USD"}
        }))
        .unwrap();
        let item = EtsyAdapter::from_api_listing(listing).unwrap();
        assert_eq!(item.id, "etsy_987654");
        assert_eq!(item.price, Some(42.50));
        assert!(item.shippable);
    }

    #[test]
    fn html_card_parses_and_strips_tracking_params() {
        let html = r#"
            <div class="v2-listing-card" data-listing-id="555">
              <a href="/listing/555/plum-pillow?ref=search&pos=2">
                <h3 class="v2-listing-card__title">Plum linen pillow cover</h3>
              </a>
              <span class="currency-value">18.00</span>
              <img src="https://i.etsystatic.com/il_300x300.12345.jpg">
            </div>"#;
        let doc = Html::parse_fragment(html);
        let card = doc.select(EtsyAdapter::card_selector()).next().unwrap();
        let item = EtsyAdapter::parse_card(card).unwrap();
        assert_eq!(item.id, "etsy_555");
        assert_eq!(item.url, "https://www.etsy.com/listing/555/plum-pillow");
        assert_eq!(item.price, Some(18.0));
        assert_eq!(item.image_urls, vec!["https://i.etsystatic.com/il_680x.12345.jpg"]);
    }

    #[test]
    fn card_without_id_is_skipped() {
        let html = r#"<div class="v2-listing-card"><a href="/shop/somewhere">x</a></div>"#;
        let doc = Html::parse_fragment(html);
        let card = doc.select(EtsyAdapter::card_selector()).next().unwrap();
        assert!(EtsyAdapter::parse_card(card).is_none());
    }

    fn api_adapter() -> EtsyAdapter {
        let net = Arc::new(
            PoliteClient::new(&[], std::time::Duration::from_millis(0)).unwrap(),
        );
        EtsyAdapter::new(net, Some("key".into()))
    }

    #[tokio::test]
    async fn transient_api_failure_keeps_api_mode() {
        let adapter = api_adapter();
        let out = adapter
            .absorb_api_failure(ApiFailure::Transient(anyhow!("timed out")))
            .await;
        assert!(out.is_some_and(|items| items.is_empty()));
        assert_eq!(adapter.mode().await, FetchMode::Api);
    }

    #[tokio::test]
    async fn sticky_api_failure_downgrades_for_good() {
        let adapter = api_adapter();
        let out = adapter
            .absorb_api_failure(ApiFailure::Sticky(anyhow!("etsy api auth error: 403")))
            .await;
        assert!(out.is_none());
        assert_eq!(adapter.mode().await, FetchMode::HtmlFallback);
    }
}
