// src/scrape/providers/ebay.rs
//! eBay adapter. Prefers the Browse API (OAuth client-credentials grant,
//! token cached until expiry) and downgrades permanently to scraping the
//! search results page when the credential is absent or rejected. Transient
//! API failures only blank out the current call.

use crate::scrape::cache::ResponseCache;
use crate::scrape::net::PoliteClient;
use crate::scrape::retry::retry_response;
use crate::scrape::types::{
    normalize_title, parse_price, ApiFailure, ListingItem, FetchMode, Marketplace, Source,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

const BASE_URL: &str = "https://www.ebay.com";
const TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
const BROWSE_URL: &str = "https://api.ebay.com/buy/browse/v1/item_summary/search";
const API_PAGE_SIZE: u32 = 50;

// ---- Browse API payload shapes ----

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct BrowseResponse {
    #[serde(rename = "itemSummaries", default)]
    item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
struct ItemSummary {
    #[serde(rename = "itemId")]
    item_id: String,
    title: String,
    price: Option<ApiPrice>,
    #[serde(rename = "itemWebUrl")]
    item_web_url: Option<String>,
    image: Option<ApiImage>,
    #[serde(rename = "itemLocation")]
    item_location: Option<ApiLocation>,
    #[serde(rename = "shippingOptions", default)]
    shipping_options: Vec<serde_json::Value>,
    #[serde(rename = "itemCreationDate")]
    item_creation_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPrice {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    city: Option<String>,
    #[serde(rename = "stateOrProvince")]
    state: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct EbayAdapter {
    net: Arc<PoliteClient>,
    app_id: Option<String>,
    cert_id: Option<String>,
    postal: String,
    radius_miles: f64,
    mode: Mutex<FetchMode>,
    token: Mutex<Option<CachedToken>>,
}

impl EbayAdapter {
    pub fn new(
        net: Arc<PoliteClient>,
        app_id: Option<String>,
        cert_id: Option<String>,
        postal: String,
        radius_miles: f64,
    ) -> Self {
        // Mode is decided up front: no credential means HTML from the start.
        let mode = if app_id.is_some() && cert_id.is_some() {
            FetchMode::Api
        } else {
            FetchMode::HtmlFallback
        };
        Self {
            net,
            app_id,
            cert_id,
            postal,
            radius_miles,
            mode: Mutex::new(mode),
            token: Mutex::new(None),
        }
    }

    async fn mode(&self) -> FetchMode {
        *self.mode.lock().await
    }

    /// Irreversible for the remainder of the process.
    async fn downgrade(&self, reason: &str) {
        let mut mode = self.mode.lock().await;
        if *mode == FetchMode::Api {
            tracing::warn!(source = "ebay", reason, "downgrading to HTML fallback");
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
                tracing::warn!(source = "ebay", error = %e, "transient API failure, empty result");
                Some(Vec::new())
            }
        }
    }

    // ---- API path ----

    async fn access_token(&self) -> Result<String, ApiFailure> {
        {
            let token = self.token.lock().await;
            if let Some(cached) = token.as_ref() {
                if Utc::now() < cached.expires_at {
                    return Ok(cached.value.clone());
                }
            }
        }

        let app_id = self
            .app_id
            .as_deref()
            .ok_or_else(|| ApiFailure::Sticky(anyhow!("EBAY_APP_ID not set")))?;
        let cert_id = self
            .cert_id
            .as_deref()
            .ok_or_else(|| ApiFailure::Sticky(anyhow!("EBAY_CERT_ID not set")))?;

        let resp = self
            .net
            .http()
            .post(TOKEN_URL)
            .basic_auth(app_id, Some(cert_id))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", "https://api.ebay.com/oauth/api_scope"),
            ])
            .send()
            .await
            .context("ebay token request")
            .map_err(ApiFailure::Transient)?;

        if !resp.status().is_success() {
            return Err(ApiFailure::Sticky(anyhow!(
                "ebay token endpoint returned {}",
                resp.status()
            )));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .context("ebay token body")
            .map_err(ApiFailure::Transient)?;

        // Refresh one minute early.
        let expires_at = Utc::now() + ChronoDuration::seconds((parsed.expires_in - 60).max(0));
        let mut token = self.token.lock().await;
        *token = Some(CachedToken {
            value: parsed.access_token.clone(),
            expires_at,
        });
        Ok(parsed.access_token)
    }

    async fn search_api(&self, query: &str) -> Result<Vec<ListingItem>, ApiFailure> {
        let token = self.access_token().await?;

        let filter = format!(
            "buyingOptions:{{FIXED_PRICE}},itemLocationRadius:{:.0},deliveryPostalCode:{}",
            self.radius_miles, self.postal
        );
        let params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("limit", API_PAGE_SIZE.to_string()),
            ("sort", "newlyListed".to_string()),
            ("filter", filter),
        ];
        let resp = retry_response(self.net.retry_policy(), || {
            let req = self
                .net
                .http()
                .get(BROWSE_URL)
                .bearer_auth(&token)
                .query(&params);
            async move { req.send().await.map_err(anyhow::Error::from) }
        })
        .await
        .map_err(ApiFailure::Transient)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiFailure::Sticky(anyhow!("ebay browse auth error: {status}")));
        }
        if !status.is_success() {
            return Err(ApiFailure::Sticky(anyhow!("ebay browse returned {status}")));
        }

        let parsed: BrowseResponse = resp
            .json()
            .await
            .context("ebay browse body")
            .map_err(ApiFailure::Transient)?;
        self.net.pause().await;

        Ok(parsed
            .item_summaries
            .into_iter()
            .filter_map(Self::from_summary)
            .collect())
    }

    fn from_summary(summary: ItemSummary) -> Option<ListingItem> {
        let title = normalize_title(&summary.title);
        if title.is_empty() {
            return None;
        }
        let url = summary
            .item_web_url
            .unwrap_or_else(|| format!("{BASE_URL}/itm/{}", summary.item_id));

        let mut item = ListingItem::new(Source::Ebay, &summary.item_id, title, url);
        item.price = summary
            .price
            .and_then(|p| p.value)
            .and_then(|v| parse_price(&v));
        if let Some(image) = summary.image.and_then(|i| i.image_url) {
            item.image_urls.push(image);
        }
        item.location = summary.item_location.map(|loc| {
            match (loc.city, loc.state) {
                (Some(c), Some(s)) => format!("{c}, {s}"),
                (Some(c), None) => c,
                (None, Some(s)) => s,
                (None, None) => String::new(),
            }
        })
        .filter(|s| !s.is_empty());
        // Explicit shipping-option data from the API, no keyword guessing.
        item.shippable = !summary.shipping_options.is_empty();
        if let Some(created) = summary.item_creation_date {
            if let Ok(dt) = DateTime::parse_from_rfc3339(&created) {
                item.posted_date = Some(dt.with_timezone(&Utc));
            }
        }
        Some(item)
    }

    // ---- HTML fallback ----

    fn card_selectors() -> &'static (Selector, Selector, Selector, Selector, Selector, Selector) {
        static SELECTORS: OnceCell<(Selector, Selector, Selector, Selector, Selector, Selector)> =
            OnceCell::new();
        SELECTORS.get_or_init(|| {
            let sel = |s| Selector::parse(s).expect("static selector");
            (
                sel(".s-item"),
                sel(r#"a.s-item__link, a[href*="/itm/"]"#),
                sel(r#".s-item__title, [role="heading"]"#),
                sel(".s-item__price"),
                sel(".s-item__location, .s-item__itemLocation"),
                sel(".s-item__shipping, .s-item__freeXDays"),
            )
        })
    }

    fn parse_card(card: ElementRef<'_>) -> Option<ListingItem> {
        let (_, link_sel, title_sel, price_sel, loc_sel, ship_sel) = Self::card_selectors();

        let link = card.select(link_sel).next()?;
        let url = link.value().attr("href").unwrap_or_default().to_string();
        // Promoted/ad links route through a tracker; skip them.
        if url.is_empty() || url.contains("pulsar") {
            return None;
        }

        static RE_ID: OnceCell<regex::Regex> = OnceCell::new();
        let re_id = RE_ID.get_or_init(|| regex::Regex::new(r"/itm/(\d+)").unwrap());
        let native_id = re_id.captures(&url)?.get(1)?.as_str().to_string();

        let title = card
            .select(title_sel)
            .next()
            .map(|el| normalize_title(&el.text().collect::<String>()))
            .unwrap_or_default();
        if title.is_empty() || title.to_lowercase().contains("shop on ebay") {
            return None;
        }

        let price = card
            .select(price_sel)
            .next()
            .and_then(|el| parse_price(&el.text().collect::<String>()));

        let location = card
            .select(loc_sel)
            .next()
            .map(|el| normalize_title(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let mut image_urls = Vec::new();
        static IMG: OnceCell<Selector> = OnceCell::new();
        let img_sel = IMG.get_or_init(|| {
            Selector::parse(".s-item__image-wrapper img, img.s-item__image-img").expect("static selector")
        });
        if let Some(img) = card.select(img_sel).next() {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .unwrap_or_default();
            if src.starts_with("http") && !src.contains("gif") {
                image_urls.push(src.to_string());
            }
        }

        let shipping_text = card
            .select(ship_sel)
            .next()
            .map(|el| el.text().collect::<String>().to_lowercase())
            .unwrap_or_default();
        let shippable = shipping_text.contains("shipping") || shipping_text.contains("free");

        let mut item = ListingItem::new(Source::Ebay, &native_id, title, url);
        item.price = price;
        item.location = location;
        item.image_urls = image_urls;
        item.shippable = shippable;
        Some(item)
    }

    async fn search_html(&self, query: &str) -> Result<Vec<ListingItem>> {
        let url = format!("{BASE_URL}/sch/i.html");
        let params: Vec<(&str, String)> = vec![
            ("_nkw", query.to_string()),
            // Newly listed, Buy It Now, used condition bands.
            ("_sop", "10".to_string()),
            ("LH_BIN", "1".to_string()),
            ("LH_ItemCondition", "3000|4000|5000|6000".to_string()),
            ("_stpos", self.postal.clone()),
            ("_sadis", format!("{:.0}", self.radius_miles)),
        ];

        let key = ResponseCache::make_key(&url, &params);
        if let Some(cached) = self.net.cached(&key) {
            return Ok(cached);
        }

        let html = self.net.fetch_html(&url, &params).await?;
        let items: Vec<ListingItem> = {
            let document = Html::parse_document(&html);
            let (card_sel, ..) = Self::card_selectors();
            document.select(card_sel).filter_map(Self::parse_card).collect()
        };

        self.net.store(key, items.clone());
        Ok(items)
    }
}

#[async_trait::async_trait]
impl Marketplace for EbayAdapter {
    fn name(&self) -> &'static str {
        "ebay"
    }

    fn source(&self) -> Source {
        Source::Ebay
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
