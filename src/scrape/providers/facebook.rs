// src/scrape/providers/facebook.rs
//! Facebook Marketplace adapter, best effort only. Needs a browser session
//! cookie (`FB_SESSION_COOKIE`, "c_user=...; xs=...") and may stop working
//! at any time; a login redirect or 403 disables the adapter for the rest
//! of the process and it silently yields empty results.

use crate::scrape::embedded;
use crate::scrape::net::PoliteClient;
use crate::scrape::types::{normalize_title, parse_price, ListingItem, Marketplace, Source};
use anyhow::{Context, Result};
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const BASE_URL: &str = "https://www.facebook.com";
// Facebook rate-limits aggressively; keep the term fan-out short.
const MAX_TERMS: usize = 5;

pub struct FacebookAdapter {
    net: Arc<PoliteClient>,
    cookies: HashMap<String, String>,
    enabled: AtomicBool,
}

impl FacebookAdapter {
    pub fn new(net: Arc<PoliteClient>, session_cookie: Option<&str>) -> Self {
        let cookies = session_cookie.map(parse_cookie_header).unwrap_or_default();
        let enabled = !cookies.is_empty();
        if !enabled {
            tracing::info!(
                source = "facebook",
                "adapter disabled: FB_SESSION_COOKIE not configured"
            );
        }
        Self {
            net,
            cookies,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn disable(&self, reason: &str) {
        if self.enabled.swap(false, Ordering::Relaxed) {
            tracing::warn!(source = "facebook", reason, "adapter disabled for this run");
        }
    }

    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Marketplace listing shape inside Facebook's JSON payloads.
    fn from_embedded(obj: &serde_json::Map<String, Value>) -> Option<ListingItem> {
        let title = normalize_title(&embedded::first_string(
            obj,
            &["marketplace_listing_title", "listing_title"],
        )?);
        if title.is_empty() {
            return None;
        }
        let native_id = embedded::first_string(obj, &["id", "listing_id"])?;

        let price = match obj.get("listing_price") {
            Some(Value::Object(p)) => embedded::first_string(p, &["formatted_amount", "amount"])
                .and_then(|s| parse_price(&s)),
            Some(Value::String(s)) => parse_price(s),
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        };

        let mut image_urls = Vec::new();
        let photos = obj
            .get("listing_photos")
            .or_else(|| obj.get("primary_listing_photo"));
        match photos {
            Some(Value::Array(arr)) => {
                for photo in arr {
                    if let Some(uri) = photo.pointer("/image/uri").and_then(Value::as_str) {
                        image_urls.push(uri.to_string());
                    }
                }
            }
            Some(Value::Object(_)) => {
                if let Some(uri) = photos
                    .and_then(|p| p.pointer("/image/uri"))
                    .and_then(Value::as_str)
                {
                    image_urls.push(uri.to_string());
                }
            }
            _ => {}
        }

        let location = obj
            .get("location")
            .and_then(|v| v.pointer("/reverse_geocode/city"))
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        let url = format!("{BASE_URL}/marketplace/item/{native_id}");
        let mut item = ListingItem::new(Source::Facebook, &native_id, title, url);
        item.price = price;
        item.image_urls = image_urls;
        item.location = location;
        // Shipping status would need the listing detail page.
        item.shippable = false;
        Some(item)
    }

    fn parse_page(html: &str) -> Vec<ListingItem> {
        let document = Html::parse_document(html);
        let mut items: Vec<ListingItem> = Vec::new();
        let mut seen = HashSet::new();

        let script_sel =
            Selector::parse(r#"script[type="application/json"]"#).expect("static selector");
        for script in document.select(&script_sel) {
            let text: String = script.text().collect();
            if let Ok(data) = serde_json::from_str::<Value>(&text) {
                for item in embedded::collect_items(&data, &Self::from_embedded) {
                    if seen.insert(item.id.clone()) {
                        items.push(item);
                    }
                }
            }
        }
        items
    }
}

fn parse_cookie_header(raw: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in raw.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            let k = k.trim();
            let v = v.trim();
            if !k.is_empty() && !v.is_empty() {
                cookies.insert(k.to_string(), v.to_string());
            }
        }
    }
    cookies
}

#[async_trait::async_trait]
impl Marketplace for FacebookAdapter {
    fn name(&self) -> &'static str {
        "facebook"
    }

    fn source(&self) -> Source {
        Source::Facebook
    }

    async fn search(&self, query: &str) -> Result<Vec<ListingItem>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        let url = format!("{BASE_URL}/marketplace/search");
        let resp = self
            .net
            .http()
            .get(&url)
            .header(reqwest::header::COOKIE, self.cookie_header())
            .query(&[("query", query), ("exact", "false")])
            .send()
            .await
            .context("facebook marketplace request")?;

        if resp.url().path().to_lowercase().contains("login")
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            self.disable("login redirect; session cookie expired or blocked");
            return Ok(Vec::new());
        }

        let body = resp.text().await.context("facebook marketplace body")?;
        // Extra politeness toward Facebook.
        self.net.pause().await;
        self.net.pause().await;

        Ok(Self::parse_page(&body))
    }

    async fn search_all_terms(&self, terms: &[String]) -> Vec<ListingItem> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let mut all = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for term in terms.iter().take(MAX_TERMS) {
            tracing::info!(source = "facebook", term = %term, "searching");
            match self.search(term).await {
                Ok(items) => {
                    for item in items {
                        if seen_ids.insert(item.id.clone()) {
                            all.push(item);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = ?e, source = "facebook", term = %term, "search failed");
                    self.disable("request error");
                }
            }
            if !self.is_enabled() {
                break;
            }
        }

        tracing::info!(source = "facebook", unique = all.len(), "search_all_terms done");
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_roundtrip() {
        let cookies = parse_cookie_header("c_user=123; xs=abc%3Adef; junk");
        assert_eq!(cookies.get("c_user").map(String::as_str), Some("123"));
        assert_eq!(cookies.get("xs").map(String::as_str), Some("abc%3Adef"));
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn embedded_marketplace_listing_parses() {
        let html = r#"<html><script type="application/json">
            {"data":{"feed":[{
                "id":"8890",
                "marketplace_listing_title":"Mauve armchair",
                "listing_price":{"formatted_amount":"$120"},
                "primary_listing_photo":{"image":{"uri":"https://scontent.xx/p.jpg"}},
                "location":{"reverse_geocode":{"city":"Menlo Park"}}
            }]}}
            </script></html>"#;
        let items = FacebookAdapter::parse_page(html);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, "fb_8890");
        assert_eq!(item.price, Some(120.0));
        assert_eq!(item.location.as_deref(), Some("Menlo Park"));
        assert_eq!(item.image_urls, vec!["https://scontent.xx/p.jpg"]);
    }

    #[tokio::test]
    async fn missing_cookie_means_disabled_and_empty() {
        let net = Arc::new(
            PoliteClient::new(&[], std::time::Duration::from_millis(0)).unwrap(),
        );
        let adapter = FacebookAdapter::new(net, None);
        assert!(!adapter.is_enabled());
        let items = adapter.search_all_terms(&["plum pillow".to_string()]).await;
        assert!(items.is_empty());
    }
}
