// src/scrape/providers/mercari.rs
//! Mercari adapter. HTML scraping plus recovery of the embedded JSON state
//! blobs Mercari ships with its pages. Shipping-only marketplace, so every
//! item is shippable.

use crate::scrape::cache::ResponseCache;
use crate::scrape::embedded;
use crate::scrape::net::PoliteClient;
use crate::scrape::types::{normalize_title, parse_price, ListingItem, Marketplace, Source};
use anyhow::Result;
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::Arc;

const BASE_URL: &str = "https://www.mercari.com";

pub struct MercariAdapter {
    net: Arc<PoliteClient>,
}

impl MercariAdapter {
    pub fn new(net: Arc<PoliteClient>) -> Self {
        Self { net }
    }

    /// Item shape inside Mercari's embedded JSON: id + name + price.
    fn from_embedded(obj: &serde_json::Map<String, Value>) -> Option<ListingItem> {
        let native_id = embedded::first_string(obj, &["id"])?;
        let title = normalize_title(&embedded::first_string(obj, &["name"])?);
        if title.is_empty() {
            return None;
        }

        let price = match obj.get("price") {
            Some(Value::Number(n)) => n.as_f64().filter(|p| *p >= 0.0),
            Some(Value::String(s)) => parse_price(s),
            _ => None,
        };

        let mut image_urls = Vec::new();
        if let Some(Value::Array(thumbs)) = obj.get("thumbnails") {
            if let Some(Value::Object(first)) = thumbs.first() {
                if let Some(Value::String(u)) = first.get("url") {
                    if !u.is_empty() {
                        image_urls.push(u.clone());
                    }
                }
            }
        }

        let url = format!("{BASE_URL}/item/{native_id}");
        let mut item = ListingItem::new(Source::Mercari, &native_id, title, url);
        item.price = price;
        item.image_urls = image_urls;
        item.shippable = true;
        Some(item)
    }

    fn card_selector() -> &'static Selector {
        static SEL: OnceCell<Selector> = OnceCell::new();
        SEL.get_or_init(|| {
            Selector::parse(r#"[data-testid="ItemContainer"], a[href*="/item/"]"#)
                .expect("static selector")
        })
    }

    fn parse_card(card: ElementRef<'_>) -> Option<ListingItem> {
        static LINK: OnceCell<Selector> = OnceCell::new();
        static TITLE: OnceCell<Selector> = OnceCell::new();
        static PRICE: OnceCell<Selector> = OnceCell::new();
        static IMG: OnceCell<Selector> = OnceCell::new();

        let link_sel =
            LINK.get_or_init(|| Selector::parse(r#"a[href*="/item/"]"#).expect("static selector"));
        let title_sel = TITLE.get_or_init(|| {
            Selector::parse(r#"[class*="ItemName"], [data-testid="ItemName"], span, p"#)
                .expect("static selector")
        });
        let price_sel = PRICE.get_or_init(|| {
            Selector::parse(r#"[class*="Price"], [data-testid="Price"]"#).expect("static selector")
        });
        let img_sel = IMG.get_or_init(|| Selector::parse("img").expect("static selector"));

        let link = if card.value().name() == "a" {
            Some(card)
        } else {
            card.select(link_sel).next()
        }?;

        let mut url = link.value().attr("href").unwrap_or_default().to_string();
        if url.is_empty() {
            return None;
        }
        if !url.starts_with("http") {
            url = format!("{BASE_URL}{url}");
        }

        static RE_ID: OnceCell<regex::Regex> = OnceCell::new();
        let re_id = RE_ID.get_or_init(|| regex::Regex::new(r"/item/([^/?]+)").unwrap());
        let native_id = re_id
            .captures(&url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| url.clone());

        let title = card
            .select(title_sel)
            .next()
            .map(|el| normalize_title(&el.text().collect::<String>()))
            .unwrap_or_default();
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
                image_urls.push(src.to_string());
            }
        }

        let mut item = ListingItem::new(Source::Mercari, &native_id, title, url);
        item.price = price;
        item.image_urls = image_urls;
        item.shippable = true;
        Some(item)
    }

    fn parse_page(html: &str) -> Vec<ListingItem> {
        let document = Html::parse_document(html);

        let mut items: Vec<ListingItem> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut push = |item: ListingItem, items: &mut Vec<ListingItem>| {
            if seen.insert(item.id.clone()) {
                items.push(item);
            }
        };

        // Embedded JSON first: richer than the rendered cards.
        static SCRIPT: OnceCell<Selector> = OnceCell::new();
        let script_sel = SCRIPT
            .get_or_init(|| Selector::parse(r#"script[type="application/json"]"#).expect("static selector"));
        for script in document.select(script_sel) {
            let text: String = script.text().collect();
            if let Ok(data) = serde_json::from_str::<Value>(&text) {
                for item in embedded::collect_items(&data, &Self::from_embedded) {
                    push(item, &mut items);
                }
            }
        }

        for item in document
            .select(Self::card_selector())
            .filter_map(Self::parse_card)
        {
            push(item, &mut items);
        }
        items
    }
}

#[async_trait::async_trait]
impl Marketplace for MercariAdapter {
    fn name(&self) -> &'static str {
        "mercari"
    }

    fn source(&self) -> Source {
        Source::Mercari
    }

    async fn search(&self, query: &str) -> Result<Vec<ListingItem>> {
        let url = format!("{BASE_URL}/search");
        let params: Vec<(&str, String)> = vec![
            ("keyword", query.to_string()),
            ("status", "on_sale".to_string()),
            ("sortBy", "created_time".to_string()),
        ];

        let key = ResponseCache::make_key(&url, &params);
        if let Some(cached) = self.net.cached(&key) {
            return Ok(cached);
        }

        let html = self.net.fetch_html(&url, &params).await?;
        let items = Self::parse_page(&html);

        self.net.store(key, items.clone());
        Ok(items)
    }
}
