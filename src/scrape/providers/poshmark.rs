// src/scrape/providers/poshmark.rs
//! Poshmark Home adapter. Scrapes the Home-department search page and
//! additionally mines the `__NEXT_DATA__` blob for listing records the
//! rendered HTML omits. Poshmark is shipping-based.

use crate::scrape::cache::ResponseCache;
use crate::scrape::embedded;
use crate::scrape::net::PoliteClient;
use crate::scrape::types::{normalize_title, parse_price, ListingItem, Marketplace, Source};
use anyhow::Result;
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

const BASE_URL: &str = "https://poshmark.com";

pub struct PoshmarkAdapter {
    net: Arc<PoliteClient>,
}

impl PoshmarkAdapter {
    pub fn new(net: Arc<PoliteClient>) -> Self {
        Self { net }
    }

    /// Poshmark's embedded shape: id + title + price_amount {val}.
    fn from_embedded(obj: &serde_json::Map<String, Value>) -> Option<ListingItem> {
        let native_id = embedded::first_string(obj, &["id"])?;
        let title = normalize_title(&embedded::first_string(obj, &["title"])?);
        if title.is_empty() {
            return None;
        }

        let price = match obj.get("price_amount") {
            Some(Value::Object(amount)) => match amount.get("val") {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => parse_price(s),
                _ => None,
            },
            _ => None,
        };

        let slug = urlencoding::encode(&title.replace(' ', "-")).into_owned();
        let url = format!("{BASE_URL}/listing/{slug}-{native_id}");

        let mut item = ListingItem::new(Source::Poshmark, &native_id, title, url);
        item.price = price;
        if let Some(Value::String(pic)) = obj.get("picture_url") {
            if !pic.is_empty() {
                item.image_urls.push(pic.clone());
            }
        }
        item.shippable = true;
        Some(item)
    }

    fn card_selector() -> &'static Selector {
        static SEL: OnceCell<Selector> = OnceCell::new();
        SEL.get_or_init(|| {
            Selector::parse(r#"[data-et-name="listing"], .card, a[href*="/listing/"]"#)
                .expect("static selector")
        })
    }

    fn parse_card(card: ElementRef<'_>) -> Option<ListingItem> {
        static LINK: OnceCell<Selector> = OnceCell::new();
        static TITLE: OnceCell<Selector> = OnceCell::new();
        static PRICE: OnceCell<Selector> = OnceCell::new();
        static IMG: OnceCell<Selector> = OnceCell::new();

        let link_sel = LINK
            .get_or_init(|| Selector::parse(r#"a[href*="/listing/"]"#).expect("static selector"));
        let title_sel = TITLE.get_or_init(|| {
            Selector::parse(r#"[class*="title"], h2, h3"#).expect("static selector")
        });
        let price_sel = PRICE.get_or_init(|| {
            Selector::parse(r#"[class*="price"], span[class*="Price"]"#).expect("static selector")
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

        // Listing URLs end in "-<id>".
        static RE_ID: OnceCell<regex::Regex> = OnceCell::new();
        let re_id =
            RE_ID.get_or_init(|| regex::Regex::new(r"/listing/(?:.*-)?([0-9a-f]{8,}|\d+)$").unwrap());
        let native_id = re_id.captures(&url)?.get(1)?.as_str().to_string();

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

        let mut item = ListingItem::new(Source::Poshmark, &native_id, title, url);
        item.price = price;
        item.image_urls = image_urls;
        item.shippable = true;
        Some(item)
    }

    fn parse_page(html: &str) -> Vec<ListingItem> {
        let mut items: Vec<ListingItem> = Vec::new();
        let mut seen = HashSet::new();

        if let Some(data) = embedded::extract_next_data(html) {
            for item in embedded::collect_items(&data, &Self::from_embedded) {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                }
            }
        }

        let document = Html::parse_document(html);
        for item in document
            .select(Self::card_selector())
            .filter_map(Self::parse_card)
        {
            if seen.insert(item.id.clone()) {
                items.push(item);
            }
        }
        items
    }
}

#[async_trait::async_trait]
impl Marketplace for PoshmarkAdapter {
    fn name(&self) -> &'static str {
        "poshmark"
    }

    fn source(&self) -> Source {
        Source::Poshmark
    }

    async fn search(&self, query: &str) -> Result<Vec<ListingItem>> {
        let url = format!("{BASE_URL}/search");
        let params: Vec<(&str, String)> = vec![
            ("query", query.to_string()),
            ("department", "Home".to_string()),
            ("sort_by", "added_desc".to_string()),
            ("availability", "available".to_string()),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_data_listings_are_mined() {
        let html = r#"<html><script id="__NEXT_DATA__" type="application/json">
            {"props":{"pageProps":{"listings":[
                {"id":"64aa01", "title":"Plum velvet lumbar pillow",
                 "price_amount":{"val":28,"currency_code":"USD"},
                 "picture_url":"https://di2ponv0v5otw.cloudfront.net/p1.jpg"}
            ]}}}
            </script></html>"#;
        let items = PoshmarkAdapter::parse_page(html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "poshmark_64aa01");
        assert_eq!(items[0].price, Some(28.0));
        assert!(items[0].url.contains("Plum-velvet-lumbar-pillow-64aa01"));
        assert!(items[0].shippable);
    }

    #[test]
    fn html_card_id_comes_from_url_suffix() {
        let html = r#"
            <div class="card">
              <a href="/listing/Grape-ceramic-vase-abcdef1234"></a>
              <h3 class="title">Grape ceramic vase</h3>
              <span class="price">$35</span>
            </div>"#;
        let items = PoshmarkAdapter::parse_page(html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "poshmark_abcdef1234");
    }

    #[test]
    fn page_without_data_or_cards_is_empty() {
        assert!(PoshmarkAdapter::parse_page("<html><body></body></html>").is_empty());
    }
}
