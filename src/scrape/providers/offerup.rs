// src/scrape/providers/offerup.rs
//! OfferUp adapter. Location-scoped HTML scraping of the search results
//! page; no official API is exposed.

use crate::scrape::cache::ResponseCache;
use crate::scrape::net::PoliteClient;
use crate::scrape::types::{
    normalize_title, parse_price, text_suggests_shipping, ListingItem, Marketplace, Source,
};
use anyhow::Result;
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;

const BASE_URL: &str = "https://offerup.com";

pub struct OfferUpAdapter {
    net: Arc<PoliteClient>,
    location_slug: String,
    radius_miles: f64,
}

impl OfferUpAdapter {
    pub fn new(net: Arc<PoliteClient>, location_slug: String, radius_miles: f64) -> Self {
        Self {
            net,
            location_slug,
            radius_miles,
        }
    }

    fn card_selector() -> &'static Selector {
        static SEL: OnceCell<Selector> = OnceCell::new();
        SEL.get_or_init(|| {
            Selector::parse(r#"[data-testid="listing-card"], .listing-card, a[href*="/item/"]"#)
                .expect("static selector")
        })
    }

    fn parse_card(card: ElementRef<'_>) -> Option<ListingItem> {
        static LINK: OnceCell<Selector> = OnceCell::new();
        static TITLE: OnceCell<Selector> = OnceCell::new();
        static PRICE: OnceCell<Selector> = OnceCell::new();
        static LOC: OnceCell<Selector> = OnceCell::new();
        static IMG: OnceCell<Selector> = OnceCell::new();

        let link_sel =
            LINK.get_or_init(|| Selector::parse(r#"a[href*="/item/"]"#).expect("static selector"));
        let title_sel = TITLE.get_or_init(|| {
            Selector::parse(r#"[class*="title"], h2, h3, span[class*="Title"]"#)
                .expect("static selector")
        });
        let price_sel = PRICE.get_or_init(|| {
            Selector::parse(r#"[class*="price"], span[class*="Price"]"#).expect("static selector")
        });
        let loc_sel = LOC.get_or_init(|| {
            Selector::parse(r#"[class*="location"], span[class*="Location"]"#)
                .expect("static selector")
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

        let mut title = card
            .select(title_sel)
            .next()
            .map(|el| normalize_title(&el.text().collect::<String>()))
            .unwrap_or_default();
        if title.is_empty() {
            let text = normalize_title(&link.text().collect::<String>());
            title = text.chars().take(100).collect();
        }
        if title.is_empty() {
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

        let shippable = text_suggests_shipping(&title);

        let mut item = ListingItem::new(Source::OfferUp, &native_id, title, url);
        item.price = price;
        item.location = location;
        item.image_urls = image_urls;
        item.shippable = shippable;
        Some(item)
    }

    fn parse_page(html: &str) -> Vec<ListingItem> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        document
            .select(Self::card_selector())
            .filter_map(Self::parse_card)
            .filter(|item| seen.insert(item.id.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Marketplace for OfferUpAdapter {
    fn name(&self) -> &'static str {
        "offerup"
    }

    fn source(&self) -> Source {
        Source::OfferUp
    }

    async fn search(&self, query: &str) -> Result<Vec<ListingItem>> {
        let url = format!("{BASE_URL}/search");
        let params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("location", self.location_slug.clone()),
            ("radius", format!("{:.0}", self.radius_miles)),
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
    fn parses_card_and_dedups_nested_anchor() {
        let html = r#"
            <div data-testid="listing-card">
              <a href="/item/ou-777">
                <span class="Title-x">Purple accent table</span>
              </a>
              <span class="Price-y">$60</span>
              <span class="Location-z">Redwood City, CA</span>
              <img src="https://images.offerup.com/t.jpg">
            </div>"#;
        let items = OfferUpAdapter::parse_page(html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "offerup_ou-777");
        assert_eq!(items[0].price, Some(60.0));
        assert_eq!(items[0].location.as_deref(), Some("Redwood City, CA"));
    }

    #[test]
    fn bare_anchor_without_text_is_skipped() {
        let html = r#"<a href="/item/xyz"></a>"#;
        assert!(OfferUpAdapter::parse_page(html).is_empty());
    }
}
