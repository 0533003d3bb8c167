// src/scrape/providers/craigslist.rs
//! Craigslist search adapter. Pure HTML scraping: no official API exists.
//! Every fetch goes through the robots gate, the response cache, and the
//! retry executor of the shared `PoliteClient`.

use crate::scrape::cache::ResponseCache;
use crate::scrape::net::PoliteClient;
use crate::scrape::types::{
    normalize_title, parse_price, text_suggests_shipping, ListingItem, Marketplace, Source,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;

const BASE_URL: &str = "https://sfbay.craigslist.org";
const MAX_GALLERY_IMAGES: usize = 8;

fn sel(s: &'static str) -> Selector {
    Selector::parse(s).expect("static selector")
}

struct Selectors {
    result: Selector,
    link: Selector,
    price: Selector,
    meta: Selector,
    img: Selector,
    gallery: Selector,
    time: Selector,
    body: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceCell<Selectors> = OnceCell::new();
    SELECTORS.get_or_init(|| Selectors {
        result: sel("li.cl-static-search-result, div.cl-search-result"),
        link: sel("a"),
        price: sel(".priceinfo, .price"),
        meta: sel(".meta, .location"),
        img: sel("img"),
        gallery: sel("div.gallery img, div.swipe img, a.thumb img"),
        time: sel("time.date"),
        body: sel("section#postingbody"),
    })
}

pub struct CraigslistAdapter {
    net: Arc<PoliteClient>,
    postal: String,
    radius_miles: f64,
}

impl CraigslistAdapter {
    pub fn new(net: Arc<PoliteClient>, postal: String, radius_miles: f64) -> Self {
        Self {
            net,
            postal,
            radius_miles,
        }
    }

    fn search_url() -> String {
        format!("{BASE_URL}/search/sss")
    }

    fn parse_listing(card: ElementRef<'_>) -> Option<ListingItem> {
        let s = selectors();

        let link = card.select(&s.link).next()?;
        let href = link.value().attr("href").unwrap_or_default();
        if href.is_empty() {
            return None;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{BASE_URL}{href}")
        };

        let title = normalize_title(&link.text().collect::<String>());
        if title.is_empty() {
            return None;
        }

        static RE_ID: OnceCell<regex::Regex> = OnceCell::new();
        let re_id = RE_ID.get_or_init(|| regex::Regex::new(r"/(\d+)\.html").unwrap());
        let native_id = re_id
            .captures(&url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| url.clone());

        let price = card
            .select(&s.price)
            .next()
            .and_then(|el| parse_price(&el.text().collect::<String>()));

        let location = card
            .select(&s.meta)
            .next()
            .map(|el| normalize_title(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let mut image_urls = Vec::new();
        if let Some(img) = card.select(&s.img).next() {
            if let Some(src) = img.value().attr("src") {
                if src.contains("craigslist") {
                    image_urls.push(src.to_string());
                }
            }
        }

        let mut item = ListingItem::new(Source::Craigslist, &native_id, title, url);
        item.price = price;
        item.location = location;
        item.image_urls = image_urls;
        item.shippable = text_suggests_shipping(&item.title);
        Some(item)
    }

    /// Fold a fetched listing page into the item: full gallery (capped),
    /// true post date from `<time datetime>`, body shipping scan. The
    /// search-result thumbnail is overwritten when a gallery exists.
    fn apply_details(item: &mut ListingItem, document: &Html) {
        let s = selectors();

        let mut gallery: Vec<String> = Vec::new();
        for img in document.select(&s.gallery) {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .unwrap_or_default();
            if src.is_empty() {
                continue;
            }
            // Swap thumbnail size markers for the full-size variant.
            let src = src.replace("50x50c", "600x450").replace("300x300", "600x450");
            if !gallery.contains(&src) {
                gallery.push(src);
            }
            if gallery.len() >= MAX_GALLERY_IMAGES {
                break;
            }
        }
        if !gallery.is_empty() {
            item.image_urls = gallery;
        }

        if let Some(time_el) = document.select(&s.time).next() {
            if let Some(stamp) = time_el.value().attr("datetime") {
                if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
                    item.posted_date = Some(dt.with_timezone(&Utc));
                }
            }
        }

        if let Some(body) = document.select(&s.body).next() {
            if text_suggests_shipping(&body.text().collect::<String>()) {
                item.shippable = true;
            }
        }
    }
}

#[async_trait::async_trait]
impl Marketplace for CraigslistAdapter {
    fn name(&self) -> &'static str {
        "craigslist"
    }

    fn source(&self) -> Source {
        Source::Craigslist
    }

    async fn search(&self, query: &str) -> Result<Vec<ListingItem>> {
        let url = Self::search_url();
        let params: Vec<(&str, String)> = vec![
            ("query", query.to_string()),
            ("postal", self.postal.clone()),
            ("search_distance", format!("{:.0}", self.radius_miles)),
            ("sort", "date".to_string()),
            ("purveyor", "owner".to_string()),
        ];

        let key = ResponseCache::make_key(&url, &params);
        if let Some(cached) = self.net.cached(&key) {
            tracing::debug!(source = "craigslist", query, "cache hit");
            return Ok(cached);
        }

        let html = self.net.fetch_html(&url, &params).await?;

        let items: Vec<ListingItem> = {
            let document = Html::parse_document(&html);
            document
                .select(&selectors().result)
                .filter_map(Self::parse_listing)
                .collect()
        };

        self.net.store(key, items.clone());
        Ok(items)
    }

    async fn enrich_details(&self, item: &mut ListingItem) -> Result<()> {
        if !self.net.can_fetch(&item.url).await {
            return Ok(());
        }

        let html = self.net.fetch_html(&item.url, &[]).await?;
        let document = Html::parse_document(&html);
        Self::apply_details(item, &document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CARD: &str = r#"
        <li class="cl-static-search-result">
          <a href="/sby/hsh/d/plum-velvet-pillow/7712345678.html">Plum velvet pillow &amp; throw</a>
          <span class="priceinfo">$45</span>
          <span class="meta">Menlo Park</span>
          <img src="https://images.craigslist.org/abc_300x300.jpg">
        </li>"#;

    fn parse_card(html: &str) -> Option<ListingItem> {
        let doc = Html::parse_fragment(html);
        let card = doc.select(&selectors().result).next()?;
        CraigslistAdapter::parse_listing(card)
    }

    #[test]
    fn parses_full_card() {
        let item = parse_card(CARD).unwrap();
        assert_eq!(item.id, "cl_7712345678");
        assert_eq!(item.title, "Plum velvet pillow & throw");
        assert_eq!(item.price, Some(45.0));
        assert_eq!(item.location.as_deref(), Some("Menlo Park"));
        assert_eq!(item.image_urls.len(), 1);
        assert_eq!(item.source, Source::Craigslist);
        assert!(!item.shippable);
    }

    #[test]
    fn card_without_link_is_skipped() {
        let html = r#"<li class="cl-static-search-result"><span>no link</span></li>"#;
        assert!(parse_card(html).is_none());
    }

    #[test]
    fn relative_href_gets_base_url() {
        let item = parse_card(CARD).unwrap();
        assert!(item.url.starts_with("https://sfbay.craigslist.org/"));
    }

    #[test]
    fn shipping_keyword_in_title_marks_shippable() {
        let html = r#"
            <li class="cl-static-search-result">
              <a href="/d/x/123.html">Purple vase - can ship</a>
            </li>"#;
        let item = parse_card(html).unwrap();
        assert!(item.shippable);
    }

    fn listing_page(gallery_count: usize) -> String {
        let imgs: String = (0..gallery_count)
            .map(|i| {
                format!(
                    r#"<img src="https://images.craigslist.org/pic{i}_50x50c.jpg">"#
                )
            })
            .collect();
        format!(
            r#"<html><body>
              <div class="gallery">{imgs}</div>
              <time class="date" datetime="2024-05-01T10:30:00-07:00">may 1</time>
              <section id="postingbody">Lovely plum chair, happy to ship via UPS.</section>
            </body></html>"#
        )
    }

    #[test]
    fn details_fill_gallery_date_and_shipping() {
        let mut item = parse_card(CARD).unwrap();
        let doc = Html::parse_document(&listing_page(3));
        CraigslistAdapter::apply_details(&mut item, &doc);

        assert_eq!(item.image_urls.len(), 3);
        // Thumbnail markers are swapped for the full-size rendition.
        assert_eq!(
            item.image_urls[0],
            "https://images.craigslist.org/pic0_600x450.jpg"
        );
        let posted = item.posted_date.unwrap();
        assert_eq!(posted, Utc.with_ymd_and_hms(2024, 5, 1, 17, 30, 0).unwrap());
        assert!(item.shippable);
    }

    #[test]
    fn gallery_is_capped() {
        let mut item = parse_card(CARD).unwrap();
        let doc = Html::parse_document(&listing_page(20));
        CraigslistAdapter::apply_details(&mut item, &doc);
        assert_eq!(item.image_urls.len(), MAX_GALLERY_IMAGES);
    }

    #[test]
    fn page_without_details_leaves_item_untouched() {
        let mut item = parse_card(CARD).unwrap();
        let thumb = item.image_urls.clone();
        let before = item.posted_date;

        let doc = Html::parse_document("<html><body><p>expired posting</p></body></html>");
        CraigslistAdapter::apply_details(&mut item, &doc);

        assert_eq!(item.image_urls, thumb);
        assert_eq!(item.posted_date, before);
        assert!(!item.shippable);
    }
}
