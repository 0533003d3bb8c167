// src/scrape/embedded.rs
//! Best-effort recovery of listing data from server-rendered JSON blobs.
//!
//! Several marketplaces embed richer state in `<script type="application/json">`
//! or `__NEXT_DATA__` tags than they render as HTML. This walks such a blob
//! looking for objects that "look like" an item: an id-like key plus a
//! name/price-like key. Depth-limited and heuristic; it never gates the
//! correctness of the pipeline.

use once_cell::sync::OnceCell;
use serde_json::Value;

const MAX_DEPTH: usize = 12;

const ID_KEYS: &[&str] = &["id", "listing_id", "listingId", "item_id", "itemId"];
const NAME_KEYS: &[&str] = &["name", "title", "listing_title", "marketplace_listing_title"];
const PRICE_KEYS: &[&str] = &["price", "price_amount", "listing_price", "priceAmount"];

/// Whether `obj` has the shape of an item record.
pub fn looks_like_item(obj: &serde_json::Map<String, Value>) -> bool {
    let has_id = ID_KEYS.iter().any(|k| obj.contains_key(*k));
    let has_name_or_price = NAME_KEYS.iter().chain(PRICE_KEYS.iter()).any(|k| obj.contains_key(*k));
    has_id && has_name_or_price
}

/// Walk `value` collecting every object that looks like an item, applying
/// `convert` to each. `convert` returning `None` skips the candidate.
pub fn collect_items<T>(
    value: &Value,
    convert: &dyn Fn(&serde_json::Map<String, Value>) -> Option<T>,
) -> Vec<T> {
    let mut out = Vec::new();
    walk(value, convert, &mut out, 0);
    out
}

fn walk<T>(
    value: &Value,
    convert: &dyn Fn(&serde_json::Map<String, Value>) -> Option<T>,
    out: &mut Vec<T>,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(obj) => {
            if looks_like_item(obj) {
                if let Some(item) = convert(obj) {
                    out.push(item);
                }
            }
            for v in obj.values() {
                walk(v, convert, out, depth + 1);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                walk(v, convert, out, depth + 1);
            }
        }
        _ => {}
    }
}

/// Pull the `__NEXT_DATA__` JSON blob out of a page, if present. Handles
/// both the script-tag form and the inline-assignment form.
pub fn extract_next_data(html: &str) -> Option<Value> {
    static RE_TAG: OnceCell<regex::Regex> = OnceCell::new();
    static RE_ASSIGN: OnceCell<regex::Regex> = OnceCell::new();

    let re_tag = RE_TAG.get_or_init(|| {
        regex::Regex::new(r#"(?s)<script[^>]*id="__NEXT_DATA__"[^>]*>\s*(\{.+?\})\s*</script>"#)
            .unwrap()
    });
    let re_assign = RE_ASSIGN.get_or_init(|| {
        regex::Regex::new(r#"(?s)__NEXT_DATA__\s*=\s*(\{.+?\})\s*;?\s*</script>"#).unwrap()
    });

    for re in [re_tag, re_assign] {
        if let Some(caps) = re.captures(html) {
            if let Some(v) = caps
                .get(1)
                .and_then(|m| serde_json::from_str(m.as_str()).ok())
            {
                return Some(v);
            }
        }
    }
    None
}

/// String value for the first of `keys` present in `obj`.
pub fn first_string(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for k in keys {
        match obj.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}
