// src/rank.rs
//! Multi-factor ranking: 40% color match, 30% recency, 15% price value,
//! 15% proximity. Proximity uses a static nearby-city lookup instead of
//! geocoding; anything the table misses counts as maximally far.

use crate::scrape::types::ListingItem;
use chrono::Utc;

pub const COLOR_THRESHOLD: f64 = 0.3;

const COLOR_WEIGHT: f64 = 0.40;
const RECENCY_WEIGHT: f64 = 0.30;
const PRICE_WEIGHT: f64 = 0.15;
const PROXIMITY_WEIGHT: f64 = 0.15;

/// One week of linear recency decay, in hours.
const RECENCY_WINDOW_HOURS: f64 = 168.0;
/// Accent pieces above this price score zero on the price factor.
const PRICE_CEILING: f64 = 500.0;

/// Road miles from the target area, matched case-insensitively as a
/// substring of the listing location. Order matters: more specific names
/// come before names they contain.
const NEARBY_CITIES: [(&str, f64); 15] = [
    ("palo alto", 0.0),
    ("menlo park", 3.0),
    ("stanford", 1.0),
    ("mountain view", 5.0),
    ("los altos", 4.0),
    ("redwood city", 7.0),
    ("sunnyvale", 8.0),
    ("san jose", 15.0),
    ("santa clara", 12.0),
    ("cupertino", 10.0),
    ("san mateo", 12.0),
    ("fremont", 18.0),
    ("oakland", 25.0),
    ("san francisco", 30.0),
    ("sf", 30.0),
];

/// Estimated distance for a listing location; unknown or missing locations
/// get `max_distance_miles`.
pub fn distance_for_location(location: Option<&str>, max_distance_miles: f64) -> f64 {
    let Some(location) = location else {
        return max_distance_miles;
    };
    if location.is_empty() {
        return max_distance_miles;
    }
    let lower = location.to_lowercase();
    for (city, miles) in NEARBY_CITIES {
        if lower.contains(city) {
            return miles;
        }
    }
    max_distance_miles
}

/// Composite ranking score; higher is better. Missing signals fall back to
/// a neutral 0.5, shippable items get full proximity credit.
pub fn calculate_score(item: &ListingItem, max_distance_miles: f64) -> f64 {
    let color_score = item.color_score;

    let recency_score = match item.posted_date {
        Some(posted) => {
            let hours_old = (Utc::now() - posted).num_seconds() as f64 / 3600.0;
            (1.0 - hours_old / RECENCY_WINDOW_HOURS).max(0.0)
        }
        None => 0.5,
    };

    let price_score = match item.price {
        Some(price) if price > 0.0 => (1.0 - price / PRICE_CEILING).max(0.0),
        _ => 0.5,
    };

    let proximity_score = if item.shippable {
        1.0
    } else if let Some(miles) = item.distance_miles {
        (1.0 - miles / max_distance_miles).max(0.0)
    } else {
        0.5
    };

    color_score * COLOR_WEIGHT
        + recency_score * RECENCY_WEIGHT
        + price_score * PRICE_WEIGHT
        + proximity_score * PROXIMITY_WEIGHT
}

/// Gate on the color threshold, sort by composite score (stable,
/// descending), and keep at most `max_items`.
pub fn rank_and_select(
    mut items: Vec<ListingItem>,
    max_distance_miles: f64,
    max_items: usize,
) -> Vec<ListingItem> {
    items.retain(|item| item.color_score >= COLOR_THRESHOLD);

    let mut scored: Vec<(f64, ListingItem)> = items
        .into_iter()
        .map(|item| (calculate_score(&item, max_distance_miles), item))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored.truncate(max_items);
    scored.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::types::Source;
    use chrono::Duration;

    const MAX_MILES: f64 = 20.0;

    fn item(native_id: &str, color: f64) -> ListingItem {
        let mut it = ListingItem::new(
            Source::Craigslist,
            native_id,
            format!("item {native_id}"),
            "https://example.org".to_string(),
        );
        it.color_score = color;
        it
    }

    #[test]
    fn known_city_distances() {
        assert_eq!(distance_for_location(Some("Palo Alto, CA"), MAX_MILES), 0.0);
        assert_eq!(distance_for_location(Some("downtown MENLO PARK"), MAX_MILES), 3.0);
        assert_eq!(distance_for_location(Some("Lake Tahoe"), MAX_MILES), MAX_MILES);
        assert_eq!(distance_for_location(None, MAX_MILES), MAX_MILES);
        assert_eq!(distance_for_location(Some(""), MAX_MILES), MAX_MILES);
    }

    #[test]
    fn higher_color_score_ranks_higher_all_else_equal() {
        let mut a = item("a", 0.9);
        let mut b = item("b", 0.4);
        for it in [&mut a, &mut b] {
            it.price = Some(100.0);
            it.distance_miles = Some(5.0);
            it.posted_date = Some(Utc::now() - Duration::hours(1));
        }
        assert!(calculate_score(&a, MAX_MILES) > calculate_score(&b, MAX_MILES));
    }

    #[test]
    fn shippable_outranks_far_local_item() {
        let mut near = item("near", 0.6);
        near.distance_miles = Some(18.0);
        let mut shipped = item("ship", 0.6);
        shipped.shippable = true;
        shipped.distance_miles = Some(MAX_MILES);
        assert!(calculate_score(&shipped, MAX_MILES) > calculate_score(&near, MAX_MILES));
    }

    #[test]
    fn missing_signals_fall_back_to_neutral() {
        let mut it = item("x", 0.5);
        it.posted_date = None;
        it.price = None;
        it.distance_miles = None;
        // 0.5*0.4 + 0.5*0.3 + 0.5*0.15 + 0.5*0.15 = 0.5
        let score = calculate_score(&it, MAX_MILES);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn gate_drops_below_threshold_and_cap_applies() {
        let mut items = Vec::new();
        for i in 0..40 {
            let mut it = item(&format!("{i}"), 0.8);
            it.posted_date = Some(Utc::now() - Duration::hours(i as i64));
            items.push(it);
        }
        items.push(item("pale", 0.29));

        let selected = rank_and_select(items, MAX_MILES, 30);
        assert_eq!(selected.len(), 30);
        assert!(selected.iter().all(|i| i.color_score >= COLOR_THRESHOLD));
        // Newest first given identical other factors.
        assert_eq!(selected[0].id, "cl_0");
    }

    #[test]
    fn threshold_is_inclusive() {
        let selected = rank_and_select(vec![item("edge", 0.3)], MAX_MILES, 30);
        assert_eq!(selected.len(), 1);
    }
}
