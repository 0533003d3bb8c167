// tests/color_digest.rs
// Color scoring fed straight into digest rendering, over synthetic images.

use image::{DynamicImage, Rgb, RgbImage};
use plumfinder::analyze::color::{analyze_image, combine_scores, keyword_score};
use plumfinder::notify::email::{render_html, render_plain};
use plumfinder::scrape::types::{ListingItem, Source};

const PLUM: [u8; 3] = [140, 60, 150];

#[test]
fn plum_image_scores_above_the_gate_without_keywords() {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 40, Rgb(PLUM)));
    let image_score = analyze_image(&img);
    let final_score = combine_scores(keyword_score("Mid-century accent chair"), &[image_score]);
    assert!(final_score >= 0.3, "scored {final_score}");
}

#[test]
fn beige_image_with_plum_title_relies_on_discounted_keyword() {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 40, Rgb([222, 211, 195])));
    let image_score = analyze_image(&img);
    assert_eq!(image_score, 0.0);

    let final_score = combine_scores(keyword_score("Plum velvet pillow"), &[]);
    assert!((final_score - 0.63).abs() < 1e-9);
}

#[test]
fn digest_renders_scored_items_in_both_bodies() {
    let mut first = ListingItem::new(
        Source::Etsy,
        "100",
        "Aubergine ceramic vase".to_string(),
        "https://www.etsy.com/listing/100".to_string(),
    );
    first.price = Some(42.0);
    first.color_score = 0.9;
    first.shippable = true;

    let mut second = ListingItem::new(
        Source::Craigslist,
        "200",
        "Purple accent table".to_string(),
        "https://sfbay.craigslist.org/200.html".to_string(),
    );
    second.price = Some(60.0);
    second.location = Some("Menlo Park".to_string());
    second.color_score = 0.45;

    let items = vec![first, second];
    let html = render_html(&items);
    let plain = render_plain(&items);

    assert!(html.contains("2 new plum accent pieces"));
    assert!(html.contains("90% plum"));
    assert!(html.contains("45% plum"));
    assert!(html.contains("Ships"));
    assert!(html.contains("https://www.etsy.com/listing/100"));

    assert!(plain.contains("1. Aubergine ceramic vase"));
    assert!(plain.contains("2. Purple accent table"));
    assert!(plain.contains("Location: Menlo Park"));
}
