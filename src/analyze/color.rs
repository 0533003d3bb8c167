// src/analyze/color.rs
//! Plum/purple detection. Combines title keyword matching with image
//! analysis: dominant-color and palette extraction by RGB bucket
//! quantization, plus a histogram pass counting purple pixels. Every
//! image failure is swallowed per-image; the analyzer never fails an
//! item outright.

use crate::scrape::types::ListingItem;
use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use std::collections::HashMap;
use std::time::Duration;

/// Plum/purple hue windows in degrees.
const PLUM_HUE_RANGES: [(f64, f64); 3] = [
    (270.0, 330.0), // purple/plum
    (330.0, 360.0), // magenta/plum
    (0.0, 15.0),    // red-violet
];

const STRONG_KEYWORDS: [&str; 3] = ["plum", "eggplant", "aubergine"];
const MEDIUM_KEYWORDS: [&str; 3] = ["purple", "violet", "grape"];
const WEAK_KEYWORDS: [&str; 5] = ["mauve", "lavender", "burgundy", "wine", "berry"];

const MAX_IMAGES_PER_ITEM: usize = 3;
const THUMB_SIZE: u32 = 100;
const PALETTE_SIZE: usize = 6;
const IMAGE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ColorAnalyzer {
    http: reqwest::Client,
}

impl ColorAnalyzer {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(IMAGE_TIMEOUT)
            .build()
            .context("building image HTTP client")?;
        Ok(Self { http })
    }

    /// Color score for one listing in [0, 1]. Keyword evidence alone is
    /// discounted; image evidence wins when both are present.
    pub async fn analyze_item(&self, item: &ListingItem) -> f64 {
        let keyword = keyword_score(&item.title);

        let mut image_scores = Vec::new();
        for image_url in item.image_urls.iter().take(MAX_IMAGES_PER_ITEM) {
            match self.analyze_image_url(image_url).await {
                Ok(score) if score > 0.0 => image_scores.push(score),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = ?e, url = %image_url, "image analysis failed");
                }
            }
        }

        combine_scores(keyword, &image_scores)
    }

    async fn analyze_image_url(&self, url: &str) -> Result<f64> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .context("image request")?
            .error_for_status()
            .context("image status")?
            .bytes()
            .await
            .context("image body")?;

        let img = image::load_from_memory(&bytes).context("decoding image")?;
        Ok(analyze_image(&img))
    }
}

/// Score one decoded image: best of dominant color, palette (discounted),
/// and purple-pixel histogram (discounted further).
pub fn analyze_image(img: &DynamicImage) -> f64 {
    let thumb = img.thumbnail(THUMB_SIZE, THUMB_SIZE).to_rgb8();

    let palette = extract_palette(&thumb, PALETTE_SIZE);
    let dominant_score = palette.first().map(|&rgb| score_rgb(rgb)).unwrap_or(0.0);
    let best_palette_score = palette
        .iter()
        .map(|&rgb| score_rgb(rgb))
        .fold(0.0, f64::max);
    let histogram_score = histogram_score(&thumb);

    dominant_score
        .max(best_palette_score * 0.9)
        .max(histogram_score * 0.8)
}

/// Tiered keyword evidence from the title.
pub fn keyword_score(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    if STRONG_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return 0.9;
    }
    if MEDIUM_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return 0.7;
    }
    if WEAK_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return 0.5;
    }
    0.0
}

/// Merge keyword and image evidence. A lone keyword hit is low-confidence.
pub fn combine_scores(keyword: f64, image_scores: &[f64]) -> f64 {
    let mut scores: Vec<f64> = Vec::new();
    if keyword > 0.0 {
        scores.push(keyword);
    }
    scores.extend(image_scores.iter().copied().filter(|s| *s > 0.0));

    if scores.is_empty() {
        return 0.0;
    }
    if scores.len() == 1 && keyword > 0.0 {
        return keyword * 0.7;
    }
    scores.iter().copied().fold(0.0, f64::max)
}

/// How plum is a single RGB color. Desaturated, very dark, or very light
/// colors are rejected outright; inside the hue windows the score prefers
/// medium saturation and value.
pub fn score_rgb(rgb: [u8; 3]) -> f64 {
    let (h, s, v) = rgb_to_hsv(rgb);

    if s < 0.15 || v < 0.15 || v > 0.95 {
        return 0.0;
    }
    if !in_plum_range(h) {
        return 0.0;
    }

    let sat_score = 1.0 - (s - 0.5).abs() * 0.5;
    let val_score = 1.0 - (v - 0.5).abs() * 0.5;
    0.8 * sat_score * val_score
}

fn in_plum_range(hue: f64) -> bool {
    PLUM_HUE_RANGES
        .iter()
        .any(|&(lo, hi)| hue >= lo && hue <= hi)
}

/// Fraction of purple pixels, bucketed into a score.
fn histogram_score(img: &RgbImage) -> f64 {
    let total = (img.width() * img.height()) as f64;
    if total == 0.0 {
        return 0.0;
    }

    let purple = img
        .pixels()
        .filter(|p| {
            let (h, s, v) = rgb_to_hsv(p.0);
            s > 0.2 && v > 0.2 && in_plum_range(h)
        })
        .count() as f64;

    let ratio = purple / total;
    if ratio > 0.3 {
        0.95
    } else if ratio > 0.2 {
        0.85
    } else if ratio > 0.1 {
        0.7
    } else if ratio > 0.05 {
        0.5
    } else if ratio > 0.02 {
        0.3
    } else {
        0.0
    }
}

/// Quantize to 4 bits per channel and return the mean color of the most
/// populated buckets, largest first. Index 0 is the dominant color.
fn extract_palette(img: &RgbImage, count: usize) -> Vec<[u8; 3]> {
    // bucket key -> (pixel count, summed r/g/b)
    let mut buckets: HashMap<u16, (u64, [u64; 3])> = HashMap::new();
    for p in img.pixels() {
        let [r, g, b] = p.0;
        let key = ((r as u16 >> 4) << 8) | ((g as u16 >> 4) << 4) | (b as u16 >> 4);
        let entry = buckets.entry(key).or_insert((0, [0, 0, 0]));
        entry.0 += 1;
        entry.1[0] += r as u64;
        entry.1[1] += g as u64;
        entry.1[2] += b as u64;
    }

    let mut ranked: Vec<(u64, [u64; 3])> = buckets.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    ranked
        .into_iter()
        .take(count)
        .map(|(n, sums)| {
            [
                (sums[0] / n) as u8,
                (sums[1] / n) as u8,
                (sums[2] / n) as u8,
            ]
        })
        .collect()
}

fn rgb_to_hsv(rgb: [u8; 3]) -> (f64, f64, f64) {
    let r = rgb[0] as f64 / 255.0;
    let g = rgb[1] as f64 / 255.0;
    let b = rgb[2] as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    (h, s, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    // A comfortably plum color: hue ~295, medium sat and value.
    const PLUM: [u8; 3] = [140, 60, 150];

    #[test]
    fn keyword_tiers() {
        assert_eq!(keyword_score("Plum velvet pillow"), 0.9);
        assert_eq!(keyword_score("Purple throw blanket"), 0.7);
        assert_eq!(keyword_score("Mauve table runner"), 0.5);
        assert_eq!(keyword_score("Blue pillow"), 0.0);
        assert_eq!(keyword_score(""), 0.0);
    }

    #[test]
    fn keyword_only_evidence_is_discounted() {
        let score = combine_scores(0.9, &[]);
        assert!((score - 0.63).abs() < 1e-9);
    }

    #[test]
    fn image_evidence_beats_keyword_discount() {
        assert_eq!(combine_scores(0.9, &[0.8]), 0.9);
        assert_eq!(combine_scores(0.5, &[0.8]), 0.8);
        assert_eq!(combine_scores(0.0, &[]), 0.0);
    }

    #[test]
    fn grays_and_extremes_score_zero() {
        assert_eq!(score_rgb([128, 128, 128]), 0.0); // desaturated
        assert_eq!(score_rgb([20, 5, 20]), 0.0); // too dark
        assert_eq!(score_rgb([250, 245, 250]), 0.0); // too light
        assert_eq!(score_rgb([40, 180, 60]), 0.0); // green, wrong hue
    }

    #[test]
    fn plum_rgb_scores_positive() {
        let s = score_rgb(PLUM);
        assert!(s > 0.5, "plum scored {s}");
        assert!(s <= 0.8);
    }

    #[test]
    fn solid_plum_image_scores_high() {
        let img = RgbImage::from_pixel(64, 64, Rgb(PLUM));
        let score = analyze_image(&DynamicImage::ImageRgb8(img));
        assert!(score > 0.6, "solid plum image scored {score}");
    }

    #[test]
    fn solid_white_image_scores_zero() {
        let img = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        assert_eq!(analyze_image(&DynamicImage::ImageRgb8(img)), 0.0);
    }

    #[test]
    fn dominant_color_comes_from_largest_region() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb(PLUM));
        for x in 0..3 {
            img.put_pixel(x, 0, Rgb([10, 200, 30]));
        }
        let palette = extract_palette(&img, 6);
        assert_eq!(palette[0], PLUM);
    }

    #[test]
    fn histogram_ratio_buckets() {
        // 25 of 100 pixels plum -> ratio 0.25 -> 0.85 bucket.
        let mut img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        for i in 0..25u32 {
            img.put_pixel(i % 10, i / 10, Rgb(PLUM));
        }
        assert_eq!(histogram_score(&img), 0.85);
    }
}
