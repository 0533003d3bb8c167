// src/config.rs
//! Runtime configuration: environment variables for credentials and knobs,
//! an optional TOML file for the search-term lists, built-in defaults for
//! everything else.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_CONFIG_PATH: &str = "PLUMFINDER_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "config/plumfinder.toml";

const DEFAULT_SEARCH_TERMS: [&str; 20] = [
    "plum pillow",
    "purple pillow",
    "violet pillow",
    "eggplant pillow",
    "plum vase",
    "purple vase",
    "violet vase",
    "plum plant pot",
    "purple planter",
    "violet pot",
    "plum side table",
    "purple accent table",
    "plum end table",
    "plum decor",
    "purple home decor",
    "plum accent",
    "plum throw",
    "purple throw blanket",
    "plum cushion",
    "purple cushion",
];

const DEFAULT_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub target_zip: String,
    pub max_distance_miles: f64,
    pub search_terms: Vec<String>,
    pub excluded_terms: Vec<String>,
    pub user_agents: Vec<String>,
    pub request_delay: Duration,
    pub max_items_per_email: usize,
    pub db_path: PathBuf,
    pub offerup_location_slug: String,

    pub ebay_app_id: Option<String>,
    pub ebay_cert_id: Option<String>,
    pub etsy_api_key: Option<String>,
    pub fb_session_cookie: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct TermsFile {
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub excluded_terms: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let terms = load_terms_default()?;

        let search_terms = if terms.search_terms.is_empty() {
            DEFAULT_SEARCH_TERMS.iter().map(|s| s.to_string()).collect()
        } else {
            terms.search_terms
        };

        let request_delay_secs: u64 = match std::env::var("REQUEST_DELAY") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("REQUEST_DELAY is not a number: {v:?}"))?,
            Err(_) => 2,
        };

        let max_distance_miles: f64 = match std::env::var("MAX_DISTANCE_MILES") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("MAX_DISTANCE_MILES is not a number: {v:?}"))?,
            Err(_) => 20.0,
        };

        Ok(Self {
            target_zip: env_or("TARGET_ZIP", "94301"),
            max_distance_miles,
            search_terms,
            excluded_terms: terms.excluded_terms,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            request_delay: Duration::from_secs(request_delay_secs),
            max_items_per_email: 30,
            db_path: PathBuf::from(env_or("PLUMFINDER_DB_PATH", "data/seen_items.db")),
            offerup_location_slug: env_or("OFFERUP_LOCATION", "palo-alto-ca"),
            ebay_app_id: env_opt("EBAY_APP_ID"),
            ebay_cert_id: env_opt("EBAY_CERT_ID"),
            etsy_api_key: env_opt("ETSY_API_KEY"),
            fb_session_cookie: env_opt("FB_SESSION_COOKIE"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Load search/excluded terms from an explicit TOML file.
pub fn load_terms_from(path: &Path) -> Result<TermsFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading terms from {}", path.display()))?;
    let parsed: TermsFile =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(TermsFile {
        search_terms: clean_list(parsed.search_terms),
        excluded_terms: clean_list(parsed.excluded_terms),
    })
}

/// Term-list resolution order:
/// 1) $PLUMFINDER_CONFIG_PATH
/// 2) config/plumfinder.toml
/// 3) built-in defaults (empty lists here; filled by the caller)
fn load_terms_default() -> Result<TermsFile> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_terms_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    if default.exists() {
        return load_terms_from(&default);
    }
    Ok(TermsFile::default())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
