// src/scrape/net.rs
//! Shared politeness layer: one HTTP client with a rotated user agent, the
//! process-wide robots checker and response cache, the retry executor, and
//! the fixed inter-request pause.
//!
//! Constructed once at startup and handed to every adapter by `Arc` — the
//! "shared across adapters" semantics without hidden globals.

use crate::scrape::cache::ResponseCache;
use crate::scrape::retry::{retry_response, RetryPolicy};
use crate::scrape::robots::RobotsChecker;
use crate::scrape::types::ListingItem;
use anyhow::{anyhow, Context, Result};
use rand::seq::IndexedRandom;
use std::sync::Mutex;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PoliteClient {
    http: reqwest::Client,
    user_agent: String,
    // tokio mutex: the robots check awaits a network fetch while held.
    robots: tokio::sync::Mutex<RobotsChecker>,
    cache: Mutex<ResponseCache>,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl PoliteClient {
    pub fn new(user_agents: &[String], request_delay: Duration) -> Result<Self> {
        let user_agent = user_agents
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_else(|| "Mozilla/5.0 (compatible; plumfinder)".to_string());

        let http = reqwest::Client::builder()
            .user_agent(&user_agent)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            robots: tokio::sync::Mutex::new(RobotsChecker::new(user_agent.clone())),
            user_agent,
            cache: Mutex::new(ResponseCache::default()),
            retry: RetryPolicy::default(),
            request_delay,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fixed rate-limiting pause toward the marketplaces.
    pub async fn pause(&self) {
        tokio::time::sleep(self.request_delay).await;
    }

    /// robots.txt gate. Adapters hitting pure JSON APIs skip this.
    pub async fn can_fetch(&self, url: &str) -> bool {
        let mut robots = self.robots.lock().await;
        robots.can_fetch(url, &self.http).await
    }

    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        let robots = self.robots.lock().await;
        robots.crawl_delay(url)
    }

    pub fn cached(&self, key: &str) -> Option<Vec<ListingItem>> {
        self.cache.lock().expect("cache mutex poisoned").get(key)
    }

    pub fn store(&self, key: String, items: Vec<ListingItem>) {
        self.cache
            .lock()
            .expect("cache mutex poisoned")
            .set(key, items);
    }

    pub fn cache_cleanup(&self) {
        self.cache.lock().expect("cache mutex poisoned").cleanup();
    }

    /// Fetch a page through robots compliance + retry, returning the body.
    /// Ends with the politeness pause.
    pub async fn fetch_html(&self, url: &str, params: &[(&str, String)]) -> Result<String> {
        if !self.can_fetch(url).await {
            return Err(anyhow!("disallowed by robots.txt: {url}"));
        }

        let resp = retry_response(&self.retry, || {
            let req = self.http.get(url).query(params);
            async move { req.send().await.map_err(anyhow::Error::from) }
        })
        .await
        .with_context(|| format!("fetching {url}"))?;

        let status = resp.status();
        let body = resp.text().await.with_context(|| format!("reading body of {url}"))?;
        self.pause().await;
        // Honor a declared crawl-delay beyond our own fixed pause.
        if let Some(delay) = self.crawl_delay(url).await {
            if delay > self.request_delay {
                tokio::time::sleep(delay - self.request_delay).await;
            }
        }

        if !status.is_success() {
            return Err(anyhow!("HTTP {status} from {url}"));
        }
        Ok(body)
    }
}
