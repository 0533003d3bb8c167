// src/scrape/robots.rs
//! robots.txt compliance for the HTML adapters.
//!
//! One fetch per distinct domain per 24h window; the parsed ruleset is
//! cached and shared by every adapter through `PoliteClient`. Unreachable
//! or unparseable robots.txt fails open (everything allowed).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;

const CACHE_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Allow(String),
    Disallow(String),
}

/// Rules that apply to our user agent for one domain.
#[derive(Debug, Clone, Default)]
struct RuleSet {
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

impl RuleSet {
    /// Longest-prefix match wins; an empty Disallow means "allow all".
    fn allows(&self, path: &str) -> bool {
        let mut best_len = 0usize;
        let mut allowed = true;
        for rule in &self.rules {
            let (prefix, allow) = match rule {
                Rule::Allow(p) => (p, true),
                Rule::Disallow(p) => (p, false),
            };
            if prefix.is_empty() {
                continue;
            }
            if path.starts_with(prefix.as_str()) && prefix.len() > best_len {
                best_len = prefix.len();
                allowed = allow;
            }
        }
        allowed
    }
}

struct CachedRules {
    rules: RuleSet,
    fetched_at: DateTime<Utc>,
}

pub struct RobotsChecker {
    user_agent: String,
    domains: HashMap<String, CachedRules>,
}

impl RobotsChecker {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            domains: HashMap::new(),
        }
    }

    fn robots_url(url: &str) -> Option<String> {
        let parsed = reqwest::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        Some(format!("{}://{}/robots.txt", parsed.scheme(), host))
    }

    fn domain_of(url: &str) -> Option<String> {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    fn cached(&self, domain: &str) -> Option<&RuleSet> {
        let entry = self.domains.get(domain)?;
        let age = Utc::now() - entry.fetched_at;
        if age < ChronoDuration::hours(CACHE_HOURS) {
            Some(&entry.rules)
        } else {
            None
        }
    }

    async fn ensure_rules(&mut self, url: &str, client: &reqwest::Client) {
        let Some(domain) = Self::domain_of(url) else {
            return;
        };
        if self.cached(&domain).is_some() {
            return;
        }

        let rules = match Self::robots_url(url) {
            Some(robots_url) => match client.get(&robots_url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) => parse_robots(&body, &self.user_agent),
                    Err(_) => RuleSet::default(),
                },
                // Missing robots.txt or fetch error: allow all.
                _ => RuleSet::default(),
            },
            None => RuleSet::default(),
        };

        self.domains.insert(
            domain,
            CachedRules {
                rules,
                fetched_at: Utc::now(),
            },
        );
    }

    /// Whether robots.txt allows fetching `url`. Fails open.
    pub async fn can_fetch(&mut self, url: &str, client: &reqwest::Client) -> bool {
        self.ensure_rules(url, client).await;

        let Some(domain) = Self::domain_of(url) else {
            return true;
        };
        let path = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());

        match self.cached(&domain) {
            Some(rules) => rules.allows(&path),
            None => true,
        }
    }

    /// Crawl delay from the cached ruleset, if one was declared.
    pub fn crawl_delay(&self, url: &str) -> Option<Duration> {
        let domain = Self::domain_of(url)?;
        let rules = self.cached(&domain)?;
        rules.crawl_delay.map(Duration::from_secs_f64)
    }
}

/// Minimal robots.txt parser: collects the group matching our user agent,
/// falling back to the `*` group.
fn parse_robots(body: &str, user_agent: &str) -> RuleSet {
    let ua_lower = user_agent.to_lowercase();

    let mut star = RuleSet::default();
    let mut ours = RuleSet::default();
    let mut has_ours = false;

    // Which groups the current agent lines select.
    let mut in_star = false;
    let mut in_ours = false;
    let mut last_was_agent = false;

    for raw in body.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !last_was_agent {
                    in_star = false;
                    in_ours = false;
                }
                let agent = value.to_lowercase();
                if agent == "*" {
                    in_star = true;
                } else if ua_lower.contains(&agent) {
                    in_ours = true;
                    has_ours = true;
                }
                last_was_agent = true;
            }
            "allow" => {
                last_was_agent = false;
                if in_ours {
                    ours.rules.push(Rule::Allow(value.to_string()));
                }
                if in_star {
                    star.rules.push(Rule::Allow(value.to_string()));
                }
            }
            "disallow" => {
                last_was_agent = false;
                if in_ours {
                    ours.rules.push(Rule::Disallow(value.to_string()));
                }
                if in_star {
                    star.rules.push(Rule::Disallow(value.to_string()));
                }
            }
            "crawl-delay" => {
                last_was_agent = false;
                let delay = value.parse::<f64>().ok();
                if in_ours {
                    ours.crawl_delay = delay;
                }
                if in_star {
                    star.crawl_delay = delay;
                }
            }
            _ => {
                last_was_agent = false;
            }
        }
    }

    if has_ours {
        ours
    } else {
        star
    }
}
