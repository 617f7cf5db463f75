use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, PacingConfig};
use crate::error::{AppError, Result};
use crate::source::parser::ListingParser;
use crate::source::ListingSource;
use crate::types::{ListingEntry, ListingType};

/// Scrapes ranked listing pages over HTTP.
///
/// Every request is preceded by a randomized courtesy delay and uses the next
/// user agent from the configured pool. This is pacing, not rate limiting.
pub struct MarketplaceListingSource {
    client: reqwest::Client,
    base_url: String,
    pages: u32,
    pacing: PacingConfig,
    ua_cursor: AtomicUsize,
    parser: ListingParser,
}

impl MarketplaceListingSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.scrape_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.marketplace_base_url.trim_end_matches('/').to_string(),
            pages: cfg.scrape_pages,
            pacing: cfg.pacing.clone().normalized(),
            ua_cursor: AtomicUsize::new(0),
            parser: ListingParser::new(),
        })
    }

    /// `{base}/gp/{view}/{category}?pg={page}`
    pub fn page_url(&self, category_external_id: &str, listing_type: ListingType, page: u32) -> String {
        format!(
            "{}/gp/{}/{}?pg={}",
            self.base_url,
            listing_type.url_path(),
            category_external_id,
            page
        )
    }

    fn next_user_agent(&self) -> &str {
        let idx = self.ua_cursor.fetch_add(1, Ordering::Relaxed);
        &self.pacing.user_agents[idx % self.pacing.user_agents.len()]
    }

    fn next_delay(&self) -> Duration {
        let (min, max) = (self.pacing.min_delay_ms, self.pacing.max_delay_ms);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn pace(&self, cancel: &CancellationToken) -> Result<()> {
        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "pacing before listing request");
        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn fetch_page(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        self.pace(cancel).await?;

        let request = self
            .client
            .get(url)
            .header(USER_AGENT, self.next_user_agent())
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            resp = request => resp?,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("{url} returned HTTP {status}")));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ListingSource for MarketplaceListingSource {
    async fn fetch(
        &self,
        category_external_id: &str,
        listing_type: ListingType,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListingEntry>> {
        let mut entries: Vec<ListingEntry> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for page in 1..=self.pages {
            let url = self.page_url(category_external_id, listing_type, page);
            let body = self.fetch_page(&url, cancel).await?;
            let parsed = self.parser.parse_page(&body, entries.len());
            let page_count = parsed.len();

            // Duplicates across pages keep the first (better) rank.
            entries.extend(parsed.into_iter().filter(|e| seen.insert(e.identifier.clone())));

            debug!(url = %url, items = page_count, "listing page parsed");
            if page_count == 0 {
                break;
            }
        }

        info!(
            category = %category_external_id,
            listing_type = %listing_type,
            items = entries.len(),
            "Fetched {} ranked entries for {category_external_id}/{listing_type}",
            entries.len(),
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(min: u64, max: u64, agents: &[&str]) -> MarketplaceListingSource {
        let cfg = Config {
            marketplace_base_url: "https://market.example/".to_string(),
            pacing: PacingConfig {
                min_delay_ms: min,
                max_delay_ms: max,
                user_agents: agents.iter().map(|s| s.to_string()).collect(),
            },
            ..Config::default()
        };
        MarketplaceListingSource::new(&cfg).expect("client")
    }

    #[test]
    fn page_url_uses_view_path_and_page() {
        let s = source(0, 0, &["ua"]);
        assert_eq!(
            s.page_url("electronics", ListingType::MoversAndShakers, 2),
            "https://market.example/gp/movers-and-shakers/electronics?pg=2"
        );
    }

    #[test]
    fn user_agents_rotate_round_robin() {
        let s = source(0, 0, &["a", "b", "c"]);
        let seen: Vec<String> = (0..4).map(|_| s.next_user_agent().to_string()).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn delay_stays_within_bounds() {
        let s = source(10, 20, &["a"]);
        for _ in 0..50 {
            let d = s.next_delay().as_millis() as u64;
            assert!((10..=20).contains(&d));
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_request() {
        let s = source(5_000, 5_000, &["a"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = s
            .fetch("electronics", ListingType::BestSellers, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
