use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::CrawlerConfig;
use crate::models::{Listing, Price};
use crate::providers::{build_client, classify_throttling, CrawledPage, Provider, ProviderError};
use crate::utils::text::matches_keyword;
use crate::utils::time::berlin_to_utc;

const PLATFORM: &str = "militaria321.com";
const BASE_URL: &str = "https://www.militaria321.com";
/// Fixed page size used by the search endpoint.
const GROUP_SIZE: u32 = 25;
/// How long a throttling response keeps the provider latched before any
/// crawl, for any subscription, is attempted again.
const THROTTLE_LATCH_MS: i64 = 60_000;

/// Provider for militaria321.com.
///
/// Results are sorted by auction end time, not by posting time, so new items
/// can surface on any page. Detail pages carry an "Auktionsbeginn"/
/// "Eingestellt" timestamp in Berlin local time.
pub struct Militaria321Provider {
    client: reqwest::Client,
    search_url: String,
    base_url: String,
    throttled_until_ms: AtomicI64,
}

impl Militaria321Provider {
    pub fn new(config: &CrawlerConfig) -> Result<Self, ProviderError> {
        Self::with_base_url(config, BASE_URL)
    }

    /// Point the provider at a different host. Used by tests that serve
    /// fixture pages from a local HTTP server.
    pub fn with_base_url(config: &CrawlerConfig, base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config)?,
            search_url: format!("{}/suchergebnisse.cfm", base_url.trim_end_matches('/')),
            base_url: base_url.trim_end_matches('/').to_string(),
            throttled_until_ms: AtomicI64::new(0),
        })
    }

    fn mark_throttled(&self) {
        self.throttled_until_ms.store(
            Utc::now().timestamp_millis() + THROTTLE_LATCH_MS,
            Ordering::Relaxed,
        );
    }

    fn clear_throttled(&self) {
        self.throttled_until_ms.store(0, Ordering::Relaxed);
    }

    fn parse_results_page(
        &self,
        html: &str,
        keyword: &str,
        page_index: u32,
    ) -> Result<(Vec<Listing>, Option<u32>, usize), ProviderError> {
        let document = Html::parse_document(html);
        let link_selector = selector(r#"a[href*="auktion/"]"#, page_index)?;

        static ID_RE: OnceLock<Regex> = OnceLock::new();
        let id_re = ID_RE.get_or_init(|| Regex::new(r"auktion/(\d+)").unwrap());

        let mut raw_count = 0usize;
        let mut listings = Vec::new();
        let mut page_ids: Vec<String> = Vec::new();

        for link in document.select(&link_selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(platform_id) = id_re
                .captures(href)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
            else {
                continue;
            };
            if page_ids.contains(&platform_id) {
                continue;
            }

            let title = link.text().collect::<Vec<_>>().join(" ").trim().to_string();
            if title.is_empty() {
                continue;
            }

            page_ids.push(platform_id.clone());
            raw_count += 1;

            if !matches_keyword(&title, keyword) {
                continue;
            }

            let url = match Url::parse(&self.base_url).and_then(|base| base.join(href)) {
                Ok(joined) => joined.to_string(),
                Err(_) => continue,
            };

            let price = link
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|container| {
                    let text = container.text().collect::<Vec<_>>().join(" ");
                    parse_price_de(&text)
                });

            listings.push(Listing {
                platform: PLATFORM.to_string(),
                platform_id,
                title,
                url,
                price,
                posted_ts: None,
                page_index,
            });
        }

        let total_count = extract_total_count(&document);
        Ok((listings, total_count, raw_count))
    }
}

#[async_trait]
impl Provider for Militaria321Provider {
    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn crawl_page(
        &self,
        keyword: &str,
        page_index: u32,
    ) -> Result<CrawledPage, ProviderError> {
        // startat is a 1-based item offset
        let startat = (page_index.saturating_sub(1)) * GROUP_SIZE + 1;
        let groupsize = GROUP_SIZE.to_string();
        let startat_param = startat.to_string();

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", keyword),
                ("adv", "0"),
                ("searchcat", "1"),
                ("groupsize", groupsize.as_str()),
                ("startat", startat_param.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if let Some(err) = classify_throttling(PLATFORM, status, &body) {
            self.mark_throttled();
            return Err(err);
        }
        self.clear_throttled();

        if !status.is_success() {
            return Err(ProviderError::ParseFailure {
                platform: PLATFORM.to_string(),
                page_index,
                message: format!("unexpected status {}", status),
            });
        }

        let (listings, total_count, raw_count) =
            self.parse_results_page(&body, keyword, page_index)?;

        tracing::debug!(
            platform = PLATFORM,
            page_index,
            startat,
            items_on_page = raw_count,
            matched = listings.len(),
            "fetched result page"
        );

        Ok(CrawledPage {
            listings,
            // A short page is the last one
            has_more: raw_count as u32 >= GROUP_SIZE,
            total_count,
        })
    }

    fn supports_detail_timestamps(&self) -> bool {
        true
    }

    async fn fetch_detail_timestamp(
        &self,
        listing: &Listing,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let response = self.client.get(&listing.url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if let Some(err) = classify_throttling(PLATFORM, status, &body) {
            self.mark_throttled();
            return Err(err);
        }

        let document = Html::parse_document(&body);
        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        Ok(parse_posted_ts(&text))
    }

    fn is_throttled(&self) -> bool {
        Utc::now().timestamp_millis() < self.throttled_until_ms.load(Ordering::Relaxed)
    }
}

fn selector(css: &str, page_index: u32) -> Result<Selector, ProviderError> {
    Selector::parse(css).map_err(|e| ProviderError::ParseFailure {
        platform: PLATFORM.to_string(),
        page_index,
        message: format!("invalid selector '{}': {:?}", css, e),
    })
}

/// German price format: "249,00 €" or "1.234,56 €".
fn parse_price_de(text: &str) -> Option<Price> {
    static PRICE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PRICE_RE
        .get_or_init(|| Regex::new(r"([0-9]{1,3}(?:\.[0-9]{3})*(?:,[0-9]{2})?)\s*€").unwrap());

    let raw = re.captures(text)?.get(1)?.as_str();
    // Strip thousand separators, decimal comma becomes a dot
    let normalized = raw.replace('.', "").replace(',', ".");
    let value = Decimal::from_str(&normalized).ok()?;
    Some(Price::eur(value))
}

/// Posted timestamp from a detail page, e.g.
/// "Auktionsbeginn: 04.10.2025 13:21 Uhr" (Berlin local time).
fn parse_posted_ts(text: &str) -> Option<DateTime<Utc>> {
    static TS_RE: OnceLock<Regex> = OnceLock::new();
    let re = TS_RE.get_or_init(|| {
        Regex::new(
            r"(?:Auktionsbeginn|Eingestellt)\s*:?\s*(\d{1,2}\.\d{1,2}\.\d{4})\s+(\d{1,2}:\d{2})\s+Uhr",
        )
        .unwrap()
    });

    let captures = re.captures(text)?;
    let date = captures.get(1)?.as_str();
    let time = captures.get(2)?.as_str();
    let local = NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%d.%m.%Y %H:%M").ok()?;
    Some(berlin_to_utc(local))
}

fn extract_total_count(document: &Html) -> Option<u32> {
    static COUNT_RE: OnceLock<Regex> = OnceLock::new();
    let re = COUNT_RE.get_or_init(|| Regex::new(r"(\d+)\s+(?:Treffer|Ergebnis)").unwrap());

    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    re.captures(&text)?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()
}
