use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::CrawlerConfig;
use crate::models::{Listing, Price};
use crate::providers::{build_client, classify_throttling, CrawledPage, Provider, ProviderError};
use crate::utils::text::matches_keyword;

const PLATFORM: &str = "egun.de";
const BASE_URL: &str = "https://www.egun.de/market";
/// How long a throttling response keeps the provider latched before any
/// crawl, for any subscription, is attempted again.
const THROTTLE_LATCH_MS: i64 = 60_000;

/// Provider for egun.de.
///
/// The market search paginates with a `page` parameter. Detail pages do not
/// expose a reliable posting timestamp, so every candidate from this
/// provider goes through the grace-window rule.
pub struct EgunProvider {
    client: reqwest::Client,
    search_url: String,
    base_url: String,
    throttled_until_ms: AtomicI64,
}

impl EgunProvider {
    pub fn new(config: &CrawlerConfig) -> Result<Self, ProviderError> {
        Self::with_base_url(config, BASE_URL)
    }

    pub fn with_base_url(config: &CrawlerConfig, base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config)?,
            search_url: format!("{}/list_items.php", base_url.trim_end_matches('/')),
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
    ) -> Result<(Vec<Listing>, Option<u32>, bool), ProviderError> {
        let document = Html::parse_document(html);
        let link_selector = selector(r#"a[href*="item.php?id="]"#, page_index)?;

        static ID_RE: OnceLock<Regex> = OnceLock::new();
        let id_re = ID_RE.get_or_init(|| Regex::new(r"id=(\d+)").unwrap());

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
            // Thumbnails and titles link the same item; keep the first row hit
            if page_ids.contains(&platform_id) {
                continue;
            }

            let title = link.text().collect::<Vec<_>>().join(" ").trim().to_string();
            if title.is_empty() {
                continue;
            }

            page_ids.push(platform_id.clone());

            if !matches_keyword(&title, keyword) {
                continue;
            }

            let url = match Url::parse(&format!("{}/", self.base_url))
                .and_then(|base| base.join(href))
            {
                Ok(joined) => joined.to_string(),
                Err(_) => continue,
            };

            let price = enclosing_row(link).and_then(|row| {
                let text = row.text().collect::<Vec<_>>().join(" ");
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
        let has_more = has_next_page(&document, page_index);
        Ok((listings, total_count, has_more))
    }
}

#[async_trait]
impl Provider for EgunProvider {
    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn crawl_page(
        &self,
        keyword: &str,
        page_index: u32,
    ) -> Result<CrawledPage, ProviderError> {
        let page_param = page_index.to_string();

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("mode", "qry"),
                ("query", keyword),
                ("plusdescr", "off"),
                ("wheremode", "and"),
                ("page", page_param.as_str()),
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

        let (listings, total_count, has_more) =
            self.parse_results_page(&body, keyword, page_index)?;

        tracing::debug!(
            platform = PLATFORM,
            page_index,
            matched = listings.len(),
            has_more,
            "fetched result page"
        );

        Ok(CrawledPage {
            listings,
            has_more,
            total_count,
        })
    }

    async fn fetch_detail_timestamp(
        &self,
        _listing: &Listing,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        // No reliable posting timestamp on egun detail pages
        Ok(None)
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

fn enclosing_row(link: ElementRef) -> Option<ElementRef> {
    let mut node = link.parent();
    while let Some(n) = node {
        if let Some(element) = ElementRef::wrap(n) {
            if element.value().name() == "tr" {
                return Some(element);
            }
        }
        node = n.parent();
    }
    None
}

fn parse_price_de(text: &str) -> Option<Price> {
    static PRICE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PRICE_RE
        .get_or_init(|| Regex::new(r"([0-9]{1,3}(?:\.[0-9]{3})*(?:,[0-9]{2})?)\s*(?:€|EUR)").unwrap());

    let raw = re.captures(text)?.get(1)?.as_str();
    let normalized = raw.replace('.', "").replace(',', ".");
    let value = Decimal::from_str(&normalized).ok()?;
    Some(Price::eur(value))
}

fn extract_total_count(document: &Html) -> Option<u32> {
    static COUNT_RE: OnceLock<Regex> = OnceLock::new();
    let re = COUNT_RE.get_or_init(|| Regex::new(r"(\d+)\s+(?:Treffer|Artikel|Auktionen)").unwrap());

    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    re.captures(&text)?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()
}

/// Next-page detection: any pagination link pointing at a higher page number.
fn has_next_page(document: &Html, current_page: u32) -> bool {
    static PAGE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PAGE_RE.get_or_init(|| Regex::new(r"[?&]page=(\d+)").unwrap());

    let Ok(link_selector) = Selector::parse(r#"a[href*="page="]"#) else {
        return false;
    };

    document
        .select(&link_selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| re.captures(href))
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .any(|page| page > current_page)
}
