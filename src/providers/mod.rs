use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::CrawlerConfig;
use crate::models::{CooldownSeverity, Listing};

pub mod egun;
pub mod militaria321;

pub use egun::EgunProvider;
pub use militaria321::Militaria321Provider;

/// One result page as returned by a provider.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub listings: Vec<Listing>,
    pub has_more: bool,
    /// Total result count as advertised by the site, when available.
    pub total_count: Option<u32>,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("rate limited by {platform}")]
    RateLimited { platform: String },

    #[error("blocked or challenged by {platform}")]
    Blocked { platform: String },

    #[error("failed to parse page {page_index} from {platform}: {message}")]
    ParseFailure {
        platform: String,
        page_index: u32,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProviderError {
    /// Only transient network failures are worth retrying; throttling and
    /// parse drift are signals, not retry candidates.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_))
    }

    pub fn cooldown_severity(&self) -> Option<CooldownSeverity> {
        match self {
            ProviderError::RateLimited { .. } => Some(CooldownSeverity::RateLimited),
            ProviderError::Blocked { .. } => Some(CooldownSeverity::Blocked),
            _ => None,
        }
    }
}

/// A single auction/classifieds site.
///
/// `crawl_page` must be pure with respect to deduplication: returning the
/// same listing across calls is fine, the canonical key absorbs it.
#[async_trait]
pub trait Provider: Send + Sync {
    fn platform(&self) -> &str;

    /// Fetch one result page (1-based index) for a keyword.
    async fn crawl_page(&self, keyword: &str, page_index: u32)
        -> Result<CrawledPage, ProviderError>;

    /// Whether detail pages carry a reliable posted timestamp. Providers
    /// without this capability force every candidate through the
    /// grace-window rule.
    fn supports_detail_timestamps(&self) -> bool {
        false
    }

    /// Fetch the posted timestamp from a listing's detail page.
    async fn fetch_detail_timestamp(
        &self,
        listing: &Listing,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;

    /// Throttling signal observed on the most recent request.
    fn is_throttled(&self) -> bool;
}

/// All registered providers in deterministic order.
pub fn all_providers(config: &CrawlerConfig) -> crate::Result<Vec<Arc<dyn Provider>>> {
    Ok(vec![
        Arc::new(Militaria321Provider::new(config)?),
        Arc::new(EgunProvider::new(config)?),
    ])
}

/// Build a reqwest client with realistic German-locale headers.
pub(crate) fn build_client(config: &CrawlerConfig) -> Result<reqwest::Client, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(config.request_timeout))
        .build()?;

    Ok(client)
}

/// Map a throttling response to the matching provider error.
pub(crate) fn classify_throttling(
    platform: &str,
    status: StatusCode,
    body: &str,
) -> Option<ProviderError> {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return Some(ProviderError::RateLimited {
            platform: platform.to_string(),
        });
    }

    let lowered = body.to_lowercase();
    if lowered.contains("captcha")
        || lowered.contains("automatisierte zugriffe")
        || lowered.contains("access denied")
    {
        return Some(ProviderError::Blocked {
            platform: platform.to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_classification_by_status() {
        let err = classify_throttling("egun.de", StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, Some(ProviderError::RateLimited { .. })));

        let err = classify_throttling("egun.de", StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(err, Some(ProviderError::RateLimited { .. })));

        assert!(classify_throttling("egun.de", StatusCode::OK, "<html>ok</html>").is_none());
    }

    #[test]
    fn test_throttling_classification_by_body() {
        let err = classify_throttling(
            "militaria321.com",
            StatusCode::OK,
            "<html>Bitte lösen Sie das CAPTCHA</html>",
        );
        assert!(matches!(err, Some(ProviderError::Blocked { .. })));
    }

    #[test]
    fn test_cooldown_severity_mapping() {
        let rate_limited = ProviderError::RateLimited {
            platform: "egun.de".to_string(),
        };
        assert_eq!(
            rate_limited.cooldown_severity(),
            Some(CooldownSeverity::RateLimited)
        );
        assert!(!rate_limited.is_retryable());

        let parse = ProviderError::ParseFailure {
            platform: "egun.de".to_string(),
            page_index: 3,
            message: "marker missing".to_string(),
        };
        assert_eq!(parse.cooldown_severity(), None);
    }
}
