use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

use crate::models::PollStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub crawler: CrawlerConfig,
    pub poller: PollerConfig,
    pub cooldown: CooldownConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Per-request timeout in seconds. A timed-out call counts as a network
    /// error: bounded retry, then the page is skipped.
    pub request_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Delay between page requests.
    pub page_delay_ms: u64,
    /// Shorter pacing once a result set is known to span many pages.
    pub burst_page_delay_ms: u64,
    pub burst_threshold_pages: u32,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub interval_seconds: u64,
    /// Listings without a posted timestamp are still pushed within this many
    /// minutes of subscription creation.
    pub grace_minutes: i64,
    /// Hard per-provider page ceiling per poll cycle.
    pub max_pages_per_cycle: u32,
    /// Worker cap for detail-page enrichment.
    pub detail_concurrency: usize,
    /// Rotating-window strategy: pages always rescanned at the front.
    pub primary_pages: u32,
    /// Rotating-window strategy: size of the cursor-advancing window.
    pub rotating_window: u32,
    /// Rotating-window strategy: stop after this many consecutive pages
    /// without unseen candidates.
    pub zero_unseen_page_stop: u32,
    /// Consecutive failed pages before a scan is aborted as interrupted.
    pub error_budget: u32,
    pub default_strategy: PollStrategy,
    /// A subscription whose last success is older than this is degraded.
    pub stale_success_warn_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    pub rate_limited_minutes: i64,
    pub blocked_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "ARGUS_"
            .add_source(Environment::with_prefix("ARGUS").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if self.poller.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Poller interval_seconds must be greater than 0".into(),
            ));
        }

        if self.poller.grace_minutes < 0 {
            return Err(ConfigError::Message(
                "Poller grace_minutes must not be negative".into(),
            ));
        }

        if self.poller.max_pages_per_cycle == 0 {
            return Err(ConfigError::Message(
                "Poller max_pages_per_cycle must be greater than 0".into(),
            ));
        }

        if self.poller.detail_concurrency == 0 {
            return Err(ConfigError::Message(
                "Poller detail_concurrency must be greater than 0".into(),
            ));
        }

        if self.poller.rotating_window == 0 {
            return Err(ConfigError::Message(
                "Poller rotating_window must be greater than 0".into(),
            ));
        }

        if self.poller.error_budget == 0 {
            return Err(ConfigError::Message(
                "Poller error_budget must be greater than 0".into(),
            ));
        }

        if self.crawler.request_timeout == 0 {
            return Err(ConfigError::Message(
                "Crawler request_timeout must be greater than 0".into(),
            ));
        }

        if self.crawler.burst_page_delay_ms > self.crawler.page_delay_ms {
            return Err(ConfigError::Message(
                "Crawler burst_page_delay_ms cannot exceed page_delay_ms".into(),
            ));
        }

        if self.cooldown.rate_limited_minutes <= 0 || self.cooldown.blocked_minutes <= 0 {
            return Err(ConfigError::Message(
                "Cooldown durations must be greater than 0".into(),
            ));
        }

        if self.cooldown.blocked_minutes < self.cooldown.rate_limited_minutes {
            return Err(ConfigError::Message(
                "Cooldown blocked_minutes cannot be shorter than rate_limited_minutes".into(),
            ));
        }

        if let Some(url) = &self.notifications.webhook.url {
            if Url::parse(url).is_err() {
                return Err(ConfigError::Message("Invalid webhook URL format".into()));
            }
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message(
                "Metrics port must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

/// Ready-made configuration for unit tests across the crate.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub(crate) fn test_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            crawler: CrawlerConfig {
                request_timeout: 5,
                retry_attempts: 1,
                retry_delay_ms: 1,
                page_delay_ms: 1,
                burst_page_delay_ms: 1,
                burst_threshold_pages: 40,
                user_agent: "TestAgent/1.0".to_string(),
            },
            poller: PollerConfig {
                interval_seconds: 60,
                grace_minutes: 60,
                max_pages_per_cycle: 200,
                detail_concurrency: 4,
                primary_pages: 1,
                rotating_window: 5,
                zero_unseen_page_stop: 3,
                error_budget: 3,
                default_strategy: PollStrategy::Exhaustive,
                stale_success_warn_seconds: 180,
            },
            cooldown: CooldownConfig {
                rate_limited_minutes: 5,
                blocked_minutes: 60,
            },
            notifications: NotificationsConfig {
                webhook: WebhookConfig {
                    url: None,
                    username: "Argus Watcher".to_string(),
                },
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9001,
            },
        }
    }
}
