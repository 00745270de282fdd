use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Price {
    pub value: Decimal,
    pub currency: String,
}

impl Price {
    pub fn eur(value: Decimal) -> Self {
        Self {
            value,
            currency: "EUR".to_string(),
        }
    }

    /// German number format: "1.234,56 €"
    pub fn format_de(&self) -> String {
        let rounded = self.value.round_dp(2);
        let plain = format!("{:.2}", rounded);
        let (euros, cents) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

        let mut grouped = String::new();
        for (i, c) in euros.chars().rev().enumerate() {
            if i > 0 && i % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(c);
        }
        let euros: String = grouped.chars().rev().collect();

        let symbol = match self.currency.as_str() {
            "EUR" => "€",
            other => other,
        };
        format!("{},{} {}", euros, cents, symbol)
    }
}

/// A single externally observed item. Listings are transient: they are
/// reconstructed on every poll and never persisted as a whole; only the
/// canonical key (and, via notification records, the push outcome) survives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub platform: String,
    pub platform_id: String,
    pub title: String,
    pub url: String,
    pub price: Option<Price>,
    /// Posting timestamp in UTC, populated by detail-page enrichment when
    /// the provider supports it.
    pub posted_ts: Option<DateTime<Utc>>,
    /// Result page the listing was found on. Diagnostic only.
    pub page_index: u32,
}

impl Listing {
    /// Canonical listing key: `"<platform>:<numeric id>"`.
    ///
    /// The key is derived from the durable numeric ID embedded in the
    /// listing's permanent URL, never from title or page position, so two
    /// fetches of the same item at different positions yield the same key.
    pub fn canonical_key(&self) -> String {
        static ID_RE: OnceLock<Regex> = OnceLock::new();
        let re = ID_RE.get_or_init(|| Regex::new(r"(\d+)").unwrap());

        let platform = self.platform.to_lowercase();
        let platform = platform.trim();
        let clean_id = re
            .captures(&self.platform_id)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(self.platform_id.as_str());

        format!("{}:{}", platform, clean_id)
    }
}
