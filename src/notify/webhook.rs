use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;

use crate::models::{Listing, Subscription};
use crate::notify::Notifier;

/// Discord-compatible webhook notifier.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    username: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, username: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
            username,
        }
    }

    fn create_embed(&self, subscription: &Subscription, listing: &Listing) -> serde_json::Value {
        let price = listing
            .price
            .as_ref()
            .map(|p| p.format_de())
            .unwrap_or_else(|| "/".to_string());
        let posted = listing
            .posted_ts
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "/".to_string());

        json!({
            "title": format!("🔎 {}", listing.title),
            "url": listing.url,
            "color": 0x0099ff,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": [
                {
                    "name": "Suchbegriff",
                    "value": subscription.keyword,
                    "inline": true
                },
                {
                    "name": "Preis",
                    "value": price,
                    "inline": true
                },
                {
                    "name": "Plattform",
                    "value": listing.platform,
                    "inline": true
                },
                {
                    "name": "Eingestellt am",
                    "value": posted,
                    "inline": true
                }
            ]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, subscription: &Subscription, listing: &Listing) -> crate::Result<()> {
        let payload = json!({
            "username": self.username,
            "embeds": [self.create_embed(subscription, listing)]
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::AppError::Internal(format!(
                "webhook returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSubscription, Price};
    use rust_decimal::Decimal;

    fn listing() -> Listing {
        Listing {
            platform: "militaria321.com".to_string(),
            platform_id: "7412345".to_string(),
            title: "Preußische Pickelhaube M1895".to_string(),
            url: "https://www.militaria321.com/auktion/7412345/x".to_string(),
            price: Some(Price::eur(Decimal::new(24900, 2))),
            posted_ts: None,
            page_index: 3,
        }
    }

    fn subscription() -> Subscription {
        Subscription::new(NewSubscription {
            user_id: "user1".to_string(),
            keyword: "pickelhaube".to_string(),
        })
    }

    #[test]
    fn test_embed_contains_listing_fields() {
        let notifier = WebhookNotifier::new(
            "https://discord.com/api/webhooks/1/abc".to_string(),
            "Argus".to_string(),
        );
        let embed = notifier.create_embed(&subscription(), &listing());

        assert_eq!(
            embed["title"].as_str().unwrap(),
            "🔎 Preußische Pickelhaube M1895"
        );
        assert_eq!(
            embed["url"].as_str().unwrap(),
            "https://www.militaria321.com/auktion/7412345/x"
        );

        let fields = embed["fields"].as_array().unwrap();
        assert!(fields
            .iter()
            .any(|f| f["name"] == "Preis" && f["value"] == "249,00 €"));
        assert!(fields
            .iter()
            .any(|f| f["name"] == "Eingestellt am" && f["value"] == "/"));
    }

    #[tokio::test]
    async fn test_notify_posts_to_webhook() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"username": "Argus"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()), "Argus".to_string());
        notifier.notify(&subscription(), &listing()).await.unwrap();
    }

    #[tokio::test]
    async fn test_notify_surfaces_http_errors() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()), "Argus".to_string());
        let err = notifier.notify(&subscription(), &listing()).await;
        assert!(err.is_err());
    }
}
