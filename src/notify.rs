use std::time::Duration;

use log::{error, info};
use serde_derive::Serialize;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to post notification: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}

/// Fire-and-forget delivery of a short text message.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: String);
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

/// Posts messages to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    url: String,
}

impl SlackNotifier {
    /// Returns `None` when no webhook is configured, which disables notifications.
    pub fn from_url(url: Option<&str>) -> Option<Self> {
        let url = url.map(str::trim).filter(|u| !u.is_empty())?;
        Some(SlackNotifier {
            client: reqwest::Client::new(),
            url: url.to_string(),
        })
    }

    pub async fn post(&self, message: &str) -> Result<String, NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookMessage { text: message })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Ok(response.text().await?)
    }
}

impl Notifier for SlackNotifier {
    fn notify(&self, message: String) {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.post(&message).await {
                Ok(body) => info!("Message from Slack: {}", body),
                Err(err) => error!("Error sending Slack notification: {}", err),
            }
        });
    }
}
