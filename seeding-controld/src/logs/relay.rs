use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use shared::types::ServiceDescriptor;

/// Destination for deduplicated log excerpts.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn forward(&self, service: &ServiceDescriptor, text: &str) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts each excerpt as one webhook message.
pub struct WebhookRelay {
    http: reqwest::Client,
    url: String,
}

impl WebhookRelay {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build log relay HTTP client")?;
        Ok(Self { http, url: url.into() })
    }
}

/// Excerpts are already capped at the chunk limit; the label line and fence
/// stay well inside the platform's 2000 character message ceiling.
pub fn format_excerpt(service: &ServiceDescriptor, text: &str) -> String {
    format!("**{}**\n```\n{}\n```", service.label, text)
}

#[async_trait]
impl LogSink for WebhookRelay {
    async fn forward(&self, service: &ServiceDescriptor, text: &str) -> Result<()> {
        let content = format_excerpt(service, text);
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookMessage { content: &content })
            .send()
            .await
            .with_context(|| format!("Failed to relay logs for {}", service.name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Log relay returned {}: {}", status, body);
        }

        tracing::debug!("Relayed {} chars of logs for {}", text.chars().count(), service.name);
        Ok(())
    }
}
