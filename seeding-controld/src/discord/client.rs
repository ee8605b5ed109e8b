use std::time::Duration;
use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::config::DiscordConfig;

const API_BASE: &str = "https://discord.com/api/v10";

/// Bulk delete accepts between 2 and 100 ids per call
const BULK_DELETE_MAX: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Non-success answer from the REST API
#[derive(Debug, thiserror::Error)]
#[error("Discord API returned {status}: {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub body: String,
}

/// Thin REST client for the handful of endpoints the daemon uses.
pub struct DiscordClient {
    http: reqwest::Client,
    token: String,
    application_id: String,
    base_url: String,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("DiscordBot (seeding-controld, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .context("Failed to build Discord HTTP client")?;

        Ok(Self {
            http,
            token: config.token.clone(),
            application_id: config.application_id.clone(),
            base_url: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Bot {}", self.token))
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/channels/{}", channel_id))))
            .send()
            .await
            .with_context(|| format!("Failed to fetch channel {}", channel_id))?;

        Ok(checked(response).await?.json().await?)
    }

    /// Most recent messages first
    pub async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<Message>> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/channels/{}/messages", channel_id))))
            .query(&[("limit", limit.min(BULK_DELETE_MAX))])
            .send()
            .await
            .with_context(|| format!("Failed to list messages in {}", channel_id))?;

        Ok(checked(response).await?.json().await?)
    }

    pub async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<()> {
        for chunk in ids.chunks(BULK_DELETE_MAX) {
            let request = match chunk {
                [] => continue,
                [single] => self.http.delete(self.url(&format!(
                    "/channels/{}/messages/{}",
                    channel_id, single
                ))),
                many => self
                    .http
                    .post(self.url(&format!("/channels/{}/messages/bulk-delete", channel_id)))
                    .json(&json!({ "messages": many })),
            };

            let response = self
                .authorized(request)
                .send()
                .await
                .with_context(|| format!("Failed to delete messages in {}", channel_id))?;
            checked(response).await?;
        }
        Ok(())
    }

    pub async fn create_message(&self, channel_id: &str, payload: &Value) -> Result<Message> {
        let response = self
            .authorized(self.http.post(self.url(&format!("/channels/{}/messages", channel_id))))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to send message to {}", channel_id))?;

        Ok(checked(response).await?.json().await?)
    }

    pub async fn edit_message(&self, channel_id: &str, message_id: &str, payload: &Value) -> Result<()> {
        let response = self
            .authorized(self.http.patch(self.url(&format!(
                "/channels/{}/messages/{}",
                channel_id, message_id
            ))))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to edit message {} in {}", message_id, channel_id))?;

        checked(response).await?;
        Ok(())
    }

    /// Replace the deferred placeholder of an interaction with final content.
    /// Authenticated by the interaction token in the path.
    pub async fn edit_original_response(&self, interaction_token: &str, content: &str) -> Result<()> {
        let response = self
            .http
            .patch(self.url(&format!(
                "/webhooks/{}/{}/messages/@original",
                self.application_id, interaction_token
            )))
            .json(&json!({ "content": content }))
            .send()
            .await
            .context("Failed to edit interaction response")?;

        checked(response).await?;
        Ok(())
    }
}

async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError { status, body }.into())
}
