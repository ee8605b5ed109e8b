use std::collections::HashMap;
use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use shared::types::ViewState;
use crate::discord::client::DiscordClient;
use crate::discord::payload::view_message;
use crate::view::ViewPublisher;

/// How many old messages a channel reset clears
const RESET_DEPTH: usize = 100;

/// Keeps one status message per registered channel and edits it in place.
pub struct DiscordPublisher {
    client: Arc<DiscordClient>,
    channels: Vec<String>,
    /// channel id -> id of the message holding the view. Held across the
    /// whole find-or-create so concurrent refreshes never post twice.
    current: HashMap<String, Mutex<Option<String>>>,
}

impl DiscordPublisher {
    pub fn new(client: Arc<DiscordClient>, channels: Vec<String>) -> Self {
        let current = channels
            .iter()
            .map(|channel| (channel.clone(), Mutex::new(None)))
            .collect();
        Self {
            client,
            channels,
            current,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Clear recent history in every channel so the view message is the
    /// only one left. Failures are logged per channel.
    pub async fn reset(&self) {
        for channel in &self.channels {
            let cleared = async {
                let messages = self.client.recent_messages(channel, RESET_DEPTH).await?;
                let ids: Vec<String> = messages.into_iter().map(|m| m.id).collect();
                self.client.delete_messages(channel, &ids).await?;
                Ok::<_, anyhow::Error>(ids.len())
            }
            .await;

            match cleared {
                Ok(n) => tracing::info!("Cleared {} messages in channel {}", n, channel),
                Err(e) => tracing::error!("Error clearing channel {}: {:#}", channel, e),
            }
            if let Some(slot) = self.current.get(channel) {
                *slot.lock().await = None;
            }
        }
    }

    async fn publish_to(&self, channel: &str, payload: &Value) -> Result<()> {
        let Some(slot) = self.current.get(channel) else {
            anyhow::bail!("channel {} is not registered", channel);
        };
        let mut current = slot.lock().await;

        let existing = match current.clone() {
            Some(id) => Some(id),
            None => self
                .client
                .recent_messages(channel, 1)
                .await?
                .into_iter()
                .next()
                .map(|m| m.id),
        };

        match existing {
            Some(id) => {
                if let Err(e) = self.client.edit_message(channel, &id, payload).await {
                    // forget it so the next refresh looks the message up again
                    *current = None;
                    return Err(e);
                }
                *current = Some(id);
            }
            None => {
                let message = self.client.create_message(channel, payload).await?;
                tracing::debug!("Created view message {} in {}", message.id, channel);
                *current = Some(message.id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ViewPublisher for DiscordPublisher {
    async fn publish(&self, view: &ViewState) -> Result<()> {
        let payload = view_message(view);
        let mut failed = 0;
        for channel in &self.channels {
            if let Err(e) = self.publish_to(channel, &payload).await {
                tracing::error!("Error updating view in channel {}: {:#}", channel, e);
                failed += 1;
            }
        }
        if failed > 0 {
            anyhow::bail!("{} of {} channels not updated", failed, self.channels.len());
        }
        Ok(())
    }
}
