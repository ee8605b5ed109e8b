use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::oneshot;
use crate::discord::client::{ApiError, DiscordClient};
use crate::view::CommandReply;

/// The webhook edit can land before the deferred response is registered
const EDIT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What the waiting request handler should answer with
#[derive(Debug, PartialEq, Eq)]
pub enum Ack {
    /// Deferred placeholder; the final text arrives through the webhook
    Deferred,
    /// The final text itself; no placeholder is needed
    Reply(String),
}

/// Reply path for a button press received over the interactions endpoint.
///
/// The deferred acknowledgment is the HTTP response to the interaction
/// itself: `acknowledge` releases the waiting request handler, which answers
/// with a deferred ephemeral response. The final text then goes through the
/// interaction webhook. A reply finished before it was ever acknowledged is
/// handed straight to the request handler instead.
pub struct InteractionReply {
    client: Arc<DiscordClient>,
    token: String,
    channel_id: String,
    ack: Mutex<Option<oneshot::Sender<Ack>>>,
}

impl InteractionReply {
    pub fn new(
        client: Arc<DiscordClient>,
        token: String,
        channel_id: String,
        ack: oneshot::Sender<Ack>,
    ) -> Self {
        Self {
            client,
            token,
            channel_id,
            ack: Mutex::new(Some(ack)),
        }
    }

    fn take_ack(&self) -> Option<oneshot::Sender<Ack>> {
        self.ack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn edit_original(&self, content: &str) -> Result<()> {
        match self.client.edit_original_response(&self.token, content).await {
            Err(e) if is_not_found(&e) => {
                tracing::debug!("Original response not found yet, retrying in {:?}", EDIT_RETRY_DELAY);
                tokio::time::sleep(EDIT_RETRY_DELAY).await;
                self.client.edit_original_response(&self.token, content).await
            }
            other => other,
        }
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ApiError>()
        .map(|api| api.status == StatusCode::NOT_FOUND)
        .unwrap_or(false)
}

#[async_trait]
impl CommandReply for InteractionReply {
    async fn acknowledge(&self) -> Result<()> {
        match self.take_ack() {
            Some(tx) => tx
                .send(Ack::Deferred)
                .map_err(|_| anyhow::anyhow!("interaction request already answered")),
            None => Ok(()),
        }
    }

    async fn finish(&self, content: &str) -> Result<()> {
        if let Some(tx) = self.take_ack() {
            match tx.send(Ack::Reply(content.to_string())) {
                Ok(()) => return Ok(()),
                // handler already gave up and deferred
                Err(_) => tracing::debug!("Request handler gone, editing original response"),
            }
        }
        self.edit_original(content).await
    }

    fn origin(&self) -> &str {
        &self.channel_id
    }
}
