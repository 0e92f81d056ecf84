//! Discord REST implementation of the message platform.
//!
//! Only the channel-message endpoints are used; gateway events, embeds and
//! attachments are out of scope. 404s map to `NotFound` so the controller
//! can recreate vanished messages, 429s surface the advertised retry delay.

use serde::Deserialize;

use crate::platform::{ChannelId, MessageId, MessagePlatform, PlatformError};

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

/// Sends report messages via the Discord HTTP API.
pub struct DiscordApi {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl DiscordApi {
    /// Returns [`PlatformError::Api`] if the token is empty.
    pub fn new(token: String, api_base: String) -> Result<Self, PlatformError> {
        if token.is_empty() {
            return Err(PlatformError::Api(
                "Discord bot token must not be empty".to_string(),
            ));
        }
        // Every platform call gets a hard deadline; the scheduler treats
        // expiry as an ordinary per-channel failure.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Api(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            token,
            api_base,
            client,
        })
    }

    fn message_url(&self, channel: ChannelId, id: Option<&MessageId>) -> String {
        match id {
            Some(id) => format!("{}/channels/{}/messages/{}", self.api_base, channel, id),
            None => format!("{}/channels/{}/messages", self.api_base, channel),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .json::<RateLimitBody>()
                .await
                .ok()
                .and_then(|b| b.retry_after)
                .map(|s| s.ceil() as u64)
                .unwrap_or(30);
            return Err(PlatformError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Api(format!("HTTP {status}: {body}")))
    }
}

#[async_trait::async_trait]
impl MessagePlatform for DiscordApi {
    async fn create_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError> {
        let response = self
            .client
            .post(self.message_url(channel, None))
            .header("Authorization", format!("Bot {}", self.token))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        let created: MessageResponse = Self::check(response).await?.json().await?;
        tracing::info!(channel = %channel, message = %created.id, "message created");
        Ok(MessageId(created.id))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        id: &MessageId,
        content: &str,
    ) -> Result<(), PlatformError> {
        let response = self
            .client
            .patch(self.message_url(channel, Some(id)))
            .header("Authorization", format!("Bot {}", self.token))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        Self::check(response).await?;
        tracing::debug!(channel = %channel, message = %id, "message edited");
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        id: &MessageId,
    ) -> Result<(), PlatformError> {
        let response = self
            .client
            .delete(self.message_url(channel, Some(id)))
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;
        Self::check(response).await?;
        tracing::info!(channel = %channel, message = %id, "message deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_rejected() {
        let result = DiscordApi::new(String::new(), "https://discord.com/api/v10".into());
        assert!(result.is_err());
    }

    #[test]
    fn message_urls() {
        let api = DiscordApi::new("t".into(), "https://discord.com/api/v10".into()).unwrap();
        assert_eq!(
            api.message_url(ChannelId(42), None),
            "https://discord.com/api/v10/channels/42/messages"
        );
        assert_eq!(
            api.message_url(ChannelId(42), Some(&MessageId("9".into()))),
            "https://discord.com/api/v10/channels/42/messages/9"
        );
    }

    #[test]
    fn rate_limit_body_parses() {
        let body: RateLimitBody = serde_json::from_str(r#"{"retry_after": 12.3}"#).unwrap();
        assert_eq!(body.retry_after, Some(12.3));
    }
}
