//! Meta Cloud API client for WhatsApp Business messaging

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Provider-assigned ID of an accepted message
#[derive(Debug, Deserialize)]
pub struct SentMessageId {
    pub id: String,
}

/// Response to a send call. The wamid correlates later status webhooks.
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub messages: Vec<SentMessageId>,
}

impl SendMessageResponse {
    pub fn wamid(&self) -> Option<&str> {
        self.messages.first().map(|m| m.id.as_str())
    }
}

/// Seam to the external messaging provider. The worker only needs the send
/// endpoint; sync of phones/templates is a separate collaborator.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send_message(&self, phone_number_id: &str, payload: &Value)
        -> Result<SendMessageResponse>;
}

/// Outbound message payload variants.
///
/// The tagged variant replaces runtime type-checking of loose maps: a
/// campaign resolves into exactly one of these before the provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text { body: String },
    Template { name: String, language: String },
}

impl OutboundPayload {
    /// Text stored on the message row: the literal body, or the template name.
    pub fn body_text(&self) -> &str {
        match self {
            OutboundPayload::Text { body } => body,
            OutboundPayload::Template { name, .. } => name,
        }
    }

    /// Render the Meta Cloud API request body for one recipient.
    pub fn to_provider_json(&self, to_phone: &str) -> Value {
        match self {
            OutboundPayload::Text { body } => json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to_phone,
                "type": "text",
                "text": { "body": body },
            }),
            OutboundPayload::Template { name, language } => json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to_phone,
                "type": "template",
                "template": {
                    "name": name,
                    "language": { "code": language },
                },
            }),
        }
    }
}

/// HTTP client for the Meta Graph API
pub struct MetaClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl MetaClient {
    pub fn new(base_url: &str, access_token: &str) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            client,
        }
    }
}

#[async_trait]
impl ProviderClient for MetaClient {
    async fn send_message(
        &self,
        phone_number_id: &str,
        payload: &Value,
    ) -> Result<SendMessageResponse> {
        let url = format!("{}/{}/messages", self.base_url, phone_number_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await
            .context("Failed to send message request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Meta API returned {}: {}", status, body);
        }

        let parsed: SendMessageResponse = response
            .json()
            .await
            .context("Failed to parse send response")?;

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload_shape() {
        let payload = OutboundPayload::Text {
            body: "Hello there".to_string(),
        };
        let json = payload.to_provider_json("420777123456");

        assert_eq!(json["messaging_product"], "whatsapp");
        assert_eq!(json["to"], "420777123456");
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"]["body"], "Hello there");
        assert!(json.get("template").is_none());
    }

    #[test]
    fn test_template_payload_shape() {
        let payload = OutboundPayload::Template {
            name: "hello_world".to_string(),
            language: "en_US".to_string(),
        };
        let json = payload.to_provider_json("420777123456");

        assert_eq!(json["type"], "template");
        assert_eq!(json["template"]["name"], "hello_world");
        assert_eq!(json["template"]["language"]["code"], "en_US");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_body_text_uses_template_name() {
        let payload = OutboundPayload::Template {
            name: "hello_world".to_string(),
            language: "en_US".to_string(),
        };
        assert_eq!(payload.body_text(), "hello_world");
    }

    #[test]
    fn test_wamid_extraction() {
        let response: SendMessageResponse =
            serde_json::from_value(json!({"messages": [{"id": "wamid.ABC123"}]})).unwrap();
        assert_eq!(response.wamid(), Some("wamid.ABC123"));

        let empty: SendMessageResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.wamid(), None);
    }
}
