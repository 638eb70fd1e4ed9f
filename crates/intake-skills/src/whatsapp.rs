//! WhatsApp Cloud API transport, plus a logging-only stand-in for unconfigured deployments.

use async_trait::async_trait;
use intake_core::{CoreConfig, MessageTransport, Outbound, TransportError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const LIST_SECTION_TITLE: &str = "Options";

/// Graph API request body for one outbound intent.
pub fn render_payload(to: &str, message: &Outbound) -> Value {
    let to = to.trim_start_matches('+');
    match message {
        Outbound::Text { body } => json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }),
        Outbound::Buttons { body, choices } => json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": {
                    "buttons": choices
                        .iter()
                        .map(|c| json!({ "type": "reply", "reply": { "id": c.id, "title": c.title } }))
                        .collect::<Vec<_>>(),
                },
            },
        }),
        Outbound::List { body, button, rows } => json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "list",
                "body": { "text": body },
                "action": {
                    "button": button,
                    "sections": [{
                        "title": LIST_SECTION_TITLE,
                        "rows": rows
                            .iter()
                            .map(|r| json!({ "id": r.id, "title": r.title }))
                            .collect::<Vec<_>>(),
                    }],
                },
            },
        }),
        Outbound::Document { url, filename, caption } => json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "document",
            "document": { "link": url, "filename": filename, "caption": caption },
        }),
    }
}

/// Posts intents to `{graph_api_base}/{phone_number_id}/messages` with bearer auth.
#[derive(Clone)]
pub struct WhatsAppTransport {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl WhatsAppTransport {
    pub fn new(graph_api_base: &str, phone_number_id: &str, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: format!(
                "{}/{}/messages",
                graph_api_base.trim_end_matches('/'),
                phone_number_id
            ),
            token: token.into(),
        }
    }

    /// `None` unless both the access token and phone number id are set.
    pub fn from_config(config: &CoreConfig) -> Option<Self> {
        let token = config.whatsapp_token.as_deref().filter(|t| !t.is_empty())?;
        let phone_id = config.phone_number_id.as_deref().filter(|p| !p.is_empty())?;
        Some(Self::new(&config.graph_api_base, phone_id, token))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessageTransport for WhatsAppTransport {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, to: &str, message: &Outbound) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&render_payload(to, message))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(target: "intake::transport", to = %to, status = %status, "message delivered");
        Ok(())
    }
}

/// Logs every intent instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyTransport;

#[async_trait]
impl MessageTransport for LogOnlyTransport {
    fn name(&self) -> &str {
        "log-only"
    }

    async fn send(&self, to: &str, message: &Outbound) -> Result<(), TransportError> {
        tracing::info!(
            target: "intake::transport",
            to = %to,
            payload = %render_payload(to, message),
            "outbound message (not sent)"
        );
        Ok(())
    }
}

/// WhatsApp when credentials are configured, otherwise log-only.
pub fn transport_from_config(config: &CoreConfig) -> Arc<dyn MessageTransport> {
    match WhatsAppTransport::from_config(config) {
        Some(t) => {
            tracing::info!(target: "intake::transport", endpoint = %t.endpoint(), "WhatsApp transport enabled");
            Arc::new(t)
        }
        None => {
            tracing::warn!(target: "intake::transport", "WhatsApp credentials missing; replies are only logged");
            Arc::new(LogOnlyTransport)
        }
    }
}
