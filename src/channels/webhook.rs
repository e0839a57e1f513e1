//! Papercups webhook — inbound chat events over HTTP, replies posted back
//! through the Papercups REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ChannelError;
use crate::orchestrator::Orchestrator;

/// Delivers a reply into a chat conversation.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, conversation_id: &str, body: &str) -> Result<(), ChannelError>;
}

/// Posts replies to `{base_url}/api/v1/messages`.
pub struct PapercupsReplySink {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl PapercupsReplySink {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, ChannelError> {
        Self::new(&config.reply_base_url, config.reply_token.clone())
    }
}

#[async_trait]
impl ReplySink for PapercupsReplySink {
    async fn send_reply(&self, conversation_id: &str, body: &str) -> Result<(), ChannelError> {
        let Some(token) = &self.token else {
            return Err(ChannelError::SendFailed {
                name: "papercups".into(),
                reason: "no API token configured".into(),
            });
        };
        let message = serde_json::json!({
            "message": {
                "conversation_id": conversation_id,
                "body": body,
            }
        });
        let resp = self
            .client
            .post(format!("{}/api/v1/messages", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(&message)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "papercups".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "papercups".into(),
                reason: format!("{status}: {text}"),
            });
        }
        Ok(())
    }
}

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub orchestrator: Arc<Orchestrator>,
    pub replies: Arc<dyn ReplySink>,
}

/// Raw webhook body.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A chat message from a website visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerMessage {
    pub conversation_id: String,
    pub customer_id: String,
    pub body: String,
}

/// What a webhook event asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    /// Echo the payload back.
    Verify(serde_json::Value),
    /// Answer a visitor message.
    Reply(CustomerMessage),
    /// Known event that needs no work.
    Acknowledge,
}

fn non_empty_str<'a>(payload: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Classify an event by type and sender. Unknown events and incomplete
/// visitor messages are [`ChannelError::InvalidMessage`].
pub fn classify(event: WebhookEvent) -> Result<WebhookAction, ChannelError> {
    let payload = &event.payload;
    match event.event.as_str() {
        "webhook:verify" => Ok(WebhookAction::Verify(event.payload)),
        "message:created" => {
            if let Some(customer_id) = non_empty_str(payload, "customer_id") {
                let conversation_id = non_empty_str(payload, "conversation_id").ok_or_else(|| {
                    ChannelError::InvalidMessage("customer message without conversation_id".into())
                })?;
                let body = non_empty_str(payload, "body")
                    .ok_or_else(|| ChannelError::InvalidMessage("customer message without body".into()))?;
                Ok(WebhookAction::Reply(CustomerMessage {
                    conversation_id: conversation_id.to_string(),
                    customer_id: customer_id.to_string(),
                    body: body.to_string(),
                }))
            } else if payload.get("user_id").is_some_and(|v| !v.is_null()) {
                // an agent or the bot itself wrote this message
                Ok(WebhookAction::Acknowledge)
            } else {
                Err(ChannelError::InvalidMessage("message without sender".into()))
            }
        }
        "conversation:created" => Ok(WebhookAction::Acknowledge),
        other => Err(ChannelError::InvalidMessage(format!("unsupported event '{other}'"))),
    }
}

/// GET /
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"message": "Lead Assist API is online"}))
}

/// POST /chat
async fn handle_event(State(state): State<WebhookState>, Json(event): Json<WebhookEvent>) -> Response {
    let kind = event.event.clone();
    match classify(event) {
        Ok(WebhookAction::Verify(payload)) => {
            info!("Papercups webhook verified");
            Json(payload).into_response()
        }
        Ok(WebhookAction::Reply(message)) => {
            info!(
                conversation_id = %message.conversation_id,
                customer_id = %message.customer_id,
                "New visitor message"
            );
            let outcome = state
                .orchestrator
                .handle_message(&message.conversation_id, Some(&message.customer_id), &message.body)
                .await;
            if let Err(e) = state
                .replies
                .send_reply(&message.conversation_id, &outcome.reply)
                .await
            {
                warn!(conversation_id = %message.conversation_id, error = %e, "Reply delivery failed");
            }
            Json(serde_json::json!({"ok": true})).into_response()
        }
        Ok(WebhookAction::Acknowledge) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e) => {
            warn!(event = %kind, error = %e, "Rejected webhook event");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid event or payload"})),
            )
                .into_response()
        }
    }
}

/// CORS for the configured origins; none configured allows any origin.
/// Unparseable origins are skipped.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Build the webhook routes.
pub fn webhook_routes(state: WebhookState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(handle_event))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(kind: &str, payload: serde_json::Value) -> WebhookEvent {
        WebhookEvent {
            event: kind.into(),
            payload,
        }
    }

    #[test]
    fn verify_echoes_payload() {
        let payload = json!({"challenge": "abc"});
        assert_eq!(
            classify(event("webhook:verify", payload.clone())).unwrap(),
            WebhookAction::Verify(payload)
        );
    }

    #[test]
    fn customer_message_is_answered() {
        let action = classify(event(
            "message:created",
            json!({"customer_id": "cus_1", "conversation_id": "conv_1", "body": "Hallo", "user_id": null}),
        ))
        .unwrap();
        assert_eq!(
            action,
            WebhookAction::Reply(CustomerMessage {
                conversation_id: "conv_1".into(),
                customer_id: "cus_1".into(),
                body: "Hallo".into(),
            })
        );
    }

    #[test]
    fn agent_messages_and_new_conversations_are_acknowledged() {
        assert_eq!(
            classify(event("message:created", json!({"customer_id": null, "user_id": 7}))).unwrap(),
            WebhookAction::Acknowledge
        );
        assert_eq!(
            classify(event("conversation:created", json!({}))).unwrap(),
            WebhookAction::Acknowledge
        );
    }

    #[test]
    fn unknown_or_incomplete_events_are_rejected() {
        for (kind, payload) in [
            ("customer:updated", json!({})),
            ("message:created", json!({"customer_id": "cus_1", "body": "Hi"})),
            ("message:created", json!({"customer_id": "cus_1", "conversation_id": "conv_1", "body": " "})),
            ("message:created", json!({})),
        ] {
            let err = classify(event(kind, payload)).unwrap_err();
            assert!(matches!(err, ChannelError::InvalidMessage(_)), "{kind}: {err}");
        }
    }

    #[tokio::test]
    async fn sink_without_token_refuses_to_send() {
        let sink = PapercupsReplySink::new("https://app.papercups.io/", None).unwrap();
        let err = sink.send_reply("conv", "Hallo").await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }
}
