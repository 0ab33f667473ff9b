//! Webhook channel
//!
//! External services POST JSON to a configurable path and the message is
//! published to the bus. Replies are POSTed to `callback_url` when one is
//! configured, otherwise only logged.
//!
//! # Request Format
//!
//! ```text
//! POST /webhook HTTP/1.1
//! Content-Type: application/json
//! Authorization: Bearer <optional-token>
//!
//! {"message": "Hello!", "sender": "ci-bot", "chat_id": "builds"}
//! ```
//!
//! # Callback Format
//!
//! ```text
//! POST <callback_url>
//! {"chat_id": "builds", "content": "...", "reply_to": null}
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::config::WebhookConfig;
use crate::error::{ClawgateError, Result};
use crate::utils::string::{log_field, preview};

use super::{BaseChannelConfig, Channel};

pub const WEBHOOK_CHANNEL: &str = "webhook";

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    message: String,
    sender: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct CallbackPayload<'a> {
    chat_id: &'a str,
    content: &'a str,
    reply_to: Option<&'a str>,
}

#[derive(Clone)]
struct WebhookState {
    bus: MessageBus,
    auth_token: Option<String>,
    base: BaseChannelConfig,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn authorized(headers: &HeaderMap, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return true;
    };
    let expected = format!("Bearer {}", token);
    headers
        .get_all(axum::http::header::AUTHORIZATION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| constant_time_eq(v.trim(), &expected))
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !authorized(&headers, state.auth_token.as_deref()) {
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %log_field("error", &e.to_string()), "Webhook: invalid JSON body");
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e));
        }
    };

    let (message, sender, chat_id) = (
        payload.message.trim(),
        payload.sender.trim(),
        payload.chat_id.trim(),
    );
    if message.is_empty() || sender.is_empty() || chat_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "message, sender, and chat_id must be non-empty"
        );
    }

    if !state.base.is_allowed(sender) {
        info!(sender = %sender, "Webhook: sender not in allowlist, rejecting");
        return error_response(StatusCode::FORBIDDEN, "sender not allowed");
    }

    let inbound = InboundMessage::new(&state.base.name, sender, chat_id, message);
    if let Err(e) = state.bus.publish_inbound(inbound) {
        error!(
            error = %log_field("error", &e.to_string()),
            "Webhook: failed to publish inbound message"
        );
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "agent not accepting messages");
    }

    info!(sender = %sender, chat_id = %chat_id, "Webhook: message received");
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// Inbound HTTP channel with an optional outbound callback.
pub struct WebhookChannel {
    config: WebhookConfig,
    base: BaseChannelConfig,
    client: reqwest::Client,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl WebhookChannel {
    /// ```
    /// use clawgate::channels::{Channel, WebhookChannel};
    /// use clawgate::config::WebhookConfig;
    ///
    /// let channel = WebhookChannel::new(WebhookConfig::default());
    /// assert_eq!(channel.name(), "webhook");
    /// assert!(!channel.is_running());
    /// ```
    pub fn new(config: WebhookConfig) -> Self {
        let base = BaseChannelConfig::with_allowlist(WEBHOOK_CHANNEL, config.allow_from.clone());
        Self {
            config,
            base,
            client: reqwest::Client::new(),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            shutdown_tx: None,
        }
    }

    pub fn webhook_config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The HTTP routes, without binding a listener.
    pub fn router(&self, bus: MessageBus) -> Router {
        let state = WebhookState {
            bus,
            auth_token: self
                .config
                .auth_token
                .clone()
                .filter(|t| !t.trim().is_empty()),
            base: self.base.clone(),
        };
        Router::new()
            .route(&self.config.path, post(receive))
            .with_state(state)
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        &self.base.name
    }

    async fn start(&mut self, bus: MessageBus) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Webhook channel already running");
            return Ok(());
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ClawgateError::Channel(format!(
                    "Failed to bind webhook listener on {}: {}",
                    bind_addr, e
                )));
            }
        };
        self.local_addr = listener.local_addr().ok();
        info!(addr = %bind_addr, path = %self.config.path, "Webhook channel listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let app = self.router(bus);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %log_field("error", &e.to_string()), "Webhook server error");
            }
            running.store(false, Ordering::SeqCst);
            info!("Webhook channel stopped");
        });

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping webhook channel");
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Webhook shutdown receiver already dropped");
            }
        }
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        let Some(url) = self.config.callback_url.as_deref() else {
            info!(
                chat_id = %msg.chat_id,
                content = %log_field("content", &msg.content),
                "Webhook reply (no callback_url configured)"
            );
            return Ok(());
        };

        let payload = CallbackPayload {
            chat_id: &msg.chat_id,
            content: &msg.content,
            reply_to: msg.reply_to.as_deref(),
        };
        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClawgateError::Channel(format!(
                "webhook callback returned {}: {}",
                status,
                preview(&body, 120)
            )));
        }
        debug!(chat_id = %msg.chat_id, "Webhook reply delivered");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.base.is_allowed(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn post_json(path: &str, body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    const VALID: &str = r#"{"message":"deploy done","sender":"ci","chat_id":"builds"}"#;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("Bearer abc", "Bearer abc"));
        assert!(!constant_time_eq("Bearer abc", "Bearer abd"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[tokio::test]
    async fn test_valid_post_publishes_inbound() {
        let bus = MessageBus::new();
        let channel = WebhookChannel::new(WebhookConfig::default());
        let resp = channel
            .router(bus.clone())
            .oneshot(post_json("/webhook", VALID, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "webhook");
        assert_eq!(msg.sender_id, "ci");
        assert_eq!(msg.session_key, "webhook:builds");
        assert!(!msg.is_scheduled);
    }

    #[tokio::test]
    async fn test_auth_token_required() {
        let bus = MessageBus::new();
        let channel = WebhookChannel::new(WebhookConfig {
            auth_token: Some("s3cret".into()),
            ..Default::default()
        });

        let resp = channel
            .router(bus.clone())
            .oneshot(post_json("/webhook", VALID, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = channel
            .router(bus.clone())
            .oneshot(post_json("/webhook", VALID, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = channel
            .router(bus.clone())
            .oneshot(post_json("/webhook", VALID, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_bodies_rejected() {
        let bus = MessageBus::new();
        let channel = WebhookChannel::new(WebhookConfig::default());
        for body in [
            "not json",
            r#"{"message":"hi"}"#,
            r#"{"message":"  ","sender":"ci","chat_id":"b"}"#,
        ] {
            let resp = channel
                .router(bus.clone())
                .oneshot(post_json("/webhook", body, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn test_allowlist_and_unknown_path() {
        let bus = MessageBus::new();
        let channel = WebhookChannel::new(WebhookConfig {
            allow_from: vec!["ops".into()],
            ..Default::default()
        });
        assert!(!channel.is_allowed("ci"));

        let resp = channel
            .router(bus.clone())
            .oneshot(post_json("/webhook", VALID, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = channel
            .router(bus.clone())
            .oneshot(post_json("/elsewhere", VALID, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_and_stop_on_ephemeral_port() {
        let mut channel = WebhookChannel::new(WebhookConfig {
            port: 0,
            ..Default::default()
        });
        channel.start(MessageBus::new()).await.unwrap();
        assert!(channel.is_running());
        assert!(channel.local_addr().is_some());

        channel.stop().await.unwrap();
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn test_send_without_callback_is_ok() {
        let channel = WebhookChannel::new(WebhookConfig::default());
        channel
            .send(OutboundMessage::new("webhook", "builds", "hello"))
            .await
            .unwrap();
    }
}
