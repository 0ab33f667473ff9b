//! Web API - direct chat, status and model management over HTTP.
//!
//! | Method | Path                   | Body                                |
//! |--------|------------------------|-------------------------------------|
//! | POST   | `/api/chat`            | `{content, session_key?}`           |
//! | GET    | `/api/messages`        |                                     |
//! | GET    | `/api/status`          |                                     |
//! | GET    | `/api/config`          |                                     |
//! | POST   | `/api/config`          | full config                         |
//! | GET    | `/api/models`          |                                     |
//! | POST   | `/api/models`          | `{model_name, model, api_key?, ..}` |
//! | DELETE | `/api/models/{name}`   |                                     |
//! | POST   | `/api/models/default`  | `{model_name}`                      |
//! | GET    | `/api/sessions`        |                                     |
//!
//! Chat turns run through `process_direct_with_channel` on channel `web`,
//! chat `default`; the reply is returned in the response, not published.
//! Anything else addressed to `web` (subagent results, `message` tool
//! sends) waits on the bus until `GET /api/messages` collects it.
//!
//! Model changes apply to the running registry and, when a config path is
//! set, are written back to the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::AgentLoop;
use crate::config::{validate_config, Config, DiagnosticLevel, ModelConfig};
use crate::error::{ClawgateError, Result};
use crate::providers::classify_error_message;
use crate::utils::string::log_field;

pub const WEB_CHANNEL: &str = "web";
pub const WEB_CHAT_ID: &str = "default";
pub const DEFAULT_WEB_SESSION: &str = "web:default";

/// Shared state for the handlers.
#[derive(Clone)]
pub struct WebState {
    pub agent: Arc<AgentLoop>,
    /// Names of the channels running alongside the API.
    pub channels: Vec<String>,
    /// Config file updated when models or settings change.
    pub config_path: Option<PathBuf>,
}

impl WebState {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            channels: Vec::new(),
            config_path: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    #[serde(default)]
    pub session_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct DefaultModelRequest {
    pub model_name: String,
}

/// A model entry with its API key masked.
#[derive(Debug, Serialize)]
pub struct ModelView {
    pub model_name: String,
    pub model: String,
    pub api_base: Option<String>,
    pub api_key: String,
    pub is_default: bool,
}

impl ModelView {
    fn new(model: ModelConfig, default: Option<&str>) -> Self {
        Self {
            is_default: default == Some(model.model_name.as_str()),
            api_key: model.masked_api_key(),
            model_name: model.model_name,
            model: model.model,
            api_base: model.api_base,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PendingMessage {
    pub chat_id: String,
    pub content: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn chat(State(state): State<WebState>, Json(req): Json<ChatRequest>) -> Response {
    if req.content.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content must not be empty");
    }
    let session_key = req
        .session_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(DEFAULT_WEB_SESSION);

    match state
        .agent
        .process_direct_with_channel(&req.content, session_key, WEB_CHANNEL, WEB_CHAT_ID)
        .await
    {
        Ok(response) => Json(ChatResponse { response }).into_response(),
        Err(e) => {
            let text = e.to_string();
            let class = classify_error_message(&text);
            error!(
                operation = "chat",
                class = %class,
                error = %log_field("error", &text),
                "Web operation failed"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, class.user_message())
        }
    }
}

async fn messages(State(state): State<WebState>) -> Json<serde_json::Value> {
    let pending: Vec<PendingMessage> = state
        .agent
        .bus()
        .drain_outbound(WEB_CHANNEL)
        .into_iter()
        .map(|m| PendingMessage {
            chat_id: m.chat_id,
            content: m.content,
        })
        .collect();
    Json(json!({ "messages": pending }))
}

async fn status(State(state): State<WebState>) -> Json<serde_json::Value> {
    let config = state.agent.config();
    let providers = state.agent.providers();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "gateway": format!("{}:{}", config.gateway.host, config.gateway.port),
        "models": providers.len().await,
        "default_model": providers.default_model().await,
        "channels": state.channels,
    }))
}

async fn models(State(state): State<WebState>) -> Json<Vec<ModelView>> {
    let providers = state.agent.providers();
    let default = providers.default_model().await;
    let views = providers
        .list()
        .await
        .into_iter()
        .map(|m| ModelView::new(m, default.as_deref()))
        .collect();
    Json(views)
}

async fn add_model(State(state): State<WebState>, Json(model): Json<ModelConfig>) -> Response {
    let providers = state.agent.providers();
    let name = model.model_name.trim().to_string();
    let model = ModelConfig { model_name: name.clone(), ..model };

    match providers.add(model.clone()).await {
        Ok(()) => {}
        Err(e @ ClawgateError::Config(_)) => {
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
        Err(e) => {
            error!(
                operation = "add_model",
                error = %log_field("error", &e.to_string()),
                "Web operation failed"
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to add model");
        }
    }

    if let Err(resp) = persist_models(&state).await {
        if let Err(e) = providers.remove(&name).await {
            warn!(
                model_name = %name,
                error = %log_field("error", &e.to_string()),
                "Could not roll back model add"
            );
        }
        return resp;
    }
    let default = providers.default_model().await;
    (StatusCode::CREATED, Json(ModelView::new(model, default.as_deref()))).into_response()
}

async fn remove_model(State(state): State<WebState>, UrlPath(name): UrlPath<String>) -> Response {
    let providers = state.agent.providers();
    let removed = match providers.remove(&name).await {
        Ok(removed) => removed,
        Err(ClawgateError::NotFound(what)) => {
            return error_response(StatusCode::NOT_FOUND, &format!("unknown {}", what));
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    if let Err(resp) = persist_models(&state).await {
        return resp;
    }
    Json(json!({
        "status": "ok",
        "removed": removed.model_name,
        "default_model": providers.default_model().await,
    }))
    .into_response()
}

async fn set_default_model(
    State(state): State<WebState>,
    Json(req): Json<DefaultModelRequest>,
) -> Response {
    let providers = state.agent.providers();
    match providers.set_default(req.model_name.trim()).await {
        Ok(()) => {}
        Err(ClawgateError::NotFound(what)) => {
            return error_response(StatusCode::NOT_FOUND, &format!("unknown {}", what));
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }

    if let Err(resp) = persist_models(&state).await {
        return resp;
    }
    Json(json!({ "status": "ok", "default_model": providers.default_model().await }))
        .into_response()
}

/// Load the config file at `path`, apply `change`, and write it back.
fn update_config_file<F>(path: &Path, change: F) -> Result<()>
where
    F: FnOnce(&mut Config),
{
    let mut config = Config::load_from_path(path)?;
    change(&mut config);
    config.save_to_path(path)
}

/// Write the registry's model list and default to the config file, if any.
async fn persist_models(state: &WebState) -> std::result::Result<(), Response> {
    let Some(path) = &state.config_path else {
        return Ok(());
    };
    let providers = state.agent.providers();
    let models = providers.list().await;
    let default = providers.default_model().await.unwrap_or_default();
    update_config_file(path, move |config| {
        config.model_list = models;
        config.agents.defaults.model_name = default;
    })
    .map_err(|e| {
        warn!(
            path = %path.display(),
            error = %log_field("error", &e.to_string()),
            "Models changed but config was not saved"
        );
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to save config")
    })
}

/// The effective config: the file when one is set, else the startup config,
/// with the live model list and default on top.
async fn current_config(state: &WebState) -> Result<Config> {
    let mut config = match &state.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => state.agent.config().clone(),
    };
    let providers = state.agent.providers();
    config.model_list = providers.list().await;
    if let Some(default) = providers.default_model().await {
        config.agents.defaults.model_name = default;
    }
    Ok(config)
}

async fn get_config(State(state): State<WebState>) -> Response {
    match current_config(&state).await {
        Ok(config) => Json(config.masked()).into_response(),
        Err(e) => {
            error!(
                operation = "get_config",
                error = %log_field("error", &e.to_string()),
                "Web operation failed"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load config")
        }
    }
}

/// Replace the config. Masked secrets sent back unchanged keep their stored
/// values. Models apply immediately; other settings on the next start.
async fn update_config(State(state): State<WebState>, Json(mut config): Json<Config>) -> Response {
    let current = match current_config(&state).await {
        Ok(current) => current,
        Err(e) => {
            error!(
                operation = "update_config",
                error = %log_field("error", &e.to_string()),
                "Web operation failed"
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load config");
        }
    };
    config.restore_masked(&current);

    let problems: Vec<String> = validate_config(&config)
        .into_iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .map(|d| d.to_string())
        .collect();
    if !problems.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid config", "details": problems })),
        )
            .into_response();
    }

    let default = config.default_model_name().map(str::to_string);
    if let Err(e) = state
        .agent
        .providers()
        .replace(config.model_list.clone(), default)
        .await
    {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }

    if let Some(path) = &state.config_path {
        if let Err(e) = config.save_to_path(path) {
            warn!(
                path = %path.display(),
                error = %log_field("error", &e.to_string()),
                "Config applied but not saved"
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to save config");
        }
    }
    info!(models = config.model_list.len(), "Config updated over the web API");
    Json(json!({ "status": "ok" })).into_response()
}

async fn sessions(State(state): State<WebState>) -> Response {
    match state.agent.sessions().list().await {
        Ok(keys) => Json(json!({ "sessions": keys })).into_response(),
        Err(e) => {
            error!(
                operation = "sessions",
                error = %log_field("error", &e.to_string()),
                "Web operation failed"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list sessions")
        }
    }
}

async fn not_found(method: Method, uri: Uri) -> Response {
    info!(method = %method, path = %uri.path(), "Unknown API route");
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// The API routes with CORS and request tracing.
pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/messages", get(messages))
        .route("/api/status", get(status))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/models", get(models).post(add_model))
        .route("/api/models/{name}", delete(remove_model))
        .route("/api/models/default", post(set_default_model))
        .route("/api/sessions", get(sessions))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: WebState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Web API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::providers::registry::test_support::{model, NamedFactory};
    use crate::providers::ProviderRegistry;
    use crate::session::SessionManager;
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> WebState {
        let providers = ProviderRegistry::new(
            vec![
                model("fast", "groq/llama-3.1-8b").with_api_key("gsk-abcdef1234"),
                model("smart", "openai/gpt-4o"),
            ],
            None,
            Arc::new(NamedFactory),
        )
        .unwrap();
        let agent = AgentLoop::new(
            Config::default(),
            SessionManager::new_memory(),
            Arc::new(providers),
            Arc::new(ToolRegistry::new()),
            MessageBus::new(),
        );
        WebState::new(Arc::new(agent)).with_channels(vec!["webhook".into()])
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn saved_config() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config::default().save_to_path(&path).unwrap();
        (dir, path)
    }

    fn aliases(config: &Config) -> Vec<&str> {
        config
            .model_list
            .iter()
            .map(|m| m.model_name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_chat_uses_default_web_session() {
        let state = state();
        let agent = Arc::clone(&state.agent);
        let resp = router(state)
            .oneshot(post_json("/api/chat", json!({"content": "hello"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        // NamedProvider answers with the alias of the model that served it.
        assert_eq!(body_json(resp).await["response"], "fast");
        assert!(agent.sessions().exists(DEFAULT_WEB_SESSION).await);
        assert_eq!(agent.bus().pending_outbound(WEB_CHANNEL), 0);
    }

    #[tokio::test]
    async fn test_messages_drains_web_backlog() {
        let state = state();
        let bus = state.agent.bus().clone();
        bus.publish_outbound(crate::bus::OutboundMessage::new(
            WEB_CHANNEL,
            WEB_CHAT_ID,
            "subagent finished",
        ));
        bus.publish_outbound(crate::bus::OutboundMessage::new("webhook", "u1", "not ours"));
        let app = router(state);

        let body = body_json(app.clone().oneshot(get("/api/messages")).await.unwrap()).await;
        assert_eq!(
            body["messages"],
            json!([{"chat_id": "default", "content": "subagent finished"}])
        );
        assert_eq!(bus.pending_outbound("webhook"), 1);

        let body = body_json(app.oneshot(get("/api/messages")).await.unwrap()).await;
        assert_eq!(body["messages"], json!([]));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_content() {
        let resp = router(state())
            .oneshot(post_json("/api/chat", json!({"content": "  "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status() {
        let resp = router(state()).oneshot(get("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["models"], 2);
        assert_eq!(body["default_model"], "fast");
        assert_eq!(body["gateway"], "127.0.0.1:18790");
        assert_eq!(body["channels"], json!(["webhook"]));
    }

    #[tokio::test]
    async fn test_models_are_masked() {
        let resp = router(state()).oneshot(get("/api/models")).await.unwrap();
        let body = body_json(resp).await;
        assert_eq!(body[0]["model_name"], "fast");
        assert_eq!(body[0]["api_key"], "****1234");
        assert_eq!(body[0]["is_default"], true);
        assert_eq!(body[1]["is_default"], false);
        assert!(!body.to_string().contains("gsk-abcdef"));
    }

    #[tokio::test]
    async fn test_set_default_model() {
        let state = state();
        let agent = Arc::clone(&state.agent);
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(post_json("/api/models/default", json!({"model_name": "smart"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(agent.providers().default_model().await.as_deref(), Some("smart"));

        let resp = app
            .oneshot(post_json("/api/models/default", json!({"model_name": "nope"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_default_model_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config::default().save_to_path(&path).unwrap();

        let app = router(state().with_config_path(path.clone()));
        let resp = app
            .oneshot(post_json("/api/models/default", json!({"model_name": "smart"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(saved.agents.defaults.model_name, "smart");
    }

    #[tokio::test]
    async fn test_add_and_remove_model_persist() {
        let (_dir, path) = saved_config();
        let state = state().with_config_path(path.clone());
        let agent = Arc::clone(&state.agent);
        let app = router(state);

        let local = json!({
            "model_name": " local ",
            "model": "ollama/llama3",
            "api_base": "http://localhost:11434/v1"
        });
        let resp = app
            .clone()
            .oneshot(post_json("/api/models", local.clone()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["model_name"], "local");
        assert_eq!(body["is_default"], false);
        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(aliases(&saved), vec!["fast", "smart", "local"]);
        assert_eq!(saved.model_list[0].api_key, "gsk-abcdef1234");

        let resp = app
            .clone()
            .oneshot(post_json("/api/models", local))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = app
            .clone()
            .oneshot(post_json("/api/models", json!({"model_name": "x", "model": "gpt-4o"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(agent.providers().len().await, 3);

        let resp = app.clone().oneshot(delete("/api/models/fast")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["default_model"], "smart");
        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(aliases(&saved), vec!["smart", "local"]);
        assert_eq!(saved.agents.defaults.model_name, "smart");

        let resp = app.oneshot(delete("/api/models/fast")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_get_masks_secrets() {
        let resp = router(state()).oneshot(get("/api/config")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["model_list"][0]["api_key"], "****1234");
        assert_eq!(body["model_list"][1]["model_name"], "smart");
        assert_eq!(body["agents"]["defaults"]["model_name"], "fast");
        assert!(!body.to_string().contains("gsk-abcdef"));
    }

    #[tokio::test]
    async fn test_config_post_keeps_masked_keys_and_applies_models() {
        let (_dir, path) = saved_config();
        let state = state().with_config_path(path.clone());
        let agent = Arc::clone(&state.agent);
        let app = router(state);

        let mut config = body_json(app.clone().oneshot(get("/api/config")).await.unwrap()).await;
        config["model_list"] = json!([
            config["model_list"][0].clone(),
            {"model_name": "local", "model": "ollama/llama3", "api_base": "http://localhost:11434/v1"}
        ]);
        config["agents"]["defaults"]["model_name"] = json!("local");
        config["agents"]["defaults"]["max_tokens"] = json!(2048);

        let resp = app.oneshot(post_json("/api/config", config)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let providers = agent.providers();
        let live: Vec<String> = providers.list().await.into_iter().map(|m| m.model_name).collect();
        assert_eq!(live, vec!["fast", "local"]);
        assert_eq!(providers.default_model().await.as_deref(), Some("local"));

        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(saved.model_list[0].api_key, "gsk-abcdef1234");
        assert_eq!(saved.agents.defaults.max_tokens, 2048);
        assert_eq!(saved.agents.defaults.model_name, "local");
    }

    #[tokio::test]
    async fn test_config_post_rejects_invalid_config() {
        let state = state();
        let agent = Arc::clone(&state.agent);
        let app = router(state);

        let mut config = body_json(app.clone().oneshot(get("/api/config")).await.unwrap()).await;
        config["agents"]["defaults"]["model_name"] = json!("missing");
        config["gateway"]["port"] = json!(0);

        let resp = app.oneshot(post_json("/api/config", config)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
        assert_eq!(agent.providers().default_model().await.as_deref(), Some("fast"));
        assert_eq!(agent.providers().len().await, 2);
    }

    #[tokio::test]
    async fn test_sessions_and_unknown_route() {
        let state = state();
        state
            .agent
            .sessions()
            .save(&crate::session::Session::new("web:default"))
            .await
            .unwrap();
        let app = router(state);

        let body = body_json(app.clone().oneshot(get("/api/sessions")).await.unwrap()).await;
        assert_eq!(body["sessions"], json!(["web:default"]));

        let resp = app.oneshot(get("/api/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
