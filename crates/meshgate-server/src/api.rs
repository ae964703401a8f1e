use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use meshgate_registry::{ChannelSummary, MessagePage, MessageQuery, PeerRecord};
use meshgate_shared::crypto::tokens_match;
use meshgate_shared::{ChannelKey, JoinMode};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fanout::ClientSummary;
use crate::hub::SharedHub;
use crate::query::{ActivityView, AgentView, ChannelDetail, Graph, NodeInfo};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub hub: SharedHub,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/api/info", get(node_info))
        .route("/api/peers", get(list_peers))
        .route("/api/peers/:id", get(get_peer))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/:id", get(get_agent))
        .route("/api/channels", get(list_channels).post(join_channel))
        .route("/api/channels/:key", get(get_channel).delete(leave_channel))
        .route("/api/messages", get(list_messages))
        .route("/api/activity", get(activity))
        .route("/api/graph", get(graph))
        .route("/api/clients", get(list_clients))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct JoinChannelRequest {
    name: String,
    announce: Option<bool>,
    discover: Option<bool>,
}

#[derive(Serialize)]
struct JoinChannelResponse {
    name: String,
    key: ChannelKey,
    joined: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn node_info(State(state): State<AppState>) -> Json<NodeInfo> {
    Json(state.hub.lock().await.info())
}

async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerRecord>> {
    Json(state.hub.lock().await.peers.list())
}

async fn get_peer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PeerRecord>, ServerError> {
    let hub = state.hub.lock().await;
    Ok(Json(hub.peers.find(&id)?.clone()))
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentView>> {
    Json(state.hub.lock().await.agent_views())
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentView>, ServerError> {
    Ok(Json(state.hub.lock().await.agent_view(&id)?))
}

async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelSummary>> {
    Json(state.hub.lock().await.topics.list())
}

async fn get_channel(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ChannelDetail>, ServerError> {
    Ok(Json(state.hub.lock().await.channel_detail(&key)?))
}

async fn join_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<JoinChannelRequest>,
) -> Result<Json<JoinChannelResponse>, ServerError> {
    verify_bearer(&headers, &state.config)?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("channel name is required".into()));
    }

    let defaults = JoinMode::default();
    let mode = JoinMode {
        announce: req.announce.unwrap_or(defaults.announce),
        discover: req.discover.unwrap_or(defaults.discover),
    };
    let outcome = state.hub.lock().await.join_channel(&name, mode)?;

    info!(channel = %name, "Channel joined via API");
    Ok(Json(JoinChannelResponse {
        name,
        key: outcome.key(),
        joined: outcome.is_new(),
    }))
}

async fn leave_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_bearer(&headers, &state.config)?;

    let mut hub = state.hub.lock().await;
    // The segment is a channel key like GET, but a joined name is accepted too.
    let name = if hub.topics.is_joined(&key) {
        key
    } else {
        hub.topics
            .find(&key)
            .map(|channel| channel.name.clone())
            .map_err(|_| ServerError::NotFound(format!("Channel '{key}' is not joined")))?
    };
    hub.leave_channel(&name);

    info!(channel = %name, "Channel left via API");
    Ok(Json(serde_json::json!({ "name": name, "left": true })))
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Json<MessagePage> {
    Json(state.hub.lock().await.archive.query(&query))
}

async fn activity(State(state): State<AppState>) -> Json<ActivityView> {
    Json(state.hub.lock().await.activity_view())
}

async fn graph(State(state): State<AppState>) -> Json<Graph> {
    Json(state.hub.lock().await.graph())
}

async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientSummary>> {
    Json(state.hub.lock().await.sessions.list())
}

/// Mutating routes need the shared token when one is configured.
fn verify_bearer(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.auth_token else {
        return Ok(());
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    if !tokens_match(token, expected) {
        return Err(ServerError::Forbidden("Invalid or missing bearer token".into()));
    }
    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::hub_with;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use meshgate_shared::crypto::derive_channel_key;
    use serde_json::Value;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn app(config: ServerConfig) -> (Router, SharedHub) {
        let (hub, _) = hub_with(config.clone());
        let hub = Arc::new(Mutex::new(hub));
        let state = AppState {
            hub: hub.clone(),
            config: Arc::new(config),
        };
        (build_router(state), hub)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(ServerConfig::default());
        let (status, body) = call(router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_join_and_get_channel() {
        let (router, _) = app(ServerConfig::default());

        let request = Request::builder()
            .method("POST")
            .uri("/api/channels")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"alpha"}"#))
            .unwrap();
        let (status, body) = call(router.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["joined"], true);
        let key = derive_channel_key("alpha").to_hex();
        assert_eq!(body["key"], key);

        let (status, body) = call(router.clone(), get(&format!("/api/channels/{key}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "alpha");
        assert_eq!(body["public"], false);

        let (status, _) = call(router, get(&format!("/api/channels/{}", "00".repeat(32)))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mutations_require_bearer_when_token_set() {
        let config = ServerConfig {
            auth_token: Some("secret".into()),
            ..Default::default()
        };
        let (router, hub) = app(config);

        let post = |auth: Option<&str>| {
            let mut builder = Request::builder()
                .method("POST")
                .uri("/api/channels")
                .header("content-type", "application/json");
            if let Some(auth) = auth {
                builder = builder.header("authorization", auth);
            }
            builder.body(Body::from(r#"{"name":"alpha"}"#)).unwrap()
        };

        let (status, _) = call(router.clone(), post(None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(router.clone(), post(Some("Bearer wrong"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(router.clone(), post(Some("Bearer secret"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(hub.lock().await.topics.is_joined("alpha"));

        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/channels/alpha")
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(router, delete).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["left"], true);
    }

    #[tokio::test]
    async fn test_leave_channel_by_key() {
        let (router, hub) = app(ServerConfig::default());
        hub.lock()
            .await
            .join_channel("alpha", JoinMode::default())
            .unwrap();
        let key = derive_channel_key("alpha").to_hex();

        let delete = |uri: String| {
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = call(router.clone(), delete(format!("/api/channels/{key}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "alpha");
        assert!(!hub.lock().await.topics.is_joined("alpha"));

        let (status, _) = call(router, delete(format!("/api/channels/{key}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_messages_pagination() {
        let (router, hub) = app(ServerConfig::default());
        {
            let mut hub = hub.lock().await;
            let key = hub.join_channel("X", JoinMode::default()).unwrap().key();
            for n in 0..3 {
                hub.on_peer_message(None, &key.to_topic(), n.to_string().as_bytes());
            }
        }

        let (status, body) = call(router.clone(), get("/api/messages?channel=X&limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);

        let (_, body) = call(router, get("/api/messages?channel=X&limit=10&offset=1000")).await;
        assert!(body["messages"].as_array().unwrap().is_empty());
        assert_eq!(body["total"], 3);
    }

    #[tokio::test]
    async fn test_unknown_agent_and_peer() {
        let (router, _) = app(ServerConfig::default());
        let (status, body) = call(router.clone(), get("/api/agents/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
        let (status, _) = call(router, get("/api/peers/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_graph_and_info() {
        let (router, _) = app(ServerConfig::default());
        let (_, graph) = call(router.clone(), get("/api/graph")).await;
        assert_eq!(graph["nodes"][0]["id"], "self");
        let (_, info) = call(router, get("/api/info")).await;
        assert_eq!(info["name"], "meshgate");
        assert_eq!(info["authRequired"], false);
    }
}
