//! JSON HTTP API over the query engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/api/servers` | All servers |
//! | `GET` | `/api/channels?server=` | Channels, optionally of one server |
//! | `GET` | `/api/users` | All users with message counts |
//! | `GET` | `/api/search?q=&s=&page=&per_page=` | Substring search |
//! | `GET` | `/api/channel/{id}?page=&per_page=` | Messages of a channel |
//! | `GET` | `/api/user/{id}?page=&per_page=` | Messages of a user |
//! | `GET` | `/api/view/{id}?q=` | A message and its one-hour context |
//!
//! Message items carry `body_html`: the body with mentions resolved,
//! HTML-escaped, and the search query (if any) highlighted.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "channel 7 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use chat_archive_core::models::{
    Channel, ChannelId, ChannelSummary, MessageId, ResolvedMessage, Server, ServerId, User, UserId,
    UserSummary,
};
use chat_archive_core::query::{Page, PageRequest, QueryEngine};

use crate::config::Config;
use crate::search::open_engine;

type AppState = Arc<QueryEngine>;

/// Build the API router around a query engine.
pub fn router(engine: Arc<QueryEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/servers", get(handle_servers))
        .route("/api/channels", get(handle_channels))
        .route("/api/users", get(handle_users))
        .route("/api/search", get(handle_search))
        .route("/api/channel/{id}", get(handle_channel))
        .route("/api/user/{id}", get(handle_user))
        .route("/api/view/{id}", get(handle_view))
        .layer(cors)
        .with_state(engine)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(open_engine(config).await?);
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "listening");
    println!("Chat archive API listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ Response shapes ============

/// A message as served by the API.
#[derive(Serialize)]
struct MessageItem {
    #[serde(flatten)]
    message: ResolvedMessage,
    timestamp_display: String,
    body_html: String,
}

#[derive(Serialize)]
struct PageBody {
    items: Vec<MessageItem>,
    total: u64,
    page: u32,
    per_page: u32,
    pages: u32,
    prev_num: Option<u32>,
    next_num: Option<u32>,
}

async fn message_item(
    engine: &QueryEngine,
    message: ResolvedMessage,
    query: Option<&str>,
) -> Result<MessageItem, AppError> {
    let body_html = engine.render(&message, query).await?;
    Ok(MessageItem {
        timestamp_display: message.formatted_timestamp(),
        message,
        body_html,
    })
}

async fn page_body(
    engine: &QueryEngine,
    page: Page<ResolvedMessage>,
    query: Option<&str>,
) -> Result<PageBody, AppError> {
    let pages = page.pages();
    let prev_num = page.prev_num();
    let next_num = page.next_num();
    let mut items = Vec::with_capacity(page.items.len());
    for message in page.items {
        items.push(message_item(engine, message, query).await?);
    }
    Ok(PageBody {
        items,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        pages,
        prev_num,
        next_num,
    })
}

/// A server filter parameter. Empty and `0` mean all servers.
fn server_filter(raw: Option<&str>) -> Result<Option<ServerId>, AppError> {
    match raw.map(str::trim) {
        None | Some("") | Some("0") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(|id| Some(ServerId(id)))
            .map_err(|_| bad_request(format!("invalid server id: {}", value))),
    }
}

#[derive(Deserialize)]
struct PageParams {
    page: Option<u32>,
    per_page: Option<u32>,
}

impl PageParams {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.page.unwrap_or(1), self.per_page)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Browse ============

#[derive(Serialize)]
struct ServersResponse {
    servers: Vec<Server>,
}

async fn handle_servers(
    State(engine): State<AppState>,
) -> Result<Json<ServersResponse>, AppError> {
    Ok(Json(ServersResponse {
        servers: engine.servers().await?,
    }))
}

#[derive(Deserialize)]
struct ChannelsParams {
    server: Option<String>,
}

#[derive(Serialize)]
struct ChannelsResponse {
    channels: Vec<ChannelSummary>,
}

async fn handle_channels(
    State(engine): State<AppState>,
    params: Result<Query<ChannelsParams>, QueryRejection>,
) -> Result<Json<ChannelsResponse>, AppError> {
    let Query(params) = params?;
    let server = server_filter(params.server.as_deref())?;
    if let Some(id) = server {
        if engine.server(id).await?.is_none() {
            return Err(not_found(format!("server {} not found", id)));
        }
    }
    Ok(Json(ChannelsResponse {
        channels: engine.channels(server).await?,
    }))
}

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<UserSummary>,
}

async fn handle_users(State(engine): State<AppState>) -> Result<Json<UsersResponse>, AppError> {
    Ok(Json(UsersResponse {
        users: engine.users().await?,
    }))
}

// ============ GET /api/search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    s: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    server: Option<Server>,
    results: PageBody,
}

async fn handle_search(
    State(engine): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Query(params) = params?;
    let server_id = server_filter(params.s.as_deref())?;
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let request = PageRequest::new(params.page.unwrap_or(1), params.per_page);
    let Some(page) = engine.search(&query, server_id, request).await? else {
        return Err(not_found(format!(
            "server {} not found",
            server_id.map(|id| id.0).unwrap_or_default()
        )));
    };
    let server = match server_id {
        Some(id) => engine.server(id).await?,
        None => None,
    };

    let results = page_body(&engine, page, Some(&query)).await?;
    Ok(Json(SearchResponse {
        query,
        server,
        results,
    }))
}

// ============ GET /api/channel/{id}, /api/user/{id} ============

#[derive(Serialize)]
struct ChannelResponse {
    channel: Channel,
    messages: PageBody,
}

async fn handle_channel(
    State(engine): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<ChannelResponse>, AppError> {
    let (Path(id), Query(params)) = (id?, params?);
    let missing = || not_found(format!("channel {} not found", id));
    let channel = engine.channel(ChannelId(id)).await?.ok_or_else(missing)?;
    let page = engine
        .list_by_channel(channel.id, params.request())
        .await?
        .ok_or_else(missing)?;
    Ok(Json(ChannelResponse {
        channel,
        messages: page_body(&engine, page, None).await?,
    }))
}

#[derive(Serialize)]
struct UserResponse {
    user: User,
    messages: PageBody,
}

async fn handle_user(
    State(engine): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let (Path(id), Query(params)) = (id?, params?);
    let missing = || not_found(format!("user {} not found", id));
    let user = engine.user(UserId(id)).await?.ok_or_else(missing)?;
    let page = engine
        .list_by_user(user.id, params.request())
        .await?
        .ok_or_else(missing)?;
    Ok(Json(UserResponse {
        user,
        messages: page_body(&engine, page, None).await?,
    }))
}

// ============ GET /api/view/{id} ============

#[derive(Deserialize)]
struct ViewParams {
    q: Option<String>,
}

#[derive(Serialize)]
struct ViewResponse {
    message: MessageItem,
    context: Vec<MessageItem>,
}

async fn handle_view(
    State(engine): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    params: Result<Query<ViewParams>, QueryRejection>,
) -> Result<Json<ViewResponse>, AppError> {
    let (Path(id), Query(params)) = (id?, params?);
    let view = engine
        .view(MessageId(id))
        .await?
        .ok_or_else(|| not_found(format!("message {} not found", id)))?;
    let query = params.q.as_deref().filter(|q| !q.is_empty());

    let mut context = Vec::with_capacity(view.context.len());
    for message in view.context {
        context.push(message_item(&engine, message, query).await?);
    }
    Ok(Json(ViewResponse {
        message: message_item(&engine, view.message, query).await?,
        context,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::sqlite_store::SqliteStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chat_archive_core::import::{ExportPayload, IdentityMode, Importer};
    use chat_archive_core::models::NewExport;
    use chat_archive_core::query::QueryOptions;
    use chat_archive_core::store::Store;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const ANN: &str = "100000000000000001";

    async fn test_app(tmp: &TempDir) -> (Router, Arc<SqliteStore>) {
        let config = Config::with_db_path(tmp.path().join("archive.sqlite"));
        let store = SqliteStore::open(&config).await.unwrap();
        migrate::create_schema(store.pool()).await.unwrap();
        let store = Arc::new(store);

        let payload = json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {ANN: {"name": "Ann"}, "u2": {"name": "Bob"}},
                "channels": {"c1": {"name": "general", "server": "s0"}}
            },
            "data": {"c1": {
                "m1": {"t": 1_000_000, "m": "hello <world>", "u": ANN},
                "m2": {"t": 1_060_000, "m": format!("hey <@{}>\nhello again", ANN), "u": "u2"}
            }}
        });
        let payload = ExportPayload::from_slice(payload.to_string().as_bytes()).unwrap();
        let source = NewExport {
            path: "/tmp/e.json".to_string(),
            name: "e.json".to_string(),
            size_bytes: 1,
            digest: "d".to_string(),
        };
        Importer::new(store.as_ref(), IdentityMode::default())
            .import(&source, &payload)
            .await
            .unwrap();

        let engine = QueryEngine::new(store.clone(), QueryOptions::default());
        (router(Arc::new(engine)), store)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = test_app(&tmp).await;
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_search_highlights() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = test_app(&tmp).await;
        let (status, body) = get_json(&app, "/api/search?q=hello").await;
        assert_eq!(status, StatusCode::OK);
        let results = &body["results"];
        assert_eq!(results["total"], 2);
        assert_eq!(
            results["items"][0]["body_html"],
            "<span class='highlight'>hello</span> &lt;world&gt;"
        );
        assert_eq!(
            results["items"][1]["body_html"],
            "hey Ann<br>\n<span class='highlight'>hello</span> again"
        );
        assert_eq!(results["items"][0]["user_name"], "Ann");
        assert_eq!(results["items"][0]["server_name"], "Guild");
    }

    #[tokio::test]
    async fn test_search_errors() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = test_app(&tmp).await;

        let (status, body) = get_json(&app, "/api/search?q=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");

        let (status, body) = get_json(&app, "/api/search?q=hello&s=99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_params_use_error_body() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = test_app(&tmp).await;

        for uri in [
            "/api/search?q=hello&page=abc",
            "/api/search?q=hello&s=guild",
            "/api/channel/abc",
            "/api/user/1?per_page=-1",
            "/api/view/1?q=x&q=y",
        ] {
            let (status, body) = get_json(&app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"]["code"], "bad_request", "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_search_empty_or_zero_server_is_unscoped() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = test_app(&tmp).await;

        for uri in ["/api/search?q=hello&s=", "/api/search?q=hello&s=0"] {
            let (status, body) = get_json(&app, uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body["results"]["total"], 2);
            assert!(body["server"].is_null());
        }

        let (status, body) = get_json(&app, "/api/channels?server=").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channels"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_and_user_pages() {
        let tmp = TempDir::new().unwrap();
        let (app, store) = test_app(&tmp).await;
        let m1 = store.find_message_by_external_id("m1").await.unwrap().unwrap();

        let (status, body) =
            get_json(&app, &format!("/api/channel/{}?per_page=1", m1.channel_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channel"]["name"], "general");
        assert_eq!(body["messages"]["total"], 2);
        assert_eq!(body["messages"]["pages"], 2);
        assert_eq!(body["messages"]["next_num"], 2);

        let (status, body) = get_json(&app, &format!("/api/user/{}", m1.user_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Ann");
        assert_eq!(body["messages"]["total"], 1);

        let (status, _) = get_json(&app, "/api/channel/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_json(&app, "/api/user/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_view_context() {
        let tmp = TempDir::new().unwrap();
        let (app, store) = test_app(&tmp).await;
        let m2 = store.find_message_by_external_id("m2").await.unwrap().unwrap();

        let (status, body) = get_json(&app, &format!("/api/view/{}?q=ann", m2.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["external_id"], "m2");
        assert_eq!(body["context"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["message"]["body_html"],
            "hey <span class='highlight'>Ann</span><br>\nhello again"
        );

        let (status, body) = get_json(&app, "/api/view/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_browse_endpoints() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = test_app(&tmp).await;

        let (_, body) = get_json(&app, "/api/servers").await;
        assert_eq!(body["servers"][0]["name"], "Guild");

        let (_, body) = get_json(&app, "/api/channels?server=1").await;
        assert_eq!(body["channels"][0]["message_count"], 2);

        let (status, _) = get_json(&app, "/api/channels?server=42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = get_json(&app, "/api/users").await;
        assert_eq!(body["users"].as_array().unwrap().len(), 2);
    }
}
