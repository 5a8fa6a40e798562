//! Axum-based gateway for the factoid knowledge base. Config-driven via CoreConfig.
//!
//! Serves the rendered factoid listing and a small JSON API that a chat
//! transport uses to forward trigger lines and admin commands.

use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use factoid_core::{CoreConfig, FactoidService, RenderCache, SledStateSaver};
use std::path::Path as StdPath;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Only events under this target reach the log stream.
const LOG_STREAM_TARGET: &str = "factoid::";

/// One tracing event flattened to `message key=value ...`.
#[derive(Default)]
struct EventLine {
    message: String,
    fields: Vec<String>,
}

impl Visit for EventLine {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Feeds `factoid::*` events (admin changes, renders, triggers, saves) to the
/// `/api/v1/logs` stream.
#[derive(Clone)]
struct FactoidLogLayer {
    tx: broadcast::Sender<String>,
}

impl FactoidLogLayer {
    fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> tracing_subscriber::Layer<S> for FactoidLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !meta.target().starts_with(LOG_STREAM_TARGET) {
            return;
        }
        let mut line = EventLine::default();
        event.record(&mut line);
        let mut out = format!("{} [{}] {}", meta.level(), meta.target(), line.message);
        for field in &line.fields {
            out.push(' ');
            out.push_str(field);
        }
        // No subscribers is fine.
        let _ = self.tx.send(out);
    }
}

/// Pre-flight check: storage opens, the template renders, and the port is free.
fn run_verify() -> Result<(), String> {
    let config = CoreConfig::load().map_err(|e| format!("Config load failed: {}", e))?;
    let db_path = StdPath::new(&config.storage_path).join("factoids");

    print!("Checking factoid storage... ");
    let saver = SledStateSaver::open_path(&db_path)
        .map_err(|e| format!("factoid storage LOCKED or inaccessible: {}", e))?;
    let store = saver
        .load()
        .map_err(|e| format!("factoid storage unreadable: {}", e))?;
    println!("OK ({} factoids, {} aliases)", store.factoid_count(), store.alias_count());
    drop(saver);

    print!("Checking template {}... ", config.template_path);
    let cache = RenderCache::new(&config.template_path);
    cache
        .ensure_fresh(&std::sync::RwLock::new(store))
        .map_err(|e| format!("template unusable: {}", e))?;
    println!("OK");

    let port = config.port;
    print!("Checking port {}... ", port);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    match std::net::TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            println!("OK (available)");
        }
        Err(e) => {
            return Err(format!("Port {} BLOCKED: {}", port, e));
        }
    }

    println!("\n✅ SUCCESS: All systems GO. Ready to start gateway.");
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[factoid-gateway] .env not loaded: {} (using system environment)", e);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify() {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("❌ PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }

    let (log_tx, _) = broadcast::channel(1000);
    let log_layer = FactoidLogLayer::new(log_tx.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(log_layer)
        .init();

    let config = Arc::new(CoreConfig::load().expect("load CoreConfig"));
    let db_path = StdPath::new(&config.storage_path).join("factoids");
    let saver = Arc::new(SledStateSaver::open_path(&db_path).expect("open factoid storage"));
    let store = saver.load().expect("load factoid state");

    let factoids = Arc::new(FactoidService::new(store, &config, saver));
    factoids.start_template_watch(&config);

    let app = build_app(AppState {
        config: Arc::clone(&config),
        factoids,
        log_tx,
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!(
        "{} listening on {} (listing at {})",
        config.app_name,
        addr,
        config.hook_path
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind gateway port");
    axum::serve(listener, app).await.expect("serve gateway");
}

fn build_app(state: AppState) -> Router {
    let hook_path = state.config.hook_path.clone();
    Router::new()
        .route(&hook_path, get(listing))
        .route("/v1/status", get(status))
        .route("/api/v1/health", get(health))
        .route("/api/v1/logs", get(logs_stream))
        .route("/api/v1/trigger", post(trigger))
        .route("/api/v1/admin", post(admin))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) factoids: Arc<FactoidService>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

/// Runs `f` on the blocking pool. Everything that takes the store lock or the
/// render mutex goes through here, since admin commands hold the write lock
/// across a sled flush.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "Blocking task failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// GET /api/v1/health – liveness check for scripts.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// GET /v1/status – app identity, store size and listing cache state.
async fn status(State(state): State<AppState>) -> Response {
    let factoids = Arc::clone(&state.factoids);
    let stats = match blocking(move || factoids.stats()).await {
        Ok(stats) => stats,
        Err(res) => return res,
    };
    axum::Json(serde_json::json!({
        "app_name": state.config.app_name,
        "port": state.config.port,
        "hook_path": state.config.hook_path,
        "factoids": stats.factoids,
        "aliases": stats.aliases,
        "listing": {
            "valid": stats.listing_valid,
            "generation": stats.listing_generation,
        },
    }))
    .into_response()
}

/// GET /api/v1/logs – Server-Sent Events stream of `factoid::*` log lines.
async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.log_tx.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(line) => yield Ok(Event::default().data(line)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().data(format!("... {} log lines dropped", n)));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET {hook_path} – the rendered factoid listing.
async fn listing(State(state): State<AppState>) -> Response {
    let factoids = Arc::clone(&state.factoids);
    match blocking(move || factoids.listing()).await {
        Ok(Ok(html)) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            Bytes::from_owner(html),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::error!(target: "factoid::render", error = %e, "Factoid listing unavailable");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("factoid listing unavailable: {}", e))
                .into_response()
        }
        Err(res) => res,
    }
}

/// Trigger line forwarded by the chat transport.
#[derive(serde::Deserialize)]
struct TriggerRequest {
    line: String,
    /// Channel or user the reply goes to; echoed back untouched.
    #[serde(default)]
    target: Option<String>,
}

/// POST /api/v1/trigger – `{ "line": "!foo bob" }` → `{ "reply": "bob: ..." }` or `null`.
async fn trigger(State(state): State<AppState>, Json(req): Json<TriggerRequest>) -> Response {
    let factoids = Arc::clone(&state.factoids);
    let line = req.line;
    let reply = match blocking(move || factoids.handle_trigger(&line)).await {
        Ok(reply) => reply,
        Err(res) => return res,
    };
    axum::Json(serde_json::json!({
        "target": req.target,
        "reply": reply,
    }))
    .into_response()
}

/// Admin command from the chat transport: either a raw `line` or `command` + `args`.
#[derive(serde::Deserialize)]
struct AdminRequest {
    /// User who issued the command; notices go back to them only.
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    line: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

/// POST /api/v1/admin – runs one admin command and returns the notice for the caller.
async fn admin(State(state): State<AppState>, Json(req): Json<AdminRequest>) -> Response {
    if req.line.is_none() && req.command.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "status": "error",
                "message": "either `line` or `command` is required",
            })),
        )
            .into_response();
    }

    let factoids = Arc::clone(&state.factoids);
    let nick = req.nick.clone();
    let outcome = blocking(move || match req.command {
        Some(command) => factoids.handle_admin(&command, &req.args),
        None => factoids.handle_admin_line(req.line.as_deref().unwrap_or_default()),
    })
    .await;

    match outcome {
        Ok(outcome) => axum::Json(serde_json::json!({
            "nick": nick,
            "recognized": outcome.is_recognized(),
            "mutated": outcome.mutated(),
            "notice": outcome.notice_ref().map(ToString::to_string),
        }))
        .into_response(),
        Err(res) => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use factoid_core::{FactoidStore, NoopSaver};
    use tower::ServiceExt;

    const TEST_TEMPLATE: &str = "<ul>{{#each factoids}}<li id=\"{{name}}\">{{{linkify text}}} ({{#each aliases}}{{this}} {{/each}})</li>{{/each}}</ul>";

    fn test_log_tx() -> broadcast::Sender<String> {
        let (tx, _) = broadcast::channel(16);
        tx
    }

    fn test_config(template_path: &StdPath) -> CoreConfig {
        CoreConfig {
            app_name: "Test Gateway".to_string(),
            port: 8001,
            storage_path: "./data".to_string(),
            template_path: template_path.display().to_string(),
            hook_path: "/factoids".to_string(),
            trigger_marker: "!".to_string(),
            cooldown_secs: 30,
            template_check_secs: 30,
        }
    }

    fn test_app(dir: &StdPath) -> Router {
        build_app(test_state(dir))
    }

    fn test_state(dir: &StdPath) -> AppState {
        let template = dir.join("factoid.tpl");
        std::fs::write(&template, TEST_TEMPLATE).unwrap();
        let config = test_config(&template);

        let mut store = FactoidStore::new();
        store.set("foo", "bar & more at http://example.com/x");
        store.set("baz", "qux");
        store.set_alias("b", "foo");

        AppState {
            factoids: Arc::new(FactoidService::new(store, &config, Arc::new(NoopSaver))),
            config: Arc::new(config),
            log_tx: test_log_tx(),
        }
    }

    async fn body_string(res: Response) -> String {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let json = serde_json::from_str(&body_string(res).await).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn get_listing(app: &Router) -> Response {
        let req = Request::builder()
            .method("GET")
            .uri("/factoids")
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_listing_is_sorted_escaped_and_linked() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        let res = get_listing(&app).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        let body = body_string(res).await;
        let baz = body.find("id=\"baz\"").unwrap();
        let foo = body.find("id=\"foo\"").unwrap();
        assert!(baz < foo, "entries sorted by name: {}", body);
        assert!(body.contains("bar &amp; more at <a target=\"_blank\" href=\"http://example.com/x\">http://example.com/x</a> (b )"));
    }

    #[tokio::test]
    async fn test_admin_changes_listing_and_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        let _ = body_string(get_listing(&app).await).await;

        let (status, json) = post_json(
            &app,
            "/api/v1/admin",
            serde_json::json!({ "nick": "op", "line": "rename foo food" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["recognized"], true);
        assert_eq!(json["mutated"], true);
        assert_eq!(json["nick"], "op");
        assert_eq!(json["notice"], "Renamed foo to food successfully");

        let body = body_string(get_listing(&app).await).await;
        assert!(body.contains("id=\"food\""));
        assert!(!body.contains("id=\"foo\""));

        let (_, json) = post_json(
            &app,
            "/api/v1/trigger",
            serde_json::json!({ "line": "!b alice", "target": "#rust" }),
        )
        .await;
        assert_eq!(json["target"], "#rust");
        assert_eq!(json["reply"], "alice: bar & more at http://example.com/x");

        // Cooling down now.
        let (_, json) = post_json(&app, "/api/v1/trigger", serde_json::json!({ "line": "!food" })).await;
        assert!(json["reply"].is_null());
    }

    #[tokio::test]
    async fn test_admin_command_with_args_and_conflict_notice() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        let (_, json) = post_json(
            &app,
            "/api/v1/admin",
            serde_json::json!({ "command": "rename", "args": ["baz", "b"] }),
        )
        .await;
        assert_eq!(json["mutated"], false);
        assert_eq!(json["notice"], "b would overwrite an alias, please delete first");

        let (_, json) = post_json(
            &app,
            "/api/v1/admin",
            serde_json::json!({ "command": "dance", "args": [] }),
        )
        .await;
        assert_eq!(json["recognized"], false);
        assert!(json["notice"].is_null());
    }

    #[tokio::test]
    async fn test_admin_requires_line_or_command() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        let (status, json) = post_json(&app, "/api/v1/admin", serde_json::json!({ "nick": "op" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_status_reports_counts_and_cache_state() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        let _ = body_string(get_listing(&app).await).await;

        let req = Request::builder()
            .method("GET")
            .uri("/v1/status")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
        assert_eq!(json["app_name"], "Test Gateway");
        assert_eq!(json["factoids"], 2);
        assert_eq!(json["aliases"], 1);
        assert_eq!(json["listing"]["valid"], true);
        assert_eq!(json["listing"]["generation"], 1);
    }

    #[tokio::test]
    async fn test_admin_line_keeps_body_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        let (_, json) = post_json(
            &app,
            "/api/v1/admin",
            serde_json::json!({ "line": "add spaced a  b\tc" }),
        )
        .await;
        assert_eq!(json["mutated"], true);

        let (_, json) = post_json(&app, "/api/v1/trigger", serde_json::json!({ "line": "!spaced" })).await;
        assert_eq!(json["reply"], "a  b\tc");
    }

    #[test]
    fn test_log_layer_forwards_factoid_events_with_fields() {
        let (tx, mut rx) = broadcast::channel(8);
        let subscriber = tracing_subscriber::registry().with(FactoidLogLayer::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "factoid::admin", command = "add", mutated = true, "admin command handled");
            tracing::info!(target: "tower_http::trace", "request finished");
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            "INFO [factoid::admin] admin command handled command=add mutated=true"
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logs_stream_relays_lines_as_sse() {
        use futures_util::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let log_tx = state.log_tx.clone();
        let app = build_app(state);

        let req = Request::builder()
            .method("GET")
            .uri("/api/v1/logs")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");

        log_tx
            .send("INFO [factoid::admin] admin command handled".to_string())
            .unwrap();
        let mut body = res.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        assert_eq!(
            String::from_utf8(chunk.to_vec()).unwrap(),
            "data: INFO [factoid::admin] admin command handled\n\n"
        );
    }

    #[tokio::test]
    async fn test_missing_template_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir.path().join("absent.tpl"));
        let app = build_app(AppState {
            factoids: Arc::new(FactoidService::new(
                FactoidStore::new(),
                &config,
                Arc::new(NoopSaver),
            )),
            config: Arc::new(config),
            log_tx: test_log_tx(),
        });
        let res = get_listing(&app).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
