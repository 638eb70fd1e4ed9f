//! Axum-based intake gateway: messaging webhook and operator API. Config-driven via CoreConfig.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::{get, post},
    Router,
};
use axum::http::Method;
use intake_core::{CoreConfig, DialogueEngine, IntakeStore, MessageTransport, SupportDesk};
use intake_skills::{transport_from_config, ForwardingSupport, ReportLinks, RuleBasedSupport};
use std::path::Path as StdPath;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::field::Visit;
use tracing_subscriber::layer::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod handlers {
    pub(crate) mod bookings;
    pub(crate) mod webhook;
}

const STORE_DIR: &str = "intake";

/// Captures the "message" field from a tracing event.
struct MessageCollector<'a>(&'a mut String);

impl Visit for MessageCollector<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            *self.0 = value.to_string();
        }
    }
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

/// Sends each tracing event as a line to a broadcast channel for SSE log streaming.
#[derive(Clone)]
struct LogBroadcastLayer {
    tx: broadcast::Sender<String>,
}

impl LogBroadcastLayer {
    fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> tracing_subscriber::Layer<S> for LogBroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageCollector(&mut message));
        let line = format!(
            "{} [{}] {}",
            event.metadata().level(),
            event.metadata().target(),
            message
        );
        let _ = self.tx.send(line);
    }
}

fn store_path(config: &CoreConfig) -> std::path::PathBuf {
    StdPath::new(&config.storage_path).join(STORE_DIR)
}

/// Pre-flight check: config validates, store opens and reads, port is free.
fn run_verify() -> Result<(), String> {
    let config = CoreConfig::load().map_err(|e| format!("Config load failed: {}", e))?;
    println!("Config OK ({} departments)", config.departments.len());

    let path = store_path(&config);
    print!("Checking store at {}... ", path.display());
    let store = IntakeStore::open_path(&path).map_err(|e| format!("store LOCKED or inaccessible: {}", e))?;
    let sequence = store
        .current_sequence()
        .map_err(|e| format!("sequence counter unreadable: {}", e))?;
    let status = store.status();
    drop(store);
    println!(
        "OK ({} bookings, last id {})",
        status.bookings,
        sequence
            .map(|n| format!("{}{}", config.record_prefix, n))
            .unwrap_or_else(|| "none".to_string())
    );

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

    println!("\nSUCCESS: ready to start gateway.");
    Ok(())
}

fn support_desk(config: &CoreConfig, engine_departments: intake_core::Departments) -> Arc<dyn SupportDesk> {
    match config.support_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            tracing::info!(target: "intake::gateway", url = %url, "support questions are forwarded");
            Arc::new(ForwardingSupport::new(url))
        }
        None => Arc::new(RuleBasedSupport::new(engine_departments)),
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[intake-gateway] .env not loaded: {} (using system environment)", e);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify() {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }

    let (log_tx, _) = broadcast::channel(1000);
    let log_layer = LogBroadcastLayer::new(log_tx.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(log_layer)
        .init();

    let config = match CoreConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("[intake-gateway] invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let store = match IntakeStore::open_path(store_path(&config)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("[intake-gateway] cannot open store: {}", e);
            std::process::exit(1);
        }
    };

    let state = match AppState::assemble(Arc::clone(&config), Arc::clone(&store), transport_from_config(&config), log_tx) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[intake-gateway] invalid department table: {}", e);
            std::process::exit(1);
        }
    };
    let app = build_app(state);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!(target: "intake::gateway", "{} listening on {}", config.app_name, addr);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("[intake-gateway] cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(target: "intake::gateway", error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!(target: "intake::gateway", "shutting down");
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!(target: "intake::gateway", error = %e, "server stopped");
    }
    if let Err(e) = store.flush() {
        tracing::error!(target: "intake::gateway", error = %e, "store flush failed");
    }
}

fn build_app(state: AppState) -> Router {
    // CORS: operator UIs on 3001-3099 and other local services on 8001-8099.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            let port = s
                .split(':')
                .last()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0);
            (3001..=3099).contains(&port) || (8001..=8099).contains(&port)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any);

    Router::new()
        .route("/webhook", get(handlers::webhook::verify).post(handlers::webhook::receive))
        .route("/v1/status", get(status))
        .route("/api/v1/health", get(health))
        .route("/api/v1/logs", get(logs_stream))
        .route("/api/v1/bookings", post(handlers::bookings::create))
        .route("/api/v1/bookings/:id", get(handlers::bookings::get_one))
        .route("/api/v1/slots/:department/:date", get(handlers::bookings::availability))
        .with_state(state)
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) store: Arc<IntakeStore>,
    pub(crate) engine: Arc<DialogueEngine>,
    pub(crate) transport: Arc<dyn MessageTransport>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

impl AppState {
    /// Wires the engine over one store used as both session store and slot ledger.
    fn assemble(
        config: Arc<CoreConfig>,
        store: Arc<IntakeStore>,
        transport: Arc<dyn MessageTransport>,
        log_tx: broadcast::Sender<String>,
    ) -> Result<Self, config::ConfigError> {
        let departments = config.departments()?;
        let reports = ReportLinks::new(config.report_base_url.clone());
        if !reports.is_configured() {
            tracing::warn!(target: "intake::gateway", "report_base_url not set; report lookups send summaries only");
        }
        let engine = DialogueEngine::new(
            &config,
            store.clone(),
            store.clone(),
            support_desk(&config, departments),
            Arc::new(reports),
        )?;
        Ok(Self {
            config,
            store,
            engine: Arc::new(engine),
            transport,
            log_tx,
        })
    }
}

/// GET /api/v1/health – liveness check for UI and scripts.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/v1/logs – Server-Sent Events stream of gateway logs (tracing output).
async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.log_tx.subscribe();
    let stream = stream! {
        loop {
            tokio::select! {
                r = rx.recv() => match r {
                    Ok(line) => yield Ok(Event::default().data(line)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Ok(Event::default().data(format!("... {} log lines dropped", n)));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
    };
    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /v1/status – app identity, department table, store counts.
async fn status(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let departments: Vec<serde_json::Value> = state
        .engine
        .departments()
        .all()
        .iter()
        .map(|d| {
            serde_json::json!({
                "name": d.name,
                "opens": d.opens.format("%H:%M").to_string(),
                "closes": d.closes.format("%H:%M").to_string(),
                "capacity": d.capacity,
            })
        })
        .collect();
    axum::Json(serde_json::json!({
        "app_name": state.config.app_name,
        "port": state.config.port,
        "transport": state.transport.name(),
        "departments": departments,
        "store": state.store.status(),
        "in_flight": state.engine.in_flight(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use intake_core::{DepartmentConfig, Outbound, TransportError};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, Outbound)>>,
    }

    #[async_trait]
    impl MessageTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, to: &str, message: &Outbound) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((to.to_string(), message.clone()));
            Ok(())
        }
    }

    fn test_log_tx() -> broadcast::Sender<String> {
        let (tx, _) = broadcast::channel(1);
        tx
    }

    fn test_config() -> CoreConfig {
        CoreConfig {
            app_name: "Test Intake".to_string(),
            port: 4000,
            verify_token: "s3cret".to_string(),
            departments: vec![DepartmentConfig {
                name: "Cardiology".to_string(),
                opens: "09:00".to_string(),
                closes: "11:00".to_string(),
                capacity: 1,
                slot_minutes: 60,
            }],
            ..CoreConfig::default()
        }
    }

    fn test_app() -> (Router, Arc<RecordingTransport>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IntakeStore::open_path(dir.path().join(STORE_DIR)).unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let state = AppState::assemble(
            Arc::new(test_config()),
            store,
            transport.clone(),
            test_log_tx(),
        )
        .unwrap();
        (build_app(state), transport, dir)
    }

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
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
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    fn text_delivery(from: &str, body: &str) -> serde_json::Value {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": { "messages": [
                { "from": from, "id": "wamid.1", "type": "text", "text": { "body": body } }
            ] } }] }]
        })
    }

    #[tokio::test]
    async fn test_webhook_handshake() {
        let (app, _, _dir) = test_app();
        let ok = app
            .clone()
            .oneshot(get("/webhook?hub.mode=subscribe&hub.verify_token=s3cret&hub.challenge=12345"))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(ok.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"12345");

        let denied = app
            .oneshot(get("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345"))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_greeting_sends_menu_to_sender() {
        let (app, transport, _dir) = test_app();
        let res = app
            .oneshot(post_json("/webhook", text_delivery("919876543210", "Hi")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["replies"], 1);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "919876543210");
        match &sent[0].1 {
            Outbound::Buttons { choices, .. } => {
                let ids: Vec<&str> = choices.iter().map(|c| c.id.as_str()).collect();
                assert_eq!(ids, vec!["opt_book", "opt_report", "opt_support"]);
            }
            other => panic!("expected menu buttons, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_callbacks_are_ignored() {
        let (app, transport, _dir) = test_app();
        let body = serde_json::json!({ "entry": [{ "changes": [{ "value": { "statuses": [{ "status": "read" }] } }] }] });
        let res = app.oneshot(post_json("/webhook", body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ignored");
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_direct_booking_lookup_and_availability() {
        let (app, _, _dir) = test_app();
        let booking = serde_json::json!({
            "first_name": "asha",
            "last_name": "rao",
            "gender": "female",
            "address": "12 MG Road",
            "phone": "9876543210",
            "department": "cardiology",
            "date": "2030-01-15",
            "time": "10:00"
        });

        let created = app.clone().oneshot(post_json("/api/v1/bookings", booking.clone())).await.unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let record = json_body(created).await;
        assert_eq!(record["id"], "P1001");
        assert_eq!(record["first_name"], "Asha");
        assert_eq!(record["phone"], "+919876543210");
        assert_eq!(record["department"], "Cardiology");

        let full = app.clone().oneshot(post_json("/api/v1/bookings", booking)).await.unwrap();
        assert_eq!(full.status(), StatusCode::CONFLICT);

        let found = app.clone().oneshot(get("/api/v1/bookings/1001")).await.unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(json_body(found).await["last_name"], "Rao");

        let missing = app.clone().oneshot(get("/api/v1/bookings/P9999")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let slots = app.clone().oneshot(get("/api/v1/slots/Cardiology/2030-01-15")).await.unwrap();
        assert_eq!(slots.status(), StatusCode::OK);
        let json = json_body(slots).await;
        assert_eq!(json["slots"].as_array().unwrap().len(), 3);
        assert_eq!(json["slots"][1]["time"], "10:00");
        assert_eq!(json["slots"][1]["reserved"], 1);
        assert_eq!(json["slots"][1]["available"], false);
        assert_eq!(json["slots"][0]["available"], true);

        let unknown = app.oneshot(get("/api/v1/slots/Radiology/2030-01-15")).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_direct_booking_rejects_bad_input() {
        let (app, _, _dir) = test_app();
        let booking = serde_json::json!({
            "first_name": "Asha",
            "last_name": "Rao",
            "gender": "female",
            "address": "12 MG Road",
            "phone": "12345",
            "department": "Cardiology",
            "date": "2030-01-15",
            "time": "10:00"
        });
        let res = app.clone().oneshot(post_json("/api/v1/bookings", booking)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"], "phone is not valid");

        let off_hours = serde_json::json!({
            "first_name": "Asha",
            "last_name": "Rao",
            "gender": "female",
            "address": "12 MG Road",
            "phone": "9876543210",
            "department": "Cardiology",
            "date": "2030-01-15",
            "time": "15:00"
        });
        let res = app.clone().oneshot(post_json("/api/v1/bookings", off_hours)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let past = serde_json::json!({
            "first_name": "Asha",
            "last_name": "Rao",
            "gender": "female",
            "address": "12 MG Road",
            "phone": "9876543210",
            "department": "Cardiology",
            "date": "2020-01-15",
            "time": "10:00"
        });
        let res = app.clone().oneshot(post_json("/api/v1/bookings", past)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"], "date is in the past");
        let res = app.oneshot(get("/api/v1/bookings/P1001")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_returns_app_identity_and_departments() {
        let (app, _, _dir) = test_app();
        let res = app.oneshot(get("/v1/status")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["app_name"], "Test Intake");
        assert_eq!(json["port"], 4000);
        assert_eq!(json["transport"], "recording");
        assert_eq!(json["departments"][0]["name"], "Cardiology");
        assert_eq!(json["departments"][0]["closes"], "11:00");
        assert_eq!(json["store"]["bookings"], 0);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _dir) = test_app();
        let res = app.oneshot(get("/api/v1/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ok");
    }
}
