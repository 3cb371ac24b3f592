use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use courier_ai::AiClient;
use courier_core::channel::ChannelKind;
use courier_core::context::{DispatchContext, ATTR_CONVERSATION_ID, ATTR_PROJECT_ID};
use courier_core::ids::UserId;
use courier_dispatch::{
    Dispatcher, DispatcherConfig, ParticipantCoordinator, ReadinessConfig, ReadinessCoordinator,
    SessionRegistry, SharedStore,
};
use courier_outbox::{BrokerPublisher, OutboxRelay, RelayConfig};
use courier_store::Database;
use courier_telemetry::MetricsRecorder;

use crate::adapters::StoreBridge;
use crate::effects::spawn_effect_worker;
use crate::notify::Notifier;
use crate::orchestrator::AiStreamingOrchestrator;
use crate::socket;

/// Header carrying the identity the fronting gateway authenticated.
pub const AUTH_USER_HEADER: &str = "x-authenticated-user";

const SESSION_GAUGE_INTERVAL: Duration = Duration::from_secs(15);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub dispatcher: DispatcherConfig,
    pub readiness: ReadinessConfig,
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9300,
            max_send_queue: 256,
            dispatcher: DispatcherConfig::default(),
            readiness: ReadinessConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<MetricsRecorder>,
    pub max_send_queue: usize,
}

/// Build the Axum router: one socket path per channel kind, plus health.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/ws/{user_id}/conversations/{conversation_id}/messages",
            get(conversation_messages),
        )
        .route(
            "/ws/{user_id}/conversations/{conversation_id}/tokens",
            get(conversation_tokens),
        )
        .route(
            "/ws/{user_id}/conversations/{conversation_id}/notify",
            get(conversation_notify),
        )
        .route(
            "/ws/{user_id}/conversations/{conversation_id}/group-notify",
            get(conversation_group_notify),
        )
        .route("/ws/{user_id}/notifications", get(system_notifications))
        .route(
            "/ws/{user_id}/projects/{project_id}/selected-files",
            get(project_selected_files),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server plus its background jobs. The returned handle
/// keeps everything alive; `shutdown` stops the periodic jobs.
pub async fn start(
    config: ServerConfig,
    db: Database,
    shared_store: Arc<dyn SharedStore>,
    ai: Arc<dyn AiClient>,
    broker: Arc<dyn BrokerPublisher>,
) -> Result<ServerHandle, std::io::Error> {
    let metrics = Arc::new(MetricsRecorder::new());
    let bridge = Arc::new(StoreBridge::new(db.clone()));
    let registry = Arc::new(SessionRegistry::new());
    let readiness = Arc::new(ReadinessCoordinator::new(
        shared_store.clone(),
        config.readiness.clone(),
    ));
    let participants = Arc::new(ParticipantCoordinator::new(shared_store, bridge.clone()));

    let (effects_tx, effects_rx) = mpsc::channel(1024);
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        readiness,
        participants.clone(),
        bridge.clone(),
        effects_tx,
        config.dispatcher.clone(),
    ));
    let notifier = Arc::new(Notifier::new(dispatcher.clone(), participants));
    let orchestrator = Arc::new(AiStreamingOrchestrator::new(
        dispatcher.clone(),
        ai,
        bridge,
        notifier.clone(),
    ));

    let effects_handle = spawn_effect_worker(effects_rx, notifier, orchestrator);

    let cancel = CancellationToken::new();
    let relay = Arc::new(OutboxRelay::new(
        db,
        broker,
        metrics.clone(),
        config.relay.clone(),
    ));
    let relay_handle = relay.start(cancel.clone());
    let gauge_handle = spawn_session_gauges(registry.clone(), metrics.clone(), cancel.clone());

    let state = AppState {
        dispatcher,
        registry,
        metrics,
        max_send_queue: config.max_send_queue,
    };
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "courier server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        _server: server_handle,
        _effects: effects_handle,
        _relay: relay_handle,
        _gauges: gauge_handle,
    })
}

/// Handle returned by `start()`. Keeps the background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    _server: tokio::task::JoinHandle<()>,
    _effects: tokio::task::JoinHandle<()>,
    _relay: tokio::task::JoinHandle<()>,
    _gauges: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop the periodic jobs. In-flight socket connections drain on their
    /// own as clients disconnect.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Periodically export live session counts. Observability only; never a
/// correctness dependency.
fn spawn_session_gauges(
    registry: Arc<SessionRegistry>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_GAUGE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    metrics.set_gauge("ws.sessions.total", registry.total_sessions() as i64);
                    for kind in ChannelKind::ALL {
                        metrics.set_gauge(
                            &format!("ws.sessions.{kind}"),
                            registry.sessions_for_kind(kind) as i64,
                        );
                    }
                }
            }
        }
    })
}

fn authenticated_user(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(AUTH_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(UserId::from_raw)
}

fn upgrade_channel(
    ws: WebSocketUpgrade,
    state: AppState,
    headers: HeaderMap,
    kind: ChannelKind,
    user_id: String,
    attrs: Vec<(&'static str, String)>,
) -> axum::response::Response {
    let authenticated = authenticated_user(&headers);
    ws.on_upgrade(move |socket| {
        let path_user = UserId::from_raw(user_id);
        let mut ctx = DispatchContext::new(path_user.clone());
        for (key, value) in attrs {
            ctx = ctx.with(key, value);
        }
        socket::handle_socket(
            socket,
            kind,
            path_user,
            authenticated,
            ctx,
            state.dispatcher,
            state.max_send_queue,
        )
    })
}

async fn conversation_messages(
    ws: WebSocketUpgrade,
    Path((user_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade_channel(
        ws,
        state,
        headers,
        ChannelKind::ConversationMessage,
        user_id,
        vec![(ATTR_CONVERSATION_ID, conversation_id)],
    )
}

async fn conversation_tokens(
    ws: WebSocketUpgrade,
    Path((user_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade_channel(
        ws,
        state,
        headers,
        ChannelKind::AiTokenStream,
        user_id,
        vec![(ATTR_CONVERSATION_ID, conversation_id)],
    )
}

async fn conversation_notify(
    ws: WebSocketUpgrade,
    Path((user_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade_channel(
        ws,
        state,
        headers,
        ChannelKind::ConversationUserNotification,
        user_id,
        vec![(ATTR_CONVERSATION_ID, conversation_id)],
    )
}

async fn conversation_group_notify(
    ws: WebSocketUpgrade,
    Path((user_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade_channel(
        ws,
        state,
        headers,
        ChannelKind::ConversationGroupNotification,
        user_id,
        vec![(ATTR_CONVERSATION_ID, conversation_id)],
    )
}

async fn system_notifications(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade_channel(
        ws,
        state,
        headers,
        ChannelKind::SystemNotification,
        user_id,
        Vec::new(),
    )
}

async fn project_selected_files(
    ws: WebSocketUpgrade,
    Path((user_id, project_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade_channel(
        ws,
        state,
        headers,
        ChannelKind::ProjectSelectedFiles,
        user_id,
        vec![(ATTR_PROJECT_ID, project_id)],
    )
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.total_sessions(),
    }))
}
