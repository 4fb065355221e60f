//! WebSocket call gateway for voxline.
//!
//! The telephony peer opens `GET /llm-websocket/{call_id}` per call and
//! exchanges JSON: transcript updates in, [`ResponseFrame`]s out.
//!
//! Built on Axum.
//!
//! [`ResponseFrame`]: voxline_core::frame::ResponseFrame

pub mod session;
pub mod transport;

use std::sync::Arc;

use axum::{
    Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::{IntoResponse, Json},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxline_agent::AgentRuntime;
use voxline_config::{AppConfig, ConfigError, RecordsConfig};
use voxline_core::error::{Error, RecordsError};
use voxline_core::event::EventBus;
use voxline_core::records::{AppointmentBook, CallRecords};
use voxline_records::{InMemoryStore, SqliteStore};
use voxline_tools::{AvailabilityRules, LocalScheduler, ToolDispatcher};

use crate::session::{CallSession, ERROR_CLOSE_CODE, ERROR_CLOSE_REASON, SessionStep, is_abandonment};
use crate::transport::WsTransport;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runtime: AgentRuntime,
    pub records: Arc<dyn CallRecords>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/llm-websocket/{call_id}", get(call_socket_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the configured records backend. One store serves both call
/// records and appointments.
pub async fn open_records(
    config: &RecordsConfig,
) -> Result<(Arc<dyn CallRecords>, Arc<dyn AppointmentBook>), RecordsError> {
    match config.backend.as_str() {
        "memory" => {
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store))
        }
        _ => {
            let path = config.database_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RecordsError::Storage(format!("cannot create {}: {e}", parent.display())))?;
            }
            let store = Arc::new(SqliteStore::new(&format!("sqlite://{}", path.display())).await?);
            Ok((store.clone(), store))
        }
    }
}

/// Providers, scheduler, and dispatcher wired from config.
pub fn build_runtime(
    config: &AppConfig,
    records: Arc<dyn CallRecords>,
    book: Arc<dyn AppointmentBook>,
    event_bus: Arc<EventBus>,
) -> voxline_core::Result<AgentRuntime> {
    let providers = voxline_providers::build_from_config(config)?;
    let primary = providers.primary_route(config)?;
    let fallback = providers.fallback_route(config)?;

    let rules = AvailabilityRules::from_config(&config.scheduling).map_err(config_error)?;
    let scheduler = Arc::new(LocalScheduler::new(book, rules));
    let dispatcher = Arc::new(ToolDispatcher::new(records, scheduler));

    info!(
        primary = %primary.model,
        fallback = ?fallback.as_ref().map(|f| f.model.as_str()),
        providers = ?providers.list(),
        "Agent runtime ready"
    );
    AgentRuntime::from_config(config, primary, fallback, dispatcher, event_bus).map_err(config_error)
}

fn config_error(e: ConfigError) -> Error {
    Error::Config {
        message: e.to_string(),
    }
}

/// Start the gateway HTTP server. Returns after Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    // === Build shared subsystems once ===
    let event_bus = Arc::new(EventBus::default());
    let (records, book) = open_records(&config.records).await?;
    let runtime = build_runtime(&config, records.clone(), book, event_bus.clone())?;
    let app = build_router(Arc::new(GatewayState { runtime, records }));

    let shutdown = CancellationToken::new();
    tokio::spawn(log_domain_events(event_bus.subscribe(), shutdown.clone()));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    info!(addr = %addr, backend = %config.records.backend, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn log_domain_events(
    mut events: broadcast::Receiver<Arc<voxline_core::event::DomainEvent>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => debug!(event = ?event, "Domain event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Domain event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /llm-websocket/{call_id}`: one call session per connection.
async fn call_socket_handler(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_call(socket, call_id, state))
}

async fn run_call(socket: WebSocket, call_id: String, state: SharedState) {
    let (sink, mut inbound) = socket.split();
    let (tx, rx) = mpsc::channel::<WsMessage>(64);
    let writer = tokio::spawn(async move {
        let mut sink = sink;
        let mut outbound = ReceiverStream::new(rx).map(Ok::<_, axum::Error>);
        if let Err(e) = sink.send_all(&mut outbound).await {
            debug!(error = %e, "WebSocket writer stopped");
        }
    });

    let transport = WsTransport::new(tx);
    let mut session = match CallSession::open(&call_id, &state, Arc::new(transport.clone())).await {
        Ok(session) => session,
        Err(e) => {
            error!(call_id = %call_id, error = %e, "Could not open call session");
            let _ = transport.close(ERROR_CLOSE_CODE, ERROR_CLOSE_REASON).await;
            drop(transport);
            let _ = writer.await;
            return;
        }
    };

    // the caller dropping without a normal close counts as abandonment
    let mut abandoned = true;
    while let Some(message) = inbound.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match session.handle_text(text.as_str()).await {
                SessionStep::Continue => {}
                SessionStep::Close { code, reason } => {
                    let _ = transport.close(code, reason).await;
                    abandoned = false;
                    break;
                }
            },
            Ok(WsMessage::Binary(_)) => {
                warn!(call_id = %call_id, "Binary frames are not supported; closing");
                let _ = transport.close(ERROR_CLOSE_CODE, ERROR_CLOSE_REASON).await;
                abandoned = false;
                break;
            }
            Ok(WsMessage::Close(frame)) => {
                let code = frame.as_ref().map(|f| f.code);
                info!(call_id = %call_id, code = ?code, "Peer closed the call");
                abandoned = is_abandonment(code);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    if abandoned {
        if let Err(e) = state.records.mark_abandoned(&call_id).await {
            error!(call_id = %call_id, error = %e, "Failed to mark call abandoned");
        }
    }

    drop(session);
    drop(transport);
    let _ = writer.await;
    info!(call_id = %call_id, "Call session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use voxline_core::error::ProviderError;
    use voxline_core::frame::ResponseFrame;
    use voxline_core::provider::{EventStream, GenerationEvent, ModelRoute, Provider, ProviderRequest};
    use voxline_core::records::{CallCategory, CallStatus};

    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Vec<GenerationEvent>>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<EventStream, ProviderError> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Network("connection refused".into()))?;
            let (tx, rx) = mpsc::channel(script.len().max(1));
            for event in script {
                let _ = tx.try_send(Ok(event));
            }
            Ok(rx)
        }
    }

    fn test_state(scripts: Vec<Vec<GenerationEvent>>) -> (SharedState, Arc<InMemoryStore>) {
        let config = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedProvider {
            scripts: Mutex::new(scripts.into()),
        });
        let rules = AvailabilityRules::from_config(&config.scheduling).unwrap();
        let dispatcher = Arc::new(ToolDispatcher::new(
            store.clone(),
            Arc::new(LocalScheduler::new(store.clone(), rules)),
        ));
        let runtime = AgentRuntime::from_config(
            &config,
            ModelRoute::new(provider, "gpt-4o-mini"),
            None,
            dispatcher,
            Arc::new(EventBus::default()),
        )
        .unwrap();
        let state = Arc::new(GatewayState {
            runtime,
            records: store.clone(),
        });
        (state, store)
    }

    fn transport() -> (Arc<WsTransport>, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(WsTransport::new(tx)), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<ResponseFrame> {
        let mut frames = Vec::new();
        while let Ok(WsMessage::Text(text)) = rx.try_recv() {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (state, _) = test_state(vec![]);
        let app = build_router(state);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn call_socket_route_exists() {
        let (state, _) = test_state(vec![]);
        let app = build_router(state);

        // no upgrade headers, so no handshake, but the route must resolve
        let req = Request::builder()
            .uri("/llm-websocket/call-1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn opening_a_session_greets_and_registers_the_call() {
        let (state, store) = test_state(vec![]);
        let (transport, mut rx) = transport();

        let session = CallSession::open("call-1", &state, transport).await.unwrap();

        assert_eq!(drain(&mut rx), vec![ResponseFrame::begin("Hey, how's it going?")]);
        let record = store.get_call("call-1").await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::AutoClosed);
        assert_eq!(record.category, CallCategory::AbruptHangup);
        assert_eq!(session.controller().history().last().unwrap().text(), "Hey, how's it going?");
    }

    #[tokio::test]
    async fn response_required_runs_a_turn() {
        let (state, _) = test_state(vec![vec![
            GenerationEvent::content("Sorry to hear that. "),
            GenerationEvent::content("What's your name?"),
        ]]);
        let (transport, mut rx) = transport();
        let mut session = CallSession::open("call-1", &state, transport).await.unwrap();
        drain(&mut rx);

        let step = session
            .handle_text(
                r#"{"response_id": 1, "interaction_type": "response_required",
                    "transcript": [{"role": "agent", "content": "Hey, how's it going?"},
                                   {"role": "user", "content": "my heater is broken"}]}"#,
            )
            .await;

        assert_eq!(step, SessionStep::Continue);
        assert_eq!(
            drain(&mut rx),
            vec![
                ResponseFrame::chunk(1, "Sorry to hear that. "),
                ResponseFrame::chunk(1, "What's your name?"),
                ResponseFrame::terminal(1, false),
            ]
        );
    }

    #[tokio::test]
    async fn update_only_and_garbage_are_ignored() {
        let (state, _) = test_state(vec![]);
        let (transport, mut rx) = transport();
        let mut session = CallSession::open("call-1", &state, transport).await.unwrap();
        drain(&mut rx);

        let update = session
            .handle_text(r#"{"interaction_type": "update_only", "transcript": [{"role": "user", "content": "I"}]}"#)
            .await;
        let garbage = session.handle_text("not json").await;

        assert_eq!(update, SessionStep::Continue);
        assert_eq!(garbage, SessionStep::Continue);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn turn_failure_closes_with_protocol_error() {
        let (state, _) = test_state(vec![]);
        let (transport, mut rx) = transport();
        let mut session = CallSession::open("call-1", &state, transport).await.unwrap();
        drain(&mut rx);

        let step = session
            .handle_text(r#"{"response_id": 2, "interaction_type": "reminder_required", "transcript": []}"#)
            .await;

        assert_eq!(
            step,
            SessionStep::Close {
                code: 1002,
                reason: "Error processing message."
            }
        );
        assert_eq!(drain(&mut rx), vec![ResponseFrame::terminal(2, false)]);
    }

    #[tokio::test]
    async fn memory_backend_opens_without_a_file() {
        let config = RecordsConfig {
            backend: "memory".into(),
            path: None,
        };
        let (records, book) = open_records(&config).await.unwrap();
        records.open_call("call-1").await.unwrap();
        assert!(book.active_appointments().await.unwrap().is_empty());
    }
}
