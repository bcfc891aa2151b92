//! HTTP gateway for Ragline.
//!
//! Accepts prompts over HTTP and hands them to the agent as
//! [`InboundPrompt`]s. Responses come back through
//! [`MessagingGateway::send_response`] and are routed to the waiting HTTP
//! request by request id.
//!
//! Routes:
//! - `GET  /health`            — liveness and served model
//! - `POST /v1/prompt`         — JSON in, terminal payload out
//! - `POST /v1/prompt/stream`  — SSE: `token` events, then `done` or `error`
//!
//! Built on Axum, with a 1 MB body limit, CORS and HTTP trace logging.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use ragline_config::GatewayConfig;
use ragline_core::{GatewayError, InboundPrompt, MessagingGateway, PromptRequest, ResponsePayload};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

/// Queued prompts waiting for the agent.
const INBOUND_BUFFER: usize = 64;
/// Payloads buffered per waiting request.
const RESPONSE_BUFFER: usize = 64;
const BODY_LIMIT: usize = 1024 * 1024;

// ── Pending requests ─────────────────────────────────────────────────────

/// Request id → channel back to the HTTP handler awaiting it.
#[derive(Default)]
struct Pending {
    senders: Mutex<HashMap<String, mpsc::Sender<ResponsePayload>>>,
}

impl Pending {
    fn register(self: &Arc<Self>, id: &str) -> (mpsc::Receiver<ResponsePayload>, PendingGuard) {
        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        self.lock().insert(id.to_string(), tx);
        let guard = PendingGuard {
            pending: self.clone(),
            id: id.to_string(),
        };
        (rx, guard)
    }

    /// The sender for `id`. A terminal payload takes it out of the map so
    /// the handler's stream ends after it.
    fn sender(&self, id: &str, terminal: bool) -> Option<mpsc::Sender<ResponsePayload>> {
        let mut senders = self.lock();
        if terminal {
            senders.remove(id)
        } else {
            senders.get(id).cloned()
        }
    }

    fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Empty the map, handing back every waiting request.
    fn drain(&self) -> Vec<(String, mpsc::Sender<ResponsePayload>)> {
        self.lock().drain().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<ResponsePayload>>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Forgets a pending request when its HTTP handler goes away.
struct PendingGuard {
    pending: Arc<Pending>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

// ── Shared state ─────────────────────────────────────────────────────────

struct HttpState {
    inbound: Mutex<Option<mpsc::Sender<InboundPrompt>>>,
    pending: Arc<Pending>,
    model: String,
}

type SharedState = Arc<HttpState>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

impl HttpState {
    /// Register the request, then queue it for the agent.
    async fn submit(
        &self,
        request: PromptRequest,
    ) -> Result<(mpsc::Receiver<ResponsePayload>, PendingGuard), ApiError> {
        if request.prompt.trim().is_empty() {
            return Err(api_error(StatusCode::BAD_REQUEST, "prompt must not be empty"));
        }

        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "gateway is shutting down"))?;

        let prompt = InboundPrompt::new(request);
        let (rx, guard) = self.pending.register(&prompt.request_id);
        debug!(request_id = %prompt.request_id, "Prompt accepted");

        inbound
            .send(prompt)
            .await
            .map_err(|_| api_error(StatusCode::SERVICE_UNAVAILABLE, "agent is not running"))?;
        Ok((rx, guard))
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

/// Messaging gateway backed by an Axum server.
pub struct HttpGateway {
    addr: String,
    state: SharedState,
    receiver: Mutex<Option<mpsc::Receiver<InboundPrompt>>>,
    shutdown: CancellationToken,
    server: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpGateway {
    pub fn new(host: &str, port: u16) -> Self {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        Self {
            addr: format!("{host}:{port}"),
            state: Arc::new(HttpState {
                inbound: Mutex::new(Some(tx)),
                pending: Arc::new(Pending::default()),
                model: String::new(),
            }),
            receiver: Mutex::new(Some(rx)),
            shutdown: CancellationToken::new(),
            server: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.host, config.port)
    }

    /// Model name reported by `/health`.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.model = model.into();
        }
        self
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The Axum router serving this gateway.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    fn take_receiver(&self) -> Result<mpsc::Receiver<InboundPrompt>, GatewayError> {
        self.receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| GatewayError::Io("HTTP gateway already started".into()))
    }
}

fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/prompt", post(prompt_handler))
        .route("/v1/prompt/stream", post(prompt_stream_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[async_trait]
impl MessagingGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundPrompt>, GatewayError> {
        let rx = self.take_receiver()?;
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| GatewayError::Bind {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        let local = listener.local_addr().ok();
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = local;
        info!(addr = %self.addr, "HTTP gateway listening");

        let app = self.router();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP gateway stopped with an error");
            }
        });
        *self.server.lock().await = Some(handle);
        Ok(rx)
    }

    async fn send_response(
        &self,
        request_id: &str,
        payload: ResponsePayload,
    ) -> Result<(), GatewayError> {
        let sender = self
            .state
            .pending
            .sender(request_id, payload.completed)
            .ok_or_else(|| GatewayError::Delivery {
                request_id: request_id.to_string(),
                reason: "no client is waiting".into(),
            })?;
        sender.send(payload).await.map_err(|_| GatewayError::Delivery {
            request_id: request_id.to_string(),
            reason: "client disconnected".into(),
        })
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        // Dropping the sender closes the agent's receiver once handlers finish.
        self.state
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        for (request_id, sender) in self.state.pending.drain() {
            let payload = ResponsePayload::failure(&self.state.model, 0, "gateway is shutting down");
            if sender.try_send(payload).is_err() {
                debug!(%request_id, "Waiting client dropped at shutdown");
            }
        }
        self.shutdown.cancel();
        if let Some(handle) = self.server.lock().await.take() {
            handle
                .await
                .map_err(|e| GatewayError::Io(format!("server task failed: {e}")))?;
        }
        info!("HTTP gateway stopped");
        Ok(())
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    pending: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.model.clone(),
        pending: state.pending.len(),
    })
}

/// `POST /v1/prompt` — wait for the terminal payload.
async fn prompt_handler(
    State(state): State<SharedState>,
    Json(request): Json<PromptRequest>,
) -> Result<Response, ApiError> {
    let (mut rx, _guard) = state.submit(request).await?;

    while let Some(payload) = rx.recv().await {
        if !payload.completed {
            continue;
        }
        let status = if payload.is_failure() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        return Ok((status, Json(payload)).into_response());
    }

    Err(api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "request ended without a response",
    ))
}

/// `POST /v1/prompt/stream` — one SSE event per payload.
async fn prompt_stream_handler(
    State(state): State<SharedState>,
    Json(request): Json<PromptRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let (rx, guard) = state.submit(request).await?;

    let stream = ReceiverStream::new(rx).map(move |payload| {
        let _pending = &guard;
        Ok(to_event(&payload))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_event(payload: &ResponsePayload) -> SseEvent {
    let name = match (payload.completed, payload.is_failure()) {
        (false, _) => "token",
        (true, false) => "done",
        (true, true) => "error",
    };
    let data = serde_json::to_string(payload).unwrap_or_default();
    SseEvent::default().event(name).data(data)
}
