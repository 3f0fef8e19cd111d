/**
 * API REST CLUSTERDASH - Surface HTTP locale pour l'interface du dashboard
 *
 * RÔLE :
 * Expose l'état réconcilié de la session (nodes, kernels, workloads,
 * presets, créations en attente, notifications, logs) et relaie les actions
 * utilisateur vers la session.
 *
 * FONCTIONNEMENT :
 * - Lectures : snapshot du store, jamais de requête réseau
 * - Actions : déléguées à `DashboardSession` (WebSocket ou HTTP gateway)
 * - Les actions asynchrones répondent 202 ; le résultat arrive par polling
 *   ou par les notifications
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - CLUSTERDASH_API_KEY absente : accès refusé
 */

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::gateway::GatewayApi;
use crate::health::{ConnectionHealth, DashboardHealth};
use crate::logs::LogRequest;
use crate::models::{ClusterNode, DistributedKernel, KernelSpec, NodeToggle, ResourceClass, ResourceSpec, Workload, WorkloadPreset, WorkloadRegistration};
use crate::notify::Notification;
use crate::session::{DashboardSession, PendingCreations, SessionError};

type ApiResult<T> = Result<T, (StatusCode, Json<Value>)>;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<DashboardSession>,
    pub gateway: GatewayApi,
    pub health: ConnectionHealth,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("CLUSTERDASH_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("CLUSTERDASH_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        debug!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/nodes", get(get_nodes))
        .route("/nodes/{id}", patch(toggle_node))
        .route("/nodes/{id}/capacity", post(adjust_capacity))
        .route("/kernels", get(get_kernels).post(create_kernel))
        .route("/workloads", get(get_workloads).post(register_workload))
        .route("/workloads/{id}/start", post(start_workload))
        .route("/workloads/{id}/stop", post(stop_workload))
        .route("/presets", get(get_presets))
        .route("/pending", get(get_pending))
        .route("/refresh/{class}", post(refresh))
        .route("/notifications", get(get_notifications))
        .route("/notifications/{id}", delete(dismiss_notification))
        .route("/logs", get(get_logs))
        .route("/logs/start", post(start_logs))
        .route("/logs/stop", post(stop_logs))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

fn api_error(e: SessionError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        SessionError::ConnectionClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SessionError::NoPoller(_) => StatusCode::NOT_FOUND,
        SessionError::Protocol(_) | SessionError::Dropped(_) | SessionError::Fetch(_) | SessionError::Log(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn accepted(msg_id: String) -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(json!({ "msg_id": msg_id })))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<DashboardHealth> {
    Json(app.health.get_health(&app.session))
}

async fn get_nodes(State(app): State<AppState>) -> Json<Vec<ClusterNode>> {
    Json(app.session.store().list())
}

async fn get_kernels(State(app): State<AppState>) -> Json<Vec<DistributedKernel>> {
    Json(app.session.store().list())
}

async fn get_workloads(State(app): State<AppState>) -> Json<Vec<Workload>> {
    Json(app.session.store().list())
}

async fn get_presets(State(app): State<AppState>) -> Json<Vec<WorkloadPreset>> {
    Json(app.session.store().list())
}

// GET /pending (créations en cours, pour les placeholders)
async fn get_pending(State(app): State<AppState>) -> Json<PendingCreations> {
    Json(app.session.pending_creations())
}

// POST /refresh/{class}
async fn refresh(State(app): State<AppState>, Path(class): Path<String>) -> ApiResult<StatusCode> {
    let Some(class) = ResourceClass::parse(&class) else {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown resource class '{class}'") }))));
    };
    app.session.refresh(class).map_err(api_error)?;
    Ok(StatusCode::ACCEPTED)
}

// POST /kernels
async fn create_kernel(State(app): State<AppState>, Json(spec): Json<KernelSpec>) -> ApiResult<StatusCode> {
    app.session.create_kernel(&app.gateway, &spec).await.map_err(api_error)?;
    Ok(StatusCode::CREATED)
}

// PATCH /nodes/{id}
async fn toggle_node(State(app): State<AppState>, Path(id): Path<String>, Json(toggle): Json<NodeToggle>) -> ApiResult<StatusCode> {
    app.session
        .set_node_enabled(&app.gateway, &id, toggle.enabled)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /nodes/{id}/capacity
async fn adjust_capacity(State(app): State<AppState>, Path(id): Path<String>, Json(spec): Json<ResourceSpec>) -> ApiResult<StatusCode> {
    app.session
        .adjust_node_capacity(&app.gateway, &id, &spec)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /workloads
async fn register_workload(State(app): State<AppState>, Json(registration): Json<WorkloadRegistration>) -> ApiResult<(StatusCode, Json<Value>)> {
    let msg_id = app.session.register_workload(registration).map_err(api_error)?;
    Ok(accepted(msg_id))
}

async fn start_workload(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<(StatusCode, Json<Value>)> {
    let msg_id = app.session.start_workload(&id).map_err(api_error)?;
    Ok(accepted(msg_id))
}

async fn stop_workload(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<(StatusCode, Json<Value>)> {
    let msg_id = app.session.stop_workload(&id).map_err(api_error)?;
    Ok(accepted(msg_id))
}

async fn get_notifications(State(app): State<AppState>) -> Json<Vec<Notification>> {
    Json(app.session.notifier().active())
}

async fn dismiss_notification(State(app): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if app.session.notifier().dismiss(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_logs(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.session.log_buffer().lines())
}

// POST /logs/start : remplace le flux courant
async fn start_logs(State(app): State<AppState>, Json(request): Json<LogRequest>) -> StatusCode {
    let _stream = app.session.start_log_stream(app.gateway.clone(), request);
    StatusCode::ACCEPTED
}

async fn stop_logs(State(app): State<AppState>) -> StatusCode {
    app.session.stop_logs();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueuedFrame;
    use crate::session::SessionOptions;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn app_state() -> (AppState, mpsc::UnboundedReceiver<QueuedFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = DashboardSession::new(tx, SessionOptions::default());
        let gateway = GatewayApi::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        (AppState { session, gateway, health: ConnectionHealth::new() }, rx)
    }

    async fn serve(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_health_open_other_routes_guarded() {
        let (state, _rx) = app_state();
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        let nodes = client
            .get(format!("{base}/nodes"))
            .header("x-api-key", "definitely-not-the-key")
            .send()
            .await
            .unwrap();
        assert_eq!(nodes.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_workload_answers_with_msg_id() {
        let (state, mut rx) = app_state();
        let registration: WorkloadRegistration = serde_json::from_value(json!({"workload_name": "demo"})).unwrap();

        let (status, Json(body)) = register_workload(State(state.clone()), Json(registration)).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap().text).unwrap();
        assert_eq!(frame["msg_id"], body["msg_id"]);
        assert_eq!(state.session.pending_creations().workloads, 1);
    }

    #[tokio::test]
    async fn test_refresh_unknown_class() {
        let (state, _rx) = app_state();
        let err = refresh(State(state.clone()), Path("volumes".into())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        let err = refresh(State(state), Path("nodes".into())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_kernel_creation_is_bad_gateway() {
        let (state, _rx) = app_state();
        let err = create_kernel(State(state.clone()), Json(KernelSpec::default())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_GATEWAY);
        assert_eq!(state.session.pending_creations().kernels, 0);
        assert_eq!(get_notifications(State(state)).await.0.len(), 1);
    }
}
