//! HTTP gateway: shared state plus the axum router in front of the dispatch
//! queue and device registry.
//!
//! Lock ordering: the device registry lock and the queue lock are never held
//! together. Operations that need both take the registry first, drop it, then
//! take the queue. The history index lives inside the queue and shares its lock.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{
    DeviceEntry, DevicesResponse, ErrorResponse, HealthResponse, HistoryEntry, HistoryResponse,
    OutboundSms, PollRequest, PollResponse, QueueStatusResponse, RegisterDeviceRequest,
    RegisterDeviceResponse, SendSmsRequest, SendSmsResponse, StatusReport, StatusReportResponse,
};
use crate::auth::{AccessTokens, Audience};
use crate::clock::LeaseClock;
use crate::devices::{Device, DeviceRegistry};
use crate::dispatch::{
    DispatchConfig, DispatchError, DispatchQueue, Message, ReportOutcome, ReportedStatus,
    UnknownStatus,
};
use crate::history::HistoryRecord;
use crate::logging;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tokens: AccessTokens,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("Device not registered")]
    UnknownDevice,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::Unauthorized(_) | GatewayError::UnknownDevice => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            GatewayError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GatewayError::Dispatch(DispatchError::NoDevicesAvailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No devices connected".to_string(),
            ),
            GatewayError::Dispatch(error @ DispatchError::LeaseMismatch { .. }) => {
                (StatusCode::CONFLICT, error.to_string())
            }
        };
        api_error(status, message)
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        error: message.into(),
    };
    (status, Json(body)).into_response()
}

#[derive(Clone)]
pub struct GatewayState {
    tokens: AccessTokens,
    devices: Arc<Mutex<DeviceRegistry>>,
    queue: Arc<Mutex<DispatchQueue>>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, clock: Arc<dyn LeaseClock>) -> Self {
        Self {
            tokens: config.tokens,
            devices: Arc::new(Mutex::new(DeviceRegistry::new(Arc::clone(&clock)))),
            queue: Arc::new(Mutex::new(DispatchQueue::new(config.dispatch, clock))),
        }
    }

    /// Queue a message, refusing when no device could ever pick it up.
    pub async fn submit(&self, recipient: &str, body: &str) -> Result<String, DispatchError> {
        if self.devices.lock().await.is_empty() {
            return Err(DispatchError::NoDevicesAvailable);
        }
        Ok(self.queue.lock().await.submit(recipient, body))
    }

    pub async fn register_device(&self, device_id: &str, contact_address: &str) -> bool {
        self.devices
            .lock()
            .await
            .register(device_id, contact_address)
    }

    /// Record the device as seen, then lease it the next message. The registry
    /// update is complete before the lease is granted.
    pub async fn poll(&self, device_id: &str) -> Result<Option<Message>, GatewayError> {
        let known = self.devices.lock().await.touch(device_id);
        if !known {
            return Err(GatewayError::UnknownDevice);
        }
        Ok(self.queue.lock().await.lease_next(device_id))
    }

    pub async fn report(
        &self,
        message_id: &str,
        status: ReportedStatus,
        reporter: Option<&str>,
    ) -> Result<ReportOutcome, DispatchError> {
        self.queue
            .lock()
            .await
            .report_status(message_id, status, reporter)
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.queue_depth()
    }

    pub async fn history(&self) -> Vec<HistoryRecord> {
        self.queue.lock().await.history().list()
    }

    pub async fn history_record(&self, message_id: &str) -> Option<HistoryRecord> {
        self.queue.lock().await.history().get(message_id).cloned()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.devices.lock().await.list()
    }

    pub async fn device_count(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn queue_status(&self) -> QueueStatusResponse {
        let connected_devices = self.device_count().await;
        let queue = self.queue.lock().await;
        QueueStatusResponse {
            queue_size: queue.queue_depth(),
            pending_messages: queue.history().len(),
            connected_devices,
        }
    }

    fn authorize(&self, headers: &HeaderMap, audience: Audience) -> Result<(), GatewayError> {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if self.tokens.verify(audience, authorization) {
            return Ok(());
        }
        debug!(?audience, "gateway: rejected bearer token");
        Err(GatewayError::Unauthorized(match audience {
            Audience::Caller => "Unauthorized",
            Audience::Device => "Unauthorized - invalid device token",
        }))
    }
}

pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(healthcheck))
        .route("/queue/status", get(queue_status))
        .route("/sms/send", post(send_sms))
        .route("/sms/history", get(sms_history))
        .route("/devices", get(list_devices))
        .route("/device/register", post(register_device))
        .route("/device/poll", post(poll_messages))
        .route("/device/status", post(update_status))
        .with_state(state)
}

/// Resolve once `signal` fires. A listener that fails to install is logged
/// and never resolves, so the server keeps running.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(error) = signal.await {
        warn!(%error, "gateway: cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "service": "SMS Gateway",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "queue_status": "/queue/status",
            "send_sms": "POST /sms/send",
            "sms_history": "/sms/history",
            "devices": "/devices",
        }
    }))
}

async fn healthcheck(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        connected_devices: state.device_count().await,
    })
}

async fn queue_status(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.queue_status().await)
}

/// Treat absent and empty strings alike.
fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn send_sms(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    payload: Result<Json<SendSmsRequest>, JsonRejection>,
) -> Result<Json<SendSmsResponse>, GatewayError> {
    state.authorize(&headers, Audience::Caller)?;
    let missing = || GatewayError::Validation("Missing 'to' or 'message' field".to_string());
    let Json(request) = payload.map_err(|_| missing())?;
    let (Some(to), Some(body)) = (required(request.to), required(request.message)) else {
        return Err(missing());
    };

    let id = state.submit(&to, &body).await.inspect_err(|error| {
        warn!(%error, "gateway: submission rejected");
    })?;

    Ok(Json(SendSmsResponse {
        status: "queued".to_string(),
        message: "SMS queued for delivery".to_string(),
        id,
    }))
}

async fn sms_history(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, GatewayError> {
    state.authorize(&headers, Audience::Caller)?;
    let messages = state.history().await.iter().map(HistoryEntry::from).collect();
    Ok(Json(HistoryResponse { messages }))
}

async fn list_devices(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<DevicesResponse>, GatewayError> {
    state.authorize(&headers, Audience::Caller)?;
    let devices = state.devices().await.iter().map(DeviceEntry::from).collect();
    Ok(Json(DevicesResponse { devices }))
}

async fn register_device(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> Result<Json<RegisterDeviceResponse>, GatewayError> {
    state.authorize(&headers, Audience::Device)?;
    let missing = || GatewayError::Validation("Missing device_id or phone_number".to_string());
    let Json(request) = payload.map_err(|_| missing())?;
    let (Some(device_id), Some(phone_number)) =
        (required(request.device_id), required(request.phone_number))
    else {
        return Err(missing());
    };

    let is_new = state.register_device(&device_id, &phone_number).await;
    info!(
        device = %logging::device_id(&device_id),
        first_time = is_new,
        "gateway: device registered"
    );

    Ok(Json(RegisterDeviceResponse {
        status: "registered".to_string(),
        device_id,
        message: "Device registered successfully".to_string(),
    }))
}

async fn poll_messages(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    payload: Result<Json<PollRequest>, JsonRejection>,
) -> Result<Json<PollResponse>, GatewayError> {
    state.authorize(&headers, Audience::Device)?;
    let device_id = payload
        .ok()
        .and_then(|Json(request)| required(request.device_id))
        .ok_or(GatewayError::UnknownDevice)?;

    let leased = state.poll(&device_id).await.inspect_err(|_| {
        warn!(device = %logging::device_id(&device_id), "gateway: poll from unregistered device");
    })?;

    Ok(Json(PollResponse {
        messages: leased.as_ref().map(OutboundSms::from).into_iter().collect(),
    }))
}

async fn update_status(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    payload: Result<Json<StatusReport>, JsonRejection>,
) -> Result<Json<StatusReportResponse>, GatewayError> {
    state.authorize(&headers, Audience::Device)?;
    let missing = || GatewayError::Validation("Missing message_id or status".to_string());
    let Json(report) = payload.map_err(|_| missing())?;
    let (Some(message_id), Some(status)) = (required(report.message_id), required(report.status))
    else {
        return Err(missing());
    };
    let status: ReportedStatus = status
        .parse()
        .map_err(|error: UnknownStatus| GatewayError::Validation(error.to_string()))?;

    state
        .report(&message_id, status, report.device_id.as_deref())
        .await
        .inspect_err(|error| warn!(%error, "gateway: status report rejected"))?;

    Ok(Json(StatusReportResponse {
        status: "updated".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_follows_the_signal() {
        tokio::time::timeout(Duration::from_secs(1), shutdown_on(async { Ok::<(), std::io::Error>(()) }))
            .await
            .expect("shutdown after signal");
    }

    #[tokio::test]
    async fn failed_signal_listener_keeps_serving() {
        let failed = async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown_on(failed)).await;
        assert!(waited.is_err(), "shutdown must not fire when the listener fails");
    }
}
