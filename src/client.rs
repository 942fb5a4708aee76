//! Blocking HTTP client for the gateway API.
//!
//! One type covers both audiences: callers configure the API token to submit
//! messages and read reports, relay devices configure the device token to
//! register, poll and report status.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::{
    DevicesResponse, ErrorResponse, HealthResponse, HistoryResponse, OutboundSms, PollRequest,
    PollResponse, QueueStatusResponse, RegisterDeviceRequest, RegisterDeviceResponse,
    SendSmsRequest, SendSmsResponse, StatusReport, StatusReportResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(String),
    #[error("gateway returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    api_token: Option<String>,
    device_token: Option<String>,
    agent: ureq::Agent,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            device_token: None,
            agent: ureq::Agent::new(),
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn send_sms(&self, to: &str, message: &str) -> Result<SendSmsResponse, ClientError> {
        let body = SendSmsRequest {
            to: Some(to.to_string()),
            message: Some(message.to_string()),
        };
        self.post("/sms/send", self.api_token.as_deref(), &body)
    }

    pub fn server_status(&self) -> Result<HealthResponse, ClientError> {
        self.get("/health", None)
    }

    pub fn queue_status(&self) -> Result<QueueStatusResponse, ClientError> {
        self.get("/queue/status", None)
    }

    pub fn connected_devices(&self) -> Result<DevicesResponse, ClientError> {
        self.get("/devices", self.api_token.as_deref())
    }

    pub fn sms_history(&self) -> Result<HistoryResponse, ClientError> {
        self.get("/sms/history", self.api_token.as_deref())
    }

    pub fn register_device(
        &self,
        device_id: &str,
        phone_number: &str,
    ) -> Result<RegisterDeviceResponse, ClientError> {
        let body = RegisterDeviceRequest {
            device_id: Some(device_id.to_string()),
            phone_number: Some(phone_number.to_string()),
        };
        self.post("/device/register", self.device_token.as_deref(), &body)
    }

    /// Ask for the next message to send. The gateway hands out at most one.
    pub fn poll(&self, device_id: &str) -> Result<Option<OutboundSms>, ClientError> {
        let body = PollRequest {
            device_id: Some(device_id.to_string()),
        };
        let response: PollResponse =
            self.post("/device/poll", self.device_token.as_deref(), &body)?;
        Ok(response.messages.into_iter().next())
    }

    /// Report `sent`, `delivered` or `failed` for a polled message.
    pub fn report_status(
        &self,
        message_id: &str,
        status: &str,
        device_id: Option<&str>,
    ) -> Result<StatusReportResponse, ClientError> {
        let body = StatusReport {
            message_id: Some(message_id.to_string()),
            status: Some(status.to_string()),
            device_id: device_id.map(str::to_string),
        };
        self.post("/device/status", self.device_token.as_deref(), &body)
    }

    fn request(&self, method: &str, path: &str, token: Option<&str>) -> ureq::Request {
        let request = self
            .agent
            .request(method, &format!("{}{}", self.base_url, path));
        match token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T, ClientError> {
        decode(self.request("GET", path, token).call())
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, ClientError> {
        decode(self.request("POST", path, token).send_json(body))
    }
}

fn decode<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<T, ClientError> {
    match result {
        Ok(response) => response
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string())),
        Err(ureq::Error::Status(code, response)) => {
            let text = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            Err(ClientError::Status { code, message })
        }
        Err(ureq::Error::Transport(transport)) => Err(ClientError::Http(transport.to_string())),
    }
}
