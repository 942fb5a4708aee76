//! JSON bodies exchanged over the HTTP API.
//!
//! Request types keep every field optional so that missing fields surface as
//! validation errors with the gateway's own messages rather than as
//! deserializer rejections.

use serde::{Deserialize, Serialize};

use crate::clock::epoch_secs;
use crate::devices::Device;
use crate::dispatch::{Message, MessageStatus};
use crate::history::HistoryRecord;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendSmsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSmsResponse {
    pub status: String,
    pub message: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDeviceResponse {
    pub status: String,
    pub device_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// A message handed to a relay device for sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundSms {
    pub id: String,
    pub to: String,
    pub message: String,
}

impl From<&Message> for OutboundSms {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            to: message.recipient.clone(),
            message: message.body.clone(),
        }
    }
}

/// Holds zero or one message per poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub messages: Vec<OutboundSms>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Only checked when the gateway runs with a strict lease holder check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReportResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub to: String,
    pub message: String,
    pub status: MessageStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub retry_count: u32,
}

impl From<&HistoryRecord> for HistoryEntry {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            to: record.recipient.clone(),
            message: record.body.clone(),
            status: record.status,
            created_at: epoch_secs(record.created_at),
            updated_at: epoch_secs(record.updated_at),
            retry_count: record.retry_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub phone_number: String,
    pub last_seen: u64,
    pub status: String,
}

impl From<&Device> for DeviceEntry {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.id.clone(),
            phone_number: device.contact_address.clone(),
            last_seen: epoch_secs(device.last_seen_at),
            status: device.state.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub queue_size: usize,
    pub pending_messages: usize,
    pub connected_devices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connected_devices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
