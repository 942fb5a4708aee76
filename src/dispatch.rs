//! The dispatch queue: submitted messages, lease assignment to polling devices,
//! reclamation of stalled leases and the per-message status machine.
//!
//! ```text
//! queued --lease_next--> leased --report sent/delivered--> sent | delivered
//! leased --lease expiry--> queued
//! leased --report failed--> queued (retry_count + 1)
//! ```
//!
//! With [`DispatchConfig::max_retries`] set, a failure that reaches the limit
//! ends in the terminal `failed` status instead of going back to `queued`.
//!
//! [`DispatchQueue`] is a plain single-owner structure; callers that share it
//! between tasks wrap it in one mutex (see [`crate::gateway::GatewayState`]).

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{elapsed_between, LeaseClock};
use crate::history::HistoryIndex;
use crate::logging;

const MESSAGE_ID_BYTES: usize = 16;
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Longest a failed message is held back, whatever the base and retry count.
pub const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Leased,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Leased => "leased",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
        }
    }

    /// Queued and leased messages live in the active queue; everything else
    /// is finished and only visible through the history index.
    pub fn is_active(&self) -> bool {
        matches!(self, MessageStatus::Queued | MessageStatus::Leased)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status a relay device may report for a message it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Sent,
    Delivered,
    Failed,
}

impl ReportedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedStatus::Sent => "sent",
            ReportedStatus::Delivered => "delivered",
            ReportedStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ReportedStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sent" => Ok(ReportedStatus::Sent),
            "delivered" => Ok(ReportedStatus::Delivered),
            "failed" => Ok(ReportedStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no relay devices are registered")]
    NoDevicesAvailable,
    #[error("message {message_id} is leased to {holder:?}, not {reporter:?}")]
    LeaseMismatch {
        message_id: String,
        holder: Option<String>,
        reporter: Option<String>,
    },
}

/// What a status report did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The report was applied; the message now has this status.
    Applied(MessageStatus),
    /// Unknown or already finished message. Late and duplicate reports land here.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub recipient: String,
    pub body: String,
    pub status: MessageStatus,
    pub lease_holder: Option<String>,
    pub lease_started_at: Option<SystemTime>,
    pub retry_count: u32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    /// Set after a failure when a backoff is configured; the message is not
    /// leasable before this instant.
    pub not_before: Option<SystemTime>,
}

impl Message {
    fn new(id: String, recipient: String, body: String, now: SystemTime) -> Self {
        Self {
            id,
            recipient,
            body,
            status: MessageStatus::Queued,
            lease_holder: None,
            lease_started_at: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            not_before: None,
        }
    }

    fn lease_expired(&self, now: SystemTime, timeout: Duration) -> bool {
        match self.lease_started_at {
            Some(started) => elapsed_between(started, now) >= timeout,
            None => true,
        }
    }

    fn is_held_by(&self, device_id: &str) -> bool {
        self.lease_holder.as_deref() == Some(device_id)
    }

    fn is_backing_off(&self, now: SystemTime) -> bool {
        self.not_before.is_some_and(|not_before| now < not_before)
    }

    fn grant(&mut self, device_id: &str, now: SystemTime) {
        self.status = MessageStatus::Leased;
        self.lease_holder = Some(device_id.to_string());
        self.lease_started_at = Some(now);
        self.not_before = None;
        self.updated_at = now;
    }

    fn release(&mut self, now: SystemTime) {
        self.status = MessageStatus::Queued;
        self.lease_holder = None;
        self.updated_at = now;
    }

    fn finish(&mut self, status: MessageStatus, now: SystemTime) {
        self.status = status;
        self.lease_holder = None;
        self.not_before = None;
        self.updated_at = now;
    }
}

/// Policy knobs. The default is the plain relay behaviour: unlimited retries,
/// no per-device cap, immediate requeue on failure, any device may report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_retries: Option<u32>,
    pub max_leases_per_device: Option<usize>,
    pub failure_backoff: Duration,
    pub strict_lease_holder: bool,
}

pub struct DispatchQueue {
    config: DispatchConfig,
    clock: Arc<dyn LeaseClock>,
    queue: VecDeque<Message>,
    history: HistoryIndex,
}

impl DispatchQueue {
    pub fn new(config: DispatchConfig, clock: Arc<dyn LeaseClock>) -> Self {
        Self {
            config,
            clock,
            queue: VecDeque::new(),
            history: HistoryIndex::new(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Append a new message in arrival order and return its id.
    pub fn submit(&mut self, recipient: impl Into<String>, body: impl Into<String>) -> String {
        let now = self.clock.now();
        let id = generate_message_id();
        self.queue
            .push_back(Message::new(id.clone(), recipient.into(), body.into(), now));
        info!(
            message = %logging::msg_id(&id),
            depth = self.queue.len(),
            "dispatch: message queued"
        );
        id
    }

    /// Hand the oldest leasable message to `device_id`.
    ///
    /// Scans in arrival order. Unexpired leases and messages still backing off
    /// are skipped; expired leases are reclaimed in place and may be granted
    /// straight away. Returns `None` when nothing is leasable or the device
    /// already holds its configured maximum of leases.
    pub fn lease_next(&mut self, device_id: &str) -> Option<Message> {
        let now = self.clock.now();
        let timeout = self.clock.lease_timeout();
        let must_count = self.config.max_leases_per_device.is_some();
        let mut held_by_device = 0usize;
        let mut candidate = None;

        for (index, message) in self.queue.iter_mut().enumerate() {
            if message.status == MessageStatus::Leased {
                if !message.lease_expired(now, timeout) {
                    if message.is_held_by(device_id) {
                        held_by_device += 1;
                    }
                    continue;
                }
                info!(
                    message = %logging::msg_id(&message.id),
                    holder = %logging::device_id(message.lease_holder.as_deref().unwrap_or("")),
                    "dispatch: lease expired, reclaiming"
                );
                message.release(now);
                self.history.refresh(message);
            }

            if message.is_backing_off(now) {
                continue;
            }
            if candidate.is_none() {
                candidate = Some(index);
                if !must_count {
                    break;
                }
            }
        }

        if let Some(cap) = self.config.max_leases_per_device {
            if held_by_device >= cap {
                debug!(
                    device = %logging::device_id(device_id),
                    held = held_by_device,
                    "dispatch: device at lease cap"
                );
                return None;
            }
        }

        let message = self.queue.get_mut(candidate?)?;
        message.grant(device_id, now);
        self.history.record(message);
        info!(
            message = %logging::msg_id(&message.id),
            device = %logging::device_id(device_id),
            retry_count = message.retry_count,
            "dispatch: lease granted"
        );
        Some(message.clone())
    }

    /// Apply a device's report for `message_id`.
    ///
    /// Only messages that were leased at least once and are still active are
    /// affected; anything else is [`ReportOutcome::Ignored`]. `reporter` is
    /// checked against the lease holder only in strict mode.
    pub fn report_status(
        &mut self,
        message_id: &str,
        status: ReportedStatus,
        reporter: Option<&str>,
    ) -> Result<ReportOutcome, DispatchError> {
        if !self.history.contains(message_id) {
            debug!(message = %logging::msg_id(message_id), "dispatch: report for unknown message ignored");
            return Ok(ReportOutcome::Ignored);
        }
        let Some(index) = self.queue.iter().position(|m| m.id == message_id) else {
            debug!(message = %logging::msg_id(message_id), "dispatch: report for finished message ignored");
            return Ok(ReportOutcome::Ignored);
        };

        if self.config.strict_lease_holder {
            let message = &self.queue[index];
            let matches = match (message.lease_holder.as_deref(), reporter) {
                (Some(holder), Some(reporter)) => holder == reporter,
                _ => false,
            };
            if !matches {
                return Err(DispatchError::LeaseMismatch {
                    message_id: message_id.to_string(),
                    holder: message.lease_holder.clone(),
                    reporter: reporter.map(str::to_string),
                });
            }
        }

        let now = self.clock.now();
        let outcome = match status {
            ReportedStatus::Sent | ReportedStatus::Delivered => {
                let terminal = if status == ReportedStatus::Sent {
                    MessageStatus::Sent
                } else {
                    MessageStatus::Delivered
                };
                self.finish_at(index, terminal, now)
            }
            ReportedStatus::Failed => self.fail_at(index, now),
        };

        info!(
            message = %logging::msg_id(message_id),
            reported = ?status,
            ?outcome,
            "dispatch: status applied"
        );
        Ok(outcome)
    }

    fn finish_at(&mut self, index: usize, status: MessageStatus, now: SystemTime) -> ReportOutcome {
        match self.queue.remove(index) {
            Some(mut message) => {
                message.finish(status, now);
                self.history.refresh(&message);
                ReportOutcome::Applied(status)
            }
            None => ReportOutcome::Ignored,
        }
    }

    fn fail_at(&mut self, index: usize, now: SystemTime) -> ReportOutcome {
        let Some(message) = self.queue.get_mut(index) else {
            return ReportOutcome::Ignored;
        };
        let retry_count = message.retry_count.saturating_add(1);
        let not_before = if self.config.failure_backoff.is_zero() {
            None
        } else {
            Some(backoff_until(now, self.config.failure_backoff, retry_count))
        };
        message.retry_count = retry_count;

        if self
            .config
            .max_retries
            .is_some_and(|limit| message.retry_count >= limit)
        {
            return self.finish_at(index, MessageStatus::Failed, now);
        }

        message.release(now);
        message.not_before = not_before;
        self.history.refresh(message);
        ReportOutcome::Applied(MessageStatus::Queued)
    }

    /// Number of messages still queued or leased.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// An active message by id. Finished messages are only in [`Self::history`].
    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.queue.iter().find(|m| m.id == message_id)
    }

    /// Active messages in arrival order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    pub fn history(&self) -> &HistoryIndex {
        &self.history
    }
}

fn generate_message_id() -> String {
    let mut bytes = [0u8; MESSAGE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `base * 2^(retry_count - 1)`, exponent capped and the result clamped to
/// [`MAX_FAILURE_BACKOFF`].
fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(1u32 << exponent).min(MAX_FAILURE_BACKOFF)
}

/// The instant a failed message becomes leasable again. Never panics on
/// `SystemTime` overflow.
fn backoff_until(now: SystemTime, base: Duration, retry_count: u32) -> SystemTime {
    let delay = backoff_delay(base, retry_count);
    now.checked_add(delay).unwrap_or(now)
}
