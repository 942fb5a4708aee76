//! Relay device loop: register with the gateway, poll for messages, hand each
//! one to an [`SmsSender`] and report `sent` or `failed`.

use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::api::OutboundSms;
use crate::client::{ClientError, GatewayClient};
use crate::dispatch::ReportedStatus;
use crate::logging;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SendError(pub String);

/// Whatever actually puts a message on the air.
pub trait SmsSender {
    fn send(&mut self, sms: &OutboundSms) -> Result<(), SendError>;
}

impl<F> SmsSender for F
where
    F: FnMut(&OutboundSms) -> Result<(), SendError>,
{
    fn send(&mut self, sms: &OutboundSms) -> Result<(), SendError> {
        self(sms)
    }
}

/// Logs each message and treats it as sent. Useful as a dry run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

impl SmsSender for LogSender {
    fn send(&mut self, sms: &OutboundSms) -> Result<(), SendError> {
        info!(message = %logging::msg_id(&sms.id), to = %sms.to, body = %sms.message, "agent: would send");
        Ok(())
    }
}

/// Runs `program <to> <message>` per message; exit status 0 means sent.
#[derive(Debug, Clone)]
pub struct CommandSender {
    program: String,
}

impl CommandSender {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SmsSender for CommandSender {
    fn send(&mut self, sms: &OutboundSms) -> Result<(), SendError> {
        let status = Command::new(&self.program)
            .arg(&sms.to)
            .arg(&sms.message)
            .status()
            .map_err(|e| SendError(format!("cannot run {}: {e}", self.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(SendError(format!("{} exited with {status}", self.program)))
        }
    }
}

/// One polled message and what was reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub status: ReportedStatus,
}

pub struct DeviceAgent<S> {
    client: GatewayClient,
    device_id: String,
    phone_number: String,
    sender: S,
}

impl<S: SmsSender> DeviceAgent<S> {
    /// `client` must carry the device token.
    pub fn new(
        client: GatewayClient,
        device_id: impl Into<String>,
        phone_number: impl Into<String>,
        sender: S,
    ) -> Self {
        Self {
            client,
            device_id: device_id.into(),
            phone_number: phone_number.into(),
            sender,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn register(&self) -> Result<(), ClientError> {
        self.client
            .register_device(&self.device_id, &self.phone_number)?;
        info!(device = %logging::device_id(&self.device_id), "agent: registered");
        Ok(())
    }

    /// Poll once. A message, if any, is sent and its outcome reported.
    pub fn step(&mut self) -> Result<Option<Delivery>, ClientError> {
        let Some(sms) = self.client.poll(&self.device_id)? else {
            return Ok(None);
        };
        let status = match self.sender.send(&sms) {
            Ok(()) => ReportedStatus::Sent,
            Err(error) => {
                warn!(message = %logging::msg_id(&sms.id), %error, "agent: send failed");
                ReportedStatus::Failed
            }
        };
        self.client
            .report_status(&sms.id, status.as_str(), Some(&self.device_id))?;
        info!(
            message = %logging::msg_id(&sms.id),
            status = status.as_str(),
            "agent: reported"
        );
        Ok(Some(Delivery {
            message_id: sms.id,
            status,
        }))
    }

    /// Poll until nothing is left for this device or a send fails.
    pub fn drain(&mut self) -> Result<Vec<Delivery>, ClientError> {
        let mut deliveries = Vec::new();
        while let Some(delivery) = self.step()? {
            let failed = delivery.status == ReportedStatus::Failed;
            deliveries.push(delivery);
            if failed {
                break;
            }
        }
        Ok(deliveries)
    }

    /// Drain every `interval`, forever. Errors are logged and retried on the
    /// next tick; a 401 triggers a fresh registration.
    pub fn run(&mut self, interval: Duration) -> ! {
        loop {
            match self.drain() {
                Ok(_) => {}
                Err(ClientError::Status { code: 401, message }) => {
                    warn!(%message, "agent: gateway rejected poll, registering again");
                    if let Err(error) = self.register() {
                        warn!(%error, "agent: registration failed");
                    }
                }
                Err(error) => warn!(%error, "agent: poll failed"),
            }
            std::thread::sleep(interval);
        }
    }
}
