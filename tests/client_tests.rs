use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use smsgate::agent::{DeviceAgent, SendError, SmsSender};
use smsgate::api::OutboundSms;
use smsgate::auth::AccessTokens;
use smsgate::client::{ClientError, GatewayClient};
use smsgate::clock::ManualClock;
use smsgate::dispatch::{DispatchConfig, MessageStatus, ReportedStatus};
use smsgate::gateway::{app, GatewayConfig, GatewayState};

async fn start_gateway() -> (String, oneshot::Sender<()>) {
    let clock = ManualClock::at_epoch_secs(1_700_000_000, Duration::from_secs(60));
    let state = GatewayState::new(
        GatewayConfig {
            tokens: AccessTokens::new("api", "dev"),
            dispatch: DispatchConfig::default(),
        },
        Arc::new(clock),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", addr), shutdown_tx)
}

#[tokio::test]
async fn caller_and_device_complete_a_delivery() {
    let (base_url, shutdown_tx) = start_gateway().await;

    let result = tokio::task::spawn_blocking(move || {
        let device = GatewayClient::new(base_url.clone()).with_device_token("dev");
        let caller = GatewayClient::new(format!("{base_url}/")).with_api_token("api");
        assert_eq!(caller.base_url(), base_url);

        let registered = device.register_device("pixel", "+15550000001").expect("register");
        assert_eq!(registered.status, "registered");

        let sent = caller.send_sms("+15551234567", "hello").expect("send");
        assert_eq!(sent.status, "queued");

        let polled = device.poll("pixel").expect("poll").expect("a message");
        assert_eq!(
            polled,
            OutboundSms {
                id: sent.id.clone(),
                to: "+15551234567".to_string(),
                message: "hello".to_string(),
            }
        );
        assert!(device.poll("pixel").expect("second poll").is_none());

        let reported = device
            .report_status(&sent.id, "delivered", Some("pixel"))
            .expect("report");
        assert_eq!(reported.status, "updated");

        let history = caller.sms_history().expect("history");
        assert_eq!(history.messages.len(), 1);
        assert_eq!(history.messages[0].status, MessageStatus::Delivered);

        let devices = caller.connected_devices().expect("devices");
        assert_eq!(devices.devices[0].device_id, "pixel");
        assert_eq!(devices.devices[0].status, "online");

        let queue = caller.queue_status().expect("queue");
        assert_eq!(queue.queue_size, 0);
        assert_eq!(queue.pending_messages, 1);
        assert_eq!(queue.connected_devices, 1);

        let health = caller.server_status().expect("health");
        assert_eq!(health.status, "ok");
    })
    .await;

    shutdown_tx.send(()).ok();
    result.expect("client task");
}

#[tokio::test]
async fn gateway_errors_carry_status_and_message() {
    let (base_url, shutdown_tx) = start_gateway().await;

    let result = tokio::task::spawn_blocking(move || {
        let anonymous = GatewayClient::new(base_url.clone());
        match anonymous.send_sms("+1", "hi") {
            Err(ClientError::Status { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("expected 401, got {other:?}"),
        }

        let caller = GatewayClient::new(base_url.clone()).with_api_token("api");
        match caller.send_sms("+1", "hi") {
            Err(ClientError::Status { code, message }) => {
                assert_eq!(code, 503);
                assert_eq!(message, "No devices connected");
            }
            other => panic!("expected 503, got {other:?}"),
        }

        let device = GatewayClient::new(base_url).with_device_token("dev");
        match device.poll("stranger") {
            Err(ClientError::Status { code, .. }) => assert_eq!(code, 401),
            other => panic!("expected 401, got {other:?}"),
        }
        match device.report_status("m", "lost", None) {
            Err(ClientError::Status { code, .. }) => assert_eq!(code, 400),
            other => panic!("expected 400, got {other:?}"),
        }
    })
    .await;

    shutdown_tx.send(()).ok();
    result.expect("client task");
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let result = tokio::task::spawn_blocking(move || {
        GatewayClient::new(format!("http://{addr}")).server_status()
    })
    .await
    .expect("client task");

    assert!(matches!(result, Err(ClientError::Http(_))));
}

/// Sends everything except messages to `+15550000000`, which it cannot reach.
#[derive(Default)]
struct RecordingSender {
    sent: Vec<String>,
}

impl SmsSender for RecordingSender {
    fn send(&mut self, sms: &OutboundSms) -> Result<(), SendError> {
        if sms.to == "+15550000000" {
            return Err(SendError("no signal".to_string()));
        }
        self.sent.push(sms.message.clone());
        Ok(())
    }
}

#[tokio::test]
async fn device_agent_reports_sent_and_failed() {
    let (base_url, shutdown_tx) = start_gateway().await;

    let result = tokio::task::spawn_blocking(move || {
        let caller = GatewayClient::new(base_url.clone()).with_api_token("api");
        let device = GatewayClient::new(base_url).with_device_token("dev");
        let mut agent = DeviceAgent::new(device, "pixel", "+15550000001", RecordingSender::default());
        agent.register().expect("register");

        let first = caller.send_sms("+15551234567", "one").expect("send").id;
        let unreachable = caller.send_sms("+15550000000", "two").expect("send").id;
        caller.send_sms("+15551234567", "three").expect("send");

        let deliveries = agent.drain().expect("drain");
        assert_eq!(deliveries.len(), 2, "drain stops at the first failure");
        assert_eq!(deliveries[0].message_id, first);
        assert_eq!(deliveries[0].status, ReportedStatus::Sent);
        assert_eq!(deliveries[1].message_id, unreachable);
        assert_eq!(deliveries[1].status, ReportedStatus::Failed);
        assert_eq!(agent.sender().sent, vec!["one".to_string()]);

        let history = caller.sms_history().expect("history");
        let status_of = |id: &str| {
            history
                .messages
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| (entry.status, entry.retry_count))
        };
        assert_eq!(status_of(&first), Some((MessageStatus::Sent, 0)));
        assert_eq!(status_of(&unreachable), Some((MessageStatus::Queued, 1)));
        assert_eq!(caller.queue_status().expect("queue").queue_size, 2);

        // The failed message is first in line again.
        let retried = agent.drain().expect("second drain");
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].message_id, unreachable);
    })
    .await;

    shutdown_tx.send(()).ok();
    result.expect("client task");
}

#[tokio::test]
async fn device_agent_without_registration_is_rejected() {
    let (base_url, shutdown_tx) = start_gateway().await;

    let result = tokio::task::spawn_blocking(move || {
        let device = GatewayClient::new(base_url).with_device_token("dev");
        let mut agent = DeviceAgent::new(device, "ghost", "+1", RecordingSender::default());
        agent.drain()
    })
    .await
    .expect("client task");

    shutdown_tx.send(()).ok();
    assert!(matches!(result, Err(ClientError::Status { code: 401, .. })));
}
