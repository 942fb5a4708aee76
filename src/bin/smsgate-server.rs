//! smsgate-server: HTTP gateway that queues outbound SMS and leases them to
//! polling relay phones.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use smsgate::clock::SystemClock;
use smsgate::config::{Cli, Config};
use smsgate::gateway::{app, shutdown_on, GatewayState};
use smsgate::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init();
    let config = Config::from_cli_and_env(Cli::parse())?;

    info!("smsgate-server starting");
    info!(
        "  api token: {}{}",
        config.tokens.api_token(),
        generated_note(config.api_token_generated)
    );
    info!(
        "  device token: {}{}",
        config.tokens.device_token(),
        generated_note(config.device_token_generated)
    );
    info!("  save these tokens: callers and relay devices need them");
    info!("  lease timeout: {}s", config.lease_timeout.as_secs());
    if let Some(max) = config.dispatch.max_retries {
        info!("  max retries: {max}");
    }
    if let Some(max) = config.dispatch.max_leases_per_device {
        info!("  max leases per device: {max}");
    }
    if !config.dispatch.failure_backoff.is_zero() {
        info!(
            "  failure backoff: {}s (doubling)",
            config.dispatch.failure_backoff.as_secs()
        );
    }
    if config.dispatch.strict_lease_holder {
        info!("  status reports restricted to the lease holder");
    }

    let clock = Arc::new(SystemClock::new(config.lease_timeout));
    let state = GatewayState::new(config.gateway_config(), clock);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| format!("failed to bind {}: {error}", config.bind_addr))?;
    info!("  listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c()))
        .await?;

    info!("smsgate-server stopped");
    Ok(())
}

fn generated_note(generated: bool) -> &'static str {
    if generated {
        " (generated)"
    } else {
        ""
    }
}
