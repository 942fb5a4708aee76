//! smsgate: command-line client for the SMS gateway API.

use std::error::Error;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use smsgate::agent::{CommandSender, DeviceAgent, LogSender, SmsSender, DEFAULT_POLL_INTERVAL};
use smsgate::client::GatewayClient;
use smsgate::logging;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

/// Send SMS through an smsgate server and inspect its state.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "smsgate", version, about)]
struct Cli {
    /// Gateway base URL [env: SMSGATE_URL] [default: http://127.0.0.1:5000]
    #[arg(long, short = 's')]
    server: Option<String>,

    /// API token for callers [env: SMS_API_TOKEN]
    #[arg(long, short = 't')]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a message for delivery
    Send { to: String, message: String },
    /// Server health
    Status,
    /// Registered relay devices
    Devices,
    /// Queue depth and counters
    Queue,
    /// Every message handed to a device so far
    History,
    /// Act as a relay device: register, then poll and report forever
    Device {
        /// Identifier this device registers under
        #[arg(long)]
        device_id: String,
        /// Number the device sends from
        #[arg(long)]
        phone_number: String,
        /// Device token [env: DEVICE_TOKEN]
        #[arg(long)]
        device_token: Option<String>,
        /// Program run as `<program> <to> <message>` per message; exit status
        /// 0 reports sent. Without it messages are only logged.
        #[arg(long)]
        send_command: Option<String>,
        /// Seconds between polls [default: 5]
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let server = cli
        .server
        .or_else(|| std::env::var("SMSGATE_URL").ok())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let mut client = GatewayClient::new(server);

    if let Some(token) = cli.token.or_else(|| std::env::var("SMS_API_TOKEN").ok()) {
        client = client.with_api_token(token);
    }

    match cli.command {
        Command::Send { to, message } => print_json(&client.send_sms(&to, &message)?),
        Command::Status => print_json(&client.server_status()?),
        Command::Devices => print_json(&client.connected_devices()?),
        Command::Queue => print_json(&client.queue_status()?),
        Command::History => print_json(&client.sms_history()?),
        Command::Device {
            device_id,
            phone_number,
            device_token,
            send_command,
            interval_secs,
        } => {
            let token = device_token.or_else(|| std::env::var("DEVICE_TOKEN").ok());
            if let Some(token) = token {
                client = client.with_device_token(token);
            }
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            match send_command {
                Some(program) => run_device(
                    DeviceAgent::new(client, device_id, phone_number, CommandSender::new(program)),
                    interval,
                ),
                None => run_device(
                    DeviceAgent::new(client, device_id, phone_number, LogSender),
                    interval,
                ),
            }
        }
    }
}

fn run_device<S: SmsSender>(
    mut agent: DeviceAgent<S>,
    interval: Duration,
) -> Result<(), Box<dyn Error>> {
    logging::init();
    agent.register()?;
    agent.run(interval)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
