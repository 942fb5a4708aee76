//! Configuration for the gateway server.
//!
//! Every setting can come from a CLI flag or an environment variable; the flag
//! wins. Tokens that are set nowhere are generated at startup and flagged so
//! the bootstrap can print them for the operator.

use std::time::Duration;

use clap::Parser;

use crate::auth::{generate_token, AccessTokens};
use crate::clock::DEFAULT_LEASE_TIMEOUT;
use crate::dispatch::{DispatchConfig, MAX_FAILURE_BACKOFF};
use crate::gateway::GatewayConfig;

pub const BIND_ENV: &str = "SMSGATE_BIND";
pub const API_TOKEN_ENV: &str = "SMS_API_TOKEN";
pub const DEVICE_TOKEN_ENV: &str = "DEVICE_TOKEN";
pub const LEASE_TIMEOUT_ENV: &str = "SMSGATE_LEASE_TIMEOUT_SECS";
pub const MAX_RETRIES_ENV: &str = "SMSGATE_MAX_RETRIES";
pub const MAX_LEASES_ENV: &str = "SMSGATE_MAX_LEASES_PER_DEVICE";
pub const FAILURE_BACKOFF_ENV: &str = "SMSGATE_FAILURE_BACKOFF_SECS";
pub const STRICT_LEASE_HOLDER_ENV: &str = "SMSGATE_STRICT_LEASE_HOLDER";

const DEFAULT_BIND: &str = "0.0.0.0:5000";

/// SMS relay gateway: queues outbound messages and leases them to polling
/// relay phones.
///
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug, Default)]
#[command(name = "smsgate-server", version, about)]
pub struct Cli {
    /// HTTP bind address [env: SMSGATE_BIND] [default: 0.0.0.0:5000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Token for API callers [env: SMS_API_TOKEN] [default: random]
    #[arg(long)]
    pub api_token: Option<String>,

    /// Token for relay devices [env: DEVICE_TOKEN] [default: random]
    #[arg(long)]
    pub device_token: Option<String>,

    /// Seconds a device may hold a message before it is reclaimed
    /// [env: SMSGATE_LEASE_TIMEOUT_SECS] [default: 60]
    #[arg(long)]
    pub lease_timeout_secs: Option<u64>,

    /// Failed attempts after which a message is given up on
    /// [env: SMSGATE_MAX_RETRIES] [default: unlimited]
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Leases a single device may hold at once
    /// [env: SMSGATE_MAX_LEASES_PER_DEVICE] [default: unlimited]
    #[arg(long)]
    pub max_leases_per_device: Option<usize>,

    /// Base delay before a failed message is handed out again, doubled per
    /// failure and capped at one week
    /// [env: SMSGATE_FAILURE_BACKOFF_SECS] [default: 0]
    #[arg(long)]
    pub failure_backoff_secs: Option<u64>,

    /// Only accept status reports from the device holding the lease
    /// [env: SMSGATE_STRICT_LEASE_HOLDER]
    #[arg(long)]
    pub strict_lease_holder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub tokens: AccessTokens,
    /// Whether each token was generated rather than supplied.
    pub api_token_generated: bool,
    pub device_token_generated: bool,
    pub lease_timeout: Duration,
    pub dispatch: DispatchConfig,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Result<Self, ConfigError> {
        Self::from_cli_and_vars(cli, |key| std::env::var(key).ok())
    }

    fn from_cli_and_vars(
        cli: Cli,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = cli
            .bind
            .or_else(|| var(BIND_ENV))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let (api_token, api_token_generated) = token_or_generate(cli.api_token, var(API_TOKEN_ENV));
        let (device_token, device_token_generated) =
            token_or_generate(cli.device_token, var(DEVICE_TOKEN_ENV));

        let lease_timeout = match cli.lease_timeout_secs {
            Some(secs) => Some(positive(LEASE_TIMEOUT_ENV, secs)?),
            None => parse_positive(LEASE_TIMEOUT_ENV, var(LEASE_TIMEOUT_ENV))?,
        }
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LEASE_TIMEOUT);

        let max_retries = match cli.max_retries {
            Some(n) => Some(positive(MAX_RETRIES_ENV, n)?),
            None => parse_positive(MAX_RETRIES_ENV, var(MAX_RETRIES_ENV))?,
        };
        let max_leases_per_device = match cli.max_leases_per_device {
            Some(n) => Some(positive(MAX_LEASES_ENV, n)?),
            None => parse_positive(MAX_LEASES_ENV, var(MAX_LEASES_ENV))?,
        };
        let failure_backoff = match cli.failure_backoff_secs {
            Some(secs) => secs,
            None => parse_number::<u64>(FAILURE_BACKOFF_ENV, var(FAILURE_BACKOFF_ENV))?.unwrap_or(0),
        };
        if failure_backoff > MAX_FAILURE_BACKOFF.as_secs() {
            return Err(ConfigError::Invalid {
                key: FAILURE_BACKOFF_ENV,
                value: failure_backoff.to_string(),
                expected: "at most 604800 seconds",
            });
        }
        let strict_lease_holder = cli.strict_lease_holder
            || parse_flag(STRICT_LEASE_HOLDER_ENV, var(STRICT_LEASE_HOLDER_ENV))?;

        Ok(Self {
            bind_addr,
            tokens: AccessTokens::new(api_token, device_token),
            api_token_generated,
            device_token_generated,
            lease_timeout,
            dispatch: DispatchConfig {
                max_retries,
                max_leases_per_device,
                failure_backoff: Duration::from_secs(failure_backoff),
                strict_lease_holder,
            },
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            tokens: self.tokens.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}

fn token_or_generate(cli: Option<String>, env: Option<String>) -> (String, bool) {
    match cli.or(env).filter(|token| !token.is_empty()) {
        Some(token) => (token, false),
        None => (generate_token(), true),
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected: "a non-negative integer",
        }),
    }
}

fn parse_positive<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default + ToString,
{
    parse_number::<T>(key, value)?
        .map(|n| positive(key, n))
        .transpose()
}

fn positive<T: PartialEq + Default + ToString>(key: &'static str, n: T) -> Result<T, ConfigError> {
    if n == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: n.to_string(),
            expected: "a positive integer",
        });
    }
    Ok(n)
}

fn parse_flag(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            expected: "a boolean",
        }),
    }
}
