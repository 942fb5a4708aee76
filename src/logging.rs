//! Log setup and compact id formatting.
//!
//! Everything logs through `tracing`. [`init`] installs a stderr subscriber
//! filtered by `RUST_LOG` (default `info`):
//!
//! ```text
//! 2026-10-16T09:12:44.120Z  INFO smsgate::dispatch: dispatch: lease granted message=m-Q2x9fK1 device=d-pixel7a retry_count=0
//! ```
//!
//! Message ids and device ids are truncated with [`msg_id`] / [`device_id`]
//! so log lines stay readable.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const LOG_ID_TRUNCATE_LEN: usize = 7;

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn truncate_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(LOG_ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

/// `d-` plus the first seven characters of a device id.
pub fn device_id(id: &str) -> String {
    format!("d-{}", truncate_id(id))
}

/// `m-` plus the first seven characters of a message id.
pub fn msg_id(id: &str) -> String {
    format!("m-{}", truncate_id(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_truncated_on_char_boundaries() {
        assert_eq!(msg_id("Q2x9fK1abcdef"), "m-Q2x9fK1");
        assert_eq!(device_id("pix"), "d-pix");
        assert_eq!(device_id("télé-phone-9"), "d-télé-ph");
    }

    #[test]
    fn init_can_run_twice() {
        init();
        init();
    }
}
