//! Command line interface for the `wsman-gateway` binary.
//!
//! Shared with `build.rs`, which renders the man page from it.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wsman-gateway` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wsman-gateway",
    version,
    about = "WS-Management protocol processor over an in-process CIM store"
)]
pub struct Cli {
    /// Namespace used when a request names none.
    #[arg(long, default_value = "root/cimv2")]
    pub default_namespace: String,

    /// Namespace holding indication filters, handlers and subscriptions.
    #[arg(long, default_value = "root/PG_InterOp")]
    pub interop_namespace: String,

    /// System name stamped into created filters and handlers.
    #[arg(long, default_value = "localhost")]
    pub system_name: String,

    /// Longest enumeration context lifetime granted, in seconds.
    #[arg(long, default_value_t = 600)]
    pub max_expiration_secs: u64,

    /// Seconds between sweeps of expired enumeration contexts.
    #[arg(long, default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// Envelope size in bytes used when a request negotiates none.
    #[arg(long, default_value_t = 153_600)]
    pub max_envelope_size: u32,

    /// Skip rebuilding the subscription info table at start-up.
    #[arg(long)]
    pub no_warm_up: bool,

    /// Address to serve Prometheus metrics on.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_match_processor_defaults() {
        let cli = Cli::parse_from(["wsman-gateway"]);
        assert_eq!(cli.default_namespace, "root/cimv2");
        assert_eq!(cli.max_envelope_size, 153_600);
        assert!(!cli.no_warm_up);
        assert!(cli.metrics_addr.is_none());
    }

    #[test]
    fn parses_metrics_address() {
        let cli = Cli::parse_from(["wsman-gateway", "--metrics-addr", "127.0.0.1:9000", "--no-warm-up"]);
        assert_eq!(cli.metrics_addr.map(|a| a.port()), Some(9000));
        assert!(cli.no_warm_up);
    }
}
