//! `wsman-gateway` daemon.
//!
//! Runs a processor over the in-process [`MemoryBackend`] until Ctrl+C.
//! Decoded requests are fed in by an embedding transport; encoded
//! responses are logged.

mod cli;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use tracing::{debug, info};
use wsman_gateway::{
    backend::MemoryBackend,
    config::ProcessorConfig,
    processor::Processor,
    schema::Schema,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }

    let config = ProcessorConfig::default()
        .default_namespace(cli.default_namespace)
        .interop_namespace(cli.interop_namespace)
        .system_name(cli.system_name)
        .max_expiration(Duration::from_secs(cli.max_expiration_secs))
        .sweep_interval(Duration::from_secs(cli.sweep_interval_secs))
        .default_max_envelope_size(cli.max_envelope_size)
        .warm_up_subscriptions(!cli.no_warm_up);
    let schema = Arc::new(Schema::indication_classes());
    let backend = Arc::new(MemoryBackend::new(Arc::clone(&schema)));
    let (processor, handle, mut responses) = Processor::builder(backend)
        .config(config)
        .schema(schema)
        .build();

    let running = tokio::spawn(processor.run());
    let logger = tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            debug!(
                relates_to = %response.relates_to,
                bytes = response.payload.len(),
                "response ready"
            );
        }
    });
    info!("wsman-gateway running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    running.await?;
    logger.await?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "serving Prometheus metrics");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::warn!(%addr, "built without the metrics feature; ignoring --metrics-addr");
    Ok(())
}
