use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Error};
use metrics_exporter_prometheus::PrometheusBuilder;
use profile_merger::{alert::LogAlerter, config::Config, job::Job};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults()?;

    if let Some(bind) = &config.metrics_bind {
        let addr: SocketAddr = bind.parse().context("Invalid METRICS_BIND")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install metrics exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let job = Job::new(config, Arc::new(LogAlerter));

    let summary = job.run().await?;

    info!(
        profiles = summary.stats.profiles,
        groups = summary.stats.groups,
        discarded = summary.stats.discarded,
        batches_sent = summary.dispatch.batches_sent,
        records_sent = summary.dispatch.records_sent,
        "Done"
    );

    Ok(())
}
