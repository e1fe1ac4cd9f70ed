use std::sync::Arc;

use anyhow::{Context, Error};
use metrics::counter;
use tracing::{info, warn};

use crate::{
    alert::Alerter,
    config::{Config, SinkKind},
    emit::{
        crm::{CrmEmitter, RETRY_POLICY},
        retry::RetryPolicy,
        throttle::CallThrottle,
        DispatchSummary, Dispatcher, Emitter, FileEmitter, NoOpEmitter, StdoutEmitter,
    },
    identity::InMemoryIdentitySource,
    metrics_consts::{PROFILES_READ, RUN_FAILURES},
    pipeline::{Engine, MergeStats},
    source::ProfileSource,
};

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: MergeStats,
    pub dispatch: DispatchSummary,
}

/// One deduplication run: load the export, merge, then hand the batches to the sink.
pub struct Job {
    config: Config,
    alerter: Arc<dyn Alerter>,
}

impl Job {
    pub fn new(config: Config, alerter: Arc<dyn Alerter>) -> Self {
        Self { config, alerter }
    }

    pub async fn run(&self) -> Result<RunSummary, Error> {
        match self.run_inner().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                counter!(RUN_FAILURES).increment(1);
                self.alerter
                    .alert("Duplicate profile merge failed", &format!("{e:#}"));
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<RunSummary, Error> {
        let identities = match &self.config.identity_path {
            Some(path) => InMemoryIdentitySource::from_file(path)
                .await
                .context("Failed to load identity source")?,
            None => {
                warn!("No identity source configured, no profile will count as matched");
                InMemoryIdentitySource::default()
            }
        };
        info!("Loaded {} known identities", identities.len());

        let profiles = ProfileSource::new(&self.config.input_path)
            .read_all(&identities)
            .await
            .context("Failed to read profile export")?;
        counter!(PROFILES_READ).increment(profiles.len() as u64);

        let engine = Engine::new(
            self.config.batch_limits(),
            self.config.crm_app_id.clone(),
            self.config.worker_threads,
        )?;
        // The engine is CPU bound and blocks on its own rayon pool
        let output = tokio::task::spawn_blocking(move || engine.run(profiles))
            .await
            .context("Merge task panicked")??;

        for (rule, count) in &output.stats.selections_by_rule {
            info!("{} canonical profiles selected by {}", count, rule.as_str());
        }

        let emitter = build_emitter(&self.config).await?;
        let throttle = CallThrottle::new(
            self.config.rate_limit_calls,
            self.config.rate_limit_window(),
            self.config.rate_limit_cooldown(),
        );
        let dispatch = Dispatcher::new(emitter, throttle)
            .dispatch(&output.batches)
            .await
            .context("Failed to send merge batches; batches already sent were not rolled back")?;

        Ok(RunSummary {
            stats: output.stats,
            dispatch,
        })
    }
}

pub async fn build_emitter(config: &Config) -> Result<Box<dyn Emitter>, Error> {
    match config.sink {
        SinkKind::Stdout => Ok(Box::new(StdoutEmitter)),
        SinkKind::NoOp => Ok(Box::new(NoOpEmitter)),
        SinkKind::File => Ok(Box::new(
            FileEmitter::new(config.output_path.clone(), config.output_cleanup).await?,
        )),
        SinkKind::Crm => {
            if config.crm_api_key.is_empty() {
                return Err(Error::msg("CRM_API_KEY must be set to use the crm sink"));
            }
            let retry_policy = RetryPolicy {
                max_retries: config.crm_max_retries,
                ..RETRY_POLICY
            };
            Ok(Box::new(
                CrmEmitter::new(
                    config.crm_base_url.clone(),
                    config.crm_api_key.clone(),
                    config.crm_timeout(),
                )?
                .with_retry_policy(retry_policy),
            ))
        }
    }
}
