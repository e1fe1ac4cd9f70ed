use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::{
    batch::{AttributeUpdate, EventUpdate, OutputBatches, PurchaseUpdate},
    error::EmitError,
    metrics_consts::{BATCHES_SENT, BATCH_SEND_FAILURES, RECORDS_SENT},
};

pub mod crm;
pub mod retry;
pub mod throttle;

use throttle::CallThrottle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Attributes,
    Events,
    Purchases,
    Deletions,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Attributes => "attributes",
            RequestKind::Events => "events",
            RequestKind::Purchases => "purchases",
            RequestKind::Deletions => "deletions",
        }
    }

    /// Top-level key the records are sent under.
    pub fn payload_key(&self) -> &'static str {
        match self {
            RequestKind::Attributes => "attributes",
            RequestKind::Events => "events",
            RequestKind::Purchases => "purchases",
            RequestKind::Deletions => "external_ids",
        }
    }
}

/// One batch, ready to be handed to a sink.
#[derive(Debug, Clone, Copy)]
pub enum Request<'a> {
    Attributes(&'a [AttributeUpdate]),
    Events(&'a [EventUpdate]),
    Purchases(&'a [PurchaseUpdate]),
    Deletions(&'a [String]),
}

impl Request<'_> {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Attributes(_) => RequestKind::Attributes,
            Request::Events(_) => RequestKind::Events,
            Request::Purchases(_) => RequestKind::Purchases,
            Request::Deletions(_) => RequestKind::Deletions,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Request::Attributes(r) => r.len(),
            Request::Events(r) => r.len(),
            Request::Purchases(r) => r.len(),
            Request::Deletions(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        let records = match self {
            Request::Attributes(r) => serde_json::to_value(r)?,
            Request::Events(r) => serde_json::to_value(r)?,
            Request::Purchases(r) => serde_json::to_value(r)?,
            Request::Deletions(r) => serde_json::to_value(r)?,
        };
        let mut body = serde_json::Map::new();
        body.insert(self.kind().payload_key().to_string(), records);
        Ok(Value::Object(body))
    }
}

#[async_trait]
pub trait Emitter: Send + Sync {
    async fn send(&self, request: Request<'_>) -> Result<(), EmitError>;
}

pub struct StdoutEmitter;

#[async_trait]
impl Emitter for StdoutEmitter {
    async fn send(&self, request: Request<'_>) -> Result<(), EmitError> {
        println!("{}", serde_json::to_string(&request.payload()?)?);
        Ok(())
    }
}

/// Dry run: nothing leaves the process.
pub struct NoOpEmitter;

#[async_trait]
impl Emitter for NoOpEmitter {
    async fn send(&self, _request: Request<'_>) -> Result<(), EmitError> {
        Ok(())
    }
}

/// Appends every request to a JSON-lines file as `{"kind": ..., "payload": ...}`.
pub struct FileEmitter {
    pub path: String,
}

impl FileEmitter {
    pub async fn new(path: String, cleanup: bool) -> Result<Self, EmitError> {
        info!("Creating file emitter at {}", path);
        if cleanup {
            tokio::fs::remove_file(&path).await.ok();
        }
        Ok(Self { path })
    }
}

#[async_trait]
impl Emitter for FileEmitter {
    async fn send(&self, request: Request<'_>) -> Result<(), EmitError> {
        let line = serde_json::json!({
            "kind": request.kind().as_str(),
            "payload": request.payload()?,
        });
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches_sent: usize,
    pub records_sent: usize,
}

/// Sends batches one at a time, in a fixed order: attribute updates, events, purchases,
/// and deletions last so that nothing is deleted before its data has been merged.
///
/// Sends are not transactional. If a batch fails, everything sent before it stays sent and
/// the error is returned.
pub struct Dispatcher {
    emitter: Box<dyn Emitter>,
    throttle: CallThrottle,
}

impl Dispatcher {
    pub fn new(emitter: Box<dyn Emitter>, throttle: CallThrottle) -> Self {
        Self { emitter, throttle }
    }

    pub async fn dispatch(&mut self, batches: &OutputBatches) -> Result<DispatchSummary, EmitError> {
        let requests = batches
            .attributes
            .iter()
            .map(|b| Request::Attributes(b))
            .chain(batches.events.iter().map(|b| Request::Events(b)))
            .chain(batches.purchases.iter().map(|b| Request::Purchases(b)))
            .chain(batches.deletions.iter().map(|b| Request::Deletions(b)));

        let mut summary = DispatchSummary::default();
        for request in requests {
            self.throttle.acquire().await;

            let kind = request.kind().as_str();
            if let Err(e) = self.emitter.send(request).await {
                counter!(BATCH_SEND_FAILURES, "kind" => kind).increment(1);
                error!(
                    "Failed to send {} batch after {} successful batches: {:#}",
                    kind, summary.batches_sent, e
                );
                return Err(e);
            }

            counter!(BATCHES_SENT, "kind" => kind).increment(1);
            counter!(RECORDS_SENT, "kind" => kind).increment(request.len() as u64);
            summary.batches_sent += 1;
            summary.records_sent += request.len();
        }

        info!(
            "Sent {} batches ({} records)",
            summary.batches_sent, summary.records_sent
        );
        Ok(summary)
    }
}
