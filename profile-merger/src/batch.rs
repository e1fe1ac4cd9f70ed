use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::types::MergeDecision;

pub const DEFAULT_FIELD_BUDGET: usize = 75;
pub const DEFAULT_DELETION_CHUNK_SIZE: usize = 50;
pub const DEFAULT_MAX_EVENT_COUNT: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum summed field count of the records in one attribute/event/purchase batch.
    pub field_budget: usize,
    /// Number of external ids per deletion request.
    pub deletion_chunk_size: usize,
    /// Most discrete event records a single merged event expands into.
    pub max_event_count: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            field_budget: DEFAULT_FIELD_BUDGET,
            deletion_chunk_size: DEFAULT_DELETION_CHUNK_SIZE,
            max_event_count: DEFAULT_MAX_EVENT_COUNT,
        }
    }
}

/// Number of top-level keys a record contributes to a request.
pub trait FieldCount {
    fn field_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub external_id: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub total_revenue: Option<Decimal>,
}

impl FieldCount for AttributeUpdate {
    fn field_count(&self) -> usize {
        1 + self.attributes.len() + usize::from(self.total_revenue.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProperties {
    pub last: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUpdate {
    pub external_id: String,
    pub name: String,
    pub time: String,
    pub properties: EventProperties,
}

impl FieldCount for EventUpdate {
    fn field_count(&self) -> usize {
        4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseUpdate {
    pub external_id: String,
    pub product_id: String,
    pub app_id: String,
    pub price: f64,
    pub currency: String,
    pub time: String,
    pub properties: EventProperties,
}

impl FieldCount for PurchaseUpdate {
    fn field_count(&self) -> usize {
        7
    }
}

pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Flattened, unbatched output of a merge run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputRecords {
    pub attributes: Vec<AttributeUpdate>,
    pub events: Vec<EventUpdate>,
    pub purchases: Vec<PurchaseUpdate>,
    pub deletions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputBatches {
    pub attributes: Vec<Vec<AttributeUpdate>>,
    pub events: Vec<Vec<EventUpdate>>,
    pub purchases: Vec<Vec<PurchaseUpdate>>,
    pub deletions: Vec<Vec<String>>,
}

impl OutputBatches {
    pub fn batch_count(&self) -> usize {
        self.attributes.len() + self.events.len() + self.purchases.len() + self.deletions.len()
    }
}

/// Turns finalized decisions into the four downstream record streams.
pub fn build_output_records(
    decisions: &[MergeDecision],
    app_id: &str,
    limits: &BatchLimits,
) -> OutputRecords {
    let mut out = OutputRecords::default();

    for decision in decisions {
        let canonical = &decision.canonical;
        let external_id = canonical.external_id();
        let has_revenue = canonical.new_total_revenue > Decimal::ZERO;

        if !canonical.new_custom_attributes.is_empty() || has_revenue {
            out.attributes.push(AttributeUpdate {
                external_id: external_id.to_string(),
                attributes: canonical.new_custom_attributes.clone(),
                total_revenue: has_revenue.then_some(canonical.new_total_revenue),
            });
        }

        // Counted events go out as one discrete event per occurrence
        for event in canonical.new_custom_events.values() {
            let record = EventUpdate {
                external_id: external_id.to_string(),
                name: event.name.clone(),
                time: iso8601(&event.time),
                properties: EventProperties {
                    last: iso8601(&event.last),
                    count: event.count,
                },
            };
            let occurrences = expansion_count(event.count, limits.max_event_count);
            if occurrences < event.count {
                warn!(
                    "event {} on {} has count {}, only sending {}",
                    event.name, external_id, event.count, occurrences
                );
            }
            for _ in 0..occurrences {
                out.events.push(record.clone());
            }
        }

        out.purchases
            .extend(canonical.new_purchases.iter().map(|p| PurchaseUpdate {
                external_id: external_id.to_string(),
                product_id: p.product_id.clone(),
                app_id: app_id.to_string(),
                price: p.price,
                currency: p.currency.clone(),
                time: iso8601(&p.time),
                properties: EventProperties {
                    last: iso8601(&p.last),
                    count: p.count,
                },
            }));

        out.deletions
            .extend(decision.discarded_ids().map(str::to_string));
    }

    out
}

/// How many discrete records a merged event with `count` expands into. A cap of zero is
/// treated as one.
pub fn expansion_count(count: u64, max_event_count: u64) -> u64 {
    count.min(max_event_count.max(1))
}

/// Packs records into batches whose summed field count stays within `budget`. Records are
/// never split; a record that alone meets or exceeds the budget gets a batch to itself.
pub fn pack_by_field_budget<T: FieldCount>(records: Vec<T>, budget: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_fields = 0;

    for record in records {
        let fields = record.field_count();

        if fields >= budget {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_fields = 0;
            }
            batches.push(vec![record]);
            continue;
        }

        if current_fields + fields > budget {
            batches.push(std::mem::take(&mut current));
            current_fields = 0;
        }
        current_fields += fields;
        current.push(record);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Fixed-size chunking for deletion requests. A chunk size of zero is treated as one.
pub fn chunk_deletions(ids: Vec<String>, chunk_size: usize) -> Vec<Vec<String>> {
    ids.chunks(chunk_size.max(1)).map(<[String]>::to_vec).collect()
}

pub fn batch_outputs(records: OutputRecords, limits: &BatchLimits) -> OutputBatches {
    OutputBatches {
        attributes: pack_by_field_budget(records.attributes, limits.field_budget),
        events: pack_by_field_budget(records.events, limits.field_budget),
        purchases: pack_by_field_budget(records.purchases, limits.field_budget),
        deletions: chunk_deletions(records.deletions, limits.deletion_chunk_size),
    }
}
