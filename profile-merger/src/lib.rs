//! Duplicate CRM profile resolution.
//!
//! Profiles sharing an email are grouped, one canonical profile is picked per group, and
//! the attributes, events, purchases and revenue of the other profiles are folded into it.
//! The result is split into size-bounded batches of attribute updates, event updates,
//! purchase updates and deletions for the CRM's bulk endpoints.

pub mod alert;
pub mod batch;
pub mod config;
pub mod emit;
pub mod error;
pub mod group;
pub mod identity;
pub mod job;
pub mod merge;
pub mod metrics_consts;
pub mod pipeline;
pub mod select;
pub mod source;
pub mod types;
pub mod verify;

pub use batch::{BatchLimits, OutputBatches};
pub use error::{EmitError, EventMergeError, IncompleteSelectionError, PipelineError};
pub use pipeline::{Engine, MergeOutput, MergeStats};
pub use select::SelectionRule;
pub use types::{CanonicalRecord, CustomEvent, DuplicateGroup, MergeDecision, Profile};
