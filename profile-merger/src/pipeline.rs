use std::{collections::HashMap, time::Instant};

use metrics::{counter, histogram};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::{
    batch::{batch_outputs, build_output_records, BatchLimits, OutputBatches},
    error::PipelineError,
    group::group_by_email,
    merge::{build_decision, merge_all},
    metrics_consts::{CANONICAL_SELECTIONS, DISCARDED_PROFILES, DUPLICATE_GROUPS, STAGE_TIME},
    select::{select_all, SelectionRule},
    types::{MergeDecision, Profile},
    verify::verify_complete,
};

/// Summary of one engine run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeStats {
    pub profiles: usize,
    pub groups: usize,
    pub discarded: usize,
    pub selections_by_rule: HashMap<SelectionRule, usize>,
    pub attribute_records: usize,
    pub event_records: usize,
    pub purchase_records: usize,
    pub batches: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub decisions: Vec<MergeDecision>,
    pub batches: OutputBatches,
    pub stats: MergeStats,
}

/// Runs group -> select -> verify -> merge -> batch over a fully loaded profile set.
///
/// Selection and merging fan out over a dedicated rayon pool, one task per group. Each
/// fan-out completes before the next stage starts, so verification always sees every
/// group's selection and nothing is merged if any group is missing one.
pub struct Engine {
    limits: BatchLimits,
    app_id: String,
    pool: ThreadPool,
}

impl Engine {
    /// `worker_threads` of 0 lets rayon size the pool.
    pub fn new(
        limits: BatchLimits,
        app_id: impl Into<String>,
        worker_threads: usize,
    ) -> Result<Self, PipelineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("profile-merger-{i}"))
            .build()?;
        Ok(Self {
            limits,
            app_id: app_id.into(),
            pool,
        })
    }

    pub fn run(&self, profiles: Vec<Profile>) -> Result<MergeOutput, PipelineError> {
        let mut stats = MergeStats {
            profiles: profiles.len(),
            ..Default::default()
        };

        let groups = timed("group", || group_by_email(profiles));
        stats.groups = groups.len();
        counter!(DUPLICATE_GROUPS).increment(groups.len() as u64);

        let selections = timed("select", || self.pool.install(|| select_all(&groups)));
        timed("verify", || verify_complete(&groups, &selections))?;

        for selection in selections.values() {
            *stats.selections_by_rule.entry(selection.rule).or_default() += 1;
            counter!(CANONICAL_SELECTIONS, "rule" => selection.rule.as_str()).increment(1);
        }

        let decisions: Vec<MergeDecision> = groups
            .into_iter()
            .filter_map(|group| {
                let selection = selections.get(&group.email).copied()?;
                Some(build_decision(group, selection))
            })
            .collect();

        let decisions = timed("merge", || self.pool.install(|| merge_all(decisions)))?;
        stats.discarded = decisions.iter().map(|d| d.discarded.len()).sum();
        counter!(DISCARDED_PROFILES).increment(stats.discarded as u64);

        let batches = timed("batch", || {
            let records = build_output_records(&decisions, &self.app_id, &self.limits);
            stats.attribute_records = records.attributes.len();
            stats.event_records = records.events.len();
            stats.purchase_records = records.purchases.len();
            batch_outputs(records, &self.limits)
        });
        stats.batches = batches.batch_count();

        info!(
            profiles = stats.profiles,
            groups = stats.groups,
            discarded = stats.discarded,
            batches = stats.batches,
            "Merged duplicate profiles"
        );

        Ok(MergeOutput {
            decisions,
            batches,
            stats,
        })
    }
}

fn timed<T>(stage: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    histogram!(STAGE_TIME, "stage" => stage).record(start.elapsed().as_secs_f64());
    result
}
