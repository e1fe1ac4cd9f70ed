// ==== Engine ====
/// Counter for profiles read from the export
pub const PROFILES_READ: &str = "profile_merger_profiles_read_total";

/// Counter for duplicate email groups found
pub const DUPLICATE_GROUPS: &str = "profile_merger_duplicate_groups_total";

/// Counter for discarded profiles queued for deletion
pub const DISCARDED_PROFILES: &str = "profile_merger_discarded_profiles_total";

/// Counter for canonical selections, labelled by the rule that made them
pub const CANONICAL_SELECTIONS: &str = "profile_merger_canonical_selections_total";

/// Histogram for time spent in each engine stage, labelled by stage
pub const STAGE_TIME: &str = "profile_merger_stage_seconds";

// ==== Emission ====
/// Counter for batches successfully sent, labelled by kind
pub const BATCHES_SENT: &str = "profile_merger_batches_sent_total";

/// Counter for records successfully sent, labelled by kind
pub const RECORDS_SENT: &str = "profile_merger_records_sent_total";

/// Counter for batches that failed to send, labelled by kind
pub const BATCH_SEND_FAILURES: &str = "profile_merger_batch_send_failures_total";

/// Counter for fatal run failures
pub const RUN_FAILURES: &str = "profile_merger_run_failures_total";
