// Invariant Framework
//
// Invariants are pure rules that must hold for every metadata snapshot
// the applier produces. A violation rejects the whole commit before
// anything is written.

use crate::metadata::{TableMetadata, MAIN_BRANCH};
use crate::update::TableUpdate;

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    /// `previous` is `None` when the table is being created.
    fn validate(
        &self,
        previous: Option<&TableMetadata>,
        updates: &[TableUpdate],
        next: &TableMetadata,
    ) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine preloaded with the built-in metadata invariants.
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        engine.register(CurrentIdsResolve);
        engine.register(RefsResolve);
        engine.register(SnapshotLogRetained);
        engine.register(MonotonicCounters);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(
        &self,
        previous: Option<&TableMetadata>,
        updates: &[TableUpdate],
        next: &TableMetadata,
    ) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(previous, updates, next) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}

/// Current schema, spec, sort order and snapshot ids name existing entries.
pub struct CurrentIdsResolve;

impl Invariant for CurrentIdsResolve {
    fn name(&self) -> &'static str {
        "current-ids-resolve"
    }

    fn validate(
        &self,
        _previous: Option<&TableMetadata>,
        _updates: &[TableUpdate],
        next: &TableMetadata,
    ) -> InvariantResult {
        if next.current_schema().is_none() {
            return InvariantResult::Fail(format!(
                "current schema {} does not exist",
                next.current_schema_id
            ));
        }
        if next.spec_by_id(next.default_spec_id).is_none() {
            return InvariantResult::Fail(format!(
                "default spec {} does not exist",
                next.default_spec_id
            ));
        }
        if next.sort_order_by_id(next.default_sort_order_id).is_none() {
            return InvariantResult::Fail(format!(
                "default sort order {} does not exist",
                next.default_sort_order_id
            ));
        }
        if let Some(id) = next.current_snapshot_id {
            if next.snapshot_by_id(id).is_none() {
                return InvariantResult::Fail(format!("current snapshot {id} does not exist"));
            }
        }
        let main = next.refs.get(MAIN_BRANCH).map(|r| r.snapshot_id);
        if main != next.current_snapshot_id {
            return InvariantResult::Fail(format!(
                "main branch at {main:?} but current snapshot is {:?}",
                next.current_snapshot_id
            ));
        }
        InvariantResult::Pass
    }
}

/// Every named ref and statistics entry points at a live snapshot.
pub struct RefsResolve;

impl Invariant for RefsResolve {
    fn name(&self) -> &'static str {
        "refs-resolve"
    }

    fn validate(
        &self,
        _previous: Option<&TableMetadata>,
        _updates: &[TableUpdate],
        next: &TableMetadata,
    ) -> InvariantResult {
        for (name, reference) in &next.refs {
            if next.snapshot_by_id(reference.snapshot_id).is_none() {
                return InvariantResult::Fail(format!(
                    "ref {name} points at missing snapshot {}",
                    reference.snapshot_id
                ));
            }
        }
        for stats in &next.statistics {
            if next.snapshot_by_id(stats.snapshot_id).is_none() {
                return InvariantResult::Fail(format!(
                    "statistics attached to missing snapshot {}",
                    stats.snapshot_id
                ));
            }
        }
        InvariantResult::Pass
    }
}

/// Snapshot-log entries survive until their snapshot is expired.
pub struct SnapshotLogRetained;

impl Invariant for SnapshotLogRetained {
    fn name(&self) -> &'static str {
        "snapshot-log-retained"
    }

    fn validate(
        &self,
        previous: Option<&TableMetadata>,
        _updates: &[TableUpdate],
        next: &TableMetadata,
    ) -> InvariantResult {
        for entry in &next.snapshot_log {
            if next.snapshot_by_id(entry.snapshot_id).is_none() {
                return InvariantResult::Fail(format!(
                    "snapshot log references expired snapshot {}",
                    entry.snapshot_id
                ));
            }
        }
        let Some(previous) = previous else {
            return InvariantResult::Pass;
        };
        for entry in &previous.snapshot_log {
            let still_live = next.snapshot_by_id(entry.snapshot_id).is_some();
            if still_live && !next.snapshot_log.contains(entry) {
                return InvariantResult::Fail(format!(
                    "snapshot {} dropped from the log without being expired",
                    entry.snapshot_id
                ));
            }
        }
        InvariantResult::Pass
    }
}

/// Format version, sequence numbers and assigned ids never move backwards.
pub struct MonotonicCounters;

impl Invariant for MonotonicCounters {
    fn name(&self) -> &'static str {
        "monotonic-counters"
    }

    fn validate(
        &self,
        previous: Option<&TableMetadata>,
        _updates: &[TableUpdate],
        next: &TableMetadata,
    ) -> InvariantResult {
        let highest_field = next
            .schemas
            .iter()
            .map(|s| s.highest_field_id())
            .max()
            .unwrap_or(0);
        if next.last_column_id < highest_field {
            return InvariantResult::Fail(format!(
                "last column id {} below highest field id {highest_field}",
                next.last_column_id
            ));
        }

        let Some(previous) = previous else {
            return InvariantResult::Pass;
        };
        if next.format_version < previous.format_version {
            return InvariantResult::Fail("format version moved backwards".into());
        }
        if next.last_sequence_number < previous.last_sequence_number {
            return InvariantResult::Fail("last sequence number moved backwards".into());
        }
        if next.last_column_id < previous.last_column_id
            || next.last_partition_id < previous.last_partition_id
        {
            return InvariantResult::Fail("assigned id counters moved backwards".into());
        }
        InvariantResult::Pass
    }
}
