// Update Applier
//
// Folds an ordered batch of table updates into a new metadata snapshot
// and enforces invariants on the result. Either every update applies
// or the batch is rejected and the base is left as it was.

use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::metadata::TableMetadata;
use crate::update::TableUpdate;

pub mod builder;

pub use builder::{MetadataBuilder, DEFAULT_FORMAT_VERSION};

/// Errors that can occur while applying updates.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("update #{index} ({action}) rejected: {reason}")]
    InvalidUpdate {
        index: usize,
        action: &'static str,
        reason: String,
    },

    #[error("new table metadata is incomplete: {0}")]
    Incomplete(String),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

pub struct UpdateApplier {
    invariants: InvariantEngine,
}

impl Default for UpdateApplier {
    fn default() -> Self {
        Self::new(InvariantEngine::with_defaults())
    }
}

impl UpdateApplier {
    pub fn new(invariants: InvariantEngine) -> Self {
        Self { invariants }
    }

    /// Apply `updates` on top of `base`, stamping `now_ms` if anything changed.
    pub fn apply(
        &self,
        base: &TableMetadata,
        updates: &[TableUpdate],
        now_ms: i64,
    ) -> Result<TableMetadata, ApplyError> {
        let mut builder = MetadataBuilder::from_base(base, now_ms);
        for update in updates {
            builder.apply(update)?;
        }
        let next = builder.build()?;

        self.invariants.evaluate(Some(base), updates, &next)?;
        Ok(next)
    }

    /// Build the first metadata snapshot of a table from a create batch.
    pub fn create(&self, updates: &[TableUpdate], now_ms: i64) -> Result<TableMetadata, ApplyError> {
        let mut builder = MetadataBuilder::new_table(now_ms);
        for update in updates {
            builder.apply(update)?;
        }
        let next = builder.build()?;

        self.invariants.evaluate(None, updates, &next)?;
        Ok(next)
    }
}

/// Apply with the default invariants and the wall clock. Without a base
/// the updates create a table.
pub fn apply_updates(
    base: Option<&TableMetadata>,
    updates: &[TableUpdate],
) -> Result<TableMetadata, ApplyError> {
    let applier = UpdateApplier::default();
    let now_ms = chrono::Utc::now().timestamp_millis();
    match base {
        Some(base) => applier.apply(base, updates, now_ms),
        None => applier.create(updates, now_ms),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::{
        NestedField, Operation, PartitionField, PartitionSpec, PrimitiveType, Schema, Snapshot,
        SnapshotRef, SortDirection, SortField, SortOrder, StatisticsFile, Summary, Transform,
        NullOrder, MAIN_BRANCH,
    };
    use crate::update::LAST_ADDED;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    pub(crate) fn create_updates(location: &str) -> Vec<TableUpdate> {
        vec![
            TableUpdate::AssignUuid {
                uuid: Uuid::new_v4(),
            },
            TableUpdate::UpgradeFormatVersion { format_version: 2 },
            TableUpdate::AddSchema {
                schema: Schema::new(
                    0,
                    vec![
                        NestedField::optional(1, "col1", PrimitiveType::Int),
                        NestedField::optional(2, "col2", PrimitiveType::String),
                    ],
                ),
                last_column_id: Some(2),
            },
            TableUpdate::SetCurrentSchema {
                schema_id: LAST_ADDED,
            },
            TableUpdate::SetLocation {
                location: location.to_string(),
            },
        ]
    }

    pub(crate) fn new_table() -> TableMetadata {
        UpdateApplier::default()
            .create(&create_updates("s3://bucket/wh/db1/schema/t"), 1_000)
            .unwrap()
    }

    fn snapshot(id: i64, parent: Option<i64>, sequence: i64) -> Snapshot {
        Snapshot {
            snapshot_id: id,
            parent_snapshot_id: parent,
            sequence_number: sequence,
            timestamp_ms: 2_000 + id,
            manifest_list: format!("s3://bucket/wh/db1/schema/t/metadata/snap-{id}.json"),
            summary: Summary::new(Operation::Append),
            schema_id: Some(0),
        }
    }

    fn commit_snapshot(base: &TableMetadata, snap: Snapshot) -> TableMetadata {
        let id = snap.snapshot_id;
        UpdateApplier::default()
            .apply(
                base,
                &[
                    TableUpdate::AddSnapshot { snapshot: snap },
                    TableUpdate::set_ref(MAIN_BRANCH, &SnapshotRef::branch(id)),
                ],
                3_000,
            )
            .unwrap()
    }

    #[test]
    fn create_fills_in_defaults() {
        let table = new_table();
        assert_eq!(table.format_version, 2);
        assert_eq!(table.current_schema_id, 0);
        assert_eq!(table.default_spec_id, 0);
        assert!(table.spec_by_id(0).unwrap().fields.is_empty());
        assert_eq!(table.default_sort_order_id, 0);
        assert_eq!(table.last_partition_id, 999);
        assert_eq!(table.last_column_id, 2);
        assert_eq!(table.last_updated_ms, 1_000);
        assert!(table.current_snapshot_id.is_none());
    }

    #[test]
    fn create_without_location_is_incomplete() {
        let mut updates = create_updates("s3://b/t");
        updates.pop();
        let err = UpdateApplier::default().create(&updates, 1).unwrap_err();
        assert!(matches!(err, ApplyError::Incomplete(_)));
    }

    #[test]
    fn apply_leaves_base_untouched() {
        let base = new_table();
        let copy = base.clone();
        let next = UpdateApplier::default()
            .apply(
                &base,
                &[TableUpdate::SetProperties {
                    updates: BTreeMap::from([("owner".to_string(), "snowman".to_string())]),
                }],
                5_000,
            )
            .unwrap();

        assert_eq!(base, copy);
        assert_eq!(next.properties["owner"], "snowman");
        assert_eq!(next.last_updated_ms, 5_000);
    }

    #[test]
    fn noop_batch_keeps_timestamp() {
        let base = new_table();
        let next = UpdateApplier::default()
            .apply(
                &base,
                &[TableUpdate::RemoveProperties {
                    removals: vec!["missing".into()],
                }],
                9_000,
            )
            .unwrap();
        assert_eq!(next, base);
    }

    #[test]
    fn uuid_cannot_be_reassigned() {
        let base = new_table();
        let err = UpdateApplier::default()
            .apply(
                &base,
                &[TableUpdate::AssignUuid {
                    uuid: Uuid::new_v4(),
                }],
                5,
            )
            .unwrap_err();
        match err {
            ApplyError::InvalidUpdate { index, action, .. } => {
                assert_eq!(index, 0);
                assert_eq!(action, "assign-uuid");
            }
            other => panic!("unexpected error: {other}"),
        }

        let same = UpdateApplier::default().apply(
            &base,
            &[TableUpdate::AssignUuid {
                uuid: base.table_uuid,
            }],
            5,
        );
        assert!(same.is_ok());
    }

    #[test]
    fn format_version_cannot_go_down() {
        let base = new_table();
        let err = UpdateApplier::default()
            .apply(&base, &[TableUpdate::UpgradeFormatVersion { format_version: 1 }], 5)
            .unwrap_err();
        assert!(err.to_string().contains("downgrade"));

        let err = UpdateApplier::default()
            .apply(&base, &[TableUpdate::UpgradeFormatVersion { format_version: 3 }], 5)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn evolving_schema_assigns_next_id_and_reuses_identical() {
        let base = new_table();
        let wider = Schema::new(
            7,
            vec![
                NestedField::optional(1, "col1", PrimitiveType::Int),
                NestedField::optional(2, "col2", PrimitiveType::String),
                NestedField::optional(3, "col3", PrimitiveType::Double),
            ],
        );
        let next = UpdateApplier::default()
            .apply(
                &base,
                &[
                    TableUpdate::AddSchema {
                        schema: wider.clone(),
                        last_column_id: None,
                    },
                    TableUpdate::SetCurrentSchema {
                        schema_id: LAST_ADDED,
                    },
                ],
                5,
            )
            .unwrap();
        assert_eq!(next.current_schema_id, 1);
        assert_eq!(next.last_column_id, 3);

        let again = UpdateApplier::default()
            .apply(
                &next,
                &[TableUpdate::AddSchema {
                    schema: wider,
                    last_column_id: None,
                }],
                6,
            )
            .unwrap();
        assert_eq!(again.schemas.len(), 2);
    }

    #[test]
    fn last_added_without_add_is_rejected() {
        let base = new_table();
        let err = UpdateApplier::default()
            .apply(
                &base,
                &[TableUpdate::SetDefaultSpec {
                    spec_id: LAST_ADDED,
                }],
                5,
            )
            .unwrap_err();
        assert!(err.to_string().contains("no partition spec was added"));
    }

    #[test]
    fn spec_and_sort_order_evolution() {
        let base = new_table();
        let spec = PartitionSpec {
            spec_id: 0,
            fields: vec![PartitionField {
                source_id: 1,
                field_id: 1000,
                name: "col1_bucket".into(),
                transform: Transform::Bucket(16),
            }],
        };
        let order = SortOrder {
            order_id: 0,
            fields: vec![SortField {
                source_id: 2,
                transform: Transform::Identity,
                direction: SortDirection::Asc,
                null_order: NullOrder::NullsFirst,
            }],
        };
        let next = UpdateApplier::default()
            .apply(
                &base,
                &[
                    TableUpdate::AddSpec { spec },
                    TableUpdate::SetDefaultSpec {
                        spec_id: LAST_ADDED,
                    },
                    TableUpdate::AddSortOrder { sort_order: order },
                    TableUpdate::SetDefaultSortOrder {
                        sort_order_id: LAST_ADDED,
                    },
                ],
                5,
            )
            .unwrap();

        assert_eq!(next.default_spec_id, 1);
        assert_eq!(next.last_partition_id, 1000);
        assert_eq!(next.default_sort_order_id, 1);
    }

    #[test]
    fn spec_on_unknown_column_is_rejected() {
        let base = new_table();
        let spec = PartitionSpec {
            spec_id: 0,
            fields: vec![PartitionField {
                source_id: 42,
                field_id: 1000,
                name: "ghost".into(),
                transform: Transform::Identity,
            }],
        };
        assert!(UpdateApplier::default()
            .apply(&base, &[TableUpdate::AddSpec { spec }], 5)
            .is_err());
    }

    #[test]
    fn main_ref_moves_current_snapshot_and_log() {
        let base = new_table();
        let one = commit_snapshot(&base, snapshot(1, None, 1));
        let two = commit_snapshot(&one, snapshot(2, Some(1), 2));

        assert_eq!(two.current_snapshot_id, Some(2));
        assert_eq!(two.last_sequence_number, 2);
        assert_eq!(
            two.snapshot_log.iter().map(|e| e.snapshot_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(two.snapshot_log[1].timestamp_ms, 2_002);
    }

    #[test]
    fn stale_sequence_number_is_rejected() {
        let base = new_table();
        let one = commit_snapshot(&base, snapshot(1, None, 1));
        let err = UpdateApplier::default()
            .apply(
                &one,
                &[TableUpdate::AddSnapshot {
                    snapshot: snapshot(2, Some(1), 1),
                }],
                5,
            )
            .unwrap_err();
        assert!(err.to_string().contains("sequence number"));
    }

    #[test]
    fn duplicate_snapshot_is_rejected() {
        let base = new_table();
        let one = commit_snapshot(&base, snapshot(1, None, 1));
        assert!(UpdateApplier::default()
            .apply(
                &one,
                &[TableUpdate::AddSnapshot {
                    snapshot: snapshot(1, None, 2),
                }],
                5,
            )
            .is_err());
    }

    #[test]
    fn removing_current_snapshot_clears_main() {
        let base = new_table();
        let one = commit_snapshot(&base, snapshot(1, None, 1));
        let with_stats = UpdateApplier::default()
            .apply(
                &one,
                &[TableUpdate::SetStatistics {
                    snapshot_id: 1,
                    statistics: StatisticsFile {
                        snapshot_id: 1,
                        statistics_path: "s3://bucket/wh/db1/schema/t/metadata/1.stats".into(),
                        file_size_in_bytes: 10,
                        file_footer_size_in_bytes: 2,
                        blob_metadata: vec![],
                    },
                }],
                5,
            )
            .unwrap();
        assert!(with_stats.statistics_for(1).is_some());

        let next = UpdateApplier::default()
            .apply(
                &with_stats,
                &[TableUpdate::RemoveSnapshots {
                    snapshot_ids: vec![1],
                }],
                6,
            )
            .unwrap();
        assert!(next.current_snapshot_id.is_none());
        assert!(next.refs.is_empty());
        assert!(next.snapshot_log.is_empty());
        assert!(next.statistics.is_empty());
    }

    #[test]
    fn statistics_for_other_snapshot_is_rejected() {
        let base = new_table();
        let one = commit_snapshot(&base, snapshot(1, None, 1));
        let err = UpdateApplier::default()
            .apply(
                &one,
                &[TableUpdate::SetStatistics {
                    snapshot_id: 1,
                    statistics: StatisticsFile {
                        snapshot_id: 2,
                        statistics_path: "x".into(),
                        file_size_in_bytes: 1,
                        file_footer_size_in_bytes: 1,
                        blob_metadata: vec![],
                    },
                }],
                5,
            )
            .unwrap_err();
        assert!(matches!(err, ApplyError::InvalidUpdate { .. }));
    }

    #[test]
    fn ref_to_missing_snapshot_is_rejected() {
        let base = new_table();
        let err = UpdateApplier::default()
            .apply(
                &base,
                &[TableUpdate::set_ref("audit", &SnapshotRef::branch(77))],
                5,
            )
            .unwrap_err();
        assert!(err.to_string().contains("unknown snapshot 77"));
    }

    #[test]
    fn set_location_strips_trailing_slash() {
        let base = new_table();
        let next = UpdateApplier::default()
            .apply(
                &base,
                &[TableUpdate::SetLocation {
                    location: "s3://bucket/elsewhere/".into(),
                }],
                5,
            )
            .unwrap();
        assert_eq!(next.location, "s3://bucket/elsewhere");
    }

    #[test]
    fn wall_clock_helper_creates_then_applies() {
        let created = apply_updates(None, &create_updates("s3://bucket/wh/t")).unwrap();
        let next = apply_updates(
            Some(&created),
            &[TableUpdate::SetProperties {
                updates: BTreeMap::from([("k".to_string(), "v".to_string())]),
            }],
        )
        .unwrap();
        assert_eq!(next.table_uuid, created.table_uuid);
        assert_eq!(next.properties["k"], "v");
    }
}
