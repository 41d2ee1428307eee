// Table Updates
//
// The closed set of metadata changes a commit may carry. Each variant
// holds only the fields its operation needs; JSON dispatches on the
// `action` tag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::metadata::{
    PartitionSpec, Schema, Snapshot, SnapshotRef, SnapshotRefType, SortOrder, StatisticsFile,
};

pub mod requirement;

pub use requirement::{RequirementError, TableRequirement};

/// Id placeholder meaning "the last one added earlier in this batch".
pub const LAST_ADDED: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TableUpdate {
    AssignUuid {
        uuid: Uuid,
    },
    #[serde(rename_all = "kebab-case")]
    UpgradeFormatVersion {
        format_version: u8,
    },
    #[serde(rename_all = "kebab-case")]
    AddSchema {
        schema: Schema,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_column_id: Option<i32>,
    },
    #[serde(rename_all = "kebab-case")]
    SetCurrentSchema {
        schema_id: i32,
    },
    AddSpec {
        spec: PartitionSpec,
    },
    #[serde(rename_all = "kebab-case")]
    SetDefaultSpec {
        spec_id: i32,
    },
    #[serde(rename_all = "kebab-case")]
    AddSortOrder {
        sort_order: SortOrder,
    },
    #[serde(rename_all = "kebab-case")]
    SetDefaultSortOrder {
        sort_order_id: i32,
    },
    AddSnapshot {
        snapshot: Snapshot,
    },
    #[serde(rename_all = "kebab-case")]
    SetSnapshotRef {
        ref_name: String,
        snapshot_id: i64,
        #[serde(rename = "type")]
        ref_type: SnapshotRefType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_snapshots_to_keep: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_snapshot_age_ms: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_ref_age_ms: Option<i64>,
    },
    #[serde(rename_all = "kebab-case")]
    RemoveSnapshots {
        snapshot_ids: Vec<i64>,
    },
    #[serde(rename_all = "kebab-case")]
    RemoveSnapshotRef {
        ref_name: String,
    },
    SetLocation {
        location: String,
    },
    SetProperties {
        updates: BTreeMap<String, String>,
    },
    RemoveProperties {
        removals: Vec<String>,
    },
    #[serde(rename_all = "kebab-case")]
    SetStatistics {
        snapshot_id: i64,
        statistics: StatisticsFile,
    },
    #[serde(rename_all = "kebab-case")]
    RemoveStatistics {
        snapshot_id: i64,
    },
}

impl TableUpdate {
    /// Point a branch or tag at a snapshot.
    pub fn set_ref(ref_name: impl Into<String>, reference: &SnapshotRef) -> Self {
        TableUpdate::SetSnapshotRef {
            ref_name: ref_name.into(),
            snapshot_id: reference.snapshot_id,
            ref_type: reference.ref_type,
            min_snapshots_to_keep: reference.min_snapshots_to_keep,
            max_snapshot_age_ms: reference.max_snapshot_age_ms,
            max_ref_age_ms: reference.max_ref_age_ms,
        }
    }

    /// The `action` tag, used in logs and error messages.
    pub fn action(&self) -> &'static str {
        match self {
            TableUpdate::AssignUuid { .. } => "assign-uuid",
            TableUpdate::UpgradeFormatVersion { .. } => "upgrade-format-version",
            TableUpdate::AddSchema { .. } => "add-schema",
            TableUpdate::SetCurrentSchema { .. } => "set-current-schema",
            TableUpdate::AddSpec { .. } => "add-spec",
            TableUpdate::SetDefaultSpec { .. } => "set-default-spec",
            TableUpdate::AddSortOrder { .. } => "add-sort-order",
            TableUpdate::SetDefaultSortOrder { .. } => "set-default-sort-order",
            TableUpdate::AddSnapshot { .. } => "add-snapshot",
            TableUpdate::SetSnapshotRef { .. } => "set-snapshot-ref",
            TableUpdate::RemoveSnapshots { .. } => "remove-snapshots",
            TableUpdate::RemoveSnapshotRef { .. } => "remove-snapshot-ref",
            TableUpdate::SetLocation { .. } => "set-location",
            TableUpdate::SetProperties { .. } => "set-properties",
            TableUpdate::RemoveProperties { .. } => "remove-properties",
            TableUpdate::SetStatistics { .. } => "set-statistics",
            TableUpdate::RemoveStatistics { .. } => "remove-statistics",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_dispatch_on_action_tag() {
        let json = r#"[
          { "action": "upgrade-format-version", "format-version": 2 },
          { "action": "set-current-schema", "schema-id": -1 },
          { "action": "set-properties", "updates": { "owner": "snowman" } },
          { "action": "remove-properties", "removals": ["comment"] },
          { "action": "set-snapshot-ref", "ref-name": "main", "snapshot-id": 5, "type": "branch" },
          { "action": "remove-snapshots", "snapshot-ids": [1, 2] }
        ]"#;

        let updates: Vec<TableUpdate> = serde_json::from_str(json).unwrap();
        let actions: Vec<_> = updates.iter().map(|u| u.action()).collect();
        assert_eq!(
            actions,
            vec![
                "upgrade-format-version",
                "set-current-schema",
                "set-properties",
                "remove-properties",
                "set-snapshot-ref",
                "remove-snapshots",
            ]
        );
        assert_eq!(updates[1], TableUpdate::SetCurrentSchema { schema_id: LAST_ADDED });
    }

    #[test]
    fn unknown_action_is_rejected() {
        let json = r#"{ "action": "drop-everything" }"#;
        assert!(serde_json::from_str::<TableUpdate>(json).is_err());
    }

    #[test]
    fn serialized_action_matches_tag() {
        let update = TableUpdate::set_ref("main", &SnapshotRef::branch(9));
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["action"], update.action());
        assert_eq!(value["ref-name"], "main");
        assert_eq!(value["type"], "branch");
    }
}
