// Table Metadata
//
// Immutable, versioned metadata snapshots in the Iceberg JSON layout.
// A new snapshot is only ever produced by the update applier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub mod partition;
pub mod schema;
pub mod snapshot;
pub mod view;

pub use partition::{
    NullOrder, PartitionField, PartitionSpec, SortDirection, SortField, SortOrder, Transform,
};
pub use schema::{NestedField, PrimitiveType, Schema};
pub use snapshot::{
    BlobMetadata, MetadataLogEntry, Operation, Snapshot, SnapshotLogEntry, SnapshotRef,
    SnapshotRefType, StatisticsFile, Summary, MAIN_BRANCH,
};
pub use view::{ViewHistoryEntry, ViewMetadata, ViewRepresentation, ViewVersion};

/// Highest table format version the applier understands.
pub const MAX_FORMAT_VERSION: u8 = 2;

/// Property capping the number of entries kept in `metadata-log`.
pub const PROPERTY_PREVIOUS_VERSIONS_MAX: &str = "write.metadata.previous-versions-max";

pub const DATA_DIR: &str = "data";
pub const METADATA_DIR: &str = "metadata";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableMetadata {
    pub format_version: u8,
    pub table_uuid: Uuid,
    pub location: String,
    #[serde(default)]
    pub last_sequence_number: i64,
    pub last_updated_ms: i64,
    pub last_column_id: i32,
    pub schemas: Vec<Schema>,
    pub current_schema_id: i32,
    pub partition_specs: Vec<PartitionSpec>,
    pub default_spec_id: i32,
    pub last_partition_id: i32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_snapshot_id: Option<i64>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub snapshot_log: Vec<SnapshotLogEntry>,
    #[serde(default)]
    pub metadata_log: Vec<MetadataLogEntry>,
    pub sort_orders: Vec<SortOrder>,
    pub default_sort_order_id: i32,
    #[serde(default)]
    pub refs: BTreeMap<String, SnapshotRef>,
    #[serde(default)]
    pub statistics: Vec<StatisticsFile>,
}

impl TableMetadata {
    pub fn schema_by_id(&self, schema_id: i32) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.schema_id == schema_id)
    }

    pub fn current_schema(&self) -> Option<&Schema> {
        self.schema_by_id(self.current_schema_id)
    }

    pub fn spec_by_id(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.partition_specs.iter().find(|s| s.spec_id == spec_id)
    }

    pub fn sort_order_by_id(&self, order_id: i32) -> Option<&SortOrder> {
        self.sort_orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshot_by_id(id))
    }

    pub fn statistics_for(&self, snapshot_id: i64) -> Option<&StatisticsFile> {
        self.statistics.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    /// Location with any trailing slash removed.
    pub fn base_location(&self) -> &str {
        self.location.trim_end_matches('/')
    }

    /// Prefix under which data files live, with a trailing slash.
    pub fn data_prefix(&self) -> String {
        format!("{}/{DATA_DIR}/", self.base_location())
    }

    /// Prefix under which metadata, manifests and statistics live.
    pub fn metadata_prefix(&self) -> String {
        format!("{}/{METADATA_DIR}/", self.base_location())
    }

    pub fn previous_versions_max(&self, default: usize) -> usize {
        self.properties
            .get(PROPERTY_PREVIOUS_VERSIONS_MAX)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}
