// Metadata Builder
//
// Stateful reducer that folds table updates, one at a time, into a
// working copy of the metadata. The base snapshot is never touched.

use std::collections::{BTreeMap, HashSet};

use uuid::Uuid;

use super::ApplyError;
use crate::metadata::partition::PARTITION_FIELD_ID_START;
use crate::metadata::{
    PartitionSpec, Schema, SnapshotLogEntry, SnapshotRef, SnapshotRefType, SortOrder,
    TableMetadata, MAIN_BRANCH, MAX_FORMAT_VERSION,
};
use crate::update::{TableUpdate, LAST_ADDED};

/// Format version given to new tables unless the create batch says otherwise.
pub const DEFAULT_FORMAT_VERSION: u8 = 2;

#[derive(Debug)]
pub struct MetadataBuilder {
    metadata: TableMetadata,
    creating: bool,
    index: usize,
    changed: bool,
    now_ms: i64,
    last_added_schema_id: Option<i32>,
    last_added_spec_id: Option<i32>,
    last_added_order_id: Option<i32>,
    added_snapshots: HashSet<i64>,
}

impl MetadataBuilder {
    /// Start from an existing snapshot.
    pub fn from_base(base: &TableMetadata, now_ms: i64) -> Self {
        Self::with_metadata(base.clone(), false, now_ms)
    }

    /// Start a brand new table; the batch must assign uuid, location and a schema.
    pub fn new_table(now_ms: i64) -> Self {
        let metadata = TableMetadata {
            format_version: DEFAULT_FORMAT_VERSION,
            table_uuid: Uuid::nil(),
            location: String::new(),
            last_sequence_number: 0,
            last_updated_ms: now_ms,
            last_column_id: 0,
            schemas: Vec::new(),
            current_schema_id: LAST_ADDED,
            partition_specs: Vec::new(),
            default_spec_id: LAST_ADDED,
            last_partition_id: PARTITION_FIELD_ID_START - 1,
            properties: BTreeMap::new(),
            current_snapshot_id: None,
            snapshots: Vec::new(),
            snapshot_log: Vec::new(),
            metadata_log: Vec::new(),
            sort_orders: Vec::new(),
            default_sort_order_id: LAST_ADDED,
            refs: BTreeMap::new(),
            statistics: Vec::new(),
        };
        Self::with_metadata(metadata, true, now_ms)
    }

    fn with_metadata(metadata: TableMetadata, creating: bool, now_ms: i64) -> Self {
        Self {
            metadata,
            creating,
            index: 0,
            changed: false,
            now_ms,
            last_added_schema_id: None,
            last_added_spec_id: None,
            last_added_order_id: None,
            added_snapshots: HashSet::new(),
        }
    }

    /// Working copy as of the updates applied so far.
    pub fn current(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Apply a single update.
    pub fn apply(&mut self, update: &TableUpdate) -> Result<(), ApplyError> {
        let index = self.index;
        self.index += 1;
        self.apply_inner(update)
            .map_err(|reason| ApplyError::InvalidUpdate {
                index,
                action: update.action(),
                reason,
            })
    }

    fn apply_inner(&mut self, update: &TableUpdate) -> Result<(), String> {
        use TableUpdate::*;

        match update {
            AssignUuid { uuid } => self.assign_uuid(*uuid),
            UpgradeFormatVersion { format_version } => self.upgrade_format_version(*format_version),
            AddSchema {
                schema,
                last_column_id,
            } => self.add_schema(schema, *last_column_id),
            SetCurrentSchema { schema_id } => self.set_current_schema(*schema_id),
            AddSpec { spec } => self.add_spec(spec),
            SetDefaultSpec { spec_id } => self.set_default_spec(*spec_id),
            AddSortOrder { sort_order } => self.add_sort_order(sort_order),
            SetDefaultSortOrder { sort_order_id } => self.set_default_sort_order(*sort_order_id),
            AddSnapshot { snapshot } => {
                if self.metadata.snapshot_by_id(snapshot.snapshot_id).is_some() {
                    return Err(format!("snapshot {} already exists", snapshot.snapshot_id));
                }
                if let Some(schema_id) = snapshot.schema_id {
                    if self.metadata.schema_by_id(schema_id).is_none() {
                        return Err(format!("snapshot references unknown schema {schema_id}"));
                    }
                }
                if self.metadata.format_version > 1
                    && snapshot.parent_snapshot_id.is_some()
                    && snapshot.sequence_number <= self.metadata.last_sequence_number
                {
                    return Err(format!(
                        "sequence number {} is not newer than last sequence number {}",
                        snapshot.sequence_number, self.metadata.last_sequence_number
                    ));
                }
                self.metadata.last_sequence_number = self
                    .metadata
                    .last_sequence_number
                    .max(snapshot.sequence_number);
                self.metadata.snapshots.push(snapshot.clone());
                self.added_snapshots.insert(snapshot.snapshot_id);
                self.changed = true;
                Ok(())
            }
            SetSnapshotRef {
                ref_name,
                snapshot_id,
                ref_type,
                min_snapshots_to_keep,
                max_snapshot_age_ms,
                max_ref_age_ms,
            } => {
                let reference = SnapshotRef {
                    snapshot_id: *snapshot_id,
                    ref_type: *ref_type,
                    min_snapshots_to_keep: *min_snapshots_to_keep,
                    max_snapshot_age_ms: *max_snapshot_age_ms,
                    max_ref_age_ms: *max_ref_age_ms,
                };
                self.set_ref(ref_name, reference)
            }
            RemoveSnapshots { snapshot_ids } => {
                self.remove_snapshots(snapshot_ids);
                Ok(())
            }
            RemoveSnapshotRef { ref_name } => {
                if self.metadata.refs.remove(ref_name).is_some() {
                    if ref_name == MAIN_BRANCH {
                        self.metadata.current_snapshot_id = None;
                    }
                    self.changed = true;
                }
                Ok(())
            }
            SetLocation { location } => {
                let location = location.trim_end_matches('/');
                if location.is_empty() {
                    return Err("location must not be empty".into());
                }
                if self.metadata.location != location {
                    self.metadata.location = location.to_string();
                    self.changed = true;
                }
                Ok(())
            }
            SetProperties { updates } => {
                if updates.keys().any(|k| k.is_empty()) {
                    return Err("property keys must not be empty".into());
                }
                for (key, value) in updates {
                    self.metadata.properties.insert(key.clone(), value.clone());
                }
                self.changed |= !updates.is_empty();
                Ok(())
            }
            RemoveProperties { removals } => {
                for key in removals {
                    self.changed |= self.metadata.properties.remove(key).is_some();
                }
                Ok(())
            }
            SetStatistics {
                snapshot_id,
                statistics,
            } => {
                if statistics.snapshot_id != *snapshot_id {
                    return Err(format!(
                        "statistics belong to snapshot {}, not {snapshot_id}",
                        statistics.snapshot_id
                    ));
                }
                if self.metadata.snapshot_by_id(*snapshot_id).is_none() {
                    return Err(format!("unknown snapshot {snapshot_id}"));
                }
                self.metadata
                    .statistics
                    .retain(|s| s.snapshot_id != *snapshot_id);
                self.metadata.statistics.push(statistics.clone());
                self.changed = true;
                Ok(())
            }
            RemoveStatistics { snapshot_id } => {
                let before = self.metadata.statistics.len();
                self.metadata
                    .statistics
                    .retain(|s| s.snapshot_id != *snapshot_id);
                self.changed |= self.metadata.statistics.len() != before;
                Ok(())
            }
        }
    }

    fn assign_uuid(&mut self, uuid: Uuid) -> Result<(), String> {
        if uuid.is_nil() {
            return Err("table uuid must not be nil".into());
        }
        if self.creating {
            self.metadata.table_uuid = uuid;
            self.changed = true;
            return Ok(());
        }
        if self.metadata.table_uuid != uuid {
            return Err(format!(
                "cannot reassign table uuid {} to {uuid}",
                self.metadata.table_uuid
            ));
        }
        Ok(())
    }

    fn upgrade_format_version(&mut self, version: u8) -> Result<(), String> {
        if version == 0 || version > MAX_FORMAT_VERSION {
            return Err(format!("unsupported format version {version}"));
        }
        if !self.creating && version < self.metadata.format_version {
            return Err(format!(
                "cannot downgrade format version from {} to {version}",
                self.metadata.format_version
            ));
        }
        if version != self.metadata.format_version {
            self.metadata.format_version = version;
            self.changed = true;
        }
        Ok(())
    }

    fn add_schema(&mut self, schema: &Schema, last_column_id: Option<i32>) -> Result<(), String> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for field in &schema.fields {
            if field.id <= 0 || !ids.insert(field.id) {
                return Err(format!("invalid or duplicate field id {}", field.id));
            }
            if !names.insert(field.name.as_str()) {
                return Err(format!("duplicate field name {}", field.name));
            }
        }
        if let Some(requested) = last_column_id {
            if requested < self.metadata.last_column_id {
                return Err(format!(
                    "last column id {requested} is below the current {}",
                    self.metadata.last_column_id
                ));
            }
        }

        let schema_id = match self
            .metadata
            .schemas
            .iter()
            .find(|s| s.same_structure(schema))
        {
            Some(existing) => existing.schema_id,
            None => {
                let id = self
                    .metadata
                    .schemas
                    .iter()
                    .map(|s| s.schema_id)
                    .max()
                    .map_or(0, |max| max + 1);
                self.metadata.schemas.push(Schema {
                    schema_id: id,
                    ..schema.clone()
                });
                self.changed = true;
                id
            }
        };

        self.metadata.last_column_id = self
            .metadata
            .last_column_id
            .max(last_column_id.unwrap_or(0))
            .max(schema.highest_field_id());
        self.last_added_schema_id = Some(schema_id);
        Ok(())
    }

    fn set_current_schema(&mut self, schema_id: i32) -> Result<(), String> {
        let schema_id = resolve_last_added(schema_id, self.last_added_schema_id, "schema")?;
        if self.metadata.schema_by_id(schema_id).is_none() {
            return Err(format!("unknown schema {schema_id}"));
        }
        if self.metadata.current_schema_id != schema_id {
            self.metadata.current_schema_id = schema_id;
            self.changed = true;
        }
        Ok(())
    }

    /// Columns resolve against the current schema, or any added schema while
    /// a create batch has not picked one yet.
    fn known_column(&self, source_id: i32) -> bool {
        match self.metadata.current_schema() {
            Some(schema) => schema.field_by_id(source_id).is_some(),
            None => self
                .metadata
                .schemas
                .iter()
                .any(|s| s.field_by_id(source_id).is_some()),
        }
    }

    fn add_spec(&mut self, spec: &PartitionSpec) -> Result<(), String> {
        let mut field_ids = HashSet::new();
        for field in &spec.fields {
            if !self.known_column(field.source_id) {
                return Err(format!(
                    "partition field {} references unknown column {}",
                    field.name, field.source_id
                ));
            }
            if field.field_id < PARTITION_FIELD_ID_START || !field_ids.insert(field.field_id) {
                return Err(format!("invalid partition field id {}", field.field_id));
            }
        }

        let spec_id = match self
            .metadata
            .partition_specs
            .iter()
            .find(|s| s.same_fields(spec))
        {
            Some(existing) => existing.spec_id,
            None => {
                let id = self
                    .metadata
                    .partition_specs
                    .iter()
                    .map(|s| s.spec_id)
                    .max()
                    .map_or(0, |max| max + 1);
                self.metadata.partition_specs.push(PartitionSpec {
                    spec_id: id,
                    fields: spec.fields.clone(),
                });
                self.changed = true;
                id
            }
        };

        if let Some(highest) = spec.highest_field_id() {
            self.metadata.last_partition_id = self.metadata.last_partition_id.max(highest);
        }
        self.last_added_spec_id = Some(spec_id);
        Ok(())
    }

    fn set_default_spec(&mut self, spec_id: i32) -> Result<(), String> {
        let spec_id = resolve_last_added(spec_id, self.last_added_spec_id, "partition spec")?;
        if self.metadata.spec_by_id(spec_id).is_none() {
            return Err(format!("unknown partition spec {spec_id}"));
        }
        if self.metadata.default_spec_id != spec_id {
            self.metadata.default_spec_id = spec_id;
            self.changed = true;
        }
        Ok(())
    }

    fn add_sort_order(&mut self, order: &SortOrder) -> Result<(), String> {
        for field in &order.fields {
            if !self.known_column(field.source_id) {
                return Err(format!(
                    "sort field references unknown column {}",
                    field.source_id
                ));
            }
        }

        let order_id = if order.is_unsorted() {
            if self.metadata.sort_order_by_id(0).is_none() {
                self.metadata.sort_orders.push(SortOrder::unsorted());
                self.changed = true;
            }
            0
        } else {
            match self
                .metadata
                .sort_orders
                .iter()
                .find(|o| o.fields == order.fields)
            {
                Some(existing) => existing.order_id,
                None => {
                    let id = self
                        .metadata
                        .sort_orders
                        .iter()
                        .map(|o| o.order_id)
                        .max()
                        .unwrap_or(0)
                        + 1;
                    self.metadata.sort_orders.push(SortOrder {
                        order_id: id,
                        fields: order.fields.clone(),
                    });
                    self.changed = true;
                    id
                }
            }
        };

        self.last_added_order_id = Some(order_id);
        Ok(())
    }

    fn set_default_sort_order(&mut self, order_id: i32) -> Result<(), String> {
        let order_id = resolve_last_added(order_id, self.last_added_order_id, "sort order")?;
        if self.metadata.sort_order_by_id(order_id).is_none() {
            return Err(format!("unknown sort order {order_id}"));
        }
        if self.metadata.default_sort_order_id != order_id {
            self.metadata.default_sort_order_id = order_id;
            self.changed = true;
        }
        Ok(())
    }

    fn set_ref(&mut self, name: &str, reference: SnapshotRef) -> Result<(), String> {
        let Some(snapshot) = self.metadata.snapshot_by_id(reference.snapshot_id) else {
            return Err(format!("unknown snapshot {}", reference.snapshot_id));
        };
        if name == MAIN_BRANCH && reference.ref_type != SnapshotRefType::Branch {
            return Err("main must be a branch".into());
        }
        if self.metadata.refs.get(name) == Some(&reference) {
            return Ok(());
        }

        let timestamp_ms = if self.added_snapshots.contains(&reference.snapshot_id) {
            snapshot.timestamp_ms
        } else {
            self.now_ms
        };

        if name == MAIN_BRANCH {
            self.metadata.current_snapshot_id = Some(reference.snapshot_id);
            self.metadata.snapshot_log.push(SnapshotLogEntry {
                snapshot_id: reference.snapshot_id,
                timestamp_ms,
            });
        }
        self.metadata.refs.insert(name.to_string(), reference);
        self.changed = true;
        Ok(())
    }

    fn remove_snapshots(&mut self, snapshot_ids: &[i64]) {
        let removed: HashSet<i64> = snapshot_ids
            .iter()
            .copied()
            .filter(|id| self.metadata.snapshot_by_id(*id).is_some())
            .collect();
        if removed.is_empty() {
            return;
        }

        self.metadata
            .snapshots
            .retain(|s| !removed.contains(&s.snapshot_id));
        self.metadata
            .statistics
            .retain(|s| !removed.contains(&s.snapshot_id));
        self.metadata
            .snapshot_log
            .retain(|e| !removed.contains(&e.snapshot_id));
        self.metadata
            .refs
            .retain(|_, r| !removed.contains(&r.snapshot_id));
        if !self.metadata.refs.contains_key(MAIN_BRANCH) {
            self.metadata.current_snapshot_id = None;
        }
        self.changed = true;
    }

    /// Finish the batch and return the new snapshot.
    pub fn build(mut self) -> Result<TableMetadata, ApplyError> {
        if self.creating {
            if self.metadata.table_uuid.is_nil() {
                return Err(ApplyError::Incomplete("table uuid was never assigned".into()));
            }
            if self.metadata.location.is_empty() {
                return Err(ApplyError::Incomplete("table location was never set".into()));
            }
            if self.metadata.schemas.is_empty() {
                return Err(ApplyError::Incomplete("table has no schema".into()));
            }
            if self.metadata.partition_specs.is_empty() {
                self.metadata
                    .partition_specs
                    .push(PartitionSpec::unpartitioned());
                self.metadata.default_spec_id = 0;
            }
            if self.metadata.sort_orders.is_empty() {
                self.metadata.sort_orders.push(SortOrder::unsorted());
                self.metadata.default_sort_order_id = 0;
            }
        }
        if self.changed {
            self.metadata.last_updated_ms = self.now_ms;
        }
        Ok(self.metadata)
    }
}

fn resolve_last_added(id: i32, last_added: Option<i32>, what: &str) -> Result<i32, String> {
    if id != LAST_ADDED {
        return Ok(id);
    }
    last_added.ok_or_else(|| format!("no {what} was added earlier in this commit"))
}
