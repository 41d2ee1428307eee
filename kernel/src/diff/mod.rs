// Metadata Diff
//
// Derives an update list that turns one metadata snapshot into another.
// Updates are emitted in dependency order so that applying the result
// to `base` reproduces `target` for additive changes.

use std::collections::BTreeMap;

use crate::metadata::TableMetadata;
use crate::update::TableUpdate;

/// Compute the updates leading from `base` to `target`.
pub fn diff(base: &TableMetadata, target: &TableMetadata) -> Vec<TableUpdate> {
    let mut updates = Vec::new();

    if target.format_version > base.format_version {
        updates.push(TableUpdate::UpgradeFormatVersion {
            format_version: target.format_version,
        });
    }
    if target.table_uuid != base.table_uuid {
        updates.push(TableUpdate::AssignUuid {
            uuid: target.table_uuid,
        });
    }
    if target.base_location() != base.base_location() {
        updates.push(TableUpdate::SetLocation {
            location: target.location.clone(),
        });
    }

    for schema in &target.schemas {
        if base.schema_by_id(schema.schema_id).is_none() {
            updates.push(TableUpdate::AddSchema {
                schema: schema.clone(),
                last_column_id: Some(target.last_column_id),
            });
        }
    }
    if target.current_schema_id != base.current_schema_id {
        updates.push(TableUpdate::SetCurrentSchema {
            schema_id: target.current_schema_id,
        });
    }

    for spec in &target.partition_specs {
        if base.spec_by_id(spec.spec_id).is_none() {
            updates.push(TableUpdate::AddSpec { spec: spec.clone() });
        }
    }
    if target.default_spec_id != base.default_spec_id {
        updates.push(TableUpdate::SetDefaultSpec {
            spec_id: target.default_spec_id,
        });
    }

    for order in &target.sort_orders {
        if base.sort_order_by_id(order.order_id).is_none() {
            updates.push(TableUpdate::AddSortOrder {
                sort_order: order.clone(),
            });
        }
    }
    if target.default_sort_order_id != base.default_sort_order_id {
        updates.push(TableUpdate::SetDefaultSortOrder {
            sort_order_id: target.default_sort_order_id,
        });
    }

    for snapshot in &target.snapshots {
        if base.snapshot_by_id(snapshot.snapshot_id).is_none() {
            updates.push(TableUpdate::AddSnapshot {
                snapshot: snapshot.clone(),
            });
        }
    }
    for (name, reference) in &target.refs {
        if base.refs.get(name) != Some(reference) {
            updates.push(TableUpdate::set_ref(name.clone(), reference));
        }
    }
    for name in base.refs.keys() {
        if !target.refs.contains_key(name) {
            updates.push(TableUpdate::RemoveSnapshotRef {
                ref_name: name.clone(),
            });
        }
    }
    let expired: Vec<i64> = base
        .snapshots
        .iter()
        .map(|s| s.snapshot_id)
        .filter(|id| target.snapshot_by_id(*id).is_none())
        .collect();
    if !expired.is_empty() {
        updates.push(TableUpdate::RemoveSnapshots {
            snapshot_ids: expired,
        });
    }

    for stats in &target.statistics {
        if base.statistics_for(stats.snapshot_id) != Some(stats) {
            updates.push(TableUpdate::SetStatistics {
                snapshot_id: stats.snapshot_id,
                statistics: stats.clone(),
            });
        }
    }
    for stats in &base.statistics {
        let live = target.snapshot_by_id(stats.snapshot_id).is_some();
        if live && target.statistics_for(stats.snapshot_id).is_none() {
            updates.push(TableUpdate::RemoveStatistics {
                snapshot_id: stats.snapshot_id,
            });
        }
    }

    let changed: BTreeMap<String, String> = target
        .properties
        .iter()
        .filter(|(k, v)| base.properties.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !changed.is_empty() {
        updates.push(TableUpdate::SetProperties { updates: changed });
    }
    let removed: Vec<String> = base
        .properties
        .keys()
        .filter(|k| !target.properties.contains_key(*k))
        .cloned()
        .collect();
    if !removed.is_empty() {
        updates.push(TableUpdate::RemoveProperties { removals: removed });
    }

    updates
}
