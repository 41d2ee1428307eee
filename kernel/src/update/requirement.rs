use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::TableMetadata;

/// A requirement that did not hold against the current metadata.
///
/// Always surfaced as a commit conflict: the caller must reload and retry.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("requirement `{requirement}` failed: {reason}")]
pub struct RequirementError {
    pub requirement: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TableRequirement {
    AssertCreate,
    AssertTableUuid {
        uuid: Uuid,
    },
    #[serde(rename_all = "kebab-case")]
    AssertRefSnapshotId {
        #[serde(rename = "ref")]
        reference: String,
        snapshot_id: Option<i64>,
    },
    #[serde(rename_all = "kebab-case")]
    AssertLastAssignedFieldId {
        last_assigned_field_id: i32,
    },
    #[serde(rename_all = "kebab-case")]
    AssertCurrentSchemaId {
        current_schema_id: i32,
    },
    #[serde(rename_all = "kebab-case")]
    AssertLastAssignedPartitionId {
        last_assigned_partition_id: i32,
    },
    #[serde(rename_all = "kebab-case")]
    AssertDefaultSpecId {
        default_spec_id: i32,
    },
    #[serde(rename_all = "kebab-case")]
    AssertDefaultSortOrderId {
        default_sort_order_id: i32,
    },
}

impl TableRequirement {
    pub fn name(&self) -> &'static str {
        match self {
            TableRequirement::AssertCreate => "assert-create",
            TableRequirement::AssertTableUuid { .. } => "assert-table-uuid",
            TableRequirement::AssertRefSnapshotId { .. } => "assert-ref-snapshot-id",
            TableRequirement::AssertLastAssignedFieldId { .. } => "assert-last-assigned-field-id",
            TableRequirement::AssertCurrentSchemaId { .. } => "assert-current-schema-id",
            TableRequirement::AssertLastAssignedPartitionId { .. } => {
                "assert-last-assigned-partition-id"
            }
            TableRequirement::AssertDefaultSpecId { .. } => "assert-default-spec-id",
            TableRequirement::AssertDefaultSortOrderId { .. } => "assert-default-sort-order-id",
        }
    }

    /// Check against the current metadata, `None` when the table does not exist.
    pub fn check(&self, current: Option<&TableMetadata>) -> Result<(), RequirementError> {
        let fail = |reason: String| {
            Err(RequirementError {
                requirement: self.name(),
                reason,
            })
        };

        let metadata = match (self, current) {
            (TableRequirement::AssertCreate, None) => return Ok(()),
            (TableRequirement::AssertCreate, Some(_)) => {
                return fail("table already exists".into())
            }
            (_, None) => return fail("table does not exist".into()),
            (_, Some(metadata)) => metadata,
        };

        match self {
            TableRequirement::AssertCreate => Ok(()),
            TableRequirement::AssertTableUuid { uuid } => {
                if metadata.table_uuid == *uuid {
                    Ok(())
                } else {
                    fail(format!("expected uuid {uuid}, found {}", metadata.table_uuid))
                }
            }
            TableRequirement::AssertRefSnapshotId {
                reference,
                snapshot_id,
            } => {
                let actual = metadata.refs.get(reference).map(|r| r.snapshot_id);
                if actual == *snapshot_id {
                    Ok(())
                } else {
                    fail(format!(
                        "ref {reference} expected at {snapshot_id:?}, found {actual:?}"
                    ))
                }
            }
            TableRequirement::AssertLastAssignedFieldId {
                last_assigned_field_id,
            } => {
                if metadata.last_column_id == *last_assigned_field_id {
                    Ok(())
                } else {
                    fail(format!(
                        "expected last column id {last_assigned_field_id}, found {}",
                        metadata.last_column_id
                    ))
                }
            }
            TableRequirement::AssertCurrentSchemaId { current_schema_id } => {
                if metadata.current_schema_id == *current_schema_id {
                    Ok(())
                } else {
                    fail(format!(
                        "expected current schema {current_schema_id}, found {}",
                        metadata.current_schema_id
                    ))
                }
            }
            TableRequirement::AssertLastAssignedPartitionId {
                last_assigned_partition_id,
            } => {
                if metadata.last_partition_id == *last_assigned_partition_id {
                    Ok(())
                } else {
                    fail(format!(
                        "expected last partition id {last_assigned_partition_id}, found {}",
                        metadata.last_partition_id
                    ))
                }
            }
            TableRequirement::AssertDefaultSpecId { default_spec_id } => {
                if metadata.default_spec_id == *default_spec_id {
                    Ok(())
                } else {
                    fail(format!(
                        "expected default spec {default_spec_id}, found {}",
                        metadata.default_spec_id
                    ))
                }
            }
            TableRequirement::AssertDefaultSortOrderId {
                default_sort_order_id,
            } => {
                if metadata.default_sort_order_id == *default_sort_order_id {
                    Ok(())
                } else {
                    fail(format!(
                        "expected default sort order {default_sort_order_id}, found {}",
                        metadata.default_sort_order_id
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_json_uses_type_tag() {
        let json = r#"[
          { "type": "assert-create" },
          { "type": "assert-ref-snapshot-id", "ref": "main", "snapshot-id": null },
          { "type": "assert-current-schema-id", "current-schema-id": 0 }
        ]"#;
        let requirements: Vec<TableRequirement> = serde_json::from_str(json).unwrap();
        assert_eq!(requirements[0], TableRequirement::AssertCreate);
        assert_eq!(
            requirements[1],
            TableRequirement::AssertRefSnapshotId {
                reference: "main".into(),
                snapshot_id: None
            }
        );
    }

    #[test]
    fn assert_create_only_holds_for_missing_tables() {
        assert!(TableRequirement::AssertCreate.check(None).is_ok());

        let err = TableRequirement::AssertCurrentSchemaId {
            current_schema_id: 0,
        }
        .check(None)
        .unwrap_err();
        assert_eq!(err.requirement, "assert-current-schema-id");
    }
}
