// View Metadata
//
// Views are versioned like tables but have a single format version.
// `current-version-id` must always name an entry of `versions`; this is
// checked on construction and whenever a document is deserialized.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ident::NamespaceIdent;
use crate::metadata::{Schema, SortDirection};
use crate::row::Predicate;

pub const VIEW_FORMAT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("view format version {0} is not supported")]
    UnsupportedFormatVersion(u8),

    #[error("current version {0} is not among the view versions")]
    CurrentVersionMissing(i32),

    #[error("version {version_id} references unknown schema {schema_id}")]
    SchemaMissing { version_id: i32, schema_id: i32 },

    #[error("version {0} has no representations")]
    NoRepresentations(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// Structured select over a single table, evaluated at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectionQuery {
    /// Table name, resolved against the version's default namespace.
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ViewRepresentation {
    Sql { sql: String, dialect: String },
    Projection(ProjectionQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ViewVersion {
    pub version_id: i32,
    pub timestamp_ms: i64,
    pub schema_id: i32,
    #[serde(default)]
    pub summary: BTreeMap<String, String>,
    pub representations: Vec<ViewRepresentation>,
    pub default_namespace: NamespaceIdent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_catalog: Option<String>,
}

impl ViewVersion {
    pub fn projection(&self) -> Option<&ProjectionQuery> {
        self.representations.iter().find_map(|r| match r {
            ViewRepresentation::Projection(q) => Some(q),
            ViewRepresentation::Sql { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ViewHistoryEntry {
    pub version_id: i32,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "RawViewMetadata")]
pub struct ViewMetadata {
    pub view_uuid: Uuid,
    pub format_version: u8,
    pub location: String,
    pub current_version_id: i32,
    pub versions: Vec<ViewVersion>,
    pub version_log: Vec<ViewHistoryEntry>,
    pub schemas: Vec<Schema>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawViewMetadata {
    view_uuid: Uuid,
    format_version: u8,
    location: String,
    current_version_id: i32,
    versions: Vec<ViewVersion>,
    version_log: Vec<ViewHistoryEntry>,
    schemas: Vec<Schema>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl TryFrom<RawViewMetadata> for ViewMetadata {
    type Error = ViewError;

    fn try_from(raw: RawViewMetadata) -> Result<Self, Self::Error> {
        let metadata = ViewMetadata {
            view_uuid: raw.view_uuid,
            format_version: raw.format_version,
            location: raw.location,
            current_version_id: raw.current_version_id,
            versions: raw.versions,
            version_log: raw.version_log,
            schemas: raw.schemas,
            properties: raw.properties,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

impl ViewMetadata {
    /// Build the first version of a view. The version id becomes 1 and the
    /// schema id 0 regardless of what the caller passed.
    pub fn new(
        location: impl Into<String>,
        mut schema: Schema,
        mut version: ViewVersion,
        properties: BTreeMap<String, String>,
    ) -> Result<Self, ViewError> {
        schema.schema_id = 0;
        version.version_id = 1;
        version.schema_id = 0;

        let metadata = Self {
            view_uuid: Uuid::new_v4(),
            format_version: VIEW_FORMAT_VERSION,
            location: location.into(),
            current_version_id: 1,
            version_log: vec![ViewHistoryEntry {
                version_id: 1,
                timestamp_ms: version.timestamp_ms,
            }],
            versions: vec![version],
            schemas: vec![schema],
            properties,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<(), ViewError> {
        if self.format_version != VIEW_FORMAT_VERSION {
            return Err(ViewError::UnsupportedFormatVersion(self.format_version));
        }
        if self.version_by_id(self.current_version_id).is_none() {
            return Err(ViewError::CurrentVersionMissing(self.current_version_id));
        }
        for version in &self.versions {
            if !self.schemas.iter().any(|s| s.schema_id == version.schema_id) {
                return Err(ViewError::SchemaMissing {
                    version_id: version.version_id,
                    schema_id: version.schema_id,
                });
            }
            if version.representations.is_empty() {
                return Err(ViewError::NoRepresentations(version.version_id));
            }
        }
        Ok(())
    }

    pub fn version_by_id(&self, version_id: i32) -> Option<&ViewVersion> {
        self.versions.iter().find(|v| v.version_id == version_id)
    }

    pub fn current_version(&self) -> Option<&ViewVersion> {
        self.version_by_id(self.current_version_id)
    }

    pub fn schema_by_id(&self, schema_id: i32) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.schema_id == schema_id)
    }

    /// Produce the next metadata with `version` as the current version.
    ///
    /// An identical schema is reused, otherwise the schema gets a new id.
    pub fn replace(&self, schema: Schema, mut version: ViewVersion) -> Result<Self, ViewError> {
        let mut next = self.clone();

        let schema_id = match next.schemas.iter().find(|s| s.same_structure(&schema)) {
            Some(existing) => existing.schema_id,
            None => {
                let id = next.schemas.iter().map(|s| s.schema_id).max().unwrap_or(-1) + 1;
                next.schemas.push(Schema {
                    schema_id: id,
                    ..schema
                });
                id
            }
        };

        version.version_id = next.versions.iter().map(|v| v.version_id).max().unwrap_or(0) + 1;
        version.schema_id = schema_id;

        next.current_version_id = version.version_id;
        next.version_log.push(ViewHistoryEntry {
            version_id: version.version_id,
            timestamp_ms: version.timestamp_ms,
        });
        next.versions.push(version);

        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{NestedField, PrimitiveType};

    fn version(sql: &str) -> ViewVersion {
        ViewVersion {
            version_id: 0,
            timestamp_ms: 1_700_000_000_000,
            schema_id: 0,
            summary: BTreeMap::new(),
            representations: vec![ViewRepresentation::Sql {
                sql: sql.to_string(),
                dialect: "spark".to_string(),
            }],
            default_namespace: NamespaceIdent::new(["db1", "schema"]).unwrap(),
            default_catalog: None,
        }
    }

    fn schema() -> Schema {
        Schema::new(5, vec![NestedField::optional(1, "col2", PrimitiveType::String)])
    }

    #[test]
    fn new_view_points_at_first_version() {
        let view = ViewMetadata::new("s3://b/v", schema(), version("select 1"), BTreeMap::new())
            .unwrap();
        assert_eq!(view.current_version_id, 1);
        assert_eq!(view.current_version().unwrap().schema_id, 0);
        assert_eq!(view.version_log.len(), 1);
    }

    #[test]
    fn replace_reuses_identical_schema() {
        let view = ViewMetadata::new("s3://b/v", schema(), version("select 1"), BTreeMap::new())
            .unwrap();
        let next = view.replace(schema(), version("select 2")).unwrap();

        assert_eq!(next.current_version_id, 2);
        assert_eq!(next.schemas.len(), 1);
        assert_eq!(next.version_log.len(), 2);
        // the input is left untouched
        assert_eq!(view.current_version_id, 1);
    }

    #[test]
    fn deserialization_rejects_dangling_current_version() {
        let view = ViewMetadata::new("s3://b/v", schema(), version("select 1"), BTreeMap::new())
            .unwrap();
        let mut value = serde_json::to_value(&view).unwrap();
        value["current-version-id"] = serde_json::json!(9);

        let err = serde_json::from_value::<ViewMetadata>(value).unwrap_err();
        assert!(err.to_string().contains("current version 9"));
    }

    #[test]
    fn deserialization_rejects_other_format_versions() {
        let view = ViewMetadata::new("s3://b/v", schema(), version("select 1"), BTreeMap::new())
            .unwrap();
        let mut value = serde_json::to_value(&view).unwrap();
        value["format-version"] = serde_json::json!(2);

        assert!(serde_json::from_value::<ViewMetadata>(value).is_err());
    }
}
