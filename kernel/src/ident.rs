// Catalog Identifiers
//
// Namespaces are multi-level; on the REST path their levels are joined
// with the unit separator byte (0x1F).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used to join namespace levels in a single path segment.
pub const NAMESPACE_SEPARATOR: char = '\u{1F}';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentError {
    #[error("namespace must have at least one level")]
    EmptyNamespace,

    #[error("namespace level {0:?} is empty, a relative path step, or contains '/' or the unit separator")]
    InvalidLevel(String),

    #[error("table name must not be empty")]
    EmptyName,

    #[error("table name {0:?} is a relative path step or contains '/'")]
    InvalidName(String),
}

// Levels and names become storage path segments, so two identifiers must
// never render to the same location.
fn is_path_safe(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('/')
}

/// Multi-level namespace, e.g. `db1.schema`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct NamespaceIdent(Vec<String>);

impl NamespaceIdent {
    pub fn new<I, S>(levels: I) -> Result<Self, IdentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
        if levels.is_empty() {
            return Err(IdentError::EmptyNamespace);
        }
        for level in &levels {
            if !is_path_safe(level) || level.contains(NAMESPACE_SEPARATOR) {
                return Err(IdentError::InvalidLevel(level.clone()));
            }
        }
        Ok(Self(levels))
    }

    /// Parse a REST path segment (`db1\u{1F}schema`).
    pub fn from_path_segment(segment: &str) -> Result<Self, IdentError> {
        Self::new(segment.split(NAMESPACE_SEPARATOR))
    }

    /// Render as a REST path segment, levels joined by 0x1F.
    pub fn to_path_segment(&self) -> String {
        self.0.join(&NAMESPACE_SEPARATOR.to_string())
    }

    pub fn levels(&self) -> &[String] {
        &self.0
    }

    pub fn parent(&self) -> Option<NamespaceIdent> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// True if `self` is `other` or nested below it.
    pub fn starts_with(&self, other: &NamespaceIdent) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

impl TryFrom<Vec<String>> for NamespaceIdent {
    type Error = IdentError;

    fn try_from(levels: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(levels)
    }
}

impl From<NamespaceIdent> for Vec<String> {
    fn from(ident: NamespaceIdent) -> Self {
        ident.0
    }
}

impl fmt::Display for NamespaceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Fully qualified table (or view) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTableIdent")]
pub struct TableIdent {
    pub namespace: NamespaceIdent,
    pub name: String,
}

impl TableIdent {
    pub fn new(namespace: NamespaceIdent, name: impl Into<String>) -> Result<Self, IdentError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentError::EmptyName);
        }
        if !is_path_safe(&name) {
            return Err(IdentError::InvalidName(name));
        }
        Ok(Self { namespace, name })
    }

    /// Relative storage path below a warehouse root: `db1/schema/table`.
    pub fn relative_path(&self) -> String {
        let mut parts = self.namespace.levels().to_vec();
        parts.push(self.name.clone());
        parts.join("/")
    }
}

#[derive(Deserialize)]
struct RawTableIdent {
    namespace: NamespaceIdent,
    name: String,
}

impl TryFrom<RawTableIdent> for TableIdent {
    type Error = IdentError;

    fn try_from(raw: RawTableIdent) -> Result<Self, Self::Error> {
        Self::new(raw.namespace, raw.name)
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segment_round_trips_through_unit_separator() {
        let ns = NamespaceIdent::new(["db1", "schema"]).unwrap();
        let segment = ns.to_path_segment();
        assert_eq!(segment, "db1\u{1F}schema");
        assert_eq!(NamespaceIdent::from_path_segment(&segment).unwrap(), ns);
    }

    #[test]
    fn empty_levels_are_rejected() {
        assert_eq!(
            NamespaceIdent::new(Vec::<String>::new()).unwrap_err(),
            IdentError::EmptyNamespace
        );
        assert!(matches!(
            NamespaceIdent::from_path_segment("db1\u{1F}"),
            Err(IdentError::InvalidLevel(_))
        ));
    }

    #[test]
    fn parent_and_prefix() {
        let ns = NamespaceIdent::new(["db1", "schema"]).unwrap();
        let parent = ns.parent().unwrap();
        assert_eq!(parent.to_string(), "db1");
        assert!(ns.starts_with(&parent));
        assert!(!parent.starts_with(&ns));
        assert!(parent.parent().is_none());
    }

    #[test]
    fn path_steps_cannot_alias_locations() {
        assert!(matches!(
            NamespaceIdent::new(["db1", "schema/t"]),
            Err(IdentError::InvalidLevel(_))
        ));
        assert!(matches!(
            NamespaceIdent::new(["db1", ".."]),
            Err(IdentError::InvalidLevel(_))
        ));
        let ns = NamespaceIdent::new(["db1"]).unwrap();
        assert_eq!(
            TableIdent::new(ns.clone(), "schema/t").unwrap_err(),
            IdentError::InvalidName("schema/t".into())
        );
        assert!(TableIdent::new(ns.clone(), ".").is_err());
        assert!(TableIdent::new(ns, "t.v1").is_ok());
    }

    #[test]
    fn deserialization_validates() {
        assert!(serde_json::from_str::<NamespaceIdent>(r#"["db1","a/b"]"#).is_err());
        assert!(
            serde_json::from_str::<TableIdent>(r#"{"namespace":["db1"],"name":"../t"}"#).is_err()
        );
        let ident: TableIdent =
            serde_json::from_str(r#"{"namespace":["db1","schema"],"name":"t"}"#).unwrap();
        assert_eq!(ident.relative_path(), "db1/schema/t");
    }

    #[test]
    fn table_relative_path() {
        let ns = NamespaceIdent::new(["db1", "schema"]).unwrap();
        let table = TableIdent::new(ns, "iceberg_table").unwrap();
        assert_eq!(table.relative_path(), "db1/schema/iceberg_table");
        assert_eq!(table.to_string(), "db1.schema.iceberg_table");
    }
}
