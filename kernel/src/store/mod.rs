// Metadata Store
//
// Holds namespaces and, per table or view, a pointer to the current
// immutable metadata snapshot. The pointer only moves through
// compare-and-swap on its version.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ident::{NamespaceIdent, TableIdent};
use crate::metadata::{TableMetadata, ViewMetadata};

pub mod memory;

pub use memory::InMemoryMetadataStore;

/// Logical version of a table or view pointer. The first version of a
/// fresh name is 1.
pub type Version = u64;

/// Current committed state of a table.
#[derive(Debug, Clone)]
pub struct TablePointer {
    pub version: Version,
    pub metadata_location: String,
    pub metadata: Arc<TableMetadata>,
}

/// Current committed state of a view.
#[derive(Debug, Clone)]
pub struct ViewPointer {
    pub version: Version,
    pub metadata_location: String,
    pub metadata: Arc<ViewMetadata>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("namespace {0} does not exist")]
    NamespaceNotFound(NamespaceIdent),

    #[error("namespace {0} already exists")]
    NamespaceAlreadyExists(NamespaceIdent),

    #[error("namespace {0} is not empty")]
    NamespaceNotEmpty(NamespaceIdent),

    #[error("table {0} does not exist")]
    TableNotFound(TableIdent),

    #[error("view {0} does not exist")]
    ViewNotFound(TableIdent),

    #[error("{0} already exists")]
    AlreadyExists(TableIdent),

    #[error("location {location} of {ident} overlaps the location of {owner}")]
    LocationOverlap {
        ident: TableIdent,
        location: String,
        owner: TableIdent,
    },

    #[error("version conflict on {ident}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        ident: TableIdent,
        expected: Option<Version>,
        actual: Option<Version>,
    },
}

/// Storage backend for catalog pointers.
///
/// Implementations must:
/// - serialize compare-and-swap per identifier
/// - never hand out a pointer that was not committed
/// - keep tables and views in one name space per namespace
/// - refuse a location that contains, or lies inside, the location of
///   another live table or view
/// - never reuse a version for a name, even after it was dropped and
///   created again
pub trait MetadataStore: Send + Sync {
    fn create_namespace(
        &self,
        namespace: &NamespaceIdent,
        properties: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Direct children of `parent`, or the top-level namespaces.
    fn list_namespaces(
        &self,
        parent: Option<&NamespaceIdent>,
    ) -> Result<Vec<NamespaceIdent>, StoreError>;

    fn namespace_properties(
        &self,
        namespace: &NamespaceIdent,
    ) -> Result<BTreeMap<String, String>, StoreError>;

    /// Fails if the namespace still holds tables, views or children.
    fn drop_namespace(&self, namespace: &NamespaceIdent) -> Result<(), StoreError>;

    fn load_table(&self, ident: &TableIdent) -> Result<TablePointer, StoreError>;

    fn list_tables(&self, namespace: &NamespaceIdent) -> Result<Vec<TableIdent>, StoreError>;

    /// Install `metadata` if the current version equals `expected`.
    ///
    /// `expected == None` creates the table and fails if the name is taken.
    fn compare_and_swap_table(
        &self,
        ident: &TableIdent,
        expected: Option<Version>,
        metadata_location: String,
        metadata: TableMetadata,
    ) -> Result<TablePointer, StoreError>;

    /// Remove the pointer and return the last committed state.
    fn remove_table(&self, ident: &TableIdent) -> Result<TablePointer, StoreError>;

    fn load_view(&self, ident: &TableIdent) -> Result<ViewPointer, StoreError>;

    fn list_views(&self, namespace: &NamespaceIdent) -> Result<Vec<TableIdent>, StoreError>;

    fn compare_and_swap_view(
        &self,
        ident: &TableIdent,
        expected: Option<Version>,
        metadata_location: String,
        metadata: ViewMetadata,
    ) -> Result<ViewPointer, StoreError>;

    fn remove_view(&self, ident: &TableIdent) -> Result<ViewPointer, StoreError>;
}
