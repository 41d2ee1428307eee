// In-memory Metadata Store
//
// A single RwLock guards all namespaces and version high-water marks,
// which makes it the one point of serialization for every
// compare-and-swap.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{MetadataStore, StoreError, TablePointer, Version, ViewPointer};
use crate::ident::{NamespaceIdent, TableIdent};
use crate::metadata::{TableMetadata, ViewMetadata};
use crate::storage::locations_overlap;

#[derive(Debug, Default)]
struct NamespaceEntry {
    properties: BTreeMap<String, String>,
    tables: BTreeMap<String, TablePointer>,
    views: BTreeMap<String, ViewPointer>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<NamespaceIdent, NamespaceEntry>,
    // Highest version ever issued per name. Survives drops so a recreated
    // table or view never reuses a version of its predecessor.
    high_water: BTreeMap<TableIdent, Version>,
}

fn next_version(
    high_water: &mut BTreeMap<TableIdent, Version>,
    ident: &TableIdent,
    expected: Option<Version>,
    current: Option<Version>,
) -> Result<Version, StoreError> {
    if expected != current {
        return Err(StoreError::VersionConflict {
            ident: ident.clone(),
            expected,
            actual: current,
        });
    }
    let last = high_water.get(ident).copied().max(current).unwrap_or(0);
    let version = last + 1;
    high_water.insert(ident.clone(), version);
    Ok(version)
}

// Credentials and purge are scoped by location prefix, so no two live
// entries may share one.
fn check_location(
    namespaces: &BTreeMap<NamespaceIdent, NamespaceEntry>,
    ident: &TableIdent,
    location: &str,
) -> Result<(), StoreError> {
    for (namespace, entry) in namespaces {
        let tables = entry
            .tables
            .iter()
            .map(|(name, p)| (name, p.metadata.location.as_str()));
        let views = entry
            .views
            .iter()
            .map(|(name, p)| (name, p.metadata.location.as_str()));
        for (name, other) in tables.chain(views) {
            if namespace == &ident.namespace && name == &ident.name {
                continue;
            }
            if locations_overlap(location, other) {
                return Err(StoreError::LocationOverlap {
                    ident: ident.clone(),
                    location: location.to_string(),
                    owner: TableIdent {
                        namespace: namespace.clone(),
                        name: name.clone(),
                    },
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    state: RwLock<State>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn create_namespace(
        &self,
        namespace: &NamespaceIdent,
        properties: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let namespaces = &mut state.namespaces;
        if namespaces.contains_key(namespace) {
            return Err(StoreError::NamespaceAlreadyExists(namespace.clone()));
        }
        if let Some(parent) = namespace.parent() {
            if !namespaces.contains_key(&parent) {
                return Err(StoreError::NamespaceNotFound(parent));
            }
        }
        namespaces.insert(
            namespace.clone(),
            NamespaceEntry {
                properties,
                ..Default::default()
            },
        );
        Ok(())
    }

    fn list_namespaces(
        &self,
        parent: Option<&NamespaceIdent>,
    ) -> Result<Vec<NamespaceIdent>, StoreError> {
        let state = self.state.read();
        let namespaces = &state.namespaces;
        match parent {
            None => Ok(namespaces
                .keys()
                .filter(|ns| ns.parent().is_none())
                .cloned()
                .collect()),
            Some(parent) => {
                if !namespaces.contains_key(parent) {
                    return Err(StoreError::NamespaceNotFound(parent.clone()));
                }
                Ok(namespaces
                    .keys()
                    .filter(|ns| ns.parent().as_ref() == Some(parent))
                    .cloned()
                    .collect())
            }
        }
    }

    fn namespace_properties(
        &self,
        namespace: &NamespaceIdent,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        self.state
            .read()
            .namespaces
            .get(namespace)
            .map(|entry| entry.properties.clone())
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.clone()))
    }

    fn drop_namespace(&self, namespace: &NamespaceIdent) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let namespaces = &mut state.namespaces;
        let entry = namespaces
            .get(namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.clone()))?;
        let has_children = namespaces
            .keys()
            .any(|ns| ns != namespace && ns.starts_with(namespace));
        if !entry.tables.is_empty() || !entry.views.is_empty() || has_children {
            return Err(StoreError::NamespaceNotEmpty(namespace.clone()));
        }
        namespaces.remove(namespace);
        Ok(())
    }

    fn load_table(&self, ident: &TableIdent) -> Result<TablePointer, StoreError> {
        self.state
            .read()
            .namespaces
            .get(&ident.namespace)
            .and_then(|entry| entry.tables.get(&ident.name))
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(ident.clone()))
    }

    fn list_tables(&self, namespace: &NamespaceIdent) -> Result<Vec<TableIdent>, StoreError> {
        let state = self.state.read();
        let namespaces = &state.namespaces;
        let entry = namespaces
            .get(namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.clone()))?;
        Ok(entry
            .tables
            .keys()
            .map(|name| TableIdent {
                namespace: namespace.clone(),
                name: name.clone(),
            })
            .collect())
    }

    fn compare_and_swap_table(
        &self,
        ident: &TableIdent,
        expected: Option<Version>,
        metadata_location: String,
        metadata: TableMetadata,
    ) -> Result<TablePointer, StoreError> {
        let mut state = self.state.write();
        let State {
            namespaces,
            high_water,
        } = &mut *state;
        let entry = namespaces
            .get(&ident.namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(ident.namespace.clone()))?;

        let current = entry.tables.get(&ident.name).map(|p| p.version);
        if expected.is_none() && (current.is_some() || entry.views.contains_key(&ident.name)) {
            return Err(StoreError::AlreadyExists(ident.clone()));
        }
        if expected.is_some() && current.is_none() {
            return Err(StoreError::TableNotFound(ident.clone()));
        }
        if expected == current {
            check_location(namespaces, ident, &metadata.location)?;
        }
        let version = next_version(high_water, ident, expected, current)?;
        let entry = namespaces
            .get_mut(&ident.namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(ident.namespace.clone()))?;

        let pointer = TablePointer {
            version,
            metadata_location,
            metadata: Arc::new(metadata),
        };
        entry.tables.insert(ident.name.clone(), pointer.clone());
        Ok(pointer)
    }

    fn remove_table(&self, ident: &TableIdent) -> Result<TablePointer, StoreError> {
        self.state
            .write()
            .namespaces
            .get_mut(&ident.namespace)
            .and_then(|entry| entry.tables.remove(&ident.name))
            .ok_or_else(|| StoreError::TableNotFound(ident.clone()))
    }

    fn load_view(&self, ident: &TableIdent) -> Result<ViewPointer, StoreError> {
        self.state
            .read()
            .namespaces
            .get(&ident.namespace)
            .and_then(|entry| entry.views.get(&ident.name))
            .cloned()
            .ok_or_else(|| StoreError::ViewNotFound(ident.clone()))
    }

    fn list_views(&self, namespace: &NamespaceIdent) -> Result<Vec<TableIdent>, StoreError> {
        let state = self.state.read();
        let namespaces = &state.namespaces;
        let entry = namespaces
            .get(namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.clone()))?;
        Ok(entry
            .views
            .keys()
            .map(|name| TableIdent {
                namespace: namespace.clone(),
                name: name.clone(),
            })
            .collect())
    }

    fn compare_and_swap_view(
        &self,
        ident: &TableIdent,
        expected: Option<Version>,
        metadata_location: String,
        metadata: ViewMetadata,
    ) -> Result<ViewPointer, StoreError> {
        let mut state = self.state.write();
        let State {
            namespaces,
            high_water,
        } = &mut *state;
        let entry = namespaces
            .get(&ident.namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(ident.namespace.clone()))?;

        let current = entry.views.get(&ident.name).map(|p| p.version);
        if expected.is_none() && (current.is_some() || entry.tables.contains_key(&ident.name)) {
            return Err(StoreError::AlreadyExists(ident.clone()));
        }
        if expected.is_some() && current.is_none() {
            return Err(StoreError::ViewNotFound(ident.clone()));
        }
        if expected == current {
            check_location(namespaces, ident, &metadata.location)?;
        }
        let version = next_version(high_water, ident, expected, current)?;
        let entry = namespaces
            .get_mut(&ident.namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(ident.namespace.clone()))?;

        let pointer = ViewPointer {
            version,
            metadata_location,
            metadata: Arc::new(metadata),
        };
        entry.views.insert(ident.name.clone(), pointer.clone());
        Ok(pointer)
    }

    fn remove_view(&self, ident: &TableIdent) -> Result<ViewPointer, StoreError> {
        self.state
            .write()
            .namespaces
            .get_mut(&ident.namespace)
            .and_then(|entry| entry.views.remove(&ident.name))
            .ok_or_else(|| StoreError::ViewNotFound(ident.clone()))
    }
}
