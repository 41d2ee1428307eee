// Catalog
//
// Entry point tying the pieces together: every operation checks the
// caller's privilege, then delegates to the store, the commit
// coordinator, the credential vendor or the garbage collector.
//
// No lock is held across an await; the only serialization point is the
// store's compare-and-swap.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::apply::DEFAULT_FORMAT_VERSION;
use crate::auth::{Authorizer, Principal, Privilege};
use crate::commit::{CommitCoordinator, CommitRequest};
use crate::config::CatalogConfig;
use crate::credentials::{AccessMode, CredentialVendor, ScopedCredential, SessionIssuer};
use crate::error::CatalogError;
use crate::ident::{NamespaceIdent, TableIdent};
use crate::metadata::{PartitionSpec, Schema, SortOrder, ViewMetadata, ViewVersion, METADATA_DIR};
use crate::purge::{GarbageCollector, PurgeHandle};
use crate::scan::{ResultSet, TableScan};
use crate::storage::{self, InMemoryObjectStore, ObjectPath, ObjectStore, StorageAuth};
use crate::store::{
    InMemoryMetadataStore, MetadataStore, StoreError, TablePointer, Version, ViewPointer,
};
use crate::update::{TableRequirement, TableUpdate, LAST_ADDED};

/// Everything needed to create a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableCreation {
    pub schema: Schema,
    /// Defaults to `<warehouse>/<namespace levels>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_order: Option<SortOrder>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TableCreation {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            location: None,
            partition_spec: None,
            write_order: None,
            properties: BTreeMap::new(),
        }
    }
}

/// A loaded table, with a credential when access was delegated.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub pointer: TablePointer,
    pub credential: Option<ScopedCredential>,
}

impl LoadedTable {
    /// The `config` map handed back to clients.
    pub fn config(&self) -> BTreeMap<String, String> {
        self.credential
            .as_ref()
            .map(ScopedCredential::to_config)
            .unwrap_or_default()
    }
}

pub struct Catalog {
    config: CatalogConfig,
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    vendor: Arc<CredentialVendor>,
    coordinator: CommitCoordinator,
    collector: GarbageCollector,
    authorizer: Authorizer,
}

impl Catalog {
    pub fn new(
        config: CatalogConfig,
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        issuer: Arc<dyn SessionIssuer>,
    ) -> Self {
        let vendor = Arc::new(CredentialVendor::new(issuer, config.credentials.clone()));
        let coordinator = CommitCoordinator::new(
            store.clone(),
            objects.clone(),
            config.metadata.clone(),
            config.metadata.write_timeout(),
        );
        let collector = GarbageCollector::new(objects.clone(), vendor.clone(), config.purge.clone());
        Self {
            config,
            store,
            objects,
            vendor,
            coordinator,
            collector,
            authorizer: Authorizer,
        }
    }

    /// Catalog over in-memory stores. The object store doubles as the
    /// token service and is returned for inspection.
    pub fn in_memory(config: CatalogConfig) -> (Self, Arc<InMemoryObjectStore>) {
        let objects = Arc::new(InMemoryObjectStore::new());
        let catalog = Self::new(
            config,
            Arc::new(InMemoryMetadataStore::new()),
            objects.clone(),
            objects.clone(),
        );
        (catalog, objects)
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    fn default_location(&self, ident: &TableIdent) -> String {
        format!(
            "{}/{}",
            self.config.warehouse.location.trim_end_matches('/'),
            ident.relative_path()
        )
    }

    /// Table locations must be `s3://` paths strictly below the
    /// warehouse. Overlap with other tables is refused by the store.
    fn check_location(&self, location: &str) -> Result<(), CatalogError> {
        let refuse = |reason: &str| CatalogError::LocationNotAllowed {
            location: location.to_string(),
            reason: reason.to_string(),
        };
        ObjectPath::parse(location).map_err(|_| refuse("not an s3:// location"))?;
        let warehouse = self.config.warehouse.location.trim_end_matches('/');
        if !storage::location_within(location, warehouse)
            || location.trim_end_matches('/') == warehouse
        {
            return Err(refuse("outside the warehouse"));
        }
        Ok(())
    }

    // ---- namespaces ----

    #[tracing::instrument(skip_all, fields(principal = %principal.name, namespace = %namespace))]
    pub fn create_namespace(
        &self,
        principal: &Principal,
        namespace: &NamespaceIdent,
        properties: BTreeMap<String, String>,
    ) -> Result<(), CatalogError> {
        self.authorizer.authorize(
            principal,
            Privilege::NamespaceCreate,
            namespace.parent().as_ref(),
        )?;
        self.store.create_namespace(namespace, properties)?;
        tracing::info!("namespace created");
        Ok(())
    }

    pub fn list_namespaces(
        &self,
        principal: &Principal,
        parent: Option<&NamespaceIdent>,
    ) -> Result<Vec<NamespaceIdent>, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::NamespaceList, parent)?;
        Ok(self.store.list_namespaces(parent)?)
    }

    pub fn namespace_properties(
        &self,
        principal: &Principal,
        namespace: &NamespaceIdent,
    ) -> Result<BTreeMap<String, String>, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::NamespaceReadProperties, Some(namespace))?;
        Ok(self.store.namespace_properties(namespace)?)
    }

    #[tracing::instrument(skip_all, fields(principal = %principal.name, namespace = %namespace))]
    pub fn drop_namespace(
        &self,
        principal: &Principal,
        namespace: &NamespaceIdent,
    ) -> Result<(), CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::NamespaceDrop, Some(namespace))?;
        self.store.drop_namespace(namespace)?;
        tracing::info!("namespace dropped");
        Ok(())
    }

    // ---- tables ----

    #[tracing::instrument(skip_all, fields(principal = %principal.name, table = %ident))]
    pub async fn create_table(
        &self,
        principal: &Principal,
        ident: &TableIdent,
        creation: TableCreation,
    ) -> Result<TablePointer, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::TableCreate, Some(&ident.namespace))?;
        self.store.namespace_properties(&ident.namespace)?;
        if self.store.load_table(ident).is_ok() {
            return Err(StoreError::AlreadyExists(ident.clone()).into());
        }

        let location = creation
            .location
            .unwrap_or_else(|| self.default_location(ident));
        self.check_location(&location)?;
        let last_column_id = creation.schema.highest_field_id();

        let mut updates = vec![
            TableUpdate::AssignUuid {
                uuid: Uuid::new_v4(),
            },
            TableUpdate::UpgradeFormatVersion {
                format_version: DEFAULT_FORMAT_VERSION,
            },
            TableUpdate::AddSchema {
                schema: creation.schema,
                last_column_id: Some(last_column_id),
            },
            TableUpdate::SetCurrentSchema {
                schema_id: LAST_ADDED,
            },
        ];
        if let Some(spec) = creation.partition_spec {
            updates.push(TableUpdate::AddSpec { spec });
            updates.push(TableUpdate::SetDefaultSpec {
                spec_id: LAST_ADDED,
            });
        }
        if let Some(sort_order) = creation.write_order {
            updates.push(TableUpdate::AddSortOrder { sort_order });
            updates.push(TableUpdate::SetDefaultSortOrder {
                sort_order_id: LAST_ADDED,
            });
        }
        updates.push(TableUpdate::SetLocation { location });
        if !creation.properties.is_empty() {
            updates.push(TableUpdate::SetProperties {
                updates: creation.properties,
            });
        }

        let request = CommitRequest {
            base: None,
            requirements: vec![TableRequirement::AssertCreate],
            updates,
        };
        let pointer = self.coordinator.commit(ident, &request).await?;
        tracing::info!(location = %pointer.metadata.location, "table created");
        Ok(pointer)
    }

    /// Load the current pointer. With `delegate_access` a credential
    /// scoped to the table location is vended on every call: read, or
    /// write when the principal holds TABLE_WRITE_DATA.
    #[tracing::instrument(skip_all, fields(principal = %principal.name, table = %ident))]
    pub async fn load_table(
        &self,
        principal: &Principal,
        ident: &TableIdent,
        delegate_access: bool,
    ) -> Result<LoadedTable, CatalogError> {
        self.authorizer.authorize(
            principal,
            Privilege::TableReadProperties,
            Some(&ident.namespace),
        )?;
        let pointer = self.store.load_table(ident)?;

        let credential = if delegate_access {
            let mode = self.authorizer.access_mode(principal, &ident.namespace)?;
            Some(
                self.vendor
                    .vend(&principal.name, &pointer.metadata.location, mode)
                    .await?,
            )
        } else {
            None
        };
        Ok(LoadedTable {
            pointer,
            credential,
        })
    }

    pub fn list_tables(
        &self,
        principal: &Principal,
        namespace: &NamespaceIdent,
    ) -> Result<Vec<TableIdent>, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::TableList, Some(namespace))?;
        Ok(self.store.list_tables(namespace)?)
    }

    pub async fn commit(
        &self,
        principal: &Principal,
        ident: &TableIdent,
        request: &CommitRequest,
    ) -> Result<TablePointer, CatalogError> {
        self.authorizer.authorize(
            principal,
            Privilege::TableWriteProperties,
            Some(&ident.namespace),
        )?;
        for update in &request.updates {
            if let TableUpdate::SetLocation { location } = update {
                self.check_location(location)?;
            }
        }
        Ok(self.coordinator.commit(ident, request).await?)
    }

    /// Remove the table. With `purge` its files are deleted by a
    /// background task whose handle is returned.
    #[tracing::instrument(skip_all, fields(principal = %principal.name, table = %ident, purge = purge))]
    pub fn drop_table(
        &self,
        principal: &Principal,
        ident: &TableIdent,
        purge: bool,
    ) -> Result<Option<PurgeHandle>, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::TableDrop, Some(&ident.namespace))?;
        if purge {
            self.authorizer
                .authorize(principal, Privilege::TableWriteData, Some(&ident.namespace))?;
        }

        let last = self.store.remove_table(ident)?;
        tracing::info!(version = last.version, "table dropped");
        if !purge {
            return Ok(None);
        }
        Ok(Some(self.collector.spawn(ident.clone(), last)))
    }

    // ---- views ----

    #[tracing::instrument(skip_all, fields(principal = %principal.name, view = %ident))]
    pub async fn create_view(
        &self,
        principal: &Principal,
        ident: &TableIdent,
        schema: Schema,
        version: ViewVersion,
        properties: BTreeMap<String, String>,
    ) -> Result<ViewPointer, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::ViewCreate, Some(&ident.namespace))?;
        self.store.namespace_properties(&ident.namespace)?;

        let metadata = ViewMetadata::new(self.default_location(ident), schema, version, properties)?;
        self.install_view(ident, None, metadata).await
    }

    pub fn load_view(
        &self,
        principal: &Principal,
        ident: &TableIdent,
    ) -> Result<ViewPointer, CatalogError> {
        self.authorizer.authorize(
            principal,
            Privilege::ViewReadProperties,
            Some(&ident.namespace),
        )?;
        Ok(self.store.load_view(ident)?)
    }

    pub fn list_views(
        &self,
        principal: &Principal,
        namespace: &NamespaceIdent,
    ) -> Result<Vec<TableIdent>, CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::ViewList, Some(namespace))?;
        Ok(self.store.list_views(namespace)?)
    }

    /// Add a new view version on top of `base`.
    #[tracing::instrument(skip_all, fields(principal = %principal.name, view = %ident, base = base))]
    pub async fn replace_view(
        &self,
        principal: &Principal,
        ident: &TableIdent,
        base: Version,
        schema: Schema,
        version: ViewVersion,
    ) -> Result<ViewPointer, CatalogError> {
        self.authorizer.authorize(
            principal,
            Privilege::ViewWriteProperties,
            Some(&ident.namespace),
        )?;
        let current = self.store.load_view(ident)?;
        let next = current.metadata.replace(schema, version)?;
        self.install_view(ident, Some(base), next).await
    }

    pub fn drop_view(&self, principal: &Principal, ident: &TableIdent) -> Result<(), CatalogError> {
        self.authorizer
            .authorize(principal, Privilege::ViewDrop, Some(&ident.namespace))?;
        self.store.remove_view(ident)?;
        tracing::info!(view = %ident, "view dropped");
        Ok(())
    }

    async fn install_view(
        &self,
        ident: &TableIdent,
        base: Option<Version>,
        metadata: ViewMetadata,
    ) -> Result<ViewPointer, CatalogError> {
        let version = base.map_or(1, |v| v + 1);
        let location = format!(
            "{}/{METADATA_DIR}/{version:05}-{}.metadata.json",
            metadata.location.trim_end_matches('/'),
            Uuid::new_v4()
        );
        let body = serde_json::to_vec(&metadata).map_err(crate::manifest::ManifestError::Encode)?;
        storage::with_timeout(
            "write view metadata",
            self.config.metadata.write_timeout(),
            self.objects
                .put(StorageAuth::Service, &location, Bytes::from(body)),
        )
        .await?;

        match self
            .store
            .compare_and_swap_view(ident, base, location.clone(), metadata)
        {
            Ok(pointer) => Ok(pointer),
            Err(err) => {
                if let Err(cleanup) = self.objects.delete(StorageAuth::Service, &location).await {
                    tracing::warn!(%location, error = %cleanup, "cannot delete orphaned view metadata");
                }
                Err(err.into())
            }
        }
    }

    /// Evaluate the projection of a view's current version against the
    /// table's current committed state.
    #[tracing::instrument(skip_all, fields(principal = %principal.name, view = %ident))]
    pub async fn evaluate_view(
        &self,
        principal: &Principal,
        ident: &TableIdent,
    ) -> Result<ResultSet, CatalogError> {
        let view = self.load_view(principal, ident)?;
        let version = view
            .metadata
            .current_version()
            .ok_or_else(|| CatalogError::BadRequest(format!("view {ident} has no current version")))?;
        let query = version.projection().ok_or_else(|| {
            CatalogError::BadRequest(format!("view {ident} has no projection representation"))
        })?;

        let table = resolve_table(&query.table, &version.default_namespace)?;
        self.authorizer
            .authorize(principal, Privilege::TableReadData, Some(&table.namespace))?;
        let pointer = self.store.load_table(&table)?;
        let credential = self
            .vendor
            .vend(&principal.name, &pointer.metadata.location, AccessMode::Read)
            .await?;

        let scan = TableScan::new(
            self.objects.as_ref(),
            StorageAuth::Scoped(&credential),
            &pointer.metadata,
        );
        Ok(scan.project(query).await?)
    }
}

/// `name` resolves in `default_namespace`; `a.b.name` is fully qualified.
fn resolve_table(
    reference: &str,
    default_namespace: &NamespaceIdent,
) -> Result<TableIdent, CatalogError> {
    match reference.rsplit_once('.') {
        Some((namespace, name)) => Ok(TableIdent::new(
            NamespaceIdent::new(namespace.split('.'))?,
            name,
        )?),
        None => Ok(TableIdent::new(default_namespace.clone(), reference)?),
    }
}
