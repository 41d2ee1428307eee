// REST Surface
//
// Typed request and response bodies of the Iceberg REST catalog and the
// handlers mapping each endpoint onto the catalog. Transport framing is
// left to the embedding server; handlers take decoded path segments,
// query flags and bodies.
//
// Namespace path segments join levels with 0x1F.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::catalog::{Catalog, LoadedTable, TableCreation};
use crate::commit::{CommitError, CommitRequest};
use crate::error::{CatalogError, ErrorKind};
use crate::ident::{NamespaceIdent, TableIdent};
use crate::metadata::{PartitionSpec, Schema, SortOrder, TableMetadata, ViewMetadata, ViewVersion};
use crate::purge::PurgeHandle;
use crate::store::{StoreError, ViewPointer};
use crate::update::{TableRequirement, TableUpdate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNamespaceRequest {
    pub namespace: NamespaceIdent,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceResponse {
    pub namespace: NamespaceIdent,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListNamespacesResponse {
    pub namespaces: Vec<NamespaceIdent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTablesResponse {
    pub identifiers: Vec<TableIdent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateTableRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_order: Option<SortOrder>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadTableResponse {
    pub metadata_location: String,
    pub metadata: TableMetadata,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl LoadTableResponse {
    fn from_loaded(loaded: LoadedTable, snapshots: SnapshotsFilter) -> Self {
        let config = loaded.config();
        let mut metadata = loaded.pointer.metadata.as_ref().clone();
        if snapshots == SnapshotsFilter::Refs {
            let referenced: BTreeSet<i64> =
                metadata.refs.values().map(|r| r.snapshot_id).collect();
            metadata
                .snapshots
                .retain(|s| referenced.contains(&s.snapshot_id));
        }
        Self {
            metadata_location: loaded.pointer.metadata_location,
            metadata,
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTableRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<TableIdent>,
    #[serde(default)]
    pub requirements: Vec<TableRequirement>,
    pub updates: Vec<TableUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitTableResponse {
    pub metadata_location: String,
    pub metadata: TableMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateViewRequest {
    pub name: String,
    pub schema: Schema,
    pub view_version: ViewVersion,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplaceViewRequest {
    pub schema: Schema,
    pub view_version: ViewVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadViewResponse {
    pub metadata_location: String,
    pub metadata: ViewMetadata,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl From<ViewPointer> for LoadViewResponse {
    fn from(pointer: ViewPointer) -> Self {
        Self {
            metadata_location: pointer.metadata_location,
            metadata: pointer.metadata.as_ref().clone(),
            config: BTreeMap::new(),
        }
    }
}

/// `snapshots` query parameter of load-table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotsFilter {
    #[default]
    All,
    /// Only snapshots referenced by a branch or tag.
    Refs,
}

impl std::str::FromStr for SnapshotsFilter {
    type Err = ErrorModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SnapshotsFilter::All),
            "refs" => Ok(SnapshotsFilter::Refs),
            other => Err(ErrorModel::bad_request(format!(
                "invalid snapshots filter {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorModel {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: u16,
}

impl ErrorModel {
    fn bad_request(message: String) -> Self {
        Self {
            message,
            error_type: "BadRequestException".into(),
            code: 400,
        }
    }
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorModel,
}

impl From<ErrorModel> for ErrorResponse {
    fn from(error: ErrorModel) -> Self {
        Self { error }
    }
}

pub fn status_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation => 400,
        ErrorKind::Forbidden => 403,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::Internal => 500,
        ErrorKind::Unavailable => 503,
    }
}

fn error_type(err: &CatalogError) -> &'static str {
    match err {
        CatalogError::Store(StoreError::NamespaceNotFound(_)) => "NoSuchNamespaceException",
        CatalogError::Store(StoreError::TableNotFound(_))
        | CatalogError::Commit(CommitError::NotFound(_)) => "NoSuchTableException",
        CatalogError::Store(StoreError::ViewNotFound(_)) => "NoSuchViewException",
        CatalogError::Store(StoreError::NamespaceAlreadyExists(_) | StoreError::AlreadyExists(_)) => {
            "AlreadyExistsException"
        }
        CatalogError::Store(StoreError::NamespaceNotEmpty(_)) => "NamespaceNotEmptyException",
        _ => match err.kind() {
            ErrorKind::Conflict => "CommitFailedException",
            ErrorKind::Validation => "BadRequestException",
            ErrorKind::Forbidden => "ForbiddenException",
            ErrorKind::NotFound => "NotFoundException",
            ErrorKind::Unavailable => "ServiceUnavailableException",
            ErrorKind::Internal => "InternalServerError",
        },
    }
}

impl From<CatalogError> for ErrorModel {
    fn from(err: CatalogError) -> Self {
        let code = status_code(err.kind());
        if code >= 500 {
            tracing::error!(error = %err, code, "request failed");
        } else {
            tracing::debug!(error = %err, code, "request rejected");
        }
        Self {
            message: err.to_string(),
            error_type: error_type(&err).to_string(),
            code,
        }
    }
}

type RestResult<T> = Result<T, ErrorModel>;

fn namespace(segment: &str) -> Result<NamespaceIdent, CatalogError> {
    Ok(NamespaceIdent::from_path_segment(segment)?)
}

fn table(namespace_segment: &str, name: &str) -> Result<TableIdent, CatalogError> {
    Ok(TableIdent::new(namespace(namespace_segment)?, name)?)
}

/// Endpoint handlers over one catalog.
#[derive(Clone)]
pub struct RestCatalog {
    catalog: Arc<Catalog>,
}

impl RestCatalog {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// `POST /namespaces`
    pub fn create_namespace(
        &self,
        principal: &Principal,
        request: CreateNamespaceRequest,
    ) -> RestResult<NamespaceResponse> {
        self.catalog
            .create_namespace(principal, &request.namespace, request.properties.clone())?;
        Ok(NamespaceResponse {
            namespace: request.namespace,
            properties: request.properties,
        })
    }

    /// `GET /namespaces?parent=...`
    pub fn list_namespaces(
        &self,
        principal: &Principal,
        parent: Option<&str>,
    ) -> RestResult<ListNamespacesResponse> {
        let parent = parent.map(namespace).transpose()?;
        let namespaces = self.catalog.list_namespaces(principal, parent.as_ref())?;
        Ok(ListNamespacesResponse { namespaces })
    }

    /// `GET /namespaces/{ns}`
    pub fn load_namespace(
        &self,
        principal: &Principal,
        namespace_segment: &str,
    ) -> RestResult<NamespaceResponse> {
        let namespace = namespace(namespace_segment)?;
        let properties = self.catalog.namespace_properties(principal, &namespace)?;
        Ok(NamespaceResponse {
            namespace,
            properties,
        })
    }

    /// `DELETE /namespaces/{ns}`
    pub fn drop_namespace(&self, principal: &Principal, namespace_segment: &str) -> RestResult<()> {
        let namespace = namespace(namespace_segment)?;
        Ok(self.catalog.drop_namespace(principal, &namespace)?)
    }

    /// `GET /namespaces/{ns}/tables`
    pub fn list_tables(
        &self,
        principal: &Principal,
        namespace_segment: &str,
    ) -> RestResult<ListTablesResponse> {
        let namespace = namespace(namespace_segment)?;
        let identifiers = self.catalog.list_tables(principal, &namespace)?;
        Ok(ListTablesResponse { identifiers })
    }

    /// `POST /namespaces/{ns}/tables`
    pub async fn create_table(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        request: CreateTableRequest,
        delegate_access: bool,
    ) -> RestResult<LoadTableResponse> {
        let ident = table(namespace_segment, &request.name)?;
        let creation = TableCreation {
            schema: request.schema,
            location: request.location,
            partition_spec: request.partition_spec,
            write_order: request.write_order,
            properties: request.properties,
        };
        self.catalog.create_table(principal, &ident, creation).await?;
        let loaded = self
            .catalog
            .load_table(principal, &ident, delegate_access)
            .await?;
        Ok(LoadTableResponse::from_loaded(loaded, SnapshotsFilter::All))
    }

    /// `GET /namespaces/{ns}/tables/{name}?snapshots=...`
    ///
    /// `delegate_access` mirrors `X-Iceberg-Access-Delegation:
    /// vended-credentials` and fills `config` with `s3.*` keys.
    pub async fn load_table(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        name: &str,
        snapshots: SnapshotsFilter,
        delegate_access: bool,
    ) -> RestResult<LoadTableResponse> {
        let ident = table(namespace_segment, name)?;
        let loaded = self
            .catalog
            .load_table(principal, &ident, delegate_access)
            .await?;
        Ok(LoadTableResponse::from_loaded(loaded, snapshots))
    }

    /// `POST /namespaces/{ns}/tables/{name}`
    ///
    /// The commit is based on the version current when the request
    /// arrives; the requirements guard against what changed since the
    /// client read the table.
    pub async fn commit_table(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        name: &str,
        request: CommitTableRequest,
    ) -> RestResult<CommitTableResponse> {
        let ident = table(namespace_segment, name)?;
        if let Some(identifier) = &request.identifier {
            if identifier != &ident {
                return Err(ErrorModel::bad_request(format!(
                    "body identifier {identifier} does not match path {ident}"
                )));
            }
        }

        let base = if request.requirements.contains(&TableRequirement::AssertCreate) {
            None
        } else {
            Some(self.catalog.load_table(principal, &ident, false).await?.pointer.version)
        };
        let commit = CommitRequest {
            base,
            requirements: request.requirements,
            updates: request.updates,
        };
        let pointer = self.catalog.commit(principal, &ident, &commit).await?;
        Ok(CommitTableResponse {
            metadata_location: pointer.metadata_location,
            metadata: pointer.metadata.as_ref().clone(),
        })
    }

    /// `DELETE /namespaces/{ns}/tables/{name}?purgeRequested=...`
    ///
    /// Returns the purge handle so callers may await or poll it.
    pub fn drop_table(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        name: &str,
        purge_requested: bool,
    ) -> RestResult<Option<PurgeHandle>> {
        let ident = table(namespace_segment, name)?;
        Ok(self.catalog.drop_table(principal, &ident, purge_requested)?)
    }

    /// `POST /namespaces/{ns}/views`
    pub async fn create_view(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        request: CreateViewRequest,
    ) -> RestResult<LoadViewResponse> {
        let ident = table(namespace_segment, &request.name)?;
        let pointer = self
            .catalog
            .create_view(
                principal,
                &ident,
                request.schema,
                request.view_version,
                request.properties,
            )
            .await?;
        Ok(pointer.into())
    }

    /// `GET /namespaces/{ns}/views/{name}`
    pub fn load_view(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        name: &str,
    ) -> RestResult<LoadViewResponse> {
        let ident = table(namespace_segment, name)?;
        Ok(self.catalog.load_view(principal, &ident)?.into())
    }

    /// `POST /namespaces/{ns}/views/{name}`
    pub async fn replace_view(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        name: &str,
        request: ReplaceViewRequest,
    ) -> RestResult<LoadViewResponse> {
        let ident = table(namespace_segment, name)?;
        let current = self.catalog.load_view(principal, &ident)?;
        let pointer = self
            .catalog
            .replace_view(
                principal,
                &ident,
                current.version,
                request.schema,
                request.view_version,
            )
            .await?;
        Ok(pointer.into())
    }

    /// `DELETE /namespaces/{ns}/views/{name}`
    pub fn drop_view(
        &self,
        principal: &Principal,
        namespace_segment: &str,
        name: &str,
    ) -> RestResult<()> {
        let ident = table(namespace_segment, name)?;
        Ok(self.catalog.drop_view(principal, &ident)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Grant, Privilege};
    use crate::config::CatalogConfig;
    use crate::metadata::{NestedField, PrimitiveType};

    const NS: &str = "db1\u{1F}schema";

    fn schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::optional(1, "col1", PrimitiveType::Int),
                NestedField::optional(2, "col2", PrimitiveType::String),
            ],
        )
    }

    fn rest() -> RestCatalog {
        let mut config = CatalogConfig::default_config();
        config.warehouse.location = "s3://bucket/wh".into();
        let (catalog, _) = Catalog::in_memory(config);
        let rest = RestCatalog::new(Arc::new(catalog));
        let root = Principal::root();
        for levels in [vec!["db1"], vec!["db1", "schema"]] {
            rest.create_namespace(
                &root,
                CreateNamespaceRequest {
                    namespace: NamespaceIdent::new(levels).unwrap(),
                    properties: BTreeMap::new(),
                },
            )
            .unwrap();
        }
        rest
    }

    fn create_request(name: &str) -> CreateTableRequest {
        CreateTableRequest {
            name: name.into(),
            location: None,
            schema: schema(),
            partition_spec: None,
            write_order: None,
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn load_with_delegation_returns_s3_config() {
        let rest = rest();
        let root = Principal::root();
        rest.create_table(&root, NS, create_request("t"), false)
            .await
            .unwrap();

        let response = rest
            .load_table(&root, NS, "t", SnapshotsFilter::All, true)
            .await
            .unwrap();
        for key in ["s3.access-key-id", "s3.secret-access-key", "s3.session-token"] {
            assert!(response.config.contains_key(key), "missing {key}");
        }
        assert_eq!(response.metadata.location, "s3://bucket/wh/db1/schema/t");

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("metadata-location").is_some());
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let rest = rest();
        let root = Principal::root();

        let missing = rest
            .load_table(&root, NS, "nope", SnapshotsFilter::All, false)
            .await
            .unwrap_err();
        assert_eq!((missing.code, missing.error_type.as_str()), (404, "NoSuchTableException"));

        rest.create_table(&root, NS, create_request("t"), false)
            .await
            .unwrap();
        let again = rest
            .create_table(&root, NS, create_request("t"), false)
            .await
            .unwrap_err();
        assert_eq!((again.code, again.error_type.as_str()), (409, "AlreadyExistsException"));

        let stranger = Principal::new("s", vec![Grant::catalog(Privilege::NamespaceList)]);
        let denied = rest
            .load_table(&stranger, NS, "t", SnapshotsFilter::All, true)
            .await
            .unwrap_err();
        assert_eq!(denied.code, 403);

        let bad = rest
            .load_table(&root, "db1\u{1F}", "t", SnapshotsFilter::All, false)
            .await
            .unwrap_err();
        assert_eq!(bad.code, 400);
    }

    #[tokio::test]
    async fn commit_with_failed_requirement_is_409() {
        let rest = rest();
        let root = Principal::root();
        rest.create_table(&root, NS, create_request("t"), false)
            .await
            .unwrap();

        let ok = rest
            .commit_table(
                &root,
                NS,
                "t",
                CommitTableRequest {
                    identifier: None,
                    requirements: vec![TableRequirement::AssertCurrentSchemaId {
                        current_schema_id: 0,
                    }],
                    updates: vec![TableUpdate::SetProperties {
                        updates: BTreeMap::from([("owner".to_string(), "etl".to_string())]),
                    }],
                },
            )
            .await
            .unwrap();
        assert_eq!(ok.metadata.properties["owner"], "etl");

        let conflict = rest
            .commit_table(
                &root,
                NS,
                "t",
                CommitTableRequest {
                    identifier: None,
                    requirements: vec![TableRequirement::AssertCurrentSchemaId {
                        current_schema_id: 7,
                    }],
                    updates: vec![],
                },
            )
            .await
            .unwrap_err();
        assert_eq!((conflict.code, conflict.error_type.as_str()), (409, "CommitFailedException"));
    }

    #[test]
    fn error_response_wire_shape() {
        let body = ErrorResponse::from(ErrorModel::bad_request("nope".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["type"], "BadRequestException");
        assert_eq!(json["error"]["code"], 400);
        assert_eq!("refs".parse::<SnapshotsFilter>().unwrap(), SnapshotsFilter::Refs);
        assert!("some".parse::<SnapshotsFilter>().is_err());
    }

    #[test]
    fn namespace_listing_uses_unit_separator_parent() {
        let rest = rest();
        let listed = rest
            .list_namespaces(&Principal::root(), Some("db1"))
            .unwrap();
        assert_eq!(
            listed.namespaces,
            vec![NamespaceIdent::new(["db1", "schema"]).unwrap()]
        );
        let loaded = rest.load_namespace(&Principal::root(), NS).unwrap();
        assert!(loaded.properties.is_empty());
    }
}
