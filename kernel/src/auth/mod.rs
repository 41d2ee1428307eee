// Authorization
//
// Principals hold privilege grants, catalog-wide or on a namespace
// subtree. Evaluation is pure and rule-based: a grant satisfies a
// required privilege when the required one is in the granted
// privilege's implication closure.

use serde::{Deserialize, Serialize};

use crate::credentials::AccessMode;
use crate::ident::NamespaceIdent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privilege {
    TableList,
    TableReadProperties,
    TableWriteProperties,
    TableReadData,
    TableWriteData,
    TableCreate,
    TableDrop,
    TableFullMetadata,
    ViewList,
    ViewReadProperties,
    ViewWriteProperties,
    ViewCreate,
    ViewDrop,
    ViewFullMetadata,
    NamespaceList,
    NamespaceCreate,
    NamespaceDrop,
    NamespaceReadProperties,
    NamespaceFullMetadata,
}

impl Privilege {
    /// Privileges directly implied by holding `self`.
    fn implies(self) -> &'static [Privilege] {
        use Privilege::*;
        match self {
            TableWriteData => &[TableReadData, TableWriteProperties],
            TableReadData => &[TableReadProperties],
            TableWriteProperties => &[TableReadProperties],
            TableFullMetadata => &[
                TableList,
                TableCreate,
                TableDrop,
                TableReadProperties,
                TableWriteProperties,
            ],
            ViewWriteProperties => &[ViewReadProperties],
            ViewFullMetadata => &[
                ViewList,
                ViewCreate,
                ViewDrop,
                ViewReadProperties,
                ViewWriteProperties,
            ],
            NamespaceFullMetadata => &[
                NamespaceList,
                NamespaceCreate,
                NamespaceDrop,
                NamespaceReadProperties,
            ],
            _ => &[],
        }
    }

    /// True if holding `self` grants `required`.
    pub fn satisfies(self, required: Privilege) -> bool {
        self == required || self.implies().iter().any(|p| p.satisfies(required))
    }
}

/// A privilege on the whole catalog (`namespace: None`) or on a
/// namespace and everything nested below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub privilege: Privilege,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceIdent>,
}

impl Grant {
    pub fn catalog(privilege: Privilege) -> Self {
        Self {
            privilege,
            namespace: None,
        }
    }

    pub fn on(privilege: Privilege, namespace: NamespaceIdent) -> Self {
        Self {
            privilege,
            namespace: Some(namespace),
        }
    }

    fn covers(&self, target: Option<&NamespaceIdent>) -> bool {
        match (&self.namespace, target) {
            (None, _) => true,
            (Some(granted), Some(target)) => target.starts_with(granted),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl Principal {
    pub fn new(name: impl Into<String>, grants: Vec<Grant>) -> Self {
        Self {
            name: name.into(),
            grants,
        }
    }

    /// Principal holding every privilege on the whole catalog.
    pub fn root() -> Self {
        Self::new(
            "root",
            vec![
                Grant::catalog(Privilege::TableWriteData),
                Grant::catalog(Privilege::TableFullMetadata),
                Grant::catalog(Privilege::ViewFullMetadata),
                Grant::catalog(Privilege::NamespaceFullMetadata),
            ],
        )
    }

    pub fn holds(&self, required: Privilege, target: Option<&NamespaceIdent>) -> bool {
        self.grants
            .iter()
            .any(|g| g.covers(target) && g.privilege.satisfies(required))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("principal {principal} lacks {privilege:?} on {target}")]
pub struct AuthError {
    pub principal: String,
    pub privilege: Privilege,
    pub target: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer;

impl Authorizer {
    pub fn authorize(
        &self,
        principal: &Principal,
        required: Privilege,
        target: Option<&NamespaceIdent>,
    ) -> Result<(), AuthError> {
        if principal.holds(required, target) {
            return Ok(());
        }
        tracing::debug!(principal = %principal.name, ?required, "authorization denied");
        Err(AuthError {
            principal: principal.name.clone(),
            privilege: required,
            target: target.map_or_else(|| "catalog".to_string(), |ns| ns.to_string()),
        })
    }

    /// Access mode to vend for a table load. Requires at least read access.
    pub fn access_mode(
        &self,
        principal: &Principal,
        namespace: &NamespaceIdent,
    ) -> Result<AccessMode, AuthError> {
        if principal.holds(Privilege::TableWriteData, Some(namespace)) {
            return Ok(AccessMode::Write);
        }
        self.authorize(principal, Privilege::TableReadData, Some(namespace))?;
        Ok(AccessMode::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(levels: &[&str]) -> NamespaceIdent {
        NamespaceIdent::new(levels.iter().copied()).unwrap()
    }

    #[test]
    fn write_data_implies_read_and_properties() {
        assert!(Privilege::TableWriteData.satisfies(Privilege::TableReadData));
        assert!(Privilege::TableWriteData.satisfies(Privilege::TableReadProperties));
        assert!(Privilege::TableWriteData.satisfies(Privilege::TableWriteProperties));
        assert!(!Privilege::TableReadData.satisfies(Privilege::TableWriteData));
        assert!(!Privilege::TableWriteData.satisfies(Privilege::TableDrop));
    }

    #[test]
    fn full_metadata_implies_lifecycle_privileges() {
        assert!(Privilege::TableFullMetadata.satisfies(Privilege::TableCreate));
        assert!(Privilege::NamespaceFullMetadata.satisfies(Privilege::NamespaceDrop));
        assert!(Privilege::ViewFullMetadata.satisfies(Privilege::ViewReadProperties));
        assert!(!Privilege::TableFullMetadata.satisfies(Privilege::TableReadData));
    }

    #[test]
    fn namespace_grant_covers_nested_namespaces_only() {
        let principal = Principal::new(
            "reader",
            vec![Grant::on(Privilege::TableReadData, ns(&["db1"]))],
        );
        assert!(principal.holds(Privilege::TableReadData, Some(&ns(&["db1", "schema"]))));
        assert!(!principal.holds(Privilege::TableReadData, Some(&ns(&["db2"]))));
        assert!(!principal.holds(Privilege::TableReadData, None));
    }

    #[test]
    fn access_mode_follows_write_privilege() {
        let authorizer = Authorizer;
        let target = ns(&["db1"]);

        let writer = Principal::new("w", vec![Grant::catalog(Privilege::TableWriteData)]);
        assert_eq!(authorizer.access_mode(&writer, &target).unwrap(), AccessMode::Write);

        let reader = Principal::new("r", vec![Grant::catalog(Privilege::TableReadData)]);
        assert_eq!(authorizer.access_mode(&reader, &target).unwrap(), AccessMode::Read);

        let nobody = Principal::new("n", vec![Grant::catalog(Privilege::TableList)]);
        let err = authorizer.access_mode(&nobody, &target).unwrap_err();
        assert_eq!(err.privilege, Privilege::TableReadData);
        assert_eq!(err.target, "db1");
    }

    #[test]
    fn grants_parse_from_json() {
        let principal: Principal = serde_json::from_str(
            r#"{"name":"etl","grants":[{"privilege":"TABLE_WRITE_DATA","namespace":["db1"]}]}"#,
        )
        .unwrap();
        assert!(principal.holds(Privilege::TableWriteProperties, Some(&ns(&["db1"]))));
    }
}
