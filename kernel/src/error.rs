// Catalog Errors
//
// Module errors compose into CatalogError. ErrorKind is the coarse
// classification the REST layer turns into status codes.

use crate::apply::ApplyError;
use crate::auth::AuthError;
use crate::commit::CommitError;
use crate::credentials::CredentialError;
use crate::ident::IdentError;
use crate::manifest::ManifestError;
use crate::metadata::view::ViewError;
use crate::purge::PurgeError;
use crate::scan::ScanError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::writer::WriteError;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Ident(#[from] IdentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Purge(#[from] PurgeError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid view: {0}")]
    View(#[from] ViewError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("location {location} is not allowed: {reason}")]
    LocationNotAllowed { location: String, reason: String },

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Validation,
    Forbidden,
    NotFound,
    Unavailable,
    Internal,
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Ident(_)
            | CatalogError::Apply(_)
            | CatalogError::View(_)
            | CatalogError::BadRequest(_) => ErrorKind::Validation,
            CatalogError::Store(e) => store_kind(e),
            CatalogError::Commit(e) => commit_kind(e),
            CatalogError::Credential(e) => credential_kind(e),
            CatalogError::Storage(e) => storage_kind(e),
            CatalogError::Manifest(e) => manifest_kind(e),
            CatalogError::Purge(PurgeError::Credential(e)) => credential_kind(e),
            CatalogError::Purge(PurgeError::Task { .. }) => ErrorKind::Internal,
            CatalogError::Auth(_) | CatalogError::LocationNotAllowed { .. } => ErrorKind::Forbidden,
            CatalogError::Scan(ScanError::Io(e)) | CatalogError::Write(WriteError::Io(e)) => {
                manifest_kind(e)
            }
            CatalogError::Write(WriteError::MetadataNotWritable(_)) => ErrorKind::Forbidden,
            CatalogError::Scan(_) | CatalogError::Write(_) => ErrorKind::Validation,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

fn store_kind(err: &StoreError) -> ErrorKind {
    match err {
        StoreError::NamespaceNotFound(_)
        | StoreError::TableNotFound(_)
        | StoreError::ViewNotFound(_) => ErrorKind::NotFound,
        StoreError::NamespaceAlreadyExists(_)
        | StoreError::NamespaceNotEmpty(_)
        | StoreError::AlreadyExists(_)
        | StoreError::VersionConflict { .. } => ErrorKind::Conflict,
        StoreError::LocationOverlap { .. } => ErrorKind::Forbidden,
    }
}

fn commit_kind(err: &CommitError) -> ErrorKind {
    match err {
        CommitError::Conflict { .. } | CommitError::Requirement(_) => ErrorKind::Conflict,
        CommitError::Validation(_) => ErrorKind::Validation,
        CommitError::NotFound(_) => ErrorKind::NotFound,
        CommitError::Store(e) => store_kind(e),
        CommitError::Io(e) => manifest_kind(e),
        CommitError::IllegalTransition { .. } => ErrorKind::Internal,
    }
}

fn credential_kind(err: &CredentialError) -> ErrorKind {
    match err {
        CredentialError::Location(e) => storage_kind(e),
        CredentialError::Timeout(_) | CredentialError::Issuer(_) => ErrorKind::Unavailable,
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::InvalidLocation(_) => ErrorKind::Validation,
        StorageError::NotFound(_) => ErrorKind::NotFound,
        StorageError::AccessDenied { .. }
        | StorageError::InvalidCredential
        | StorageError::CredentialExpired => ErrorKind::Forbidden,
        StorageError::Timeout { .. } => ErrorKind::Unavailable,
    }
}

fn manifest_kind(err: &ManifestError) -> ErrorKind {
    match err {
        ManifestError::Storage(e) => storage_kind(e),
        ManifestError::Decode { .. } | ManifestError::Encode(_) => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{NamespaceIdent, TableIdent};
    use std::time::Duration;

    fn ident() -> TableIdent {
        TableIdent::new(NamespaceIdent::new(["db1"]).unwrap(), "t").unwrap()
    }

    #[test]
    fn conflicts_are_classified_as_conflict() {
        let stale: CatalogError = CommitError::Conflict {
            ident: ident(),
            reason: "moved".into(),
        }
        .into();
        assert!(stale.is_conflict());

        let taken: CatalogError = StoreError::AlreadyExists(ident()).into();
        assert_eq!(taken.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn storage_errors_keep_their_meaning_through_wrappers() {
        let denied = StorageError::AccessDenied {
            action: "s3:GetObject",
            location: "s3://b/other".into(),
        };
        let err: CatalogError = CommitError::Io(ManifestError::Storage(denied)).into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let slow: CatalogError = CredentialError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(slow.kind(), ErrorKind::Unavailable);
    }
}
