// Object Storage Abstraction
//
// Every object access names the authority it runs under: the catalog's
// own service identity, or a vended scoped credential whose policy the
// backend must enforce.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::credentials::ScopedCredential;

pub mod memory;

pub use memory::InMemoryObjectStore;

const S3_SCHEME: &str = "s3://";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid storage location {0:?}")]
    InvalidLocation(String),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("access denied: {action} on {location}")]
    AccessDenied { action: &'static str, location: String },

    #[error("credential is unknown or does not match an issued session")]
    InvalidCredential,

    #[error("credential expired")]
    CredentialExpired,

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Bucket and key of an `s3://bucket/key` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath {
    bucket: String,
    key: String,
}

impl ObjectPath {
    pub fn parse(location: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidLocation(location.to_string());
        let rest = location.strip_prefix(S3_SCHEME).ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{S3_SCHEME}{}/{}", self.bucket, self.key)
    }
}

/// Authority a storage call runs under.
#[derive(Debug, Clone, Copy)]
pub enum StorageAuth<'a> {
    /// The catalog service itself, not subject to session policies.
    Service,
    Scoped(&'a ScopedCredential),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub location: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, auth: StorageAuth<'_>, location: &str, body: Bytes)
        -> Result<(), StorageError>;

    async fn get(&self, auth: StorageAuth<'_>, location: &str) -> Result<Bytes, StorageError>;

    /// Objects whose location starts with `prefix`, in lexical order.
    async fn list(
        &self,
        auth: StorageAuth<'_>,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, auth: StorageAuth<'_>, location: &str) -> Result<(), StorageError>;
}

/// Whether `inner` is `outer` or lies below it, compared by path segment.
pub fn location_within(inner: &str, outer: &str) -> bool {
    let inner = inner.trim_end_matches('/');
    let outer = outer.trim_end_matches('/');
    inner == outer
        || inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Whether either location contains the other.
pub fn locations_overlap(a: &str, b: &str) -> bool {
    location_within(a, b) || location_within(b, a)
}

/// Bound a storage call by `timeout`.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StorageError::Timeout { operation, timeout })?
}
