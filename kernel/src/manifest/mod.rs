// Manifests
//
// A snapshot's manifest list names manifests; manifests name data
// files. All three are JSON objects stored under the table location.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::metadata::Snapshot;
use crate::row::Row;
use crate::storage::{ObjectStore, StorageAuth, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot decode {location}: {source}")]
    Decode {
        location: String,
        source: serde_json::Error,
    },

    #[error("cannot encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Added,
    Existing,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataFile {
    pub file_path: String,
    pub record_count: u64,
    pub file_size_in_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestEntry {
    pub status: ManifestStatus,
    pub snapshot_id: i64,
    pub data_file: DataFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn live_files(&self) -> impl Iterator<Item = &DataFile> {
        self.entries
            .iter()
            .filter(|e| e.status != ManifestStatus::Deleted)
            .map(|e| &e.data_file)
    }

    /// Summarize for the manifest list.
    pub fn describe(&self, manifest_path: impl Into<String>) -> ManifestFile {
        let count = |status| self.entries.iter().filter(|e| e.status == status).count() as u32;
        ManifestFile {
            manifest_path: manifest_path.into(),
            added_files: count(ManifestStatus::Added),
            existing_files: count(ManifestStatus::Existing),
            deleted_files: count(ManifestStatus::Deleted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestFile {
    pub manifest_path: String,
    pub added_files: u32,
    pub existing_files: u32,
    pub deleted_files: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestList {
    pub snapshot_id: i64,
    pub manifests: Vec<ManifestFile>,
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    location: &str,
) -> Result<T, ManifestError> {
    let body = store.get(auth, location).await?;
    serde_json::from_slice(&body).map_err(|source| ManifestError::Decode {
        location: location.to_string(),
        source,
    })
}

/// Write `value` as JSON and return the number of bytes written.
pub(crate) async fn write_json<T: Serialize>(
    store: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    location: &str,
    value: &T,
) -> Result<u64, ManifestError> {
    let body = serde_json::to_vec(value)?;
    let size = body.len() as u64;
    store.put(auth, location, Bytes::from(body)).await?;
    Ok(size)
}

pub async fn read_manifest_list(
    store: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    location: &str,
) -> Result<ManifestList, ManifestError> {
    read_json(store, auth, location).await
}

pub async fn read_manifest(
    store: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    location: &str,
) -> Result<Manifest, ManifestError> {
    read_json(store, auth, location).await
}

pub async fn read_rows(
    store: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    data_file: &DataFile,
) -> Result<Vec<Row>, ManifestError> {
    read_json(store, auth, &data_file.file_path).await
}

/// Data files live as of `snapshot`.
pub async fn live_data_files(
    store: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    snapshot: &Snapshot,
) -> Result<Vec<DataFile>, ManifestError> {
    let list = read_manifest_list(store, auth, &snapshot.manifest_list).await?;
    let mut files = Vec::new();
    for manifest_file in &list.manifests {
        let manifest = read_manifest(store, auth, &manifest_file.manifest_path).await?;
        files.extend(manifest.live_files().cloned());
    }
    Ok(files)
}
