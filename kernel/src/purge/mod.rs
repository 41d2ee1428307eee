// Garbage Collector
//
// Deletes every object reachable from a dropped table's metadata
// history, then sweeps leftovers under its data and metadata prefixes.
// All deletes run under a write credential scoped to the table, so a
// path outside the table location is refused by storage itself.
//
// Metadata objects go first and data objects last: once the data
// prefix is empty the purge is complete.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::PurgeConfig;
use crate::credentials::{CredentialError, CredentialVendor, ScopedCredential};
use crate::ident::TableIdent;
use crate::manifest::{self, ManifestError};
use crate::metadata::TableMetadata;
use crate::storage::{self, ObjectStore, StorageAuth, StorageError};
use crate::store::TablePointer;

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("cannot obtain purge credential: {0}")]
    Credential(#[from] CredentialError),

    #[error("purge task for {table} did not finish: {reason}")]
    Task { table: TableIdent, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeFailure {
    pub location: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub metadata_files_deleted: usize,
    pub data_files_deleted: usize,
    /// Objects that could not be read or deleted.
    pub failures: Vec<PurgeFailure>,
    /// Referenced paths outside the table location, left in place.
    pub skipped: Vec<String>,
}

impl PurgeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, location: &str, error: impl ToString) {
        let error = error.to_string();
        tracing::warn!(%location, %error, "purge step failed");
        self.failures.push(PurgeFailure {
            location: location.to_string(),
            error,
        });
    }
}

/// Objects reachable from a table's metadata history.
#[derive(Debug, Default)]
struct Reachable {
    metadata: BTreeSet<String>,
    data: BTreeSet<String>,
}

/// Handle to a purge running in the background.
#[derive(Debug)]
pub struct PurgeHandle {
    table: TableIdent,
    handle: JoinHandle<Result<PurgeReport, PurgeError>>,
}

impl PurgeHandle {
    pub fn table(&self) -> &TableIdent {
        &self.table
    }

    pub async fn wait(self) -> Result<PurgeReport, PurgeError> {
        let table = self.table;
        self.handle.await.map_err(|e| PurgeError::Task {
            table,
            reason: e.to_string(),
        })?
    }
}

#[derive(Clone)]
pub struct GarbageCollector {
    objects: Arc<dyn ObjectStore>,
    vendor: Arc<CredentialVendor>,
    config: PurgeConfig,
}

impl GarbageCollector {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        vendor: Arc<CredentialVendor>,
        config: PurgeConfig,
    ) -> Self {
        Self {
            objects,
            vendor,
            config,
        }
    }

    /// Run the purge as a tokio task.
    pub fn spawn(&self, table: TableIdent, last: TablePointer) -> PurgeHandle {
        let collector = self.clone();
        let task_table = table.clone();
        let handle = tokio::spawn(async move { collector.purge(&task_table, &last).await });
        PurgeHandle { table, handle }
    }

    #[tracing::instrument(skip_all, fields(table = %table, location = %last.metadata.location))]
    pub async fn purge(
        &self,
        table: &TableIdent,
        last: &TablePointer,
    ) -> Result<PurgeReport, PurgeError> {
        let location = last.metadata.base_location().to_string();
        let credential = self
            .vendor
            .vend_for_purge(&format!("purge-{}", table.name), &location)
            .await?;

        let mut report = PurgeReport::default();
        let reachable = self.collect(&credential, last, &mut report).await;
        let table_prefix = format!("{location}/");

        let (metadata, outside): (Vec<_>, Vec<_>) = reachable
            .metadata
            .into_iter()
            .partition(|p| p.starts_with(&table_prefix));
        report.skipped.extend(outside);
        let (data, outside): (Vec<_>, Vec<_>) = reachable
            .data
            .into_iter()
            .partition(|p| p.starts_with(&table_prefix));
        report.skipped.extend(outside);

        report.metadata_files_deleted += self.delete_all(&credential, &metadata, &mut report).await;
        let leftovers = self
            .list_prefix(&credential, &last.metadata.metadata_prefix(), &mut report)
            .await;
        report.metadata_files_deleted += self.delete_all(&credential, &leftovers, &mut report).await;

        report.data_files_deleted += self.delete_all(&credential, &data, &mut report).await;
        let leftovers = self
            .list_prefix(&credential, &last.metadata.data_prefix(), &mut report)
            .await;
        report.data_files_deleted += self.delete_all(&credential, &leftovers, &mut report).await;

        tracing::info!(
            metadata_files = report.metadata_files_deleted,
            data_files = report.data_files_deleted,
            failures = report.failures.len(),
            "purge finished"
        );
        Ok(report)
    }

    async fn collect(
        &self,
        credential: &ScopedCredential,
        last: &TablePointer,
        report: &mut PurgeReport,
    ) -> Reachable {
        let auth = StorageAuth::Scoped(credential);
        let mut reachable = Reachable::default();

        let mut documents: Vec<TableMetadata> = vec![last.metadata.as_ref().clone()];
        reachable.metadata.insert(last.metadata_location.clone());
        for entry in &last.metadata.metadata_log {
            if !reachable.metadata.insert(entry.metadata_file.clone()) {
                continue;
            }
            match manifest::read_json::<TableMetadata>(
                self.objects.as_ref(),
                auth,
                &entry.metadata_file,
            )
            .await
            {
                Ok(document) => documents.push(document),
                Err(ManifestError::Storage(StorageError::NotFound(_))) => {}
                Err(err) => report.fail(&entry.metadata_file, err),
            }
        }

        let mut manifest_lists = BTreeSet::new();
        for document in &documents {
            for snapshot in &document.snapshots {
                manifest_lists.insert(snapshot.manifest_list.clone());
            }
            for stats in &document.statistics {
                reachable.metadata.insert(stats.statistics_path.clone());
            }
        }

        for list_path in manifest_lists {
            reachable.metadata.insert(list_path.clone());
            let list =
                match manifest::read_manifest_list(self.objects.as_ref(), auth, &list_path).await {
                    Ok(list) => list,
                    Err(ManifestError::Storage(StorageError::NotFound(_))) => continue,
                    Err(err) => {
                        report.fail(&list_path, err);
                        continue;
                    }
                };
            for manifest_file in list.manifests {
                if !reachable.metadata.insert(manifest_file.manifest_path.clone()) {
                    continue;
                }
                match manifest::read_manifest(
                    self.objects.as_ref(),
                    auth,
                    &manifest_file.manifest_path,
                )
                .await
                {
                    Ok(m) => reachable
                        .data
                        .extend(m.entries.into_iter().map(|e| e.data_file.file_path)),
                    Err(ManifestError::Storage(StorageError::NotFound(_))) => {}
                    Err(err) => report.fail(&manifest_file.manifest_path, err),
                }
            }
        }
        reachable
    }

    async fn list_prefix(
        &self,
        credential: &ScopedCredential,
        prefix: &str,
        report: &mut PurgeReport,
    ) -> Vec<String> {
        let listed = storage::with_timeout(
            "list",
            self.config.delete_timeout(),
            self.objects.list(StorageAuth::Scoped(credential), prefix),
        )
        .await;
        match listed {
            Ok(objects) => objects.into_iter().map(|o| o.location).collect(),
            Err(err) => {
                report.fail(prefix, err);
                Vec::new()
            }
        }
    }

    async fn delete_all(
        &self,
        credential: &ScopedCredential,
        locations: &[String],
        report: &mut PurgeReport,
    ) -> usize {
        let mut deleted = 0;
        for location in locations {
            let result = storage::with_timeout(
                "delete",
                self.config.delete_timeout(),
                self.objects.delete(StorageAuth::Scoped(credential), location),
            )
            .await;
            match result {
                Ok(()) => deleted += 1,
                Err(err) => report.fail(location, err),
            }
        }
        deleted
    }
}

/// Poll `prefix` until it is empty, at most `attempts` times.
///
/// Returns whether the prefix converged to empty.
pub async fn wait_for_empty_prefix(
    objects: &dyn ObjectStore,
    auth: StorageAuth<'_>,
    prefix: &str,
    attempts: u32,
    interval: Duration,
) -> Result<bool, StorageError> {
    for attempt in 0..attempts {
        if objects.list(auth, prefix).await?.is_empty() {
            return Ok(true);
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(false)
}
