// Table Writer
//
// Writes data files and manifests through a scoped credential and
// returns the commit that publishes them. Nothing becomes visible
// until the commit coordinator accepts that request.

use uuid::Uuid;

use crate::commit::CommitRequest;
use crate::credentials::ScopedCredential;
use crate::manifest::{
    self, DataFile, Manifest, ManifestEntry, ManifestError, ManifestList, ManifestStatus,
};
use crate::metadata::snapshot::{
    SUMMARY_ADDED_DATA_FILES, SUMMARY_ADDED_RECORDS, SUMMARY_DELETED_DATA_FILES,
    SUMMARY_DELETED_RECORDS, SUMMARY_TOTAL_DATA_FILES, SUMMARY_TOTAL_RECORDS,
};
use crate::metadata::{
    Operation, Schema, Snapshot, SnapshotRef, Summary, TableMetadata, MAIN_BRANCH,
};
use crate::row::{validate_row, Assignment, Predicate, Row, RowError};
use crate::storage::{ObjectStore, StorageAuth};
use crate::store::TablePointer;
use crate::update::{TableRequirement, TableUpdate};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] ManifestError),

    #[error("invalid row: {0}")]
    Row(#[from] RowError),

    #[error("table has no current schema")]
    NoSchema,

    #[error("nothing to write")]
    Empty,

    // data-only credentials are for engines that hand manifests to the
    // catalog instead of writing them
    #[error("credential for {0} cannot write table metadata files")]
    MetadataNotWritable(String),
}

/// Positive snapshot id derived from a random uuid.
pub fn new_snapshot_id() -> i64 {
    let (hi, lo) = Uuid::new_v4().as_u64_pair();
    let id = ((hi ^ lo) & i64::MAX as u64) as i64;
    id.max(1)
}

pub struct TableWriter<'a> {
    objects: &'a dyn ObjectStore,
    credential: &'a ScopedCredential,
    base: &'a TablePointer,
}

/// Files written for one new snapshot.
struct Staged {
    snapshot_id: i64,
    entries: Vec<ManifestEntry>,
    carried: Vec<manifest::ManifestFile>,
    summary: Summary,
}

impl<'a> TableWriter<'a> {
    pub fn new(
        objects: &'a dyn ObjectStore,
        credential: &'a ScopedCredential,
        base: &'a TablePointer,
    ) -> Self {
        Self {
            objects,
            credential,
            base,
        }
    }

    fn auth(&self) -> StorageAuth<'a> {
        StorageAuth::Scoped(self.credential)
    }

    fn metadata(&self) -> &'a TableMetadata {
        self.base.metadata.as_ref()
    }

    fn check_writable(&self) -> Result<(), WriteError> {
        if self.credential.can_write_metadata() {
            Ok(())
        } else {
            Err(WriteError::MetadataNotWritable(
                self.credential.location.clone(),
            ))
        }
    }

    fn schema(&self) -> Result<&'a Schema, WriteError> {
        self.metadata().current_schema().ok_or(WriteError::NoSchema)
    }

    async fn write_data_file(&self, rows: &[Row]) -> Result<DataFile, WriteError> {
        let file_path = format!("{}{}.json", self.metadata().data_prefix(), Uuid::new_v4());
        let size = manifest::write_json(self.objects, self.auth(), &file_path, &rows).await?;
        Ok(DataFile {
            file_path,
            record_count: rows.len() as u64,
            file_size_in_bytes: size,
        })
    }

    /// Append `rows` as one new data file (fast append).
    #[tracing::instrument(skip_all, fields(location = %self.metadata().location, rows = rows.len()))]
    pub async fn append(&self, rows: Vec<Row>) -> Result<CommitRequest, WriteError> {
        self.check_writable()?;
        if rows.is_empty() {
            return Err(WriteError::Empty);
        }
        let schema = self.schema()?;
        for row in &rows {
            validate_row(schema, row)?;
        }

        let metadata = self.metadata();
        let parent = metadata.current_snapshot();
        let carried = match parent {
            Some(parent) => {
                manifest::read_manifest_list(self.objects, self.auth(), &parent.manifest_list)
                    .await?
                    .manifests
            }
            None => Vec::new(),
        };
        let total_records = parent
            .and_then(|p| p.summary.get_u64(SUMMARY_TOTAL_RECORDS))
            .unwrap_or(0);
        let total_files = parent
            .and_then(|p| p.summary.get_u64(SUMMARY_TOTAL_DATA_FILES))
            .unwrap_or(0);

        let snapshot_id = new_snapshot_id();
        let data_file = self.write_data_file(&rows).await?;
        let summary = Summary::new(Operation::Append)
            .with(SUMMARY_ADDED_RECORDS, rows.len())
            .with(SUMMARY_ADDED_DATA_FILES, 1)
            .with(SUMMARY_TOTAL_RECORDS, total_records + rows.len() as u64)
            .with(SUMMARY_TOTAL_DATA_FILES, total_files + 1);

        self.publish(Staged {
            snapshot_id,
            entries: vec![ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id,
                data_file,
            }],
            carried,
            summary,
        })
        .await
    }

    /// Copy-on-write update: rewrite every live file holding a row that
    /// matches `filter`. Returns `None` when no row matched.
    #[tracing::instrument(skip_all, fields(location = %self.metadata().location, column = filter.column()))]
    pub async fn overwrite(
        &self,
        filter: &Predicate,
        assignments: &[Assignment],
    ) -> Result<Option<CommitRequest>, WriteError> {
        self.check_writable()?;
        let schema = self.schema()?;
        let positions = assignments
            .iter()
            .map(|a| {
                schema
                    .field_index(&a.column)
                    .ok_or_else(|| RowError::UnknownColumn(a.column.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let metadata = self.metadata();
        let Some(parent) = metadata.current_snapshot() else {
            return Ok(None);
        };

        let list =
            manifest::read_manifest_list(self.objects, self.auth(), &parent.manifest_list).await?;
        let mut live = Vec::new();
        for manifest_file in &list.manifests {
            let manifest =
                manifest::read_manifest(self.objects, self.auth(), &manifest_file.manifest_path)
                    .await?;
            live.extend(
                manifest
                    .entries
                    .into_iter()
                    .filter(|e| e.status != ManifestStatus::Deleted),
            );
        }

        let snapshot_id = new_snapshot_id();
        let mut entries = Vec::with_capacity(live.len());
        let (mut added_records, mut deleted_records) = (0u64, 0u64);
        let (mut added_files, mut deleted_files) = (0u64, 0u64);

        for entry in live {
            let rows = manifest::read_rows(self.objects, self.auth(), &entry.data_file).await?;
            let mut matched = false;
            let mut rewritten = Vec::with_capacity(rows.len());
            for mut row in rows {
                if filter.evaluate(schema, &row)? {
                    matched = true;
                    for (position, assignment) in positions.iter().zip(assignments) {
                        row[*position] = assignment.value.clone();
                    }
                    validate_row(schema, &row)?;
                }
                rewritten.push(row);
            }

            if !matched {
                entries.push(ManifestEntry {
                    status: ManifestStatus::Existing,
                    ..entry
                });
                continue;
            }

            let new_file = self.write_data_file(&rewritten).await?;
            deleted_records += entry.data_file.record_count;
            added_records += new_file.record_count;
            deleted_files += 1;
            added_files += 1;
            entries.push(ManifestEntry {
                status: ManifestStatus::Deleted,
                snapshot_id,
                data_file: entry.data_file,
            });
            entries.push(ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id,
                data_file: new_file,
            });
        }

        if added_files == 0 {
            return Ok(None);
        }

        let total_records = parent.summary.get_u64(SUMMARY_TOTAL_RECORDS).unwrap_or(0);
        let total_files = parent.summary.get_u64(SUMMARY_TOTAL_DATA_FILES).unwrap_or(0);
        let summary = Summary::new(Operation::Overwrite)
            .with(SUMMARY_ADDED_RECORDS, added_records)
            .with(SUMMARY_DELETED_RECORDS, deleted_records)
            .with(SUMMARY_ADDED_DATA_FILES, added_files)
            .with(SUMMARY_DELETED_DATA_FILES, deleted_files)
            .with(
                SUMMARY_TOTAL_RECORDS,
                (total_records + added_records).saturating_sub(deleted_records),
            )
            .with(
                SUMMARY_TOTAL_DATA_FILES,
                (total_files + added_files).saturating_sub(deleted_files),
            );

        self.publish(Staged {
            snapshot_id,
            entries,
            carried: Vec::new(),
            summary,
        })
        .await
        .map(Some)
    }

    /// Write the manifest and manifest list, and build the commit.
    async fn publish(&self, staged: Staged) -> Result<CommitRequest, WriteError> {
        let metadata = self.metadata();
        let prefix = metadata.metadata_prefix();
        let token = Uuid::new_v4();

        let manifest = Manifest {
            entries: staged.entries,
        };
        let manifest_path = format!("{prefix}{token}-m0.json");
        manifest::write_json(self.objects, self.auth(), &manifest_path, &manifest).await?;

        let mut manifests = vec![manifest.describe(&manifest_path)];
        manifests.extend(staged.carried);
        let list = ManifestList {
            snapshot_id: staged.snapshot_id,
            manifests,
        };
        let list_path = format!("{prefix}snap-{}-{token}.json", staged.snapshot_id);
        manifest::write_json(self.objects, self.auth(), &list_path, &list).await?;

        let snapshot = Snapshot {
            snapshot_id: staged.snapshot_id,
            parent_snapshot_id: metadata.current_snapshot_id,
            sequence_number: metadata.last_sequence_number + 1,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            manifest_list: list_path,
            summary: staged.summary,
            schema_id: Some(metadata.current_schema_id),
        };
        tracing::debug!(snapshot_id = snapshot.snapshot_id, "staged snapshot");

        Ok(CommitRequest {
            base: Some(self.base.version),
            requirements: vec![
                TableRequirement::AssertTableUuid {
                    uuid: metadata.table_uuid,
                },
                TableRequirement::AssertRefSnapshotId {
                    reference: MAIN_BRANCH.to_string(),
                    snapshot_id: metadata.current_snapshot_id,
                },
            ],
            updates: vec![
                TableUpdate::AddSnapshot { snapshot },
                TableUpdate::set_ref(MAIN_BRANCH, &SnapshotRef::branch(staged.snapshot_id)),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::tests::new_table;
    use crate::apply::UpdateApplier;
    use crate::config::CredentialsConfig;
    use crate::credentials::{AccessMode, CredentialVendor, WriteScope};
    use crate::row::{CompareOp, Datum};
    use crate::storage::InMemoryObjectStore;
    use std::sync::Arc;

    fn rows() -> Vec<Row> {
        vec![
            vec![Datum::Int(10), Datum::from("a")],
            vec![Datum::Int(20), Datum::from("b")],
            vec![Datum::Int(30), Datum::from("c")],
        ]
    }

    async fn setup() -> (Arc<InMemoryObjectStore>, ScopedCredential, TablePointer) {
        let objects = Arc::new(InMemoryObjectStore::new());
        let table = new_table();
        let credential = CredentialVendor::new(objects.clone(), CredentialsConfig::default())
            .vend("writer", &table.location, AccessMode::Write)
            .await
            .unwrap();
        let pointer = TablePointer {
            version: 1,
            metadata_location: "unused".into(),
            metadata: Arc::new(table),
        };
        (objects, credential, pointer)
    }

    fn commit(pointer: &TablePointer, request: &CommitRequest) -> TablePointer {
        for requirement in &request.requirements {
            requirement.check(Some(pointer.metadata.as_ref())).unwrap();
        }
        let next = UpdateApplier::default()
            .apply(&pointer.metadata, &request.updates, 10)
            .unwrap();
        TablePointer {
            version: pointer.version + 1,
            metadata_location: "unused".into(),
            metadata: Arc::new(next),
        }
    }

    #[tokio::test]
    async fn data_only_credential_is_refused_before_any_write() {
        let objects = Arc::new(InMemoryObjectStore::new());
        let table = new_table();
        let config = CredentialsConfig {
            write_scope: WriteScope::DataOnly,
            ..CredentialsConfig::default()
        };
        let credential = CredentialVendor::new(objects.clone(), config)
            .vend("writer", &table.location, AccessMode::Write)
            .await
            .unwrap();
        let pointer = TablePointer {
            version: 1,
            metadata_location: "unused".into(),
            metadata: Arc::new(table),
        };

        let writer = TableWriter::new(objects.as_ref(), &credential, &pointer);
        assert!(matches!(
            writer.append(rows()).await,
            Err(WriteError::MetadataNotWritable(_))
        ));
        assert_eq!(objects.count_prefix(&pointer.metadata.location), 0);
    }

    #[test]
    fn snapshot_ids_are_positive() {
        for _ in 0..100 {
            assert!(new_snapshot_id() > 0);
        }
    }

    #[tokio::test]
    async fn append_stages_files_and_pins_base() {
        let (objects, credential, pointer) = setup().await;
        let writer = TableWriter::new(objects.as_ref(), &credential, &pointer);
        let request = writer.append(rows()).await.unwrap();

        assert_eq!(request.base, Some(1));
        assert_eq!(
            request.requirements[1],
            TableRequirement::AssertRefSnapshotId {
                reference: MAIN_BRANCH.into(),
                snapshot_id: None
            }
        );
        let TableUpdate::AddSnapshot { snapshot } = &request.updates[0] else {
            panic!("expected add-snapshot first");
        };
        assert_eq!(snapshot.total_records(), Some(3));
        assert_eq!(snapshot.sequence_number, 1);

        // data file, manifest and manifest list
        assert_eq!(objects.count_prefix(&pointer.metadata.data_prefix()), 1);
        assert_eq!(objects.count_prefix(&pointer.metadata.metadata_prefix()), 2);
    }

    #[tokio::test]
    async fn append_rejects_rows_that_do_not_fit() {
        let (objects, credential, pointer) = setup().await;
        let writer = TableWriter::new(objects.as_ref(), &credential, &pointer);
        let err = writer
            .append(vec![vec![Datum::from("x"), Datum::from("y")]])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Row(RowError::TypeMismatch { .. })));
        assert_eq!(objects.count_prefix("s3://"), 0);

        assert!(matches!(writer.append(vec![]).await, Err(WriteError::Empty)));
    }

    #[tokio::test]
    async fn appends_accumulate_totals() {
        let (objects, credential, pointer) = setup().await;
        let first = commit(
            &pointer,
            &TableWriter::new(objects.as_ref(), &credential, &pointer)
                .append(rows())
                .await
                .unwrap(),
        );
        let second = commit(
            &first,
            &TableWriter::new(objects.as_ref(), &credential, &first)
                .append(vec![vec![Datum::Int(40), Datum::Null]])
                .await
                .unwrap(),
        );

        let current = second.metadata.current_snapshot().unwrap();
        assert_eq!(current.total_records(), Some(4));
        assert_eq!(current.parent_snapshot_id, first.metadata.current_snapshot_id);
        let files = manifest::live_data_files(objects.as_ref(), StorageAuth::Service, current)
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn overwrite_rewrites_only_matching_files() {
        let (objects, credential, pointer) = setup().await;
        let one = commit(
            &pointer,
            &TableWriter::new(objects.as_ref(), &credential, &pointer)
                .append(rows())
                .await
                .unwrap(),
        );
        let two = commit(
            &one,
            &TableWriter::new(objects.as_ref(), &credential, &one)
                .append(vec![vec![Datum::Int(99), Datum::from("z")]])
                .await
                .unwrap(),
        );

        let writer = TableWriter::new(objects.as_ref(), &credential, &two);
        let request = writer
            .overwrite(
                &Predicate::between("col1", 15, 25),
                &[Assignment {
                    column: "col2".into(),
                    value: Datum::from("updated"),
                }],
            )
            .await
            .unwrap()
            .unwrap();
        let three = commit(&two, &request);

        let current = three.metadata.current_snapshot().unwrap();
        assert_eq!(current.summary.operation, Operation::Overwrite);
        assert_eq!(current.total_records(), Some(4));
        assert_eq!(current.summary.get_u64(SUMMARY_DELETED_DATA_FILES), Some(1));

        let files = manifest::live_data_files(objects.as_ref(), StorageAuth::Service, current)
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        let mut all = Vec::new();
        for file in &files {
            all.extend(
                manifest::read_rows(objects.as_ref(), StorageAuth::Service, file)
                    .await
                    .unwrap(),
            );
        }
        assert!(all.contains(&vec![Datum::Int(20), Datum::from("updated")]));
        assert!(all.contains(&vec![Datum::Int(10), Datum::from("a")]));
        assert!(all.contains(&vec![Datum::Int(99), Datum::from("z")]));
    }

    #[tokio::test]
    async fn overwrite_without_match_is_none() {
        let (objects, credential, pointer) = setup().await;
        let one = commit(
            &pointer,
            &TableWriter::new(objects.as_ref(), &credential, &pointer)
                .append(rows())
                .await
                .unwrap(),
        );
        let writer = TableWriter::new(objects.as_ref(), &credential, &one);
        let outcome = writer
            .overwrite(
                &Predicate::compare("col1", CompareOp::Gt, 1000),
                &[Assignment {
                    column: "col2".into(),
                    value: Datum::from("never"),
                }],
            )
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn read_credential_cannot_write() {
        let (objects, _, pointer) = setup().await;
        let reader = CredentialVendor::new(objects.clone(), CredentialsConfig::default())
            .vend("reader", &pointer.metadata.location, AccessMode::Read)
            .await
            .unwrap();
        let err = TableWriter::new(objects.as_ref(), &reader, &pointer)
            .append(rows())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WriteError::Io(ManifestError::Storage(crate::storage::StorageError::AccessDenied { .. }))
        ));
    }
}
