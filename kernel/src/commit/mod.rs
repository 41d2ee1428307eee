// Commit Coordinator
//
// Optimistic concurrency for table commits. A commit names the version
// it read; the new metadata is only installed if the store still points
// at that version when the compare-and-swap runs.
//
// Lifecycle: Proposed -> Validated -> Committed, or Proposed/Validated
// -> Rejected. No partial application is ever visible.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::apply::{ApplyError, UpdateApplier};
use crate::config::MetadataConfig;
use crate::ident::TableIdent;
use crate::manifest::ManifestError;
use crate::metadata::{MetadataLogEntry, TableMetadata, METADATA_DIR};
use crate::storage::{self, ObjectStore, StorageAuth};
use crate::store::{MetadataStore, StoreError, TablePointer, Version};
use crate::update::{RequirementError, TableRequirement, TableUpdate};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Version the caller read, `None` to create the table.
    pub base: Option<Version>,
    #[serde(default)]
    pub requirements: Vec<TableRequirement>,
    pub updates: Vec<TableUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Proposed,
    Validated,
    Committed,
    Rejected,
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("commit conflict on {ident}: {reason}")]
    Conflict { ident: TableIdent, reason: String },

    #[error(transparent)]
    Requirement(#[from] RequirementError),

    #[error("invalid commit: {0}")]
    Validation(#[from] ApplyError),

    #[error("table {0} does not exist")]
    NotFound(TableIdent),

    #[error(transparent)]
    Store(StoreError),

    #[error("cannot write metadata file: {0}")]
    Io(#[from] ManifestError),

    #[error("illegal commit transition from {from:?} to {to:?}")]
    IllegalTransition { from: CommitState, to: CommitState },
}

impl CommitError {
    /// Conflicts mean "reload and retry", never a server-side retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CommitError::Conflict { .. } | CommitError::Requirement(_)
        )
    }
}

impl From<StoreError> for CommitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { ident, .. } => CommitError::Conflict {
                ident,
                reason: "the current version moved".into(),
            },
            StoreError::AlreadyExists(ident) => CommitError::Conflict {
                ident,
                reason: "the name is already taken".into(),
            },
            StoreError::TableNotFound(ident) => CommitError::NotFound(ident),
            other => CommitError::Store(other),
        }
    }
}

/// Stateful reducer for the lifecycle of one commit attempt.
#[derive(Debug)]
pub struct CommitStateMachine {
    state: CommitState,
}

impl Default for CommitStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitStateMachine {
    pub fn new() -> Self {
        Self {
            state: CommitState::Proposed,
        }
    }

    pub fn advance(&mut self, to: CommitState) -> Result<(), CommitError> {
        use CommitState::*;

        self.state = match (self.state, to) {
            (Proposed, Validated) => Validated,
            (Validated, Committed) => Committed,
            (Proposed | Validated, Rejected) => Rejected,
            (from, to) => return Err(CommitError::IllegalTransition { from, to }),
        };
        Ok(())
    }

    pub fn current_state(&self) -> CommitState {
        self.state
    }
}

/// `<location>/metadata/<version:05>-<uuid>.metadata.json`
pub fn metadata_file_location(metadata: &TableMetadata, version: Version) -> String {
    format!(
        "{}/{METADATA_DIR}/{version:05}-{}.metadata.json",
        metadata.base_location(),
        Uuid::new_v4()
    )
}

pub struct CommitCoordinator {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    applier: UpdateApplier,
    config: MetadataConfig,
    io_timeout: Duration,
}

impl CommitCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        config: MetadataConfig,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            objects,
            applier: UpdateApplier::default(),
            config,
            io_timeout,
        }
    }

    /// Replace the applier, e.g. to register extra invariants.
    pub fn with_applier(mut self, applier: UpdateApplier) -> Self {
        self.applier = applier;
        self
    }

    #[tracing::instrument(skip_all, fields(table = %ident, base = ?request.base))]
    pub async fn commit(
        &self,
        ident: &TableIdent,
        request: &CommitRequest,
    ) -> Result<TablePointer, CommitError> {
        let mut state = CommitStateMachine::new();
        match self.try_commit(ident, request, &mut state).await {
            Ok(pointer) => {
                tracing::info!(version = pointer.version, "commit accepted");
                Ok(pointer)
            }
            Err(err) => {
                if state.current_state() != CommitState::Rejected {
                    state.advance(CommitState::Rejected)?;
                }
                if err.is_conflict() {
                    tracing::info!(error = %err, "commit rejected");
                } else {
                    tracing::warn!(error = %err, "commit failed");
                }
                Err(err)
            }
        }
    }

    async fn try_commit(
        &self,
        ident: &TableIdent,
        request: &CommitRequest,
        state: &mut CommitStateMachine,
    ) -> Result<TablePointer, CommitError> {
        let current = match self.store.load_table(ident) {
            Ok(pointer) => Some(pointer),
            Err(StoreError::TableNotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };

        match (request.base, &current) {
            (None, Some(_)) => {
                return Err(CommitError::Conflict {
                    ident: ident.clone(),
                    reason: "table already exists".into(),
                })
            }
            (Some(_), None) => return Err(CommitError::NotFound(ident.clone())),
            (Some(base), Some(pointer)) if base != pointer.version => {
                return Err(CommitError::Conflict {
                    ident: ident.clone(),
                    reason: format!(
                        "base version {base} is stale, current is {}",
                        pointer.version
                    ),
                })
            }
            _ => {}
        }

        let current_metadata = current.as_ref().map(|p| p.metadata.as_ref());
        for requirement in &request.requirements {
            requirement.check(current_metadata)?;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut next = match current_metadata {
            None => self.applier.create(&request.updates, now_ms)?,
            Some(base) => self.applier.apply(base, &request.updates, now_ms)?,
        };
        state.advance(CommitState::Validated)?;

        if let Some(previous) = &current {
            next.metadata_log.push(MetadataLogEntry {
                metadata_file: previous.metadata_location.clone(),
                timestamp_ms: previous.metadata.last_updated_ms,
            });
            let keep = next.previous_versions_max(self.config.previous_versions_max);
            let excess = next.metadata_log.len().saturating_sub(keep);
            next.metadata_log.drain(..excess);
        }

        let version = request.base.map_or(1, |v| v + 1);
        let location = metadata_file_location(&next, version);
        let body = serde_json::to_vec(&next).map_err(ManifestError::Encode)?;
        storage::with_timeout(
            "write metadata",
            self.io_timeout,
            self.objects
                .put(StorageAuth::Service, &location, Bytes::from(body)),
        )
        .await
        .map_err(ManifestError::from)?;

        match self
            .store
            .compare_and_swap_table(ident, request.base, location.clone(), next)
        {
            Ok(pointer) => {
                state.advance(CommitState::Committed)?;
                Ok(pointer)
            }
            Err(err) => {
                state.advance(CommitState::Rejected)?;
                if let Err(cleanup) = self.objects.delete(StorageAuth::Service, &location).await {
                    tracing::warn!(%location, error = %cleanup, "cannot delete orphaned metadata file");
                }
                Err(err.into())
            }
        }
    }
}
