// Table Scan
//
// Reads the live rows of a table's current snapshot and evaluates
// projection queries, the structured form of a view.

use std::cmp::Ordering;

use crate::manifest::{self, ManifestError};
use crate::metadata::view::{OrderBy, ProjectionQuery};
use crate::metadata::{SortDirection, TableMetadata};
use crate::row::{Row, RowError};
use crate::storage::{ObjectStore, StorageAuth};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Io(#[from] ManifestError),

    #[error(transparent)]
    Row(#[from] RowError),

    #[error("table has no current schema")]
    NoSchema,
}

/// Named columns and the rows under them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

pub struct TableScan<'a> {
    objects: &'a dyn ObjectStore,
    auth: StorageAuth<'a>,
    metadata: &'a TableMetadata,
}

impl<'a> TableScan<'a> {
    pub fn new(
        objects: &'a dyn ObjectStore,
        auth: StorageAuth<'a>,
        metadata: &'a TableMetadata,
    ) -> Self {
        Self {
            objects,
            auth,
            metadata,
        }
    }

    /// Every live row of the current snapshot. Empty for a table without snapshots.
    pub async fn rows(&self) -> Result<Vec<Row>, ScanError> {
        let Some(snapshot) = self.metadata.current_snapshot() else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for file in manifest::live_data_files(self.objects, self.auth, snapshot).await? {
            rows.extend(manifest::read_rows(self.objects, self.auth, &file).await?);
        }
        Ok(rows)
    }

    pub async fn count(&self) -> Result<usize, ScanError> {
        Ok(self.rows().await?.len())
    }

    /// Filter, order and project the current rows.
    #[tracing::instrument(skip_all, fields(table = %query.table))]
    pub async fn project(&self, query: &ProjectionQuery) -> Result<ResultSet, ScanError> {
        let schema = self.metadata.current_schema().ok_or(ScanError::NoSchema)?;

        let columns: Vec<String> = if query.columns.is_empty() {
            schema.fields.iter().map(|f| f.name.clone()).collect()
        } else {
            query.columns.clone()
        };
        let positions = columns
            .iter()
            .map(|c| {
                schema
                    .field_index(c)
                    .ok_or_else(|| RowError::UnknownColumn(c.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for row in self.rows().await? {
            let keep = match &query.filter {
                Some(filter) => filter.evaluate(schema, &row)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        if let Some(OrderBy { column, direction }) = &query.order_by {
            let position = schema
                .field_index(column)
                .ok_or_else(|| RowError::UnknownColumn(column.clone()))?;
            rows.sort_by(|a, b| {
                let ordering = order_nulls_last(&a[position], &b[position]);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let rows = rows
            .into_iter()
            .map(|row| positions.iter().map(|p| row[*p].clone()).collect())
            .collect();
        Ok(ResultSet { columns, rows })
    }
}

fn order_nulls_last(a: &crate::row::Datum, b: &crate::row::Datum) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}
