use std::{path::PathBuf, sync::Arc};

use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use crate::{
    archive::{decode_base64, ArchiveReader, TarGzReader},
    ast::Query,
    dataset::{Dataset, DatasetKind, InsightDataset},
    error::{FacadeError, InsightError, QueryError},
    evaluator::{self, ResultRow, MAX_RESULT_ROWS},
    ingest::extract_records,
    snapshot::Snapshot,
    store::DatasetStore,
    validator,
};

#[derive(Clone, Debug)]
pub struct FacadeConfig {
    /// SQLite file mirroring the store. `None` keeps datasets in memory only.
    pub snapshot: Option<PathBuf>,
    pub max_result_rows: usize,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            snapshot: None,
            max_result_rows: MAX_RESULT_ROWS,
        }
    }
}

/// Entry point for adding, removing, listing and querying datasets.
///
/// Archive decoding and query evaluation run on tokio's blocking pool, so
/// the operations must be awaited inside a tokio runtime.
pub struct InsightFacade {
    store: Arc<DatasetStore>,
    snapshot: Option<Arc<Snapshot>>,
    reader: Arc<dyn ArchiveReader>,
    max_result_rows: usize,
}

impl Default for InsightFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl InsightFacade {
    pub fn new() -> Self {
        Self {
            store: Arc::new(DatasetStore::new()),
            snapshot: None,
            reader: Arc::new(TarGzReader),
            max_result_rows: MAX_RESULT_ROWS,
        }
    }

    /// Builds a facade from `config`, reloading every dataset held in the
    /// snapshot if one is configured.
    pub fn with_config(config: FacadeConfig) -> Result<Self, InsightError> {
        let mut facade = Self::new();
        facade.max_result_rows = config.max_result_rows;

        if let Some(path) = &config.snapshot {
            let snapshot = Snapshot::open(path).map_err(snapshot_error)?;
            for dataset in snapshot.load_all().map_err(snapshot_error)? {
                info!(id = %dataset.id, rows = dataset.num_rows(), "restored dataset");
                facade.store.insert(dataset)?;
            }
            facade.snapshot = Some(Arc::new(snapshot));
        }

        Ok(facade)
    }

    pub fn with_reader(mut self, reader: impl ArchiveReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    /// Decodes, validates and registers a dataset, returning the ids of all
    /// registered datasets.
    #[instrument(skip(self, content), err)]
    pub async fn add_dataset(
        &self,
        id: &str,
        content: &str,
        kind: DatasetKind,
    ) -> Result<Vec<String>, FacadeError> {
        let reservation = self.store.reserve(id)?;

        let reader = Arc::clone(&self.reader);
        let content = content.to_owned();
        let records = tokio::task::spawn_blocking(move || {
            let bytes = decode_base64(&content)?;
            let entries = reader.unpack(&bytes).map_err(InsightError::Archive)?;
            extract_records(kind, &entries)
        })
        .await
        .map_err(join_error)??;

        let dataset = Arc::new(Dataset::new(id, kind, records));
        if let Some(snapshot) = &self.snapshot {
            let snapshot = Arc::clone(snapshot);
            let pending = Arc::clone(&dataset);
            tokio::task::spawn_blocking(move || snapshot.save(&pending))
                .await
                .map_err(join_error)?
                .map_err(snapshot_error)?;
        }
        let num_rows = reservation.commit(dataset);
        info!(id, kind = %kind, num_rows, "added dataset");

        Ok(self.store.ids())
    }

    #[instrument(skip(self), err)]
    pub async fn remove_dataset(&self, id: &str) -> Result<String, FacadeError> {
        if let Some(snapshot) = &self.snapshot {
            // The row goes first, so a failed delete leaves the dataset in place.
            let dataset = self.store.lookup(id)?;
            let snapshot = Arc::clone(snapshot);
            tokio::task::spawn_blocking(move || snapshot.delete(&dataset.id))
                .await
                .map_err(join_error)?
                .map_err(snapshot_error)?;
        }
        let removed = self.store.remove(id)?;
        info!(id = %removed, "removed dataset");
        Ok(removed)
    }

    pub async fn list_datasets(&self) -> Result<Vec<InsightDataset>, FacadeError> {
        Ok(self.store.list()?)
    }

    /// Validates `query` in full, then evaluates it.
    #[instrument(skip_all)]
    pub async fn perform_query(&self, query: &JsonValue) -> Result<Vec<ResultRow>, FacadeError> {
        let query = validator::validate(query, &self.store).map_err(|err| {
            warn!(reason = ?err, "rejected query");
            err
        })?;
        self.execute(query).await
    }

    async fn execute(&self, query: Query) -> Result<Vec<ResultRow>, FacadeError> {
        // The dataset may have been removed since validation.
        let dataset = self
            .store
            .get(&query.dataset)
            .ok_or_else(|| QueryError::UnknownDataset(query.dataset.clone()))?;

        let max_rows = self.max_result_rows;
        let rows = tokio::task::spawn_blocking(move || evaluator::execute(&query, &dataset, max_rows))
            .await
            .map_err(join_error)?
            .map_err(|err| {
                warn!(reason = %err, "query failed");
                err
            })?;

        Ok(rows)
    }
}

fn join_error(err: tokio::task::JoinError) -> InsightError {
    InsightError::Internal(err.to_string())
}

fn snapshot_error(err: anyhow::Error) -> InsightError {
    InsightError::Snapshot(format!("{:#}", err))
}
