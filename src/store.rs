use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    dataset::{Dataset, DatasetKind, InsightDataset, Record},
    error::{FacadeError, InsightError},
};

/// Ids are non-blank and never contain `_`, which separates the id from the
/// field in query keys.
pub fn validate_id(id: &str) -> Result<(), InsightError> {
    if id.trim().is_empty() || id.contains('_') {
        return Err(InsightError::InvalidId(id.to_owned()));
    }
    Ok(())
}

/// Removal treats an empty id as simply absent; a malformed one is rejected
/// before lookup.
fn check_removal_id(id: &str) -> Result<(), FacadeError> {
    if id.is_empty() {
        return Err(FacadeError::NotFound(id.to_owned()));
    }
    Ok(validate_id(id)?)
}

#[derive(Debug)]
enum Slot {
    /// Claimed by an add that has not committed yet.
    Pending,
    Ready(Arc<Dataset>),
}

impl Slot {
    fn ready(&self) -> Option<&Arc<Dataset>> {
        match self {
            Slot::Ready(dataset) => Some(dataset),
            Slot::Pending => None,
        }
    }
}

/// In-memory datasets by id.
///
/// Readers get an `Arc` of a fully built dataset; a dataset only becomes
/// visible once its [`Reservation`] commits. Shard locks are only held for
/// map operations, never while a dataset is built or persisted.
#[derive(Debug, Default)]
pub struct DatasetStore {
    datasets: DashMap<String, Slot>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Dataset>> {
        self.datasets.get(id).and_then(|slot| slot.ready().cloned())
    }

    /// Claims `id` for an add. Fails if the id is malformed or already
    /// claimed, whether committed or still pending.
    pub fn reserve(&self, id: &str) -> Result<Reservation<'_>, InsightError> {
        validate_id(id)?;

        match self.datasets.entry(id.to_owned()) {
            Entry::Occupied(_) => Err(InsightError::DuplicateId(id.to_owned())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Pending);
                Ok(Reservation {
                    store: self,
                    id: id.to_owned(),
                    committed: false,
                })
            }
        }
    }

    pub fn insert(&self, dataset: Dataset) -> Result<usize, InsightError> {
        let reservation = self.reserve(&dataset.id)?;
        Ok(reservation.commit(Arc::new(dataset)))
    }

    pub fn add(&self, id: &str, kind: DatasetKind, records: Vec<Record>) -> Result<usize, InsightError> {
        self.insert(Dataset::new(id, kind, records))
    }

    /// Looks up a dataset under the same id rules as [`DatasetStore::remove`].
    pub fn lookup(&self, id: &str) -> Result<Arc<Dataset>, FacadeError> {
        check_removal_id(id)?;
        self.get(id).ok_or_else(|| FacadeError::NotFound(id.to_owned()))
    }

    pub fn remove(&self, id: &str) -> Result<String, FacadeError> {
        check_removal_id(id)?;

        self.datasets
            .remove_if(id, |_, slot| slot.ready().is_some())
            .map(|(id, _)| id)
            .ok_or_else(|| FacadeError::NotFound(id.to_owned()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .datasets
            .iter()
            .filter(|entry| entry.value().ready().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn list(&self) -> Result<Vec<InsightDataset>, InsightError> {
        let mut infos = Vec::with_capacity(self.datasets.len());
        for entry in self.datasets.iter() {
            let dataset = match entry.value().ready() {
                Some(dataset) => dataset,
                None => continue,
            };
            if entry.key() != &dataset.id {
                return Err(InsightError::Internal(format!(
                    "dataset {:?} stored under id {:?}",
                    dataset.id,
                    entry.key()
                )));
            }
            infos.push(dataset.info());
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }
}

/// An id claimed by an add in progress.
///
/// Readers don't see it and other adds of the same id fail. Dropping it
/// without [`Reservation::commit`] frees the id again.
#[derive(Debug)]
pub struct Reservation<'a> {
    store: &'a DatasetStore,
    id: String,
    committed: bool,
}

impl Reservation<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publishes `dataset` under the reserved id and returns its row count.
    pub fn commit(mut self, dataset: Arc<Dataset>) -> usize {
        let num_rows = dataset.num_rows();
        self.store
            .datasets
            .insert(self.id.clone(), Slot::Ready(dataset));
        self.committed = true;
        num_rows
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store
                .datasets
                .remove_if(&self.id, |_, slot| matches!(slot, Slot::Pending));
        }
    }
}
