//! In-process [`HarvestStore`] backed by ordered maps.

use super::{HarvestStore, StoreError};
use crate::model::{GatherError, HarvestJob, HarvestObject, ObjectError, ObjectId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<String, HarvestJob>,
    objects: BTreeMap<ObjectId, HarvestObject>,
    gather_errors: Vec<GatherError>,
    object_errors: Vec<ObjectError>,
}

/// Cheaply cloneable handle; clones share the same state.
///
/// `fail_next_loads` makes the next N job/object loads return
/// [`StoreError::Unavailable`], and `fail_next_job_saves` does the same for
/// job writes. This is how redelivery paths are exercised.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    failing_loads: Arc<AtomicUsize>,
    failing_job_saves: Arc<AtomicUsize>,
    refreshes: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_loads(&self, count: usize) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_job_saves(&self, count: usize) {
        self.failing_job_saves.store(count, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn take_injected_failure(
        counter: &AtomicUsize,
        action: &str,
        what: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let injected = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            warn!(id, "Injected store failure while {action} {what}");
            return Err(StoreError::Unavailable(format!(
                "connection closed while {action} {what} {id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl HarvestStore for MemoryStore {
    async fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn get_job(&self, id: &str) -> Result<Option<HarvestJob>, StoreError> {
        Self::take_injected_failure(&self.failing_loads, "loading", "job", id)?;
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn save_job(&self, job: &HarvestJob) -> Result<(), StoreError> {
        Self::take_injected_failure(&self.failing_job_saves, "saving", "job", &job.id)?;
        self.state
            .write()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_object(&self, id: &str) -> Result<Option<HarvestObject>, StoreError> {
        Self::take_injected_failure(&self.failing_loads, "loading", "object", id)?;
        Ok(self.state.read().await.objects.get(id).cloned())
    }

    async fn save_object(&self, object: &HarvestObject) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&object.job_id) {
            return Err(StoreError::NotFound {
                kind: "job",
                id: object.job_id.clone(),
            });
        }
        if let Some(existing) = state.objects.get(&object.id) {
            if existing.job_id != object.job_id {
                return Err(StoreError::Ownership {
                    id: object.id.clone(),
                    owner: existing.job_id.clone(),
                });
            }
        }
        state.objects.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn object_ids_for_job(&self, job_id: &str) -> Result<BTreeSet<ObjectId>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.job_id == job_id)
            .map(|o| o.id.clone())
            .collect())
    }

    async fn objects_for_job(&self, job_id: &str) -> Result<Vec<HarvestObject>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_object(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.object_errors.retain(|e| e.object_id != id);
        Ok(state.objects.remove(id).is_some())
    }

    async fn delete_objects_for_job(&self, job_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let doomed: BTreeSet<ObjectId> = state
            .objects
            .values()
            .filter(|o| o.job_id == job_id)
            .map(|o| o.id.clone())
            .collect();
        state.objects.retain(|id, _| !doomed.contains(id));
        state.object_errors.retain(|e| !doomed.contains(&e.object_id));
        Ok(doomed.len())
    }

    async fn count_objects_for_package(
        &self,
        package_id: &str,
        limit: usize,
    ) -> Result<usize, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.package_id.as_deref() == Some(package_id))
            .take(limit)
            .count())
    }

    async fn record_gather_error(&self, error: GatherError) -> Result<(), StoreError> {
        self.state.write().await.gather_errors.push(error);
        Ok(())
    }

    async fn record_object_error(&self, error: ObjectError) -> Result<(), StoreError> {
        self.state.write().await.object_errors.push(error);
        Ok(())
    }

    async fn gather_errors(&self, job_id: &str) -> Result<Vec<GatherError>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .gather_errors
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn object_errors(&self, object_id: &str) -> Result<Vec<ObjectError>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .object_errors
            .iter()
            .filter(|e| e.object_id == object_id)
            .cloned()
            .collect())
    }
}
