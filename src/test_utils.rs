//! Shared fixtures for unit tests.

use crate::model::{HarvestJob, HarvestObject, HarvestSource, Stage};
use crate::store::{HarvestStore, MemoryStore};
use crate::traits::{
    FetchOutcome, GatheredObject, Harvester, HarvesterError, HarvesterInfo, ImportOutcome,
};
use async_trait::async_trait;
use std::sync::Mutex;

type FetchFn = Box<dyn Fn(&mut HarvestObject) -> Result<FetchOutcome, HarvesterError> + Send + Sync>;
type ImportFn =
    Box<dyn Fn(&mut HarvestObject) -> Result<ImportOutcome, HarvesterError> + Send + Sync>;

/// Harvester whose stages follow a script and record every call.
///
/// Defaults: gather returns nothing, fetch succeeds, import marks the object
/// current with package `pkg-<guid>` and succeeds.
pub struct ScriptedHarvester {
    name: String,
    gather_result: Mutex<Result<Vec<GatheredObject>, String>>,
    fetch_fn: FetchFn,
    import_fn: ImportFn,
    calls: Mutex<Vec<(Stage, String)>>,
}

impl ScriptedHarvester {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gather_result: Mutex::new(Ok(Vec::new())),
            fetch_fn: Box::new(|_| Ok(FetchOutcome::Fetched)),
            import_fn: Box::new(|obj| {
                obj.current = true;
                if obj.package_id.is_none() {
                    obj.package_id = Some(format!("pkg-{}", obj.guid));
                }
                Ok(ImportOutcome::Imported)
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn gathering(self, ids: &[&str]) -> Self {
        self.set_gather(ids);
        self
    }

    pub fn gathering_objects(self, objects: Vec<GatheredObject>) -> Self {
        *self.gather_result.lock().unwrap() = Ok(objects);
        self
    }

    pub fn failing_gather(self, message: &str) -> Self {
        *self.gather_result.lock().unwrap() = Err(message.to_string());
        self
    }

    pub fn fetching(
        mut self,
        f: impl Fn(&mut HarvestObject) -> Result<FetchOutcome, HarvesterError> + Send + Sync + 'static,
    ) -> Self {
        self.fetch_fn = Box::new(f);
        self
    }

    pub fn importing(
        mut self,
        f: impl Fn(&mut HarvestObject) -> Result<ImportOutcome, HarvesterError> + Send + Sync + 'static,
    ) -> Self {
        self.import_fn = Box::new(f);
        self
    }

    pub fn set_gather(&self, ids: &[&str]) {
        *self.gather_result.lock().unwrap() =
            Ok(ids.iter().map(|id| GatheredObject::from(*id)).collect());
    }

    pub fn calls(&self, stage: Stage) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn record(&self, stage: Stage, id: &str) {
        self.calls.lock().unwrap().push((stage, id.to_string()));
    }
}

#[async_trait]
impl Harvester for ScriptedHarvester {
    fn info(&self) -> HarvesterInfo {
        HarvesterInfo::new(self.name.clone(), "Scripted harvester")
    }

    async fn gather(&self, job: &HarvestJob) -> Result<Vec<GatheredObject>, HarvesterError> {
        self.record(Stage::Gather, &job.id);
        self.gather_result
            .lock()
            .unwrap()
            .clone()
            .map_err(HarvesterError::Remote)
    }

    async fn fetch(&self, object: &mut HarvestObject) -> Result<FetchOutcome, HarvesterError> {
        self.record(Stage::Fetch, &object.id);
        (self.fetch_fn)(object)
    }

    async fn import(&self, object: &mut HarvestObject) -> Result<ImportOutcome, HarvesterError> {
        self.record(Stage::Import, &object.id);
        (self.import_fn)(object)
    }
}

/// Store holding a single running job `job_id` for a source of `source_type`.
pub async fn store_with_job(job_id: &str, source_type: &str) -> (MemoryStore, HarvestJob) {
    let store = MemoryStore::new();
    let job = HarvestJob::new(job_id, HarvestSource::new("src-1", source_type));
    store.save_job(&job).await.unwrap();
    (store, job)
}

/// Persists NEW objects with the given ids under `job`.
pub async fn seed_objects(store: &MemoryStore, job: &HarvestJob, ids: &[&str]) {
    for id in ids {
        store
            .save_object(&HarvestObject::new(*id, job, *id))
            .await
            .unwrap();
    }
}
