//! Persistence seam for jobs, objects and their error records.
//!
//! Handlers reload state at the start of every message and write at
//! well-defined points (after timestamps, after state transitions, after
//! deletions). No transaction is held open across a harvester call.

pub mod memory;

use crate::model::{GatherError, HarvestJob, HarvestObject, ObjectError, ObjectId};
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity or session failure; the operation may succeed if retried
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Store conflict: {0}")]
    Conflict(String),

    /// An object may not be moved between jobs
    #[error("Object {id} belongs to job {owner}")]
    Ownership { id: String, owner: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}

#[async_trait]
pub trait HarvestStore: Send + Sync {
    /// Discards any cached view of prior state so the next read is fresh.
    async fn refresh(&self);

    /// Drops the current session after a transient failure.
    async fn reset(&self);

    async fn get_job(&self, id: &str) -> Result<Option<HarvestJob>, StoreError>;

    async fn save_job(&self, job: &HarvestJob) -> Result<(), StoreError>;

    async fn get_object(&self, id: &str) -> Result<Option<HarvestObject>, StoreError>;

    /// Inserts or replaces the object. Replacing an object stored under a
    /// different job fails with [`StoreError::Ownership`].
    async fn save_object(&self, object: &HarvestObject) -> Result<(), StoreError>;

    async fn object_ids_for_job(&self, job_id: &str) -> Result<BTreeSet<ObjectId>, StoreError>;

    async fn objects_for_job(&self, job_id: &str) -> Result<Vec<HarvestObject>, StoreError>;

    /// Returns `false` when the object was already gone.
    async fn delete_object(&self, id: &str) -> Result<bool, StoreError>;

    /// Deletes every object of the job in one step; either all go or none do.
    async fn delete_objects_for_job(&self, job_id: &str) -> Result<usize, StoreError>;

    /// Counts objects referencing `package_id`, stopping at `limit`.
    async fn count_objects_for_package(
        &self,
        package_id: &str,
        limit: usize,
    ) -> Result<usize, StoreError>;

    async fn record_gather_error(&self, error: GatherError) -> Result<(), StoreError>;

    async fn record_object_error(&self, error: ObjectError) -> Result<(), StoreError>;

    async fn gather_errors(&self, job_id: &str) -> Result<Vec<GatherError>, StoreError>;

    async fn object_errors(&self, object_id: &str) -> Result<Vec<ObjectError>, StoreError>;
}
