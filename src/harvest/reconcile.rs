//! Orphan detection for a job's persisted objects.
//!
//! An orphan is an object persisted for a job that the job's latest gather
//! call no longer returned. Left alone it would never be fetched and would
//! keep the job looking unfinished, so it is deleted.

use crate::model::ObjectId;
use crate::store::{HarvestStore, StoreError};
use std::collections::BTreeSet;
use tracing::warn;

/// Ids in `persisted` that `gathered` does not contain.
pub fn orphaned_ids(
    persisted: &BTreeSet<ObjectId>,
    gathered: &BTreeSet<ObjectId>,
) -> BTreeSet<ObjectId> {
    persisted.difference(gathered).cloned().collect()
}

/// Deletes every object of `job_id` that is not in `gathered` and returns
/// the deleted ids.
pub async fn delete_orphans(
    store: &dyn HarvestStore,
    job_id: &str,
    gathered: &BTreeSet<ObjectId>,
) -> Result<BTreeSet<ObjectId>, StoreError> {
    let persisted = store.object_ids_for_job(job_id).await?;
    let orphans = orphaned_ids(&persisted, gathered);
    if orphans.is_empty() {
        return Ok(orphans);
    }

    warn!(
        job_id,
        count = orphans.len(),
        ids = ?orphans,
        "Orphaned objects deleted"
    );
    for id in &orphans {
        store.delete_object(id).await?;
    }
    Ok(orphans)
}
