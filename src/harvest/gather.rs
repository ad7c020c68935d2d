//! Gather stage orchestration.
//!
//! Per job message: run the matching harvester's gather stage, reconcile the
//! job's persisted objects against what it returned, and publish one fetch
//! message per returned object.

use super::pipeline::PipelineError;
use super::reconcile;
use crate::broker::{Completion, ConnectionFactory, MessageHandler, Publisher};
use crate::model::{GatherError, HarvestJob, HarvestObject, JobStatus, ObjectId};
use crate::registry::HarvesterRegistry;
use crate::store::HarvestStore;
use crate::traits::{GatheredObject, Harvester, HarvesterError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Counts from one successful gather run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatherSummary {
    /// Objects persisted for the first time
    pub created: usize,
    /// Stale objects removed by reconciliation
    pub orphans_deleted: usize,
    /// Fetch messages sent
    pub published: usize,
    /// Returned objects skipped because another job owns them
    pub rejected: usize,
}

pub struct GatherOrchestrator {
    store: Arc<dyn HarvestStore>,
    registry: Arc<HarvesterRegistry>,
    connections: ConnectionFactory,
}

impl GatherOrchestrator {
    pub fn new(
        store: Arc<dyn HarvestStore>,
        registry: Arc<HarvesterRegistry>,
        connections: ConnectionFactory,
    ) -> Self {
        Self {
            store,
            registry,
            connections,
        }
    }

    /// Handles one gather message and decides whether it is acknowledged.
    ///
    /// Only transient failures (store or broker connectivity) leave the
    /// message for redelivery; everything else is acknowledged.
    #[instrument(skip(self))]
    pub async fn handle_job(&self, job_id: &str) -> Completion {
        debug!("Received harvest job id");
        match self.process(job_id).await {
            Ok(summary) => {
                info!(
                    created = summary.created,
                    orphans_deleted = summary.orphans_deleted,
                    published = summary.published,
                    "Gather finished"
                );
                Completion::Ack
            }
            Err(e) if e.is_transient() => {
                error!(error = %e, "Connection error during gather; leaving message for redelivery");
                self.store.reset().await;
                Completion::Requeue
            }
            Err(e) => {
                error!(error = %e, "Gather failed");
                Completion::Ack
            }
        }
    }

    /// Runs the gather stage for `job_id`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::JobNotFound`] if the job does not exist
    /// - [`PipelineError::NoHarvester`] if no harvester matches the source
    ///   type; the job is aborted
    /// - [`PipelineError::GatherFailed`] if the harvester raised; the job is
    ///   aborted and all its objects deleted
    /// - store or broker errors, which are transient
    pub async fn process(&self, job_id: &str) -> Result<GatherSummary, PipelineError> {
        self.store.refresh().await;

        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        let Some(harvester) = self.registry.get(&job.source.source_type) else {
            return Err(self.abort_without_harvester(&mut job).await?);
        };

        let publisher = self.connections.fetch_publisher().await?;
        let result = self
            .gather_and_publish(&mut job, harvester.as_ref(), &publisher)
            .await;
        if let Err(e) = publisher.close().await {
            warn!(error = %e, "Failed to close fetch publisher");
        }
        result
    }

    async fn gather_and_publish(
        &self,
        job: &mut HarvestJob,
        harvester: &dyn Harvester,
        publisher: &Publisher,
    ) -> Result<GatherSummary, PipelineError> {
        job.gather_started = Some(Utc::now());
        self.store.save_job(job).await?;

        let gathered = harvester.gather(job).await;

        job.gather_finished = Some(Utc::now());
        self.store.save_job(job).await?;

        let gathered = match gathered {
            Ok(gathered) => gathered,
            Err(e) => return Err(self.abort_after_failure(job, e).await?),
        };
        let gathered = dedup(gathered);
        debug!(
            count = gathered.len(),
            ids = ?gathered.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
            "Received objects from gather stage"
        );
        let (gathered, foreign) = self.split_foreign(job, gathered).await?;

        let returned: BTreeSet<ObjectId> = gathered.iter().map(|g| g.id.clone()).collect();
        let orphans = reconcile::delete_orphans(self.store.as_ref(), &job.id, &returned).await?;

        let persisted = self.store.object_ids_for_job(&job.id).await?;
        let mut created = 0;
        for item in gathered.iter().filter(|g| !persisted.contains(&g.id)) {
            self.store.save_object(&new_object(job, item)).await?;
            created += 1;
        }

        for item in &gathered {
            publisher.send(&item.id).await?;
            debug!(object_id = %item.id, "Sent object to the fetch queue");
        }

        for (item, owner) in &foreign {
            let message = format!(
                "Object {} with guid {} already belongs to harvest job {owner}",
                item.id, item.guid
            );
            self.record_once(&job.id, message).await?;
        }

        Ok(GatherSummary {
            created,
            orphans_deleted: orphans.len(),
            published: gathered.len(),
            rejected: foreign.len(),
        })
    }

    /// Separates returned objects already stored under another job. Those
    /// are left untouched and never published for this job.
    async fn split_foreign(
        &self,
        job: &HarvestJob,
        gathered: Vec<GatheredObject>,
    ) -> Result<(Vec<GatheredObject>, Vec<(GatheredObject, String)>), PipelineError> {
        let mut owned = Vec::with_capacity(gathered.len());
        let mut foreign = Vec::new();
        for item in gathered {
            match self.store.get_object(&item.id).await? {
                Some(existing) if existing.job_id != job.id => {
                    warn!(
                        object_id = %item.id,
                        owner = %existing.job_id,
                        "Gathered object belongs to another job"
                    );
                    foreign.push((item, existing.job_id));
                }
                _ => owned.push(item),
            }
        }
        Ok((owned, foreign))
    }

    /// Records a gather error unless an identical one is already attached to
    /// the job, so redelivered messages do not duplicate records.
    async fn record_once(&self, job_id: &str, message: String) -> Result<(), PipelineError> {
        let existing = self.store.gather_errors(job_id).await?;
        if existing.iter().any(|e| e.message == message) {
            debug!(job_id, "Gather error already recorded");
            return Ok(());
        }
        self.store
            .record_gather_error(GatherError::new(job_id, message))
            .await?;
        Ok(())
    }

    /// Aborts a job whose gather stage raised. Objects go first so an aborted
    /// job never has survivors even if saving the status fails; the error
    /// record goes last.
    async fn abort_after_failure(
        &self,
        job: &mut HarvestJob,
        cause: HarvesterError,
    ) -> Result<PipelineError, PipelineError> {
        error!(job_id = %job.id, error = %cause, "Gather exception");
        let deleted = self.store.delete_objects_for_job(&job.id).await?;
        job.status = JobStatus::Aborted;
        self.store.save_job(job).await?;
        self.record_once(&job.id, format!("Error gathering objects: {cause}"))
            .await?;
        warn!(job_id = %job.id, deleted, "Job aborted, objects removed");

        Ok(PipelineError::GatherFailed {
            job_id: job.id.clone(),
            source: cause,
        })
    }

    /// Happens when a harvester was removed while its sources still exist, or
    /// a new one was added without restarting the gather workers.
    async fn abort_without_harvester(
        &self,
        job: &mut HarvestJob,
    ) -> Result<PipelineError, PipelineError> {
        let source_type = job.source.source_type.clone();
        let message =
            format!("System error - no harvester could be found for source type {source_type}");
        self.store.delete_objects_for_job(&job.id).await?;
        job.status = JobStatus::Aborted;
        self.store.save_job(job).await?;
        self.record_once(&job.id, message).await?;

        Ok(PipelineError::NoHarvester { source_type })
    }
}

#[async_trait]
impl MessageHandler for GatherOrchestrator {
    async fn handle(&self, id: &str) -> Completion {
        self.handle_job(id).await
    }
}

fn new_object(job: &HarvestJob, item: &GatheredObject) -> HarvestObject {
    let mut object = HarvestObject::new(item.id.clone(), job, item.guid.clone());
    object.package_id = item.package_id.clone();
    object.extras = item.extras.clone();
    object
}

/// Keeps the first occurrence of every id, preserving order.
fn dedup(gathered: Vec<GatheredObject>) -> Vec<GatheredObject> {
    let mut seen = BTreeSet::new();
    gathered
        .into_iter()
        .filter(|g| seen.insert(g.id.clone()))
        .collect()
}
