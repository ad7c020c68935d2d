//! Per-job disposition counts for downstream reporting.

use super::pipeline::PipelineError;
use crate::model::{HarvestObject, JobId, JobStatus, ReportStatus};
use crate::store::HarvestStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total: usize,
    pub new: usize,
    pub reimported: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub errored: usize,
    /// Objects without a report status yet
    pub pending: usize,
    pub gather_errors: usize,
    pub object_errors: usize,
}

impl JobReport {
    pub async fn for_job(store: &dyn HarvestStore, job_id: &str) -> Result<Self, PipelineError> {
        let job = store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        let objects = store.objects_for_job(job_id).await?;

        let mut report = Self::tally(&job.id, job.status, &objects);
        report.gather_errors = store.gather_errors(job_id).await?.len();
        for object in &objects {
            report.object_errors += store.object_errors(&object.id).await?.len();
        }
        Ok(report)
    }

    fn tally(job_id: &str, status: JobStatus, objects: &[HarvestObject]) -> Self {
        let mut report = Self {
            job_id: job_id.to_string(),
            status,
            total: objects.len(),
            ..Self::default()
        };
        for object in objects {
            match object.report_status {
                Some(ReportStatus::New) => report.new += 1,
                Some(ReportStatus::Reimported) => report.reimported += 1,
                Some(ReportStatus::Unchanged) => report.unchanged += 1,
                Some(ReportStatus::Deleted) => report.deleted += 1,
                Some(ReportStatus::Errored) => report.errored += 1,
                None => report.pending += 1,
            }
        }
        report
    }

    /// Every object has a final disposition.
    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }
}
