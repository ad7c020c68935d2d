use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type SourceId = String;
pub type JobId = String;
pub type ObjectId = String;

/// External origin a job harvests from. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSource {
    pub id: SourceId,
    /// Harvester name this source is routed to (e.g., "ckan", "csw")
    #[serde(rename = "type")]
    pub source_type: String,
    pub active: bool,
}

impl HarvestSource {
    pub fn new(id: impl Into<SourceId>, source_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_type: source_type.into(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Running,
    Finished,
    Aborted,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Finished => write!(f, "Finished"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// One harvest run against a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: JobId,
    pub source: HarvestSource,
    pub status: JobStatus,
    pub gather_started: Option<DateTime<Utc>>,
    pub gather_finished: Option<DateTime<Utc>>,
}

impl HarvestJob {
    pub fn new(id: impl Into<JobId>, source: HarvestSource) -> Self {
        Self {
            id: id.into(),
            source,
            status: JobStatus::Running,
            gather_started: None,
            gather_finished: None,
        }
    }
}

/// Per-object processing state. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectState {
    #[default]
    New,
    Fetch,
    Import,
    Complete,
    Error,
}

impl ObjectState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Fetch => write!(f, "FETCH"),
            Self::Import => write!(f, "IMPORT"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Final disposition of an object, consumed by downstream reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    New,
    Unchanged,
    Deleted,
    Reimported,
    Errored,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Deleted => write!(f, "deleted"),
            Self::Reimported => write!(f, "reimported"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// One discovered item within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestObject {
    pub id: ObjectId,
    pub job_id: JobId,
    pub source: HarvestSource,
    pub guid: String,
    pub package_id: Option<String>,
    pub state: ObjectState,
    pub report_status: Option<ReportStatus>,
    /// Whether this is the latest object for its guid. Starts `false`;
    /// an import that creates or updates the package sets it.
    pub current: bool,
    pub extras: BTreeMap<String, String>,
    pub fetch_started: Option<DateTime<Utc>>,
    pub fetch_finished: Option<DateTime<Utc>>,
    pub import_started: Option<DateTime<Utc>>,
    pub import_finished: Option<DateTime<Utc>>,
}

impl HarvestObject {
    pub fn new(id: impl Into<ObjectId>, job: &HarvestJob, guid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_id: job.id.clone(),
            source: job.source.clone(),
            guid: guid.into(),
            package_id: None,
            state: ObjectState::New,
            report_status: None,
            current: false,
            extras: BTreeMap::new(),
            fetch_started: None,
            fetch_finished: None,
            import_started: None,
            import_finished: None,
        }
    }

    pub fn get_extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extras.insert(key.into(), value.into());
    }

    /// True when the harvester flagged the object with `status = deleted`.
    pub fn is_marked_deleted(&self) -> bool {
        self.get_extra("status") == Some("deleted")
    }
}

/// Pipeline stage an object error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Gather,
    Fetch,
    Import,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gather => write!(f, "Gather"),
            Self::Fetch => write!(f, "Fetch"),
            Self::Import => write!(f, "Import"),
        }
    }
}

/// Immutable failure record attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatherError {
    pub job_id: JobId,
    pub message: String,
    pub stage: Stage,
    pub line: Option<u32>,
    pub created: DateTime<Utc>,
}

impl GatherError {
    pub fn new(job_id: impl Into<JobId>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            message: message.into(),
            stage: Stage::Gather,
            line: None,
            created: Utc::now(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Immutable failure record attached to an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectError {
    pub object_id: ObjectId,
    pub message: String,
    pub stage: Stage,
    pub line: Option<u32>,
    pub created: DateTime<Utc>,
}

impl ObjectError {
    pub fn new(object_id: impl Into<ObjectId>, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            message: message.into(),
            stage,
            line: None,
            created: Utc::now(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_state_terminal() {
        assert!(ObjectState::Complete.is_terminal());
        assert!(ObjectState::Error.is_terminal());
        assert!(!ObjectState::New.is_terminal());
        assert!(!ObjectState::Fetch.is_terminal());
        assert!(!ObjectState::Import.is_terminal());
    }

    #[test]
    fn test_deleted_extra() {
        let job = HarvestJob::new("job-1", HarvestSource::new("src-1", "ckan"));
        let mut obj = HarvestObject::new("obj-1", &job, "guid-1");
        assert!(!obj.is_marked_deleted());

        obj.set_extra("status", "deleted");
        assert!(obj.is_marked_deleted());
        assert_eq!(obj.get_extra("status"), Some("deleted"));
    }

    #[test]
    fn test_report_status_serialization() {
        let json = serde_json::to_string(&ReportStatus::Reimported).unwrap();
        assert_eq!(json, "\"reimported\"");
        assert_eq!(ReportStatus::Errored.to_string(), "errored");
    }

    #[test]
    fn test_source_type_field_name() {
        let source = HarvestSource::new("src-1", "csw");
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value["type"], "csw");
    }

    #[test]
    fn test_gather_error_is_tagged_with_gather_stage() {
        let error = GatherError::new("job-1", "remote down").with_line(12);
        assert_eq!(error.stage, Stage::Gather);
        assert_eq!(error.line, Some(12));
    }
}
