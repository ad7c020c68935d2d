use crate::model::{HarvestJob, HarvestObject, ObjectId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvesterError {
    #[error("Remote source error: {0}")]
    Remote(String),
    #[error("Failed to parse content: {0}")]
    InvalidContent(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Registration record of a harvester plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterInfo {
    /// Matched against `HarvestSource::source_type`
    pub name: String,
    pub title: String,
    pub description: String,
}

impl HarvesterInfo {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: String::new(),
        }
    }
}

/// An item a gather stage claims for its job.
///
/// The pipeline persists a NEW object for every id it has not seen before;
/// already-persisted ids are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatheredObject {
    pub id: ObjectId,
    pub guid: String,
    pub package_id: Option<String>,
    pub extras: BTreeMap<String, String>,
}

impl GatheredObject {
    pub fn new(id: impl Into<ObjectId>, guid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            guid: guid.into(),
            package_id: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_package(mut self, package_id: impl Into<String>) -> Self {
        self.package_id = Some(package_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

impl From<ObjectId> for GatheredObject {
    fn from(id: ObjectId) -> Self {
        let guid = id.clone();
        Self::new(id, guid)
    }
}

impl From<&str> for GatheredObject {
    fn from(id: &str) -> Self {
        Self::new(id, id)
    }
}

/// Result of a harvester's fetch stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content retrieved, proceed to import
    Fetched,
    /// Remote content has not changed since the last harvest, skip import
    Unchanged,
    /// Fetch did not succeed; the object ends in ERROR
    NotFetched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    NotImported,
}

impl From<bool> for ImportOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Imported
        } else {
            Self::NotImported
        }
    }
}

/// A pluggable harvester for one source type.
///
/// Stages may mutate the object they are handed (extras, package reference,
/// `current`, even a pre-set `report_status`); the pipeline persists those
/// changes after each stage. Returning `Err` from `fetch`/`import` is recorded
/// as an object error for that stage; returning `Err` from `gather` aborts the
/// whole job.
#[async_trait]
pub trait Harvester: Send + Sync {
    fn info(&self) -> HarvesterInfo;

    async fn gather(&self, job: &HarvestJob) -> Result<Vec<GatheredObject>, HarvesterError>;

    async fn fetch(&self, object: &mut HarvestObject) -> Result<FetchOutcome, HarvesterError>;

    async fn import(&self, object: &mut HarvestObject) -> Result<ImportOutcome, HarvesterError>;
}
