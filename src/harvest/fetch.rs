//! Fetch and import stages for a single object.
//!
//! State machine: `NEW → FETCH → IMPORT → COMPLETE | ERROR`. Harvester
//! failures are per-object outcomes: they are recorded against the object,
//! never retried at the message layer, and never abort the job.

use super::classify::classify;
use super::pipeline::PipelineError;
use crate::broker::{Completion, MessageHandler};
use crate::model::{HarvestObject, ObjectError, ObjectState, ReportStatus, Stage};
use crate::registry::HarvesterRegistry;
use crate::store::HarvestStore;
use crate::traits::{FetchOutcome, Harvester, HarvesterError, ImportOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What happened to an object message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSummary {
    /// The object ran through the stages and was classified
    Processed {
        state: ObjectState,
        report_status: ReportStatus,
    },
    /// A previous delivery already finished this object
    AlreadyProcessed,
    /// No harvester is registered for the object's source type
    Unrouted,
}

pub struct FetchProcessor {
    store: Arc<dyn HarvestStore>,
    registry: Arc<HarvesterRegistry>,
}

impl FetchProcessor {
    pub fn new(store: Arc<dyn HarvestStore>, registry: Arc<HarvesterRegistry>) -> Self {
        Self { store, registry }
    }

    /// Handles one fetch message. Only transient store failures leave the
    /// message for redelivery.
    #[instrument(skip(self))]
    pub async fn handle_object(&self, object_id: &str) -> Completion {
        info!("Received harvest object id");
        match self.process(object_id).await {
            Ok(FetchSummary::Processed {
                state,
                report_status,
            }) => {
                info!(%state, %report_status, "Object processed");
                Completion::Ack
            }
            Ok(FetchSummary::AlreadyProcessed) => {
                debug!("Object already processed, skipping");
                Completion::Ack
            }
            Ok(FetchSummary::Unrouted) => Completion::Ack,
            Err(e) if e.is_transient() => {
                error!(error = %e, "Connection error during fetch; leaving message for redelivery");
                self.store.reset().await;
                Completion::Requeue
            }
            Err(e) => {
                error!(error = %e, "Fetch failed");
                Completion::Ack
            }
        }
    }

    /// Runs fetch and, if it succeeded, import for `object_id`, then
    /// classifies the object.
    pub async fn process(&self, object_id: &str) -> Result<FetchSummary, PipelineError> {
        self.store.refresh().await;

        let mut object = self
            .store
            .get_object(object_id)
            .await?
            .ok_or_else(|| PipelineError::ObjectNotFound(object_id.to_string()))?;

        if object.state.is_terminal() && object.report_status.is_some() {
            return Ok(FetchSummary::AlreadyProcessed);
        }

        let Some(harvester) = self.registry.get(&object.source.source_type) else {
            warn!(
                source_type = %object.source.source_type,
                "No harvester for source type, object left unprocessed"
            );
            return Ok(FetchSummary::Unrouted);
        };

        let fetched = self.run_fetch(&mut object, harvester.as_ref()).await?;

        match fetched {
            FetchOutcome::Fetched => {
                let imported = self.run_import(&mut object, harvester.as_ref()).await?;
                object.state = match imported {
                    ImportOutcome::Imported => ObjectState::Complete,
                    ImportOutcome::NotImported => ObjectState::Error,
                };
            }
            FetchOutcome::Unchanged => {
                object.report_status = Some(ReportStatus::Unchanged);
                object.state = ObjectState::Complete;
            }
            FetchOutcome::NotFetched => {
                object.state = ObjectState::Error;
            }
        }
        self.store.save_object(&object).await?;

        let report_status = match object.report_status {
            // Harvesters may classify the object themselves; that wins.
            Some(status) => status,
            None => {
                let status = classify(&object, self.shares_package(&object).await?);
                object.report_status = Some(status);
                self.store.save_object(&object).await?;
                status
            }
        };

        Ok(FetchSummary::Processed {
            state: object.state,
            report_status,
        })
    }

    async fn run_fetch(
        &self,
        object: &mut HarvestObject,
        harvester: &dyn Harvester,
    ) -> Result<FetchOutcome, PipelineError> {
        object.state = ObjectState::Fetch;
        object.fetch_started = Some(Utc::now());
        self.store.save_object(object).await?;

        let result = harvester.fetch(object).await;

        object.fetch_finished = Some(Utc::now());
        self.store.save_object(object).await?;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_stage_error(object, Stage::Fetch, e).await?;
                Ok(FetchOutcome::NotFetched)
            }
        }
    }

    async fn run_import(
        &self,
        object: &mut HarvestObject,
        harvester: &dyn Harvester,
    ) -> Result<ImportOutcome, PipelineError> {
        object.state = ObjectState::Import;
        object.import_started = Some(Utc::now());
        self.store.save_object(object).await?;

        let result = harvester.import(object).await;

        object.import_finished = Some(Utc::now());
        self.store.save_object(object).await?;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_stage_error(object, Stage::Import, e).await?;
                Ok(ImportOutcome::NotImported)
            }
        }
    }

    async fn record_stage_error(
        &self,
        object: &HarvestObject,
        stage: Stage,
        cause: HarvesterError,
    ) -> Result<(), PipelineError> {
        error!(
            %stage,
            error = %cause,
            object_id = %object.id,
            guid = %object.guid,
            source_id = %object.source.id,
            "Harvester stage raised"
        );
        self.store
            .record_object_error(ObjectError::new(
                object.id.clone(),
                stage,
                format!("System error ({cause})"),
            ))
            .await?;
        Ok(())
    }

    async fn shares_package(&self, object: &HarvestObject) -> Result<bool, PipelineError> {
        match &object.package_id {
            Some(package_id) => Ok(self
                .store
                .count_objects_for_package(package_id, 2)
                .await?
                >= 2),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl MessageHandler for FetchProcessor {
    async fn handle(&self, id: &str) -> Completion {
        self.handle_object(id).await
    }
}
