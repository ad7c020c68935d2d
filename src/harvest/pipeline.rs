//! Harvest pipeline wiring.
//!
//! This module provides the [`HarvestPipeline`] coordinator that connects the
//! gather and fetch queues to their handlers:
//! - Gather queue → [`GatherOrchestrator`]
//! - Fetch queue → [`FetchProcessor`]
//!
//! Parallelism comes from running more worker processes against the same
//! queues; a single worker handles one message at a time.

use std::sync::Arc;
use tracing::{debug, info};

use super::fetch::FetchProcessor;
use super::gather::GatherOrchestrator;
use crate::broker::{BrokerError, ConnectionFactory};
use crate::registry::HarvesterRegistry;
use crate::store::{HarvestStore, StoreError};
use crate::traits::HarvesterError;

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that can occur while handling a queue message.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Broker failure while publishing or connecting
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Harvest job does not exist: {0}")]
    JobNotFound(String),

    #[error("Harvest object does not exist: {0}")]
    ObjectNotFound(String),

    /// No harvester is registered under the source's type
    #[error("No harvester could be found for source type {source_type}")]
    NoHarvester { source_type: String },

    /// The harvester's gather stage raised
    #[error("Gather stage failed for job {job_id}: {source}")]
    GatherFailed {
        job_id: String,
        #[source]
        source: HarvesterError,
    },
}

impl PipelineError {
    /// Transient errors leave the message for redelivery; everything else is
    /// acknowledged and dropped.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Broker(e) => e.is_transient(),
            _ => false,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Upper bound on deliveries handled per queue in one
/// [`HarvestPipeline::run_until_idle`] pass.
const DRAIN_LIMIT: usize = 10_000;

/// Shared wiring for gather and fetch workers.
///
/// # Example
///
/// ```ignore
/// use harvest_queue::{BrokerConfig, ConnectionFactory, HarvestPipeline, HarvesterRegistry, MemoryStore};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = HarvesterRegistry::new().with(Arc::new(my_harvester))?;
///     let pipeline = HarvestPipeline::new(
///         ConnectionFactory::new(BrokerConfig::from_env()),
///         registry,
///         Arc::new(MemoryStore::new()),
///     );
///     pipeline.run_fetch_worker().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct HarvestPipeline {
    connections: ConnectionFactory,
    registry: Arc<HarvesterRegistry>,
    store: Arc<dyn HarvestStore>,
}

impl HarvestPipeline {
    pub fn new(
        connections: ConnectionFactory,
        registry: HarvesterRegistry,
        store: Arc<dyn HarvestStore>,
    ) -> Self {
        Self {
            connections,
            registry: Arc::new(registry),
            store,
        }
    }

    pub fn connections(&self) -> &ConnectionFactory {
        &self.connections
    }

    pub fn store(&self) -> &Arc<dyn HarvestStore> {
        &self.store
    }

    pub fn gather_orchestrator(&self) -> GatherOrchestrator {
        GatherOrchestrator::new(
            self.store.clone(),
            self.registry.clone(),
            self.connections.clone(),
        )
    }

    pub fn fetch_processor(&self) -> FetchProcessor {
        FetchProcessor::new(self.store.clone(), self.registry.clone())
    }

    /// Queues a gather request for `job_id`.
    pub async fn trigger(&self, job_id: &str) -> Result<(), PipelineError> {
        let publisher = self.connections.gather_publisher().await?;
        let sent = publisher.send(job_id).await;
        publisher.close().await?;
        sent?;
        info!(job_id, "Queued harvest job");
        Ok(())
    }

    /// Consumes the gather queue until the broker closes the stream.
    pub async fn run_gather_worker(&self) -> Result<(), PipelineError> {
        let mut consumer = self.connections.gather_consumer().await?;
        let handler = self.gather_orchestrator();
        consumer.run(&handler).await?;
        consumer.close().await?;
        Ok(())
    }

    /// Consumes the fetch queue until the broker closes the stream.
    pub async fn run_fetch_worker(&self) -> Result<(), PipelineError> {
        let mut consumer = self.connections.fetch_consumer().await?;
        let handler = self.fetch_processor();
        consumer.run(&handler).await?;
        consumer.close().await?;
        Ok(())
    }

    /// Drains the gather queue, then the fetch queue, until both are empty.
    /// Returns the number of gather and fetch deliveries handled.
    pub async fn run_until_idle(&self) -> Result<(usize, usize), PipelineError> {
        let mut gather_consumer = self.connections.gather_consumer().await?;
        let mut fetch_consumer = self.connections.fetch_consumer().await?;
        let gather = self.gather_orchestrator();
        let fetch = self.fetch_processor();

        let (mut gathered, mut fetched) = (0, 0);
        loop {
            let g = gather_consumer.drain(&gather, DRAIN_LIMIT).await?;
            let f = fetch_consumer.drain(&fetch, DRAIN_LIMIT).await?;
            gathered += g;
            fetched += f;
            debug!(gathered = g, fetched = f, "Drain pass finished");
            if g == 0 && f == 0 {
                break;
            }
        }

        gather_consumer.close().await?;
        fetch_consumer.close().await?;
        Ok((gathered, fetched))
    }
}
