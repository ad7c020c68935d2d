//! Harvest module - the queue-driven gather → fetch → import pipeline.
//!
//! - **Gather**: [`GatherOrchestrator`] runs a job's gather stage, reconciles
//!   its objects and fans out fetch messages
//! - **Fetch/Import**: [`FetchProcessor`] drives one object to a terminal
//!   state and classifies it
//! - **Reconciliation**: [`reconcile`] removes objects the latest gather no
//!   longer returns
//! - **Pipeline**: [`HarvestPipeline`] wires queues, store and registry

pub mod classify;
pub mod fetch;
pub mod gather;
pub mod pipeline;
pub mod reconcile;
pub mod report;

// Re-export commonly used types
pub use classify::classify;
pub use fetch::{FetchProcessor, FetchSummary};
pub use gather::{GatherOrchestrator, GatherSummary};
pub use pipeline::{HarvestPipeline, PipelineError};
pub use report::JobReport;
