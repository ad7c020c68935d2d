pub mod broker;
pub mod config;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod registry;
pub mod store;
pub mod traits;

#[cfg(test)]
mod test_utils;

// Re-export common types for convenience
pub use broker::{Completion, ConnectionFactory, MessageHandler};
pub use config::{BrokerConfig, MqBackend};
pub use harvest::{
    FetchProcessor, FetchSummary, GatherOrchestrator, GatherSummary, HarvestPipeline, JobReport,
    PipelineError,
};
pub use model::*;
pub use registry::{HarvesterRegistry, RegistryError};
pub use store::{HarvestStore, MemoryStore, StoreError};
pub use traits::*;
