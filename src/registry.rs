//! Read-only lookup from source type to harvester implementation.

use crate::traits::Harvester;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("A harvester named '{0}' is already registered")]
    Duplicate(String),
}

/// Maps `HarvestSource::source_type` to the harvester registered under that
/// name.
///
/// Built once before workers start and shared behind an `Arc`; there is no
/// way to mutate it after construction through a shared reference.
#[derive(Clone, Default)]
pub struct HarvesterRegistry {
    harvesters: BTreeMap<String, Arc<dyn Harvester>>,
}

impl HarvesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, harvester: Arc<dyn Harvester>) -> Result<(), RegistryError> {
        let name = harvester.info().name;
        if self.harvesters.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!(harvester = %name, "Registered harvester");
        self.harvesters.insert(name, harvester);
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, harvester: Arc<dyn Harvester>) -> Result<Self, RegistryError> {
        self.register(harvester)?;
        Ok(self)
    }

    pub fn get(&self, source_type: &str) -> Option<Arc<dyn Harvester>> {
        self.harvesters.get(source_type).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.harvesters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.harvesters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harvesters.is_empty()
    }
}

impl std::fmt::Debug for HarvesterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvesterRegistry")
            .field("harvesters", &self.harvesters.keys().collect::<Vec<_>>())
            .finish()
    }
}
