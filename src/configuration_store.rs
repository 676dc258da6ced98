//! Holder of the configuration currently served to evaluations.
use std::sync::{Arc, RwLock};

use crate::Configuration;

/// Shared slot for the active [`Configuration`]. The poller writes it, evaluations read it.
///
/// Configurations are immutable. Updating means swapping in a new `Arc`, so readers keep using
/// the snapshot they obtained for the whole evaluation.
#[derive(Default)]
pub(crate) struct ConfigurationStore {
    configuration: RwLock<Option<Arc<Configuration>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// `None` until the first configuration is stored.
    pub fn get_configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration
            .read()
            .expect("thread holding configuration lock should not panic")
            .clone()
    }

    /// Swap in `config`, returning the configuration it replaced.
    pub fn set_configuration(&self, config: Arc<Configuration>) -> Option<Arc<Configuration>> {
        self.configuration
            .write()
            .expect("thread holding configuration lock should not panic")
            .replace(config)
    }
}
