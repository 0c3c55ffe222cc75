//! Declarative store interface

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;

use crate::domain::{Config, RuntimeOverlay};

/// Loads and persists the declarative configuration
///
/// The runtime overlay is persisted separately so that observations never
/// end up in the declarative file. Repositories that do not keep it can rely
/// on the default no-op methods.
pub trait ConfigRepository: Send + Sync {
    fn load_config(&self) -> Result<Config>;

    fn persist_config(&self, config: &Config) -> Result<()>;

    fn load_overlay(&self) -> Result<HashMap<String, RuntimeOverlay>> {
        Ok(HashMap::new())
    }

    fn persist_overlay(&self, _overlay: &HashMap<String, RuntimeOverlay>) -> Result<()> {
        Ok(())
    }
}

/// Keeps everything in memory; used for embedding and tests
#[derive(Default)]
pub struct MemoryRepository {
    config: Mutex<Config>,
    overlay: Mutex<HashMap<String, RuntimeOverlay>>,
    fail_writes: Mutex<bool>,
}

impl MemoryRepository {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
            ..Self::default()
        }
    }

    /// Makes every subsequent persist call fail
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn stored(&self) -> Config {
        self.config.lock().clone()
    }
}

impl ConfigRepository for MemoryRepository {
    fn load_config(&self) -> Result<Config> {
        Ok(self.config.lock().clone())
    }

    fn persist_config(&self, config: &Config) -> Result<()> {
        if *self.fail_writes.lock() {
            anyhow::bail!("Failed to persist configuration: store is read-only");
        }
        *self.config.lock() = config.declarative();
        Ok(())
    }

    fn load_overlay(&self) -> Result<HashMap<String, RuntimeOverlay>> {
        Ok(self.overlay.lock().clone())
    }

    fn persist_overlay(&self, overlay: &HashMap<String, RuntimeOverlay>) -> Result<()> {
        *self.overlay.lock() = overlay.clone();
        Ok(())
    }
}
