//! # Dataset Builder
//!
//! Fluent entry point that resolves the guest binary, instantiates it and
//! loads a dataset, from bytes or from a location.
//!
//! # Example
//!
//! ```rust,no_run
//! # use hdtrun::{DatasetBuilder, GuestSource};
//! # async fn example() -> hdtrun::dataset::Result<()> {
//! let mut dataset = DatasetBuilder::new()
//!     .guest(GuestSource::Location("hdt.wasm".into()))
//!     .load_location("https://example.org/data.hdt")
//!     .await?;
//! println!("{} triples", dataset.size()?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::bridge::ModuleBridge;
use crate::config::GuestSource;
use crate::config::MemoryStrategy;
use crate::dataset::Dataset;
use crate::dataset::Result;
use crate::fetch::AutoFetch;
use crate::fetch::Fetch;

/// Fluent builder for a [`Dataset`] backed by a [`ModuleBridge`].
pub struct DatasetBuilder {
    source: GuestSource,
    strategy: MemoryStrategy,
    fetcher: Arc<dyn Fetch>,
}

impl DatasetBuilder {
    /// Starts from the environment's guest location and the exported-memory strategy.
    pub fn new() -> Self {
        Self {
            source: GuestSource::from_env(),
            strategy: MemoryStrategy::default(),
            fetcher: Arc::new(AutoFetch::new()),
        }
    }

    /// Overrides where the guest module comes from.
    pub fn guest(mut self, source: GuestSource) -> Self {
        self.source = source;
        self
    }

    pub fn memory(mut self, strategy: MemoryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the fetcher used for guest and dataset locations.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Instantiates the guest without loading a dataset.
    pub async fn bridge(self) -> Result<ModuleBridge> {
        let wasm = match self.source {
            GuestSource::Bytes(bytes) => bytes,
            GuestSource::Location(location) => {
                tracing::debug!(%location, "fetching guest module");
                self.fetcher.fetch(&location).await?
            }
        };
        Ok(ModuleBridge::from_module(&wasm, self.strategy)?)
    }

    /// Loads a dataset from bytes already in memory.
    pub async fn load_bytes(self, data: &[u8]) -> Result<Dataset> {
        let bridge = self.bridge().await?;
        Dataset::from_bytes(bridge, data)
    }

    /// Fetches a dataset from `location`, then loads it.
    pub async fn load_location(self, location: &str) -> Result<Dataset> {
        let data = self.fetcher.fetch(location).await?;
        self.load_bytes(&data).await
    }
}

impl Default for DatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}
