//! Storage layer for lesionscope
//!
//! Provides the deduplicating incremental dataset store fed by classified images

pub mod dataset;

pub use dataset::{
    DatasetInfo, DatasetStatistics, IncrementalStore, ResetSummary, SaveOutcome, StoredSample,
};

use crate::config::{expand_path, DatasetConfig};
use crate::error::Result;

/// Open the dataset store described by configuration, or `None` when disabled
pub fn open_dataset(config: &DatasetConfig) -> Result<Option<IncrementalStore>> {
    if !config.enabled {
        tracing::debug!("Dataset store disabled");
        return Ok(None);
    }

    let root = expand_path(&config.root_dir)?;
    let store = IncrementalStore::new(root, config.min_samples_for_training)?;
    tracing::debug!("Dataset store at {}", store.root().display());
    Ok(Some(store))
}
