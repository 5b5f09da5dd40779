//! DataLoader for iterating prompt-only batches.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::collator::{PromptOnlyBatch, PromptOnlyCollator};
use crate::prompt_only::{PromptOnlyDataset, PromptOnlySample};
use palign_core::{PAlignError, Result};

/// Configuration for the DataLoader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Whether to shuffle the data.
    #[serde(default)]
    pub shuffle: bool,
    /// Random seed for shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Whether to drop the last incomplete batch.
    #[serde(default)]
    pub drop_last: bool,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            shuffle: false,
            seed: default_seed(),
            drop_last: false,
        }
    }
}

fn default_batch_size() -> usize {
    4
}

fn default_seed() -> u64 {
    42
}

/// DataLoader that yields collated batches from a prompt-only dataset.
pub struct PromptOnlyDataLoader {
    dataset: PromptOnlyDataset,
    collator: PromptOnlyCollator,
    config: DataLoaderConfig,
    /// Current index permutation.
    indices: Vec<usize>,
    /// Current position in `indices`.
    position: usize,
}

impl PromptOnlyDataLoader {
    /// Create a loader using the dataset's own collator.
    pub fn new(dataset: PromptOnlyDataset, config: DataLoaderConfig) -> Result<Self> {
        let collator = dataset.get_collator();
        Self::with_collator(dataset, collator, config)
    }

    /// Create a loader with an explicit collator.
    pub fn with_collator(
        dataset: PromptOnlyDataset,
        collator: PromptOnlyCollator,
        config: DataLoaderConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PAlignError::Config("batch_size must be at least 1".to_string()));
        }

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        if config.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
            indices.shuffle(&mut rng);
        }

        Ok(Self {
            dataset,
            collator,
            config,
            indices,
            position: 0,
        })
    }

    /// Reset the DataLoader for a new epoch.
    pub fn reset(&mut self, new_seed: Option<u64>) {
        self.position = 0;
        if self.config.shuffle {
            let seed = new_seed.unwrap_or(self.config.seed);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            self.indices.sort_unstable();
            self.indices.shuffle(&mut rng);
        }
    }

    /// Get the number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.config.drop_last {
            n / self.config.batch_size
        } else {
            n.div_ceil(self.config.batch_size)
        }
    }

    /// Get the total number of samples.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// The underlying dataset.
    pub fn dataset(&self) -> &PromptOnlyDataset {
        &self.dataset
    }

    /// Get the next batch, or `None` at the end of the epoch.
    pub fn next_batch(&mut self) -> Option<Result<PromptOnlyBatch>> {
        if self.position >= self.indices.len() {
            return None;
        }

        let batch_end = (self.position + self.config.batch_size).min(self.indices.len());
        if self.config.drop_last && batch_end - self.position < self.config.batch_size {
            self.position = self.indices.len();
            return None;
        }

        let samples: Result<Vec<PromptOnlySample>> = self.indices[self.position..batch_end]
            .iter()
            .map(|&i| self.dataset.get(i))
            .collect();
        self.position = batch_end;

        Some(samples.map(|samples| self.collator.collate(&samples)))
    }
}

impl Iterator for PromptOnlyDataLoader {
    type Item = Result<PromptOnlyBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
