//! Batch collation for prompt-only samples.

use crate::padding::left_padding;
use crate::prompt_only::PromptOnlySample;
use ndarray::{Array2, Axis};
use palign_core::{current_device, DeviceLocation};

/// A collated batch ready for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptOnlyBatch {
    /// Input token IDs [batch_size, seq_len], left-padded.
    pub input_ids: Array2<u32>,
    /// True at real tokens, false at padding [batch_size, seq_len].
    pub attention_mask: Array2<bool>,
    /// Device the batch is meant for.
    pub device: DeviceLocation,
}

impl PromptOnlyBatch {
    /// Number of samples.
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }

    /// Unpadded length of every row.
    pub fn lengths(&self) -> Vec<usize> {
        self.attention_mask
            .axis_iter(Axis(0))
            .map(|row| row.iter().filter(|&&real| real).count())
            .collect()
    }

    /// Retag the batch for another device.
    #[must_use]
    pub fn to_device(mut self, device: DeviceLocation) -> Self {
        self.device = device;
        self
    }
}

/// Pads and stacks prompt-only samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOnlyCollator {
    /// Padding token ID.
    pub pad_token_id: u32,
    /// Device batches are tagged with.
    pub device: DeviceLocation,
}

impl PromptOnlyCollator {
    /// Create a collator targeting the current device.
    pub fn new(pad_token_id: u32) -> Self {
        Self {
            pad_token_id,
            device: current_device(),
        }
    }

    /// Target a specific device.
    #[must_use]
    pub fn with_device(mut self, device: DeviceLocation) -> Self {
        self.device = device;
        self
    }

    /// Collate samples into a left-padded batch.
    pub fn collate(&self, samples: &[PromptOnlySample]) -> PromptOnlyBatch {
        let input_ids: Vec<&[u32]> = samples.iter().map(|s| s.input_ids.as_slice()).collect();
        let attention_mask: Vec<Vec<bool>> = samples
            .iter()
            .map(|s| vec![true; s.input_ids.len()])
            .collect();

        PromptOnlyBatch {
            input_ids: left_padding(&input_ids, self.pad_token_id),
            attention_mask: left_padding(&attention_mask, false),
            device: self.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use palign_core::Device;
    use proptest::prelude::*;

    fn sample(ids: &[u32]) -> PromptOnlySample {
        PromptOnlySample::new(ids.to_vec())
    }

    #[test]
    fn test_collate_left_pads() {
        let collator = PromptOnlyCollator::new(0).with_device(DeviceLocation::cpu());
        let batch = collator.collate(&[sample(&[5, 6, 3]), sample(&[7, 3])]);

        assert_eq!(batch.input_ids, array![[5, 6, 3], [0, 7, 3]]);
        assert_eq!(
            batch.attention_mask,
            array![[true, true, true], [false, true, true]]
        );
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_len(), 3);
        assert_eq!(batch.lengths(), vec![3, 2]);
        assert_eq!(batch.device, DeviceLocation::cpu());
    }

    #[test]
    fn test_collate_pad_id_equal_to_real_token() {
        // The mask, not the id, marks padding.
        let collator = PromptOnlyCollator::new(3);
        let batch = collator.collate(&[sample(&[3]), sample(&[1, 3])]);
        assert_eq!(batch.input_ids, array![[3, 3], [1, 3]]);
        assert_eq!(batch.attention_mask, array![[false, true], [true, true]]);
    }

    #[test]
    fn test_collate_empty() {
        let batch = PromptOnlyCollator::new(0).collate(&[]);
        assert_eq!(batch.batch_size(), 0);
        assert_eq!(batch.seq_len(), 0);
        assert!(batch.lengths().is_empty());
    }

    #[test]
    fn test_to_device() {
        let batch = PromptOnlyCollator::new(0)
            .with_device(DeviceLocation::cpu())
            .collate(&[sample(&[1])]);
        let moved = batch.to_device(DeviceLocation {
            device: Device::Gpu,
            ordinal: 1,
        });
        assert_eq!(moved.device.to_string(), "gpu:1");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_width_is_max_len_and_mask_marks_real_tokens(
            seqs in prop::collection::vec(prop::collection::vec(0u32..50, 1..16), 1..10),
            pad in 0u32..50,
        ) {
            let samples: Vec<PromptOnlySample> =
                seqs.iter().cloned().map(PromptOnlySample::new).collect();
            let batch = PromptOnlyCollator::new(pad).collate(&samples);

            let max_len = seqs.iter().map(Vec::len).max().unwrap_or(0);
            prop_assert_eq!(batch.seq_len(), max_len);
            prop_assert_eq!(batch.attention_mask.dim(), batch.input_ids.dim());

            for (row, seq) in seqs.iter().enumerate() {
                let offset = max_len - seq.len();
                for col in 0..max_len {
                    let real = col >= offset;
                    prop_assert_eq!(batch.attention_mask[[row, col]], real);
                    if real {
                        prop_assert_eq!(batch.input_ids[[row, col]], seq[col - offset]);
                    } else {
                        prop_assert_eq!(batch.input_ids[[row, col]], pad);
                    }
                }
            }
            prop_assert_eq!(batch.lengths(), seqs.iter().map(Vec::len).collect::<Vec<_>>());
        }
    }
}
