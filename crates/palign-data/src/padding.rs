//! Stacking variable-length sequences into 2-D arrays.

use ndarray::{s, Array2, ArrayView1};

/// Stack sequences into a `[batch, max_len]` array, aligned to the right.
///
/// Shorter rows are filled on the left with `padding_value`, so the last real
/// element of every row sits in the last column. The width equals the longest
/// input; an empty input gives a `0 x 0` array.
pub fn left_padding<T, S>(sequences: &[S], padding_value: T) -> Array2<T>
where
    T: Clone,
    S: AsRef<[T]>,
{
    let max_len = sequences
        .iter()
        .map(|seq| seq.as_ref().len())
        .max()
        .unwrap_or(0);

    let mut padded = Array2::from_elem((sequences.len(), max_len), padding_value);
    for (row, seq) in sequences.iter().enumerate() {
        let seq = seq.as_ref();
        let offset = max_len - seq.len();
        padded
            .slice_mut(s![row, offset..])
            .assign(&ArrayView1::from(seq));
    }
    padded
}
