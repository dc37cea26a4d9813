//! Front-padded, fixed-shape batches of variable-length sequences.

use serde::Serialize;
use tracing::warn;

/// Row-major `(batch, max_len, width)` buffer. Shorter sequences are padded
/// at the front with `T::default()` so the final step of every example sits
/// at `max_len - 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaddedBatch<T> {
    data: Vec<T>,
    lengths: Vec<usize>,
    max_len: usize,
    width: usize,
}

impl<T: Copy + Default> PaddedBatch<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            lengths: Vec::new(),
            max_len: 0,
            width: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `[batch, max_len, width]`
    pub fn shape(&self) -> [usize; 3] {
        [self.batch_size(), self.max_len, self.width]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// True (unpadded) length of every example.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Number of padding steps in front of example `i`.
    pub fn pad_offset(&self, i: usize) -> usize {
        self.max_len - self.lengths[i]
    }

    pub fn step(&self, i: usize, t: usize) -> &[T] {
        let start = (i * self.max_len + t) * self.width;
        &self.data[start..start + self.width]
    }

    /// The original sequence for example `i`, padding removed.
    pub fn unpad(&self, i: usize) -> Vec<Vec<T>> {
        (self.pad_offset(i)..self.max_len)
            .map(|t| self.step(i, t).to_vec())
            .collect()
    }

    pub fn unpad_all(&self) -> Vec<Vec<Vec<T>>> {
        (0..self.batch_size()).map(|i| self.unpad(i)).collect()
    }

    /// A new batch of the chosen examples, re-padded to their own maximum.
    pub fn select(&self, indices: &[usize]) -> Self {
        let sequences: Vec<Vec<Vec<T>>> = indices.iter().map(|&i| self.unpad(i)).collect();
        let mut batch = stack_into_df(&sequences);
        if batch.width == 0 {
            batch.width = self.width;
        }
        batch
    }
}

/// Pad `sequence` at the front to `max_len` steps of `width` values. Longer
/// sequences keep their last `max_len` steps.
pub fn front_pad<T: Copy + Default>(sequence: &[Vec<T>], max_len: usize, width: usize) -> Vec<T> {
    let keep = sequence.len().min(max_len);
    let mut out = vec![T::default(); (max_len - keep) * width];
    for step in &sequence[sequence.len() - keep..] {
        out.extend_from_slice(step);
    }
    out
}

/// Stack sequences of different lengths into one front-padded batch.
/// Steps of unequal width make the input malformed; the result is then empty.
pub fn stack_into_df<T: Copy + Default>(sequences: &[Vec<Vec<T>>]) -> PaddedBatch<T> {
    let width = match sequences.iter().flatten().next() {
        Some(step) => step.len(),
        None => 0,
    };
    if sequences.iter().flatten().any(|step| step.len() != width) {
        warn!("sequences have ragged step widths; returning an empty batch");
        return PaddedBatch::empty();
    }

    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut data = Vec::with_capacity(sequences.len() * max_len * width);
    for seq in sequences {
        data.extend(front_pad(seq, max_len, width));
    }
    PaddedBatch {
        data,
        lengths: sequences.iter().map(Vec::len).collect(),
        max_len,
        width,
    }
}
