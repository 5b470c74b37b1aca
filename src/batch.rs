use ndarray::{s, Array2, ArrayView2};
use std::ops::Range;

use crate::config::MAX_BATCH_WIDTH;
use crate::error::{EvalError, Result};

/// Input ids, next-token targets and a validity mask, all shaped `[T, b]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub input: Array2<u32>,
    pub target: Array2<u32>,
    /// `true` exactly where `target` holds a real token.
    pub mask: Array2<bool>,
}

impl Batch {
    pub fn rows(&self) -> usize {
        self.input.nrows()
    }

    pub fn width(&self) -> usize {
        self.input.ncols()
    }

    pub fn valid_positions(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Row ranges of at most `max_span` time steps covering the batch.
    pub fn spans(&self, max_span: usize) -> impl Iterator<Item = Range<usize>> {
        let rows = self.rows();
        let step = max_span.max(1);
        (0..rows).step_by(step).map(move |start| start..(start + step).min(rows))
    }

    pub fn chunk(&self, rows: Range<usize>) -> BatchChunk<'_> {
        BatchChunk {
            input: self.input.slice(s![rows.clone(), ..]),
            target: self.target.slice(s![rows.clone(), ..]),
            mask: self.mask.slice(s![rows, ..]),
        }
    }
}

/// Borrowed time-step window of a `Batch`.
#[derive(Debug, Clone, Copy)]
pub struct BatchChunk<'a> {
    pub input: ArrayView2<'a, u32>,
    pub target: ArrayView2<'a, u32>,
    pub mask: ArrayView2<'a, bool>,
}

/// Turns one sentence into a `Batch` of width `batch_width`.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    batch_width: usize,
}

impl BatchBuilder {
    pub fn new(batch_width: usize) -> Self {
        Self { batch_width: batch_width.max(1) }
    }

    pub fn batch_width(&self) -> usize {
        self.batch_width
    }

    /// The `n - 1` (input, target) pairs of the sentence are laid out in
    /// `b` contiguous columns of `ceil((n - 1) / b)` rows. Short columns are
    /// zero padded with mask = false.
    pub fn build(&self, sentence: &[u32]) -> Result<Batch> {
        if sentence.len() < 2 {
            return Err(EvalError::SentenceTooShort { len: sentence.len() });
        }
        let width = self.batch_width;
        if width > MAX_BATCH_WIDTH {
            return Err(EvalError::Config(format!(
                "batch width {} exceeds the maximum of {}",
                width, MAX_BATCH_WIDTH
            )));
        }
        let pairs = sentence.len() - 1;
        let rows = pairs.div_ceil(width);

        let mut input = Array2::zeros((rows, width));
        let mut target = Array2::zeros((rows, width));
        let mut mask = Array2::from_elem((rows, width), false);

        for pair in 0..pairs {
            let (col, row) = (pair / rows, pair % rows);
            input[[row, col]] = sentence[pair];
            target[[row, col]] = sentence[pair + 1];
            mask[[row, col]] = true;
        }

        Ok(Batch { input, target, mask })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use proptest::prelude::*;

    #[test]
    fn test_build_width_one_shifts_targets() {
        let batch = BatchBuilder::new(1).build(&[5, 17, 9, 42]).unwrap();
        assert_eq!(batch.input, arr2(&[[5u32], [17], [9]]));
        assert_eq!(batch.target, arr2(&[[17u32], [9], [42]]));
        assert!(batch.mask.iter().all(|&m| m));
        assert_eq!(batch.valid_positions(), 3);
    }

    #[test]
    fn test_build_rejects_short_sentences() {
        let builder = BatchBuilder::new(1);
        assert!(matches!(builder.build(&[5]), Err(EvalError::SentenceTooShort { len: 1 })));
        assert!(matches!(builder.build(&[]), Err(EvalError::SentenceTooShort { len: 0 })));
    }

    #[test]
    fn test_build_rejects_huge_width() {
        let result = BatchBuilder::new(usize::MAX).build(&[1, 2, 3]);
        assert!(matches!(result, Err(EvalError::Config(_))));

        let batch = BatchBuilder::new(MAX_BATCH_WIDTH).build(&[1, 2, 3]).unwrap();
        assert_eq!(batch.rows(), 1);
        assert_eq!(batch.valid_positions(), 2);
    }

    #[test]
    fn test_build_ragged_columns_are_padded() {
        // 4 pairs over 3 columns of 2 rows: the third column is all padding.
        let batch = BatchBuilder::new(3).build(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(batch.input, arr2(&[[1u32, 3, 0], [2, 4, 0]]));
        assert_eq!(batch.target, arr2(&[[2u32, 4, 0], [3, 5, 0]]));
        assert_eq!(batch.mask, arr2(&[[true, true, false], [true, true, false]]));
    }

    #[test]
    fn test_spans_cover_all_rows() {
        let batch = BatchBuilder::new(1).build(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let spans: Vec<_> = batch.spans(3).collect();
        assert_eq!(spans, vec![0..3, 3..6, 6..7]);

        let chunk = batch.chunk(3..6);
        assert_eq!(chunk.input.column(0).to_vec(), vec![3, 4, 5]);
        assert_eq!(chunk.target.column(0).to_vec(), vec![4, 5, 6]);
    }

    proptest! {
        #[test]
        fn prop_every_pair_scored_once(
            sentence in proptest::collection::vec(0u32..50, 2..40),
            width in 1usize..6,
        ) {
            let batch = BatchBuilder::new(width).build(&sentence).unwrap();
            prop_assert_eq!(batch.width(), width);
            prop_assert_eq!(batch.valid_positions(), sentence.len() - 1);

            // Column-major walk over valid positions recovers the sentence order.
            let mut inputs = Vec::new();
            let mut targets = Vec::new();
            for col in 0..batch.width() {
                for row in 0..batch.rows() {
                    if batch.mask[[row, col]] {
                        inputs.push(batch.input[[row, col]]);
                        targets.push(batch.target[[row, col]]);
                    }
                }
            }
            prop_assert_eq!(&inputs[..], &sentence[..sentence.len() - 1]);
            prop_assert_eq!(&targets[..], &sentence[1..]);
        }
    }
}
