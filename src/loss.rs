use ndarray::{ArrayView2, ArrayView3, Axis};

use crate::error::{EvalError, Result};

/// Mean negative log-likelihood of one sentence, in nats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentenceLoss {
    pub scored_positions: usize,
    pub nll_sum: f64,
    pub loss: f64,
    pub perplexity: f64,
}

/// Sums masked NLL across the chunks of one sentence.
#[derive(Debug, Clone, Default)]
pub struct LossAggregator {
    nll_sum: f64,
    count: usize,
}

impl LossAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every position where `mask` is set. `log_prob` is `[T, b, V]`,
    /// `target` and `mask` are `[T, b]`.
    pub fn accumulate(
        &mut self,
        log_prob: ArrayView3<f32>,
        target: ArrayView2<u32>,
        mask: ArrayView2<bool>,
    ) -> Result<()> {
        let (steps, batch, vocab) = log_prob.dim();
        if target.dim() != (steps, batch) || mask.dim() != (steps, batch) {
            return Err(EvalError::Shape(format!(
                "log_prob {:?} does not line up with target {:?} / mask {:?}",
                log_prob.dim(),
                target.dim(),
                mask.dim()
            )));
        }

        for ((t, b), &valid) in mask.indexed_iter() {
            if !valid {
                continue;
            }
            let id = target[[t, b]];
            if id as usize >= vocab {
                return Err(EvalError::TargetOutOfRange { target: id, vocab_size: vocab });
            }
            let row = log_prob.index_axis(Axis(0), t);
            self.nll_sum -= row[[b, id as usize]] as f64;
            self.count += 1;
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean over valid positions of this sentence only.
    pub fn finish(&self) -> Result<SentenceLoss> {
        if self.count == 0 {
            return Err(EvalError::EmptySentence);
        }
        let loss = self.nll_sum / self.count as f64;
        Ok(SentenceLoss {
            scored_positions: self.count,
            nll_sum: self.nll_sum,
            loss,
            perplexity: loss.exp(),
        })
    }
}
