use ndarray::{Array3, ArrayView2, Zip};

use crate::common::log_sum_exp;
use crate::config::EvaluationConfig;
use crate::error::{EvalError, Result};
use crate::model::RecurrentModel;
use crate::state::HiddenState;

/// Result of one scored forward call.
#[derive(Debug, Clone)]
pub struct ScoredOutput {
    /// `[T, b, V]` log-probabilities.
    pub log_prob: Array3<f32>,
    pub hidden: HiddenState,
    /// `[T, b, H]` last-layer activations, only when diagnostics were asked for.
    pub diagnostics: Option<Array3<f32>>,
}

/// Runs the model and reduces its expert predictions to one distribution.
#[derive(Debug, Clone)]
pub struct EnsembleScorer {
    /// Natural log of the normalized mixture weight of each expert.
    log_weights: Vec<f64>,
}

impl EnsembleScorer {
    pub fn new(mixture_weights: &[f64]) -> Result<Self> {
        if mixture_weights.is_empty() {
            return Err(EvalError::Config("an ensemble needs at least one expert".to_string()));
        }
        let total: f64 = mixture_weights.iter().sum();
        if !(total > 0.0) || mixture_weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(EvalError::Config(format!(
                "invalid mixture weights {:?}",
                mixture_weights
            )));
        }
        let log_weights = mixture_weights.iter().map(|&w| (w / total).ln()).collect();
        Ok(Self { log_weights })
    }

    pub fn uniform(n_experts: usize) -> Result<Self> {
        Self::new(&vec![1.0; n_experts])
    }

    pub fn n_experts(&self) -> usize {
        self.log_weights.len()
    }

    pub fn forward<M: RecurrentModel + ?Sized>(
        &self,
        model: &M,
        hidden: &HiddenState,
        input: ArrayView2<u32>,
        config: &EvaluationConfig,
    ) -> Result<ScoredOutput> {
        if !model.is_inference_mode() {
            return Err(EvalError::NotInInferenceMode);
        }
        let want_diagnostics = config.want_diagnostics();
        let output = model.forward(hidden, input, want_diagnostics)?;

        if output.expert_log_probs.len() != self.n_experts() {
            return Err(EvalError::Shape(format!(
                "model produced {} expert distributions, scorer expects {}",
                output.expert_log_probs.len(),
                self.n_experts()
            )));
        }

        let log_prob = if config.average_ensemble && self.n_experts() > 1 {
            self.mixture(&output.expert_log_probs)?
        } else {
            output.expert_log_probs.into_iter().next().ok_or_else(|| {
                EvalError::Shape("model produced no master distribution".to_string())
            })?
        };

        // Only the final entry (last layer) is reported.
        let diagnostics = if want_diagnostics {
            output.activations.and_then(|mut layers| layers.pop())
        } else {
            None
        };
        if want_diagnostics && diagnostics.is_none() {
            return Err(EvalError::Shape(
                "model returned no activations although diagnostics were requested".to_string(),
            ));
        }

        Ok(ScoredOutput {
            log_prob,
            hidden: output.hidden,
            diagnostics,
        })
    }

    /// `log sum_k w_k p_k` per position, computed in log space.
    fn mixture(&self, experts: &[Array3<f32>]) -> Result<Array3<f32>> {
        let dim = experts[0].dim();
        if experts.iter().any(|e| e.dim() != dim) {
            return Err(EvalError::Shape(
                "expert distributions have different shapes".to_string(),
            ));
        }
        let mut mixed = Array3::zeros(dim);
        let mut terms = vec![0.0f64; experts.len()];
        Zip::indexed(&mut mixed).for_each(|idx, out| {
            for (k, expert) in experts.iter().enumerate() {
                terms[k] = self.log_weights[k] + expert[idx] as f64;
            }
            *out = log_sum_exp(&terms) as f32;
        });
        Ok(mixed)
    }
}
