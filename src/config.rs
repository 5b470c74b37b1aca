use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{EvalError, Result};

/// Default number of time steps fed to the model in one forward call.
pub const DEFAULT_MAX_SPAN: usize = 70;
/// Upper bound on the number of batch columns for one sentence.
pub const MAX_BATCH_WIDTH: usize = 4096;

fn default_nhidlast() -> i64 {
    -1
}

/// Hyper-parameters of a trained `LstmEnsembleModel`, stored next to the
/// weights as `model_config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub emsize: usize,
    pub nhid: usize,
    /// Width of the last recurrent layer. Negative means "same as emsize".
    #[serde(default = "default_nhidlast")]
    pub nhidlast: i64,
    pub nlayers: usize,
    #[serde(default, alias = "ndistilstudents")]
    pub n_students: usize,
    /// Mixture weights for master followed by each student.
    #[serde(default)]
    pub ensemble_weights: Option<Vec<f32>>,
}

impl ModelConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(EvalError::Config(format!(
                "Model config file not found at: {}",
                config_path.display()
            )));
        }

        let mut file = File::open(config_path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: ModelConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn last_hidden(&self) -> usize {
        if self.nhidlast < 0 {
            self.emsize
        } else {
            self.nhidlast as usize
        }
    }

    /// Input and output width of master layer `layer`.
    pub fn layer_dims(&self, layer: usize) -> (usize, usize) {
        let input = if layer == 0 { self.emsize } else { self.nhid };
        let output = if layer + 1 == self.nlayers {
            self.last_hidden()
        } else {
            self.nhid
        };
        (input, output)
    }

    pub fn n_experts(&self) -> usize {
        self.n_students + 1
    }

    /// Normalized mixture weights, uniform when none are configured.
    pub fn mixture_weights(&self) -> Vec<f64> {
        let n = self.n_experts();
        match &self.ensemble_weights {
            Some(weights) => {
                let total: f64 = weights.iter().map(|&w| w as f64).sum();
                weights.iter().map(|&w| w as f64 / total).collect()
            }
            None => vec![1.0 / n as f64; n],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(EvalError::Config("vocab_size must be positive".to_string()));
        }
        if self.nlayers == 0 {
            return Err(EvalError::Config("nlayers must be at least 1".to_string()));
        }
        if self.emsize == 0 || self.nhid == 0 || self.last_hidden() == 0 {
            return Err(EvalError::Config(
                "emsize, nhid and nhidlast must be positive".to_string(),
            ));
        }
        if let Some(weights) = &self.ensemble_weights {
            if weights.len() != self.n_experts() {
                return Err(EvalError::Config(format!(
                    "ensemble_weights has {} entries, expected {} (master + {} students)",
                    weights.len(),
                    self.n_experts(),
                    self.n_students
                )));
            }
            if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
                return Err(EvalError::Config(
                    "ensemble_weights must be finite and non-negative".to_string(),
                ));
            }
            if weights.iter().sum::<f32>() <= 0.0 {
                return Err(EvalError::Config(
                    "ensemble_weights must have a positive sum".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Immutable knobs for one evaluation run, handed to the scorer at call time.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    pub batch_width: usize,
    pub max_span: usize,
    pub average_ensemble: bool,
    pub want_state_norm: bool,
    pub want_entropy: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            batch_width: 1,
            max_span: DEFAULT_MAX_SPAN,
            average_ensemble: true,
            want_state_norm: false,
            want_entropy: false,
        }
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_width == 0 {
            return Err(EvalError::Config("batch width must be at least 1".to_string()));
        }
        if self.batch_width > MAX_BATCH_WIDTH {
            return Err(EvalError::Config(format!(
                "batch width {} exceeds the maximum of {}",
                self.batch_width, MAX_BATCH_WIDTH
            )));
        }
        if self.max_span == 0 {
            return Err(EvalError::Config("max sequence span must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Activations are only needed for the state-norm stream.
    pub fn want_diagnostics(&self) -> bool {
        self.want_state_norm
    }
}
