//! Per-sentence perplexity evaluation of trained recurrent language models,
//! with optional per-token state-norm and entropy diagnostics.

pub mod batch;
pub mod common;
pub mod config;
pub mod corpus;
pub mod diagnostics;
pub mod ensemble;
pub mod error;
pub mod evaluate;
pub mod logging;
pub mod loss;
pub mod model;
pub mod split;
pub mod state;
pub mod vocab;

pub use batch::{Batch, BatchBuilder};
pub use config::{EvaluationConfig, ModelConfig};
pub use corpus::SentenceCorpus;
pub use diagnostics::DiagnosticsEmitter;
pub use ensemble::{EnsembleScorer, ScoredOutput};
pub use error::{EvalError, Result};
pub use evaluate::{EvaluationContext, RunStats, SentenceEvaluationLoop};
pub use loss::{LossAggregator, SentenceLoss};
pub use model::{LstmEnsembleModel, ModelOutput, RecurrentModel};
pub use state::{HiddenState, StateManager};
pub use vocab::Vocabulary;

/// File name of the vocabulary inside the save directory.
pub const VOCAB_FILE: &str = "vocab.json";
/// File name of the optional run log inside the save directory.
pub const LOG_FILE: &str = "log.txt";
