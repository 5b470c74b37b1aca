use std::io::Write;

use crate::batch::BatchBuilder;
use crate::config::EvaluationConfig;
use crate::diagnostics::DiagnosticsEmitter;
use crate::ensemble::EnsembleScorer;
use crate::error::{EvalError, Result};
use crate::loss::{LossAggregator, SentenceLoss};
use crate::model::RecurrentModel;
use crate::state::StateManager;
use crate::vocab::Vocabulary;

/// Everything needed to score sentences, built once per run. Building it
/// switches the model to inference mode.
#[derive(Debug)]
pub struct EvaluationContext<M: RecurrentModel> {
    model: M,
    vocab: Vocabulary,
    config: EvaluationConfig,
    scorer: EnsembleScorer,
    builder: BatchBuilder,
    states: StateManager,
}

impl<M: RecurrentModel> EvaluationContext<M> {
    pub fn new(
        mut model: M,
        vocab: Vocabulary,
        mixture_weights: &[f64],
        config: EvaluationConfig,
    ) -> Result<Self> {
        config.validate()?;
        if vocab.len() != model.vocab_size() {
            return Err(EvalError::Vocab(format!(
                "vocabulary has {} tokens but the model was trained with {}",
                vocab.len(),
                model.vocab_size()
            )));
        }
        let scorer = EnsembleScorer::new(mixture_weights)?;
        if scorer.n_experts() != model.n_experts() {
            return Err(EvalError::Config(format!(
                "{} mixture weights given for a model with {} experts",
                scorer.n_experts(),
                model.n_experts()
            )));
        }
        model.set_inference_mode();

        Ok(Self {
            model,
            vocab,
            builder: BatchBuilder::new(config.batch_width),
            config,
            scorer,
            states: StateManager,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Scores one sentence from a fresh state. Long sentences are fed in
    /// spans of at most `max_span` steps, carrying detached state between
    /// spans. Diagnostics are buffered into `diagnostics` but not written.
    pub fn score_sentence<W: Write>(
        &self,
        sentence: &[u32],
        diagnostics: &mut DiagnosticsEmitter<W>,
    ) -> Result<SentenceLoss> {
        let batch = self.builder.build(sentence)?;
        let mut hidden = self.states.init(&self.model, batch.width());
        let mut loss = LossAggregator::new();
        let record = self.config.want_state_norm || self.config.want_entropy;

        for span in batch.spans(self.config.max_span) {
            let chunk = batch.chunk(span);
            let scored = self.scorer.forward(&self.model, &hidden, chunk.input, &self.config)?;
            loss.accumulate(scored.log_prob.view(), chunk.target, chunk.mask)?;
            if record {
                diagnostics.record(
                    scored.log_prob.view(),
                    scored.diagnostics.as_ref().map(|a| a.view()),
                    chunk.mask,
                );
            }
            hidden = self.states.detach(scored.hidden);
        }
        loss.finish()
    }
}

/// Counts of one pass over the corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub scored: usize,
    pub skipped: usize,
}

/// Scores each sentence independently, in corpus order, writing
/// `<length> <loss> <perplexity>` per scored sentence to the report.
pub struct SentenceEvaluationLoop<'a, M: RecurrentModel> {
    context: &'a EvaluationContext<M>,
}

impl<'a, M: RecurrentModel> SentenceEvaluationLoop<'a, M> {
    pub fn new(context: &'a EvaluationContext<M>) -> Self {
        Self { context }
    }

    /// Sinks are flushed whether the pass completes or aborts.
    pub fn run<'s, I, R, W>(
        &self,
        sentences: I,
        report: &mut R,
        diagnostics: &mut DiagnosticsEmitter<W>,
    ) -> Result<RunStats>
    where
        I: IntoIterator<Item = &'s [u32]>,
        R: Write,
        W: Write,
    {
        let config = self.context.config();
        if diagnostics.wants_state_norm() != config.want_state_norm
            || diagnostics.wants_entropy() != config.want_entropy
        {
            return Err(EvalError::Config(
                "diagnostic sinks do not match the requested diagnostics".to_string(),
            ));
        }

        let result = self.run_sentences(sentences, report, diagnostics);
        let flushed = diagnostics.flush().and(report.flush().map_err(EvalError::from));
        let stats = result?;
        flushed?;
        Ok(stats)
    }

    fn run_sentences<'s, I, R, W>(
        &self,
        sentences: I,
        report: &mut R,
        diagnostics: &mut DiagnosticsEmitter<W>,
    ) -> Result<RunStats>
    where
        I: IntoIterator<Item = &'s [u32]>,
        R: Write,
        W: Write,
    {
        let mut stats = RunStats::default();

        for (index, sentence) in sentences.into_iter().enumerate() {
            if sentence.len() < 2 {
                log::warn!(
                    "Skipping sentence {}: length {} is too short to score",
                    index,
                    sentence.len()
                );
                stats.skipped += 1;
                continue;
            }

            let scored = match self.context.score_sentence(sentence, diagnostics) {
                Ok(scored) => scored,
                Err(e) => {
                    diagnostics.discard_sentence();
                    log::error!("Evaluation failed on sentence {}: {}", index, e);
                    return Err(e);
                }
            };
            if !scored.loss.is_finite() {
                diagnostics.discard_sentence();
                log::error!("Sentence {} produced a non-finite loss; aborting", index);
                return Err(EvalError::NonFiniteLoss { sentence: index, loss: scored.loss });
            }

            diagnostics.end_sentence()?;
            writeln!(report, "{} {} {}", sentence.len(), scored.loss, scored.perplexity)?;
            log::debug!(
                "Sentence {}: {} positions, loss {:.4}",
                index,
                scored.scored_positions,
                scored.loss
            );
            stats.scored += 1;
        }
        Ok(stats)
    }
}
