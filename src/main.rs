use clap::Parser;
use std::error::Error;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use rnn_lm_eval::config::DEFAULT_MAX_SPAN;
use rnn_lm_eval::logging::init_logging;
use rnn_lm_eval::{
    DiagnosticsEmitter, EvaluationConfig, EvaluationContext, LstmEnsembleModel, SentenceCorpus,
    SentenceEvaluationLoop, Vocabulary, LOG_FILE, VOCAB_FILE,
};

/// Score a trained recurrent language model sentence by sentence.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Test data: a text file, or a directory holding test.txt
    #[arg(long, default_value = "./penn/")]
    test_data: PathBuf,

    /// Directory holding model_config.json, model.safetensors and vocab.json
    #[arg(long, default_value = "EXP")]
    save: PathBuf,

    /// Evaluation batch width
    #[arg(long, default_value_t = 1)]
    batch_width: usize,

    /// Maximum number of time steps per forward call
    #[arg(long, default_value_t = DEFAULT_MAX_SPAN)]
    max_seq_span: usize,

    /// Disable ensemble averaging and score with the master model only
    #[arg(long)]
    no_average_ensemble: bool,

    /// Write per-token last-layer state norms to this file
    #[arg(long)]
    per_token_state_norm_out_file: Option<PathBuf>,

    /// Write per-token predictive entropy to this file
    #[arg(long)]
    per_token_entropy_out_file: Option<PathBuf>,

    /// Also append log records to <save>/log.txt
    #[arg(long)]
    log_file: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn run_cli() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    let log_path = args.log_file.then(|| args.save.join(LOG_FILE));
    init_logging(args.verbose, log_path.as_deref())?;

    let config = EvaluationConfig {
        batch_width: args.batch_width,
        max_span: args.max_seq_span,
        average_ensemble: !args.no_average_ensemble,
        want_state_norm: args.per_token_state_norm_out_file.is_some(),
        want_entropy: args.per_token_entropy_out_file.is_some(),
    };
    log::info!("Evaluation configuration: {:?}", config);

    // Everything that can fail at startup happens before the first sentence.
    let vocab = Vocabulary::load(&args.save.join(VOCAB_FILE))?;
    let model = LstmEnsembleModel::load(&args.save)?;
    let weights = model.config().mixture_weights();
    let context = EvaluationContext::new(model, vocab, &weights, config)?;
    let corpus = SentenceCorpus::load(&args.test_data, context.vocab())?;
    let mut diagnostics = DiagnosticsEmitter::create(
        args.per_token_state_norm_out_file.as_deref(),
        args.per_token_entropy_out_file.as_deref(),
    )?;

    let stdout = io::stdout();
    let mut report = BufWriter::new(stdout.lock());
    let stats = SentenceEvaluationLoop::new(&context).run(corpus.iter(), &mut report, &mut diagnostics)?;
    log::info!(
        "Scored {} sentences, skipped {} too short to score",
        stats.scored,
        stats.skipped
    );
    Ok(())
}

fn main() {
    if let Err(e) = run_cli() {
        eprintln!("Application error: {}", e);
        let mut current_err: Option<&(dyn Error + 'static)> = e.source();
        while let Some(source) = current_err {
            eprintln!("Caused by: {}", source);
            current_err = source.source();
        }
        std::process::exit(1);
    }
}
