use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use rnn_lm_eval::logging::init_logging;
use rnn_lm_eval::split::{split_sentences, SplitOptions};

/// Split sentences read from stdin by fraction of words
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Output file for the left part of the sentences
    #[arg(short, long)]
    left_output_file: PathBuf,

    /// Output file for the right part of the sentences
    #[arg(short, long)]
    right_output_file: PathBuf,

    /// Word ratio
    #[arg(long, default_value_t = 0.5)]
    ratio: f64,

    /// Skip sentences where the left part is shorter than this many words
    #[arg(long, default_value_t = 2)]
    skip_short_left: usize,
}

fn run_cli() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    init_logging(false, None)?;

    let mut left = BufWriter::new(File::create(&args.left_output_file)?);
    let mut right = BufWriter::new(File::create(&args.right_output_file)?);
    let options = SplitOptions {
        ratio: args.ratio,
        skip_short_left: args.skip_short_left,
    };

    let stdin = io::stdin();
    let stats = split_sentences(stdin.lock(), &mut left, &mut right, options)?;
    log::debug!("Wrote {} split sentences, skipped {}", stats.written, stats.skipped);
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
