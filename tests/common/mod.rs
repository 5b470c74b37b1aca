use rnn_lm_eval::model::{MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE};
use rnn_lm_eval::{LstmEnsembleModel, ModelConfig, VOCAB_FILE};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const VOCAB_SIZE: usize = 50;

/// `<unk>`, `<eos>`, then `w2` .. `w49`, so word `wN` has id N.
pub fn vocab_tokens() -> Vec<String> {
    let mut tokens = vec!["<unk>".to_string(), "<eos>".to_string()];
    tokens.extend((2..VOCAB_SIZE).map(|i| format!("w{}", i)));
    tokens
}

pub fn model_config(n_students: usize) -> ModelConfig {
    ModelConfig {
        vocab_size: VOCAB_SIZE,
        emsize: 6,
        nhid: 8,
        nhidlast: 5,
        nlayers: 2,
        n_students,
        ensemble_weights: None,
    }
}

/// Writes config, weights and vocabulary into `dir`.
pub fn write_save_dir(dir: &Path, n_students: usize) {
    let config = model_config(n_students);
    fs::write(dir.join(MODEL_CONFIG_FILE), serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let weights = LstmEnsembleModel::synthesize_checkpoint(&config, |name, i| {
        let seed = name.bytes().map(|b| b as f32).sum::<f32>();
        (seed * 0.13 + i as f32 * 0.37).cos() * 0.7
    })
    .unwrap();
    fs::write(dir.join(MODEL_WEIGHTS_FILE), weights).unwrap();

    let vocab: HashMap<String, u32> = vocab_tokens()
        .into_iter()
        .enumerate()
        .map(|(id, token)| (token, id as u32))
        .collect();
    fs::write(dir.join(VOCAB_FILE), serde_json::to_string(&vocab).unwrap()).unwrap();
}
