use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{EvalError, Result};
use crate::vocab::Vocabulary;

/// Ordered token-id sentences of a held-out test set.
#[derive(Debug, Clone, Default)]
pub struct SentenceCorpus {
    pub sentences: Vec<Vec<u32>>,
}

impl SentenceCorpus {
    /// Resolves `--test-data`: a directory means `<dir>/test.txt`.
    pub fn resolve_path(test_data: &Path) -> PathBuf {
        if test_data.is_dir() {
            test_data.join("test.txt")
        } else {
            test_data.to_path_buf()
        }
    }

    pub fn load(test_data: &Path, vocab: &Vocabulary) -> Result<Self> {
        let path = Self::resolve_path(test_data);
        let file = File::open(&path).map_err(|e| EvalError::Corpus {
            line: 0,
            message: format!("cannot open {}: {}", path.display(), e),
        })?;
        let corpus = Self::from_reader(BufReader::new(file), vocab)?;
        log::info!(
            "Loaded {} test sentences from {}",
            corpus.len(),
            path.display()
        );
        Ok(corpus)
    }

    /// One sentence per line, whitespace tokenized, `<eos>` appended when the
    /// vocabulary defines it. Unknown words map to `<unk>`.
    pub fn from_reader<R: BufRead>(reader: R, vocab: &Vocabulary) -> Result<Self> {
        let eos = vocab.eos_id();
        let unk = vocab.unk_id();
        let mut sentences = Vec::new();

        for (line_idx, line) in reader.lines().enumerate() {
            let line = line?;
            let mut ids = Vec::new();
            for word in line.split_whitespace() {
                let id = vocab.id(word).or(unk).ok_or_else(|| EvalError::Corpus {
                    line: line_idx + 1,
                    message: format!("word '{}' is not in the vocabulary and there is no <unk>", word),
                })?;
                ids.push(id);
            }
            if let Some(eos) = eos {
                ids.push(eos);
            }
            sentences.push(ids);
        }
        Ok(Self { sentences })
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.sentences.iter().map(Vec::as_slice)
    }
}
