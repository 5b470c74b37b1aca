use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{EvalError, Result};

pub const EOS_TOKEN: &str = "<eos>";
pub const UNK_TOKEN: &str = "<unk>";

/// Fixed token <-> id mapping the model was trained with.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    word2idx: HashMap<String, u32>,
    idx2word: Vec<String>,
}

impl Vocabulary {
    /// Builds a vocabulary from a token -> id map. Ids must cover `0..len`
    /// exactly once.
    pub fn from_map(word2idx: HashMap<String, u32>) -> Result<Self> {
        let size = word2idx.len();
        let mut slots: Vec<Option<String>> = vec![None; size];
        for (word, &id) in &word2idx {
            let slot = slots.get_mut(id as usize).ok_or_else(|| {
                EvalError::Vocab(format!(
                    "id {} for token '{}' is outside 0..{}",
                    id, word, size
                ))
            })?;
            if let Some(existing) = slot {
                return Err(EvalError::Vocab(format!(
                    "id {} is assigned to both '{}' and '{}'",
                    id, existing, word
                )));
            }
            *slot = Some(word.clone());
        }
        // Every slot is filled: `size` distinct ids in 0..size.
        let idx2word = slots.into_iter().flatten().collect();
        Ok(Self { word2idx, idx2word })
    }

    /// Builds a vocabulary where each token's id is its position.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut word2idx = HashMap::new();
        for (idx, token) in tokens.into_iter().enumerate() {
            let token = token.into();
            if word2idx.insert(token.clone(), idx as u32).is_some() {
                return Err(EvalError::Vocab(format!("duplicate token '{}'", token)));
            }
        }
        Self::from_map(word2idx)
    }

    /// Loads `vocab.json`, a JSON object mapping token to id.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvalError::Vocab(format!(
                "Vocabulary file not found at: {}",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        let word2idx: HashMap<String, u32> = serde_json::from_reader(reader)?;
        let vocab = Self::from_map(word2idx)?;
        log::debug!("Loaded vocabulary of {} tokens from {}", vocab.len(), path.display());
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.idx2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx2word.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.word2idx.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.idx2word.get(id as usize).map(String::as_str)
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.id(EOS_TOKEN)
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.id(UNK_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_tokens_assigns_positions() {
        let vocab = Vocabulary::from_tokens(["<unk>", "the", "cat", "<eos>"]).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id("cat"), Some(2));
        assert_eq!(vocab.token(1), Some("the"));
        assert_eq!(vocab.eos_id(), Some(3));
        assert_eq!(vocab.unk_id(), Some(0));
        assert_eq!(vocab.token(4), None);
    }

    #[test]
    fn test_from_tokens_rejects_duplicates() {
        let result = Vocabulary::from_tokens(["a", "b", "a"]);
        assert!(matches!(result, Err(EvalError::Vocab(_))));
    }

    #[test]
    fn test_from_map_rejects_sparse_ids() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 0);
        map.insert("b".to_string(), 5);
        let result = Vocabulary::from_map(map);
        match result {
            Err(EvalError::Vocab(msg)) => assert!(msg.contains("outside")),
            other => panic!("expected vocab error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_map_rejects_shared_ids() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 0);
        map.insert("b".to_string(), 0);
        assert!(Vocabulary::from_map(map).is_err());
    }

    #[test]
    fn test_load_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"<eos>": 2, "hello": 0, "world": 1}"#).unwrap();

        let vocab = Vocabulary::load(file.path()).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.token(2), Some("<eos>"));
        assert_eq!(vocab.unk_id(), None);
    }

    #[test]
    fn test_load_corrupt_json_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not json at all").unwrap();
        assert!(matches!(Vocabulary::load(file.path()), Err(EvalError::Json(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Vocabulary::load(Path::new("missing/vocab.json")).is_err());
    }
}
