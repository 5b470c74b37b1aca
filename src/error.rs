use std::fmt;
use std::io;

/// Every failure the evaluator can report, from startup loading through
/// the per-sentence loop.
#[derive(Debug)]
pub enum EvalError {
    Io(io::Error),
    Json(serde_json::Error),
    /// Invalid run or model configuration.
    Config(String),
    Vocab(String),
    Corpus { line: usize, message: String },
    Checkpoint(String),
    /// An array did not have the shape an operation expected.
    Shape(String),
    SentenceTooShort { len: usize },
    NotInInferenceMode,
    TargetOutOfRange { target: u32, vocab_size: usize },
    EmptySentence,
    NonFiniteLoss { sentence: usize, loss: f64 },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Io(e) => write!(f, "IO error: {}", e),
            EvalError::Json(e) => write!(f, "JSON error: {}", e),
            EvalError::Config(s) => write!(f, "Configuration error: {}", s),
            EvalError::Vocab(s) => write!(f, "Vocabulary error: {}", s),
            EvalError::Corpus { line, message } => {
                write!(f, "Corpus error at line {}: {}", line, message)
            }
            EvalError::Checkpoint(s) => write!(f, "Checkpoint error: {}", s),
            EvalError::Shape(s) => write!(f, "Shape error: {}", s),
            EvalError::SentenceTooShort { len } => write!(
                f,
                "Sentence of length {} cannot form an (input, target) pair",
                len
            ),
            EvalError::NotInInferenceMode => {
                write!(f, "Model must be switched to inference mode before forward")
            }
            EvalError::TargetOutOfRange { target, vocab_size } => write!(
                f,
                "Target id {} is outside the vocabulary of size {}",
                target, vocab_size
            ),
            EvalError::EmptySentence => write!(f, "No valid target positions to score"),
            EvalError::NonFiniteLoss { sentence, loss } => write!(
                f,
                "Non-finite loss {} for sentence {}",
                loss, sentence
            ),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvalError::Io(e) => Some(e),
            EvalError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EvalError {
    fn from(err: io::Error) -> EvalError {
        EvalError::Io(err)
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> EvalError {
        EvalError::Json(err)
    }
}

impl From<ndarray::ShapeError> for EvalError {
    fn from(err: ndarray::ShapeError) -> EvalError {
        EvalError::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
