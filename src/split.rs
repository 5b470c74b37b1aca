use std::io::{BufRead, Write};

use crate::error::{EvalError, Result};

/// Options for splitting sentences into a left and right part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOptions {
    /// Fraction of each sentence's words that go to the left part.
    pub ratio: f64,
    /// Sentences whose left part has fewer words are dropped entirely.
    pub skip_short_left: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self { ratio: 0.5, skip_short_left: 2 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitStats {
    pub written: usize,
    pub skipped: usize,
}

/// Word index where a sentence of `len` words is cut. Ties round to even.
pub fn split_index(len: usize, ratio: f64) -> usize {
    let idx = (len as f64 * ratio).round_ties_even();
    (idx.max(0.0) as usize).min(len)
}

/// Reads one sentence per line and writes its left and right parts to the
/// two outputs, line-aligned.
pub fn split_sentences<R, L, W>(
    input: R,
    left: &mut L,
    right: &mut W,
    options: SplitOptions,
) -> Result<SplitStats>
where
    R: BufRead,
    L: Write,
    W: Write,
{
    if !(0.0..=1.0).contains(&options.ratio) {
        return Err(EvalError::Config(format!(
            "ratio must be within [0, 1], got {}",
            options.ratio
        )));
    }

    let mut stats = SplitStats::default();
    for line in input.lines() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let idx = split_index(tokens.len(), options.ratio);
        if idx < options.skip_short_left {
            stats.skipped += 1;
            continue;
        }
        writeln!(left, "{}", tokens[..idx].join(" "))?;
        writeln!(right, "{}", tokens[idx..].join(" "))?;
        stats.written += 1;
    }
    left.flush()?;
    right.flush()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_split_index_rounds_half_to_even() {
        assert_eq!(split_index(5, 0.5), 2);
        assert_eq!(split_index(7, 0.5), 4);
        assert_eq!(split_index(4, 0.5), 2);
        assert_eq!(split_index(10, 0.26), 3);
        assert_eq!(split_index(3, 1.0), 3);
        assert_eq!(split_index(0, 0.5), 0);
    }

    #[test]
    fn test_split_sentences_aligned_outputs() {
        let input = "a b c d e\n  x   y  \nsolo\none two three four\n";
        let mut left = Vec::new();
        let mut right = Vec::new();
        let stats = split_sentences(Cursor::new(input), &mut left, &mut right, SplitOptions::default())
            .unwrap();

        // "x y" splits 1/1 and "solo" 0/1 (after even rounding): both dropped.
        assert_eq!(stats, SplitStats { written: 2, skipped: 2 });
        assert_eq!(String::from_utf8(left).unwrap(), "a b\none two\n");
        assert_eq!(String::from_utf8(right).unwrap(), "c d e\nthree four\n");
    }

    #[test]
    fn test_split_sentences_keeps_empty_right_part() {
        let mut left = Vec::new();
        let mut right = Vec::new();
        let options = SplitOptions { ratio: 1.0, skip_short_left: 1 };
        split_sentences(Cursor::new("p q\n"), &mut left, &mut right, options).unwrap();
        assert_eq!(String::from_utf8(left).unwrap(), "p q\n");
        assert_eq!(String::from_utf8(right).unwrap(), "\n");
    }

    #[test]
    fn test_split_sentences_rejects_bad_ratio() {
        let mut sink = Vec::new();
        let mut other = Vec::new();
        let options = SplitOptions { ratio: 1.5, skip_short_left: 0 };
        let result = split_sentences(Cursor::new(""), &mut sink, &mut other, options);
        assert!(matches!(result, Err(EvalError::Config(_))));
    }
}
