use ndarray::{ArrayView1, ArrayView2, ArrayView3, Axis};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// Euclidean norm of one activation vector.
pub fn state_norm(vector: ArrayView1<f32>) -> f64 {
    vector.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// Shannon entropy in nats of the distribution given by `log_probs`.
pub fn entropy(log_probs: ArrayView1<f32>) -> f64 {
    let h: f64 = log_probs
        .iter()
        .filter(|lp| lp.is_finite())
        .map(|&lp| {
            let lp = lp as f64;
            -lp.exp() * lp
        })
        .sum();
    h.max(0.0)
}

/// Per-sentence values of one metric, written as a line plus a blank
/// separator line.
#[derive(Debug)]
struct MetricSink<W: Write> {
    writer: W,
    pending: Vec<f64>,
}

impl<W: Write> MetricSink<W> {
    fn new(writer: W) -> Self {
        Self { writer, pending: Vec::new() }
    }

    fn end_sentence(&mut self) -> Result<()> {
        let line = self
            .pending
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(self.writer, "{}", line)?;
        writeln!(self.writer)?;
        self.pending.clear();
        Ok(())
    }
}

/// Streams per-token state norms and entropies to their own sinks.
/// A metric without a sink is never computed.
#[derive(Debug)]
pub struct DiagnosticsEmitter<W: Write> {
    state_norm: Option<MetricSink<W>>,
    entropy: Option<MetricSink<W>>,
}

impl DiagnosticsEmitter<BufWriter<File>> {
    /// Creates (truncating) the requested output files up front so an
    /// unwritable path fails before any sentence is scored.
    pub fn create(state_norm_path: Option<&Path>, entropy_path: Option<&Path>) -> Result<Self> {
        let open = |path: &Path| -> Result<BufWriter<File>> {
            log::info!("Writing per-token diagnostics to {}", path.display());
            Ok(BufWriter::new(File::create(path)?))
        };
        let state_norm = state_norm_path.map(open).transpose()?;
        let entropy = entropy_path.map(open).transpose()?;
        Ok(Self::new(state_norm, entropy))
    }
}

impl<W: Write> DiagnosticsEmitter<W> {
    pub fn new(state_norm: Option<W>, entropy: Option<W>) -> Self {
        Self {
            state_norm: state_norm.map(MetricSink::new),
            entropy: entropy.map(MetricSink::new),
        }
    }

    pub fn disabled() -> Self {
        Self { state_norm: None, entropy: None }
    }

    pub fn wants_state_norm(&self) -> bool {
        self.state_norm.is_some()
    }

    pub fn wants_entropy(&self) -> bool {
        self.entropy.is_some()
    }

    /// Buffers the metrics of one chunk. Valid positions are visited column
    /// by column, top to bottom, which is sentence order for a built batch.
    pub fn record(
        &mut self,
        log_prob: ArrayView3<f32>,
        activations: Option<ArrayView3<f32>>,
        mask: ArrayView2<bool>,
    ) {
        let (steps, batch) = mask.dim();
        for b in 0..batch {
            for t in 0..steps {
                if !mask[[t, b]] {
                    continue;
                }
                if let (Some(sink), Some(acts)) = (self.state_norm.as_mut(), activations.as_ref()) {
                    let vector = acts.index_axis(Axis(0), t);
                    sink.pending.push(state_norm(vector.row(b)));
                }
                if let Some(sink) = self.entropy.as_mut() {
                    let dist = log_prob.index_axis(Axis(0), t);
                    sink.pending.push(entropy(dist.row(b)));
                }
            }
        }
    }

    /// Writes the buffered line and separator for the current sentence.
    pub fn end_sentence(&mut self) -> Result<()> {
        if let Some(sink) = self.state_norm.as_mut() {
            sink.end_sentence()?;
        }
        if let Some(sink) = self.entropy.as_mut() {
            sink.end_sentence()?;
        }
        Ok(())
    }

    /// Drops values buffered for a sentence that will not be reported.
    pub fn discard_sentence(&mut self) {
        for sink in [self.state_norm.as_mut(), self.entropy.as_mut()].into_iter().flatten() {
            sink.pending.clear();
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        for sink in [self.state_norm.as_mut(), self.entropy.as_mut()].into_iter().flatten() {
            sink.writer.flush()?;
        }
        Ok(())
    }

    /// Flushes and hands back the underlying writers.
    pub fn into_inner(mut self) -> Result<(Option<W>, Option<W>)> {
        self.flush()?;
        Ok((
            self.state_norm.map(|s| s.writer),
            self.entropy.map(|s| s.writer),
        ))
    }
}
