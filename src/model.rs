use ndarray::{s, Array1, Array2, Array3, ArrayD, ArrayView2, ArrayView3, Axis, Ix1, Ix2, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::common::{log_softmax_rows, sigmoid};
use crate::config::ModelConfig;
use crate::error::{EvalError, Result};
use crate::state::HiddenState;

pub const MODEL_CONFIG_FILE: &str = "model_config.json";
pub const MODEL_WEIGHTS_FILE: &str = "model.safetensors";

/// Raw result of one forward call, before any ensemble reduction.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[T, b, V]` log-probabilities per expert; index 0 is the master.
    pub expert_log_probs: Vec<Array3<f32>>,
    pub hidden: HiddenState,
    /// Per-layer `[T, b, H]` outputs of the master, last layer last.
    pub activations: Option<Vec<Array3<f32>>>,
}

/// Contract every trained recurrent language model artifact satisfies.
pub trait RecurrentModel {
    fn vocab_size(&self) -> usize;
    fn n_experts(&self) -> usize;
    /// Disables every stochastic regularizer. Called once per run.
    fn set_inference_mode(&mut self);
    fn is_inference_mode(&self) -> bool;
    fn init_hidden(&self, batch_width: usize) -> HiddenState;
    fn forward(
        &self,
        hidden: &HiddenState,
        input: ArrayView2<u32>,
        want_activations: bool,
    ) -> Result<ModelOutput>;
}

#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>, // [out, in]
    bias: Array1<f32>,   // [out]
}

impl Linear {
    /// `[rows, in]` -> `[rows, out]`
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

/// Single LSTM layer with PyTorch gate order (input, forget, cell, output).
#[derive(Debug, Clone)]
pub struct LstmLayer {
    weight_ih: Array2<f32>, // [4H, in]
    weight_hh: Array2<f32>, // [4H, H]
    bias: Array1<f32>,      // [4H]
}

impl LstmLayer {
    pub fn hidden_size(&self) -> usize {
        self.weight_hh.ncols()
    }

    pub fn input_size(&self) -> usize {
        self.weight_ih.ncols()
    }

    /// Runs all time steps of `input` (`[T, b, in]`) from `(h0, c0)`.
    /// Returns the per-step outputs `[T, b, H]` and the final `(h, c)`.
    pub fn forward(
        &self,
        input: ArrayView3<f32>,
        h0: &Array2<f32>,
        c0: &Array2<f32>,
    ) -> Result<(Array3<f32>, Array2<f32>, Array2<f32>)> {
        let (steps, batch, features) = input.dim();
        let hs = self.hidden_size();
        if features != self.input_size() {
            return Err(EvalError::Shape(format!(
                "LSTM input has {} features, layer expects {}",
                features,
                self.input_size()
            )));
        }
        if h0.dim() != (batch, hs) || c0.dim() != (batch, hs) {
            return Err(EvalError::Shape(format!(
                "LSTM state shape {:?}/{:?} does not match [{}, {}]",
                h0.dim(),
                c0.dim(),
                batch,
                hs
            )));
        }

        let mut h = h0.to_owned();
        let mut c = c0.to_owned();
        let mut outputs = Array3::zeros((steps, batch, hs));

        for t in 0..steps {
            let x_t = input.index_axis(Axis(0), t);
            let gates = x_t.dot(&self.weight_ih.t()) + h.dot(&self.weight_hh.t()) + &self.bias;
            let i = gates.slice(s![.., 0..hs]).mapv(sigmoid);
            let f = gates.slice(s![.., hs..2 * hs]).mapv(sigmoid);
            let g = gates.slice(s![.., 2 * hs..3 * hs]).mapv(f32::tanh);
            let o = gates.slice(s![.., 3 * hs..]).mapv(sigmoid);
            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f32::tanh);
            outputs.index_axis_mut(Axis(0), t).assign(&h);
        }
        Ok((outputs, h, c))
    }
}

#[derive(Debug, Clone)]
struct Student {
    rnn: LstmLayer,
    decoder: Linear,
}

/// Stacked LSTM language model whose last layer is replicated into
/// distillation students, each with its own decoder. The students share the
/// master's lower layers.
#[derive(Debug, Clone)]
pub struct LstmEnsembleModel {
    config: ModelConfig,
    encoder: Array2<f32>, // [V, emsize]
    layers: Vec<LstmLayer>,
    decoder: Linear,
    students: Vec<Student>,
    inference: bool,
}

fn lstm_specs(prefix: &str, input: usize, hidden: usize) -> Vec<(String, Vec<usize>)> {
    vec![
        (format!("{}.weight_ih", prefix), vec![4 * hidden, input]),
        (format!("{}.weight_hh", prefix), vec![4 * hidden, hidden]),
        (format!("{}.bias", prefix), vec![4 * hidden]),
    ]
}

fn linear_specs(prefix: &str, input: usize, output: usize) -> Vec<(String, Vec<usize>)> {
    vec![
        (format!("{}.weight", prefix), vec![output, input]),
        (format!("{}.bias", prefix), vec![output]),
    ]
}

/// Copies an F32 safetensors entry into an owned array of the expected shape.
fn read_tensor(tensors: &SafeTensors, name: &str, shape: &[usize]) -> Result<ArrayD<f32>> {
    let view = tensors
        .tensor(name)
        .map_err(|e| EvalError::Checkpoint(format!("tensor '{}': {}", name, e)))?;
    if view.dtype() != Dtype::F32 {
        return Err(EvalError::Checkpoint(format!(
            "tensor '{}' has dtype {:?}, only F32 is supported",
            name,
            view.dtype()
        )));
    }
    if view.shape() != shape {
        return Err(EvalError::Checkpoint(format!(
            "tensor '{}' has shape {:?}, expected {:?}",
            name,
            view.shape(),
            shape
        )));
    }
    // safetensors data is little-endian and not guaranteed to be 4-byte aligned.
    let values: Vec<f32> = match bytemuck::try_cast_slice::<u8, f32>(view.data()) {
        Ok(aligned) => aligned.to_vec(),
        Err(_) => view
            .data()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect(),
    };
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
}

struct TensorStore(HashMap<String, ArrayD<f32>>);

impl TensorStore {
    fn take(&mut self, name: &str) -> Result<ArrayD<f32>> {
        self.0
            .remove(name)
            .ok_or_else(|| EvalError::Checkpoint(format!("tensor '{}' missing", name)))
    }

    fn matrix(&mut self, name: &str) -> Result<Array2<f32>> {
        Ok(self.take(name)?.into_dimensionality::<Ix2>()?)
    }

    fn vector(&mut self, name: &str) -> Result<Array1<f32>> {
        Ok(self.take(name)?.into_dimensionality::<Ix1>()?)
    }

    fn lstm(&mut self, prefix: &str) -> Result<LstmLayer> {
        Ok(LstmLayer {
            weight_ih: self.matrix(&format!("{}.weight_ih", prefix))?,
            weight_hh: self.matrix(&format!("{}.weight_hh", prefix))?,
            bias: self.vector(&format!("{}.bias", prefix))?,
        })
    }

    fn linear(&mut self, prefix: &str) -> Result<Linear> {
        Ok(Linear {
            weight: self.matrix(&format!("{}.weight", prefix))?,
            bias: self.vector(&format!("{}.bias", prefix))?,
        })
    }
}

fn layer_state(state: &HiddenState) -> Result<(&Array2<f32>, &Array2<f32>)> {
    match state {
        HiddenState::Layer { h, c } => Ok((h, c)),
        HiddenState::Group(_) => Err(EvalError::Shape(
            "expected a layer state, found a group".to_string(),
        )),
    }
}

impl LstmEnsembleModel {
    /// Names and shapes of every tensor the checkpoint must contain.
    pub fn tensor_specs(config: &ModelConfig) -> Vec<(String, Vec<usize>)> {
        let vocab = config.vocab_size;
        let last = config.last_hidden();
        let (last_input, _) = config.layer_dims(config.nlayers - 1);

        let mut specs = vec![("encoder.weight".to_string(), vec![vocab, config.emsize])];
        for layer in 0..config.nlayers {
            let (input, hidden) = config.layer_dims(layer);
            specs.extend(lstm_specs(&format!("rnns.{}", layer), input, hidden));
        }
        specs.extend(linear_specs("decoder", last, vocab));
        for student in 0..config.n_students {
            specs.extend(lstm_specs(&format!("students.{}.rnn", student), last_input, last));
            specs.extend(linear_specs(&format!("students.{}.decoder", student), last, vocab));
        }
        specs
    }

    /// Serializes a checkpoint with every tensor of `config` filled by
    /// `value(name, flat_index)`.
    pub fn synthesize_checkpoint<F>(config: &ModelConfig, value: F) -> Result<Vec<u8>>
    where
        F: Fn(&str, usize) -> f32,
    {
        config.validate()?;
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = Self::tensor_specs(config)
            .into_iter()
            .map(|(name, shape)| {
                let count: usize = shape.iter().product();
                let values: Vec<f32> = (0..count).map(|i| value(&name, i)).collect();
                let bytes = bytemuck::cast_slice::<f32, u8>(&values).to_vec();
                (name, shape, bytes)
            })
            .collect();
        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.clone(), view))
                    .map_err(|e| EvalError::Checkpoint(format!("tensor '{}': {}", name, e)))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        safetensors::serialize(&views, &None)
            .map_err(|e| EvalError::Checkpoint(format!("cannot serialize checkpoint: {}", e)))
    }

    /// Loads `model_config.json` and `model.safetensors` from `save_dir`.
    pub fn load(save_dir: &Path) -> Result<Self> {
        let config = ModelConfig::load(&save_dir.join(MODEL_CONFIG_FILE))?;
        let weights_path = save_dir.join(MODEL_WEIGHTS_FILE);
        let bytes = fs::read(&weights_path).map_err(|e| {
            EvalError::Checkpoint(format!("cannot read {}: {}", weights_path.display(), e))
        })?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
            EvalError::Checkpoint(format!("invalid safetensors file {}: {}", weights_path.display(), e))
        })?;
        let model = Self::from_safetensors(config, &tensors)?;
        log::info!(
            "Loaded model from {} ({} layers, {} experts, vocab {})",
            weights_path.display(),
            model.config.nlayers,
            model.n_experts(),
            model.config.vocab_size
        );
        Ok(model)
    }

    pub fn from_safetensors(config: ModelConfig, tensors: &SafeTensors) -> Result<Self> {
        config.validate()?;
        let mut store = HashMap::new();
        for (name, shape) in Self::tensor_specs(&config) {
            let tensor = read_tensor(tensors, &name, &shape)?;
            store.insert(name, tensor);
        }
        let mut store = TensorStore(store);

        let encoder = store.matrix("encoder.weight")?;
        let layers = (0..config.nlayers)
            .map(|layer| store.lstm(&format!("rnns.{}", layer)))
            .collect::<Result<Vec<_>>>()?;
        let decoder = store.linear("decoder")?;
        let students = (0..config.n_students)
            .map(|student| {
                Ok(Student {
                    rnn: store.lstm(&format!("students.{}.rnn", student))?,
                    decoder: store.linear(&format!("students.{}.decoder", student))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            encoder,
            layers,
            decoder,
            students,
            inference: false,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn embed(&self, input: ArrayView2<u32>) -> Result<Array3<f32>> {
        let (steps, batch) = input.dim();
        let mut out = Array3::zeros((steps, batch, self.config.emsize));
        for ((t, b), &id) in input.indexed_iter() {
            if id as usize >= self.config.vocab_size {
                return Err(EvalError::Shape(format!(
                    "input token id {} is outside the vocabulary of size {}",
                    id, self.config.vocab_size
                )));
            }
            out.slice_mut(s![t, b, ..]).assign(&self.encoder.row(id as usize));
        }
        Ok(out)
    }

    fn decode(decoder: &Linear, outputs: &Array3<f32>) -> Result<Array3<f32>> {
        let (steps, batch, hidden) = outputs.dim();
        let flat = outputs.view().into_shape((steps * batch, hidden))?;
        let log_probs = log_softmax_rows(decoder.forward(flat).view());
        let vocab = log_probs.ncols();
        Ok(log_probs.into_shape((steps, batch, vocab))?)
    }
}

impl RecurrentModel for LstmEnsembleModel {
    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn n_experts(&self) -> usize {
        self.students.len() + 1
    }

    fn set_inference_mode(&mut self) {
        // No dropout is materialized on CPU; the flag gates `forward`.
        self.inference = true;
    }

    fn is_inference_mode(&self) -> bool {
        self.inference
    }

    fn init_hidden(&self, batch_width: usize) -> HiddenState {
        let mut states: Vec<HiddenState> = self.layers[..self.layers.len() - 1]
            .iter()
            .map(|layer| HiddenState::zeros(batch_width, layer.hidden_size()))
            .collect();
        let last = self.config.last_hidden();
        let experts = (0..self.n_experts())
            .map(|_| HiddenState::zeros(batch_width, last))
            .collect();
        states.push(HiddenState::Group(experts));
        HiddenState::Group(states)
    }

    fn forward(
        &self,
        hidden: &HiddenState,
        input: ArrayView2<u32>,
        want_activations: bool,
    ) -> Result<ModelOutput> {
        if !self.inference {
            return Err(EvalError::NotInInferenceMode);
        }
        let layer_states = match hidden {
            HiddenState::Group(items) if items.len() == self.layers.len() => items,
            _ => {
                return Err(EvalError::Shape(format!(
                    "hidden state does not match a {}-layer model",
                    self.layers.len()
                )))
            }
        };
        let expert_states = match &layer_states[self.layers.len() - 1] {
            HiddenState::Group(items) if items.len() == self.n_experts() => items,
            _ => {
                return Err(EvalError::Shape(format!(
                    "last-layer state does not hold {} experts",
                    self.n_experts()
                )))
            }
        };

        let mut x = self.embed(input)?;
        let mut new_states = Vec::with_capacity(self.layers.len());
        let mut activations = Vec::new();

        let (lower, last) = self.layers.split_at(self.layers.len() - 1);
        for (layer, state) in lower.iter().zip(layer_states) {
            let (h0, c0) = layer_state(state)?;
            let (out, h, c) = layer.forward(x.view(), h0, c0)?;
            new_states.push(HiddenState::Layer { h, c });
            if want_activations {
                activations.push(out.clone());
            }
            x = out;
        }

        let (h0, c0) = layer_state(&expert_states[0])?;
        let (master_out, h, c) = last[0].forward(x.view(), h0, c0)?;
        let mut expert_log_probs = vec![Self::decode(&self.decoder, &master_out)?];
        let mut last_states = vec![HiddenState::Layer { h, c }];

        for (student, state) in self.students.iter().zip(&expert_states[1..]) {
            let (h0, c0) = layer_state(state)?;
            let (out, h, c) = student.rnn.forward(x.view(), h0, c0)?;
            expert_log_probs.push(Self::decode(&student.decoder, &out)?);
            last_states.push(HiddenState::Layer { h, c });
        }
        new_states.push(HiddenState::Group(last_states));

        let activations = if want_activations {
            activations.push(master_out);
            Some(activations)
        } else {
            None
        };

        Ok(ModelOutput {
            expert_log_probs,
            hidden: HiddenState::Group(new_states),
            activations,
        })
    }
}
