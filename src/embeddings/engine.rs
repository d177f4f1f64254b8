// engine.rs — Static-graph (ONNX) transformer encoder.
//
// Loads model.onnx once and runs it for one tokenized text at a time, returning the
// token-level hidden states [1, seq_len, hidden_size]. `Session::run` needs exclusive
// access, so the encoder owns a fixed pool of independent sessions and each call
// checks one out for the duration of the run.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::embeddings::tokenizer::TokenizedInput;
use crate::error::{InferenceError, StartupError};

const INPUT_IDS: &str = "input_ids";
const ATTENTION_MASK: &str = "attention_mask";
const TOKEN_TYPE_IDS: &str = "token_type_ids";

/// Token-level hidden states for one input, row-major [seq_len, hidden_size].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEmbeddings {
    pub values: Vec<f32>,
    pub seq_len: usize,
    pub hidden_size: usize,
}

/// Anything that turns a tokenized input into token embeddings.
///
/// Implementations must be safe to call from many threads at once and must not
/// carry state from one call to the next.
pub trait Encoder: Send + Sync {
    fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError>;

    /// How many calls can execute at the same time without queueing.
    fn slots(&self) -> usize {
        1
    }

    fn describe(&self) -> String;
}

/// Which inputs the graph declares and which output carries the hidden states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSignature {
    pub token_type_ids: bool,
    pub output_name: String,
}

impl GraphSignature {
    pub fn from_names(inputs: &[&str], outputs: &[&str]) -> Result<Self, String> {
        for required in [INPUT_IDS, ATTENTION_MASK] {
            if !inputs.contains(&required) {
                return Err(format!("graph does not declare input {required:?} (inputs: {inputs:?})"));
            }
        }
        if let Some(extra) = inputs
            .iter()
            .find(|name| ![INPUT_IDS, ATTENTION_MASK, TOKEN_TYPE_IDS].contains(name))
        {
            return Err(format!("graph declares unsupported input {extra:?}"));
        }
        let output_name = outputs
            .first()
            .ok_or_else(|| "graph declares no outputs".to_string())?
            .to_string();

        Ok(Self {
            token_type_ids: inputs.contains(&TOKEN_TYPE_IDS),
            output_name,
        })
    }
}

pub struct OnnxEncoder {
    pool: SessionPool<Session>,
    signature: GraphSignature,
    model_path: PathBuf,
}

impl OnnxEncoder {
    /// Load `sessions` independent copies of the graph, each using `intra_threads` threads.
    pub fn load(model_path: &Path, sessions: usize, intra_threads: usize) -> Result<Self, StartupError> {
        let load_err = |reason: String| StartupError::ModelLoad {
            path: model_path.to_path_buf(),
            reason,
        };

        if !model_path.is_file() {
            return Err(load_err("model file not found".into()));
        }

        let sessions = sessions.max(1);
        log::info!(
            "Loading ONNX model from {} (sessions={}, intra_threads={})",
            model_path.display(),
            sessions,
            intra_threads
        );

        let mut built = Vec::with_capacity(sessions);
        for _ in 0..sessions {
            let session = build_session(model_path, intra_threads).map_err(|e| load_err(e.to_string()))?;
            built.push(session);
        }

        let signature = {
            let first = &built[0];
            let inputs: Vec<&str> = first.inputs.iter().map(|i| i.name.as_str()).collect();
            let outputs: Vec<&str> = first.outputs.iter().map(|o| o.name.as_str()).collect();
            log::info!("ONNX graph inputs: {:?}", inputs);
            log::info!("ONNX graph outputs: {:?}", outputs);
            GraphSignature::from_names(&inputs, &outputs).map_err(load_err)?
        };

        Ok(Self {
            pool: SessionPool::new(built),
            signature,
            model_path: model_path.to_path_buf(),
        })
    }
}

fn build_session(model_path: &Path, intra_threads: usize) -> ort::Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?
        .commit_from_file(model_path)
}

impl Encoder for OnnxEncoder {
    fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError> {
        let seq_len = input.len();
        if input.attention_mask.len() != seq_len || input.type_ids.len() != seq_len {
            return Err(InferenceError::ShapeMismatch {
                context: "encoder input",
                expected: format!("mask/type ids of length {seq_len}"),
                actual: format!(
                    "mask={}, type_ids={}",
                    input.attention_mask.len(),
                    input.type_ids.len()
                ),
            });
        }

        let ids = row_tensor(&input.ids)?;
        let mask = row_tensor(&input.attention_mask)?;

        let checkout = self.pool.checkout();
        let mut session = checkout.lock();

        let outputs = if self.signature.token_type_ids {
            let types = row_tensor(&input.type_ids)?;
            session.run(ort::inputs![
                INPUT_IDS => ids,
                ATTENTION_MASK => mask,
                TOKEN_TYPE_IDS => types
            ])?
        } else {
            session.run(ort::inputs![
                INPUT_IDS => ids,
                ATTENTION_MASK => mask
            ])?
        };

        let hidden = outputs[self.signature.output_name.as_str()].try_extract_array::<f32>()?;
        let dims = hidden.shape().to_vec();
        if dims.len() != 3 || dims[0] != 1 || dims[1] != seq_len {
            return Err(InferenceError::ShapeMismatch {
                context: "encoder output",
                expected: format!("[1, {seq_len}, hidden]"),
                actual: format!("{dims:?}"),
            });
        }

        let values: Vec<f32> = hidden.iter().copied().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite);
        }

        Ok(TokenEmbeddings {
            values,
            seq_len,
            hidden_size: dims[2],
        })
    }

    fn slots(&self) -> usize {
        self.pool.len()
    }

    fn describe(&self) -> String {
        format!(
            "onnx {} (sessions={}, token_type_ids={}, output={:?})",
            self.model_path.display(),
            self.pool.len(),
            self.signature.token_type_ids,
            self.signature.output_name
        )
    }
}

/// [1, len] int64 tensor, the dtype the exported graph declares for all inputs.
fn row_tensor(values: &[i64]) -> Result<Tensor<i64>, InferenceError> {
    let array = Array2::from_shape_vec((1, values.len()), values.to_vec()).map_err(|e| {
        InferenceError::ShapeMismatch {
            context: "input tensor",
            expected: format!("[1, {}]", values.len()),
            actual: e.to_string(),
        }
    })?;
    Ok(Tensor::from_array(array)?)
}

/// Fixed set of exclusive-use resources. `checkout` blocks until one is free.
struct SessionPool<T> {
    slots: Vec<Mutex<T>>,
    free: Mutex<Vec<usize>>,
    released: Condvar,
}

impl<T> SessionPool<T> {
    /// `items` must not be empty, otherwise `checkout` never returns.
    fn new(items: Vec<T>) -> Self {
        let free = (0..items.len()).collect();
        Self {
            slots: items.into_iter().map(Mutex::new).collect(),
            free: Mutex::new(free),
            released: Condvar::new(),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn checkout(&self) -> Checkout<'_, T> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(index) = free.pop() {
                return Checkout { pool: self, index };
            }
            free = self.released.wait(free).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct Checkout<'a, T> {
    pool: &'a SessionPool<T>,
    index: usize,
}

impl<'a, T> Checkout<'a, T> {
    // Uncontended: only the holder of this checkout touches this slot.
    fn lock(&self) -> MutexGuard<'a, T> {
        self.pool.slots[self.index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        let mut free = self.pool.free.lock().unwrap_or_else(PoisonError::into_inner);
        free.push(self.index);
        self.pool.released.notify_one();
    }
}
