#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "torch")]
pub mod torch;

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Input shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },
    #[error("Model produced {actual} scores, expected {expected}")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("Model produced non-finite scores")]
    NonFinite,
    #[error("Model output is not a probability distribution (sum {sum}, min {min})")]
    NotADistribution { sum: f32, min: f32 },
    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Weights file not found: {0}")]
    WeightsNotFound(PathBuf),
    #[error("Cannot determine model backend for {0}; set MODEL_BACKEND")]
    UnknownBackend(PathBuf),
    #[error("Model backend '{0}' is not compiled into this build")]
    BackendNotCompiled(ModelBackend),
    #[error("Failed to load model: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    Onnx,
    Torch,
}

impl ModelBackend {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "onnx" => Some(ModelBackend::Onnx),
            "pt" | "pts" | "pth" | "ot" => Some(ModelBackend::Torch),
            _ => None,
        }
    }
}

/// How the torch backend reads a weights file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorchWeights {
    /// `VarStore::save` checkpoint (`.ot`).
    VarStore,
    /// Python `torch.save(model.state_dict())` (`.pth`, `.pt`). Falls back to
    /// TorchScript when the file holds no matching ResNet-18 parameters.
    StateDict,
    Script,
}

impl TorchWeights {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ot") => TorchWeights::VarStore,
            Some("pth") | Some("pt") => TorchWeights::StateDict,
            _ => TorchWeights::Script,
        }
    }
}

impl std::fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelBackend::Onnx => f.write_str("onnx"),
            ModelBackend::Torch => f.write_str("torch"),
        }
    }
}

impl FromStr for ModelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" | "tract" => Ok(ModelBackend::Onnx),
            "torch" | "tch" | "libtorch" => Ok(ModelBackend::Torch),
            other => Err(format!("unknown model backend '{}'", other)),
        }
    }
}

/// A network that maps one preprocessed `[1, 3, S, S]` batch to raw class scores.
pub trait Classifier: Send + Sync {
    fn num_classes(&self) -> usize;

    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// Owns the loaded network for the lifetime of the process.
pub struct ModelRunner {
    classifier: Box<dyn Classifier>,
    input_size: usize,
    outputs_probabilities: bool,
}

impl ModelRunner {
    pub fn new(classifier: Box<dyn Classifier>, input_size: u32, outputs_probabilities: bool) -> Self {
        Self {
            classifier,
            input_size: input_size as usize,
            outputs_probabilities,
        }
    }

    /// Loads weights from disk. `num_classes` sizes the classifier head for
    /// checkpoints that only carry parameters.
    pub fn load(
        backend: Option<ModelBackend>,
        weights_path: &Path,
        input_size: u32,
        num_classes: usize,
        outputs_probabilities: bool,
    ) -> Result<Self, ModelLoadError> {
        if !weights_path.exists() {
            return Err(ModelLoadError::WeightsNotFound(weights_path.to_path_buf()));
        }
        let backend = backend
            .or_else(|| ModelBackend::from_path(weights_path))
            .ok_or_else(|| ModelLoadError::UnknownBackend(weights_path.to_path_buf()))?;

        log::info!(
            "Loading {} model from {} ({} classes, {}x{} input)",
            backend,
            weights_path.display(),
            num_classes,
            input_size,
            input_size
        );
        let classifier = load_classifier(backend, weights_path, input_size, num_classes)?;
        Ok(Self::new(classifier, input_size, outputs_probabilities))
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, 3, self.input_size, self.input_size]
    }

    /// Runs one forward pass and returns a probability distribution over classes.
    pub fn predict(&self, tensor: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let expected = self.input_shape();
        if tensor.shape() != &expected[..] {
            return Err(InferenceError::ShapeMismatch {
                expected,
                actual: tensor.shape().to_vec(),
            });
        }

        let scores = self.classifier.forward(tensor)?;
        if scores.len() != self.num_classes() {
            return Err(InferenceError::OutputMismatch {
                expected: self.num_classes(),
                actual: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(InferenceError::NonFinite);
        }

        if self.outputs_probabilities {
            check_distribution(&scores)?;
            Ok(scores)
        } else {
            Ok(softmax(&scores))
        }
    }
}

#[allow(unused_variables)]
fn load_classifier(
    backend: ModelBackend,
    weights_path: &Path,
    input_size: u32,
    num_classes: usize,
) -> Result<Box<dyn Classifier>, ModelLoadError> {
    match backend {
        #[cfg(feature = "onnx")]
        ModelBackend::Onnx => Ok(Box::new(onnx::OnnxClassifier::load(
            weights_path,
            input_size,
            num_classes,
        )?)),
        #[cfg(feature = "torch")]
        ModelBackend::Torch => Ok(Box::new(torch::TorchClassifier::load(
            weights_path,
            input_size,
            num_classes,
        )?)),
        #[allow(unreachable_patterns)]
        other => Err(ModelLoadError::BackendNotCompiled(other)),
    }
}

const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

fn check_distribution(probabilities: &[f32]) -> Result<(), InferenceError> {
    let sum: f32 = probabilities.iter().sum();
    let min = probabilities.iter().copied().fold(f32::INFINITY, f32::min);
    if min < 0.0 || (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(InferenceError::NotADistribution { sum, min });
    }
    Ok(())
}

/// Numerically stable softmax.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
