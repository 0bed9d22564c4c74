use ndarray::Array4;
use std::path::Path;
use tract_onnx::prelude::*;

use super::{Classifier, InferenceError, ModelLoadError};

type OnnxPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX export of the trained network, optimized once at load.
pub struct OnnxClassifier {
    plan: OnnxPlan,
    input_size: usize,
    num_classes: usize,
}

impl OnnxClassifier {
    pub fn load(path: &Path, input_size: u32, num_classes: usize) -> Result<Self, ModelLoadError> {
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact([1, 3, side, side]).into()))
            .and_then(|m| m.into_optimized())
            .map_err(|e| ModelLoadError::Backend(format!("{}: {}", path.display(), e)))?;

        let output_classes = model
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.iter().product::<usize>()));
        let num_classes = match output_classes {
            Some(n) if n != num_classes => {
                log::warn!(
                    "ONNX graph emits {} scores but {} classes were requested",
                    n,
                    num_classes
                );
                n
            }
            Some(n) => n,
            None => num_classes,
        };

        let plan = model
            .into_runnable()
            .map_err(|e| ModelLoadError::Backend(e.to_string()))?;

        Ok(Self {
            plan,
            input_size: side,
            num_classes,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let data: Vec<f32> = input.iter().copied().collect();
        let shape = [1, 3, self.input_size, self.input_size];
        let tensor = Tensor::from_shape(&shape, &data)
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::Backend(e.to_string()))?;
        let scores = outputs
            .first()
            .ok_or_else(|| InferenceError::Backend("model returned no outputs".into()))?
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Backend(e.to_string()))?
            .iter()
            .copied()
            .collect();
        Ok(scores)
    }
}
