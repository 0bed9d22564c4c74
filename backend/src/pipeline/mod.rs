pub mod decoder;
pub mod labels;
pub mod preprocess;
pub mod recommend;
pub mod response;
pub mod validator;

use shared::PredictionResult;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::model::ModelRunner;
use decoder::LabelDecoder;
use labels::LabelTable;
use preprocess::Preprocessor;
use recommend::{AdviceSource, RecommendationError, RecommendationTable};
use validator::{ImageValidator, UploadedImage};

/// Loaded network plus its label table, or the reason they could not be loaded.
pub enum ModelState {
    Ready {
        runner: ModelRunner,
        decoder: LabelDecoder,
    },
    Unavailable(String),
}

/// Validate, preprocess, classify, decode, advise. Immutable once built.
pub struct InferencePipeline {
    validator: ImageValidator,
    preprocessor: Preprocessor,
    model: ModelState,
    recommendations: RecommendationTable,
}

impl InferencePipeline {
    pub fn new(
        validator: ImageValidator,
        preprocessor: Preprocessor,
        model: ModelState,
        recommendations: RecommendationTable,
    ) -> Self {
        let model = match model {
            ModelState::Ready { runner, .. }
                if runner.input_shape()[2] != preprocessor.input_size() as usize =>
            {
                ModelState::Unavailable(format!(
                    "preprocessor emits {}x{} images but the model expects {:?}",
                    preprocessor.input_size(),
                    preprocessor.input_size(),
                    runner.input_shape()
                ))
            }
            model => model,
        };
        Self {
            validator,
            preprocessor,
            model,
            recommendations,
        }
    }

    /// Loads every table and the model. Model or label failures leave the
    /// pipeline in the unavailable state; a broken recommendations file is fatal.
    pub fn from_config(config: &AppConfig) -> Result<Self, RecommendationError> {
        let recommendations = match &config.model.recommendations_path {
            Some(path) => {
                log::info!("Loading recommendations from {}", path.display());
                RecommendationTable::load(path)?
            }
            None => RecommendationTable::builtin()?,
        };
        log::info!("Recommendation table holds {} entries", recommendations.len());

        let model = load_model(config);
        if let ModelState::Unavailable(reason) = &model {
            log::error!("Model unavailable, inference requests will be refused: {}", reason);
        }

        Ok(Self::new(
            ImageValidator::new(config.upload.max_bytes),
            Preprocessor::from_config(&config.preprocessing),
            model,
            recommendations,
        ))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.model, ModelState::Ready { .. })
    }

    pub fn num_classes(&self) -> Option<usize> {
        match &self.model {
            ModelState::Ready { decoder, .. } => Some(decoder.table().len()),
            ModelState::Unavailable(_) => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.model {
            ModelState::Ready { .. } => None,
            ModelState::Unavailable(reason) => Some(reason),
        }
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    pub fn run(&self, upload: &UploadedImage) -> Result<PredictionResult, PipelineError> {
        let (runner, decoder) = match &self.model {
            ModelState::Ready { runner, decoder } => (runner, decoder),
            ModelState::Unavailable(reason) => {
                return Err(PipelineError::ModelUnavailable(reason.clone()));
            }
        };

        let format = self.validator.validate(upload)?;
        let tensor = self.preprocessor.preprocess(&upload.bytes, format)?;
        let probabilities = runner.predict(&tensor)?;
        let decoded = decoder.decode(&probabilities)?;

        let advice = self
            .recommendations
            .lookup(&decoded.crop_name, &decoded.disease_name);
        if advice.source == AdviceSource::Placeholder {
            log::warn!("No recommendation entry for {}", decoded.predicted_class);
        }

        Ok(response::assemble(decoded, advice.recommendation))
    }
}

fn load_model(config: &AppConfig) -> ModelState {
    let labels = match LabelTable::load(&config.model.labels_path) {
        Ok(labels) => labels,
        Err(e) => {
            return ModelState::Unavailable(format!(
                "{} ({})",
                e,
                config.model.labels_path.display()
            ));
        }
    };
    log::info!(
        "Loaded {} class labels from {}",
        labels.len(),
        config.model.labels_path.display()
    );

    let runner = match ModelRunner::load(
        config.model_backend(),
        &config.model.weights_path,
        config.preprocessing.input_size,
        labels.len(),
        config.model.outputs_probabilities,
    ) {
        Ok(runner) => runner,
        Err(e) => return ModelState::Unavailable(e.to_string()),
    };

    if runner.num_classes() != labels.len() {
        return ModelState::Unavailable(format!(
            "model emits {} classes but the label table has {}",
            runner.num_classes(),
            labels.len()
        ));
    }

    ModelState::Ready {
        runner,
        decoder: LabelDecoder::new(labels),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::UploadRejection;
    use image::imageops::FilterType;

    fn png_upload() -> UploadedImage {
        UploadedImage::new(png_bytes(48), Some("image/png".into()))
    }

    #[test]
    fn runs_end_to_end() {
        let pipeline = pipeline_with_scores(vec![0.0, 4.0, 1.0, 0.5], 1024 * 1024);
        let result = pipeline.run(&png_upload()).unwrap();

        assert_eq!(result.predicted_class, "Tomato___Early_blight");
        assert_eq!(result.crop_name, "Tomato");
        assert_eq!(result.disease_name, "Early_blight");
        assert!(result.confidence > 0.5 && result.confidence <= 1.0);
        let rec = result.recommendation.unwrap();
        assert!(rec.disease_description.contains("Alternaria"));
    }

    #[test]
    fn missing_advice_still_returns_a_diagnosis() {
        let pipeline = pipeline_with_scores(vec![0.0, 0.0, 0.0, 9.0], 1024 * 1024);
        let result = pipeline.run(&png_upload()).unwrap();
        assert_eq!(result.disease_name, "Yellow_vein_mosaic");
        assert!(result.recommendation.unwrap().symptoms.contains("agricultural expert"));
    }

    #[test]
    fn oversized_upload_never_reaches_the_model() {
        let pipeline = pipeline_with_scores(vec![1.0; 4], 100);
        let err = pipeline.run(&png_upload()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidUpload(UploadRejection::TooLarge { limit: 100 })
        ));
    }

    #[test]
    fn unavailable_model_refuses_inference() {
        let pipeline = unavailable_pipeline("weights missing");
        assert!(!pipeline.is_ready());
        assert_eq!(pipeline.num_classes(), None);
        assert_eq!(pipeline.unavailable_reason(), Some("weights missing"));
        assert!(matches!(
            pipeline.run(&png_upload()),
            Err(PipelineError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn input_size_mismatch_marks_model_unavailable() {
        let labels = LabelTable::new(LABELS.iter().map(|l| l.to_string()).collect()).unwrap();
        let pipeline = InferencePipeline::new(
            ImageValidator::new(1024),
            Preprocessor::new(32, [0.485, 0.456, 0.406], [0.229, 0.224, 0.225], FilterType::Triangle),
            ModelState::Ready {
                runner: crate::model::testing::runner(vec![0.0; 4], 64),
                decoder: LabelDecoder::new(labels),
            },
            RecommendationTable::builtin().unwrap(),
        );
        assert!(!pipeline.is_ready());
        assert!(pipeline.unavailable_reason().unwrap().contains("32x32"));
    }

    #[test]
    fn missing_label_file_marks_model_unavailable() {
        let mut config = AppConfig::default();
        config.model.labels_path = "/nonexistent/class_indices.json".into();
        let pipeline = InferencePipeline::from_config(&config).unwrap();
        assert!(!pipeline.is_ready());
        assert!(pipeline.unavailable_reason().unwrap().contains("class_indices.json"));
    }

    #[test]
    fn missing_weights_mark_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("class_indices.json");
        std::fs::write(&labels, r#"["Tomato___healthy"]"#).unwrap();

        let mut config = AppConfig::default();
        config.model.labels_path = labels;
        config.model.weights_path = dir.path().join("best_model.onnx");
        let pipeline = InferencePipeline::from_config(&config).unwrap();
        assert!(pipeline.unavailable_reason().unwrap().contains("best_model.onnx"));
    }

    #[test]
    fn broken_recommendations_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recommendations.yaml");
        std::fs::write(&path, "Tomato___Early_blight: [not, a, record]").unwrap();

        let mut config = AppConfig::default();
        config.model.recommendations_path = Some(path);
        assert!(InferencePipeline::from_config(&config).is_err());
    }
}
