use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use shared::ErrorResponse;

use crate::model::InferenceError;
use crate::pipeline::preprocess::DecodeError;

/// Reasons an upload is refused before it reaches the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadRejection {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Uploaded file is empty")]
    Empty,
    #[error("File too large: uploads are limited to {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Invalid file type: {0}. Please upload an image (JPEG, PNG, or BMP).")]
    UnsupportedType(String),
    #[error("File content is not a valid image. Please upload a JPEG, PNG, or BMP file.")]
    Corrupt,
    #[error("Malformed multipart body: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidUpload(#[from] UploadRejection),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Model not loaded: {0}")]
    ModelUnavailable(String),
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("Predicted class index {index} not found in label table of {table_len} classes")]
    UnknownClassIndex { index: usize, table_len: usize },
}

impl PipelineError {
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    fn detail(&self) -> String {
        match self {
            PipelineError::InvalidUpload(_) | PipelineError::Decode(_) => self.to_string(),
            PipelineError::ModelUnavailable(_) => "Model not loaded".to_string(),
            PipelineError::Inference(_) | PipelineError::UnknownClassIndex { .. } => {
                "Prediction failed due to an internal error".to_string()
            }
        }
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidUpload(UploadRejection::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::InvalidUpload(_) | PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
            PipelineError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Inference(_) | PipelineError::UnknownClassIndex { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.detail(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_failures_are_client_errors() {
        let oversized = PipelineError::from(UploadRejection::TooLarge { limit: 10 });
        assert_eq!(oversized.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(oversized.is_client_error());

        let gif = PipelineError::from(UploadRejection::UnsupportedType("image/gif".into()));
        assert_eq!(gif.status_code(), StatusCode::BAD_REQUEST);
        assert!(gif.detail().contains("image/gif"));
    }

    #[test]
    fn server_failures_hide_internals() {
        let err = PipelineError::UnknownClassIndex {
            index: 41,
            table_len: 38,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.detail().contains("41"));

        let unavailable = PipelineError::ModelUnavailable("weights missing".into());
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
