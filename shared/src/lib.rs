use serde::{Deserialize, Serialize};

/// Advisory text attached to a diagnosed disease.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Recommendation {
    pub disease_description: String,
    pub symptoms: String,
    pub treatment_organic: String,
    pub treatment_chemical: String,
    pub preventive_measures: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResult {
    pub predicted_class: String,
    /// Fractional probability in `[0, 1]`.
    pub confidence: f32,
    pub crop_name: String,
    pub disease_name: String,
    pub recommendation: Option<Recommendation>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeedbackRequest {
    pub image_id: String,
    pub predicted_label: String,
    pub user_feedback: String,
    #[serde(default)]
    pub correct_label: Option<String>,
}
