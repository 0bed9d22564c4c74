use shared::{PredictionResult, Recommendation};

use crate::pipeline::decoder::DecodedLabel;

pub fn assemble(decoded: DecodedLabel, recommendation: Recommendation) -> PredictionResult {
    PredictionResult {
        predicted_class: decoded.predicted_class,
        confidence: round_confidence(decoded.confidence),
        crop_name: decoded.crop_name,
        disease_name: decoded.disease_name,
        recommendation: Some(recommendation),
    }
}

/// Four decimal places, clamped to `[0, 1]`.
fn round_confidence(confidence: f32) -> f32 {
    ((confidence.clamp(0.0, 1.0) as f64 * 10_000.0).round() / 10_000.0) as f32
}
