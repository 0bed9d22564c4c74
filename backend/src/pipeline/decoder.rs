use crate::error::PipelineError;
use crate::model::InferenceError;
use crate::pipeline::labels::LabelTable;

pub const LABEL_SEPARATOR: &str = "___";
pub const HEALTHY: &str = "healthy";

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLabel {
    pub class_index: usize,
    pub predicted_class: String,
    pub confidence: f32,
    pub crop_name: String,
    pub disease_name: String,
}

/// Index and value of the largest probability. Ties go to the lowest index
/// and NaN entries never win.
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &p) in probabilities.iter().enumerate() {
        if p.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if p <= top => {}
            _ => best = Some((idx, p)),
        }
    }
    best
}

/// Splits `"<Crop>___<Disease>"`. A missing or blank disease part means healthy.
pub fn split_label(label: &str) -> (String, String) {
    match label.split_once(LABEL_SEPARATOR) {
        Some((crop, disease)) if !disease.trim().is_empty() => (crop.to_string(), disease.to_string()),
        Some((crop, _)) => (crop.to_string(), HEALTHY.to_string()),
        None => (label.to_string(), HEALTHY.to_string()),
    }
}

pub struct LabelDecoder {
    table: LabelTable,
}

impl LabelDecoder {
    pub fn new(table: LabelTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &LabelTable {
        &self.table
    }

    pub fn decode(&self, probabilities: &[f32]) -> Result<DecodedLabel, PipelineError> {
        let (class_index, confidence) = argmax(probabilities).ok_or(InferenceError::OutputMismatch {
            expected: self.table.len(),
            actual: 0,
        })?;
        let label = self
            .table
            .get(class_index)
            .ok_or(PipelineError::UnknownClassIndex {
                index: class_index,
                table_len: self.table.len(),
            })?;
        let (crop_name, disease_name) = split_label(label);

        Ok(DecodedLabel {
            class_index,
            predicted_class: label.to_string(),
            confidence,
            crop_name,
            disease_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(labels: &[&str]) -> LabelDecoder {
        LabelDecoder::new(LabelTable::new(labels.iter().map(|l| l.to_string()).collect()).unwrap())
    }

    #[test]
    fn argmax_breaks_ties_toward_lowest_index() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some((1, 0.4)));
        assert_eq!(argmax(&[0.25; 4]), Some((0, 0.25)));
    }

    #[test]
    fn argmax_skips_nan_and_handles_empty() {
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), Some((1, 0.2)));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f32::NAN]), None);
    }

    #[test]
    fn splits_composite_labels() {
        assert_eq!(
            split_label("Tomato___Early_blight"),
            ("Tomato".to_string(), "Early_blight".to_string())
        );
        assert_eq!(
            split_label("Corn_(maize)___Common_rust_"),
            ("Corn_(maize)".to_string(), "Common_rust_".to_string())
        );
    }

    #[test]
    fn missing_disease_defaults_to_healthy() {
        assert_eq!(split_label("Blueberry"), ("Blueberry".to_string(), "healthy".to_string()));
        assert_eq!(split_label("Squash___"), ("Squash".to_string(), "healthy".to_string()));
    }

    #[test]
    fn decodes_top_class() {
        let decoder = decoder(&["Apple___Apple_scab", "Tomato___Early_blight", "Tomato___healthy"]);
        let decoded = decoder.decode(&[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(decoded.class_index, 1);
        assert_eq!(decoded.predicted_class, "Tomato___Early_blight");
        assert_eq!(decoded.crop_name, "Tomato");
        assert_eq!(decoded.disease_name, "Early_blight");
        assert!((decoded.confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn index_outside_table_is_an_error() {
        let decoder = decoder(&["Apple___Apple_scab", "Apple___healthy"]);
        let err = decoder.decode(&[0.1, 0.2, 0.7]).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownClassIndex { index: 2, table_len: 2 }));
    }
}
