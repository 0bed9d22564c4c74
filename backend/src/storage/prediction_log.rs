use chrono::Utc;
use sha2::{Digest, Sha256};
use shared::FeedbackRequest;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PREDICTIONS_FILE: &str = "predictions.csv";
const FEEDBACK_FILE: &str = "feedback.csv";
const PREDICTION_HEADER: [&str; 4] = ["timestamp", "image_id", "predicted_label", "confidence"];
const FEEDBACK_HEADER: [&str; 5] = [
    "timestamp",
    "image_id",
    "predicted_label",
    "user_feedback",
    "correct_label",
];

#[derive(Debug, thiserror::Error)]
pub enum PredictionLogError {
    #[error("Prediction log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Prediction log CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only CSV journal of predictions and user feedback.
#[derive(Clone)]
pub struct PredictionLog {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl PredictionLog {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PredictionLogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image_id(image_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_data);
        hex::encode(hasher.finalize())
    }

    pub fn record_prediction(
        &self,
        image_id: &str,
        predicted_label: &str,
        confidence: f32,
    ) -> Result<(), PredictionLogError> {
        let timestamp = Utc::now().to_rfc3339();
        let confidence = format!("{:.4}", confidence);
        self.append(
            PREDICTIONS_FILE,
            &PREDICTION_HEADER,
            &[timestamp.as_str(), image_id, predicted_label, confidence.as_str()],
        )
    }

    pub fn record_feedback(&self, feedback: &FeedbackRequest) -> Result<(), PredictionLogError> {
        let timestamp = Utc::now().to_rfc3339();
        self.append(
            FEEDBACK_FILE,
            &FEEDBACK_HEADER,
            &[
                timestamp.as_str(),
                feedback.image_id.as_str(),
                feedback.predicted_label.as_str(),
                feedback.user_feedback.as_str(),
                feedback.correct_label.as_deref().unwrap_or(""),
            ],
        )
    }

    fn append(&self, file_name: &str, header: &[&str], row: &[&str]) -> Result<(), PredictionLogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.dir.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(header)?;
        }
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn image_id_is_sha256_hex() {
        assert_eq!(
            PredictionLog::image_id(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::open(dir.path().join("logs")).unwrap();
        log.record_prediction("img-1", "Tomato___Early_blight", 0.912345).unwrap();
        log.record_prediction("img-2", "Potato___healthy", 0.5).unwrap();

        let rows = read_rows(&dir.path().join("logs").join(PREDICTIONS_FILE));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], PREDICTION_HEADER.map(String::from).to_vec());
        assert_eq!(rows[1][1..], ["img-1", "Tomato___Early_blight", "0.9123"].map(String::from));
        assert_eq!(rows[2][1], "img-2");
    }

    #[test]
    fn feedback_rows_quote_free_text() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::open(dir.path()).unwrap();
        log.record_feedback(&FeedbackRequest {
            image_id: "img-1".into(),
            predicted_label: "Tomato___Early_blight".into(),
            user_feedback: "wrong, looks like \"septoria\"".into(),
            correct_label: Some("Tomato___Septoria_leaf_spot".into()),
        })
        .unwrap();

        let rows = read_rows(&dir.path().join(FEEDBACK_FILE));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][3], "wrong, looks like \"septoria\"");
        assert_eq!(rows[1][4], "Tomato___Septoria_leaf_spot");
    }
}
