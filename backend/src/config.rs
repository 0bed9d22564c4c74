use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::model::ModelBackend;

pub const CONFIG_PATH_ENV: &str = "CROPDOC_CONFIG";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_INPUT_SIZE: u32 = 1024;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub preprocessing: PreprocessingConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub weights_path: PathBuf,
    pub labels_path: PathBuf,
    pub recommendations_path: Option<PathBuf>,
    pub backend: Option<ModelBackend>,
    pub outputs_probabilities: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub resize_method: ResizeMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub prediction_log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl ResizeMethod {
    pub fn filter(self) -> FilterType {
        match self {
            ResizeMethod::Nearest => FilterType::Nearest,
            ResizeMethod::Bilinear => FilterType::Triangle,
            ResizeMethod::Bicubic => FilterType::CatmullRom,
            ResizeMethod::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl FromStr for ResizeMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResizeMethod::Nearest),
            "bilinear" | "triangle" => Ok(ResizeMethod::Bilinear),
            "bicubic" | "catmullrom" => Ok(ResizeMethod::Bicubic),
            "lanczos3" | "lanczos" => Ok(ResizeMethod::Lanczos3),
            _ => Err(ConfigError::InvalidValue {
                key: "RESIZE_METHOD".into(),
                value: s.into(),
            }),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
            static_dir: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("model/saved_models/best_model.onnx"),
            labels_path: PathBuf::from("model/saved_models/class_indices.json"),
            recommendations_path: None,
            backend: None,
            outputs_probabilities: false,
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            resize_method: ResizeMethod::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl AppConfig {
    /// Builds the process configuration from the optional YAML file named by
    /// `CROPDOC_CONFIG`, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                log::info!("Loading configuration from {}", path);
                Self::from_file(Path::new(&path))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_value("PORT", &port)?;
        }
        if let Some(workers) = get("WORKERS") {
            self.server.workers = Some(parse_value("WORKERS", &workers)?);
        }
        if let Some(dir) = get("STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = get("MODEL_PATH") {
            self.model.weights_path = PathBuf::from(path);
        }
        if let Some(path) = get("CLASS_INDICES_PATH") {
            self.model.labels_path = PathBuf::from(path);
        }
        if let Some(path) = get("RECOMMENDATIONS_PATH") {
            self.model.recommendations_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = get("MODEL_BACKEND") {
            self.model.backend = Some(parse_value("MODEL_BACKEND", &backend)?);
        }
        if let Some(flag) = get("MODEL_OUTPUTS_PROBABILITIES") {
            self.model.outputs_probabilities = parse_bool("MODEL_OUTPUTS_PROBABILITIES", &flag)?;
        }
        if let Some(size) = get("INPUT_SIZE") {
            self.preprocessing.input_size = parse_value("INPUT_SIZE", &size)?;
        }
        if let Some(method) = get("RESIZE_METHOD") {
            self.preprocessing.resize_method = method.parse()?;
        }
        if let Some(max) = get("MAX_UPLOAD_BYTES") {
            self.upload.max_bytes = parse_value("MAX_UPLOAD_BYTES", &max)?;
        }
        if let Some(dir) = get("PREDICTION_LOG_DIR") {
            self.storage.prediction_log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preprocessing.input_size == 0 || self.preprocessing.input_size > MAX_INPUT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "input_size must be between 1 and {}, got {}",
                MAX_INPUT_SIZE, self.preprocessing.input_size
            )));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid("max upload size must be positive".into()));
        }
        if let Some(std) = self.preprocessing.std.iter().find(|s| s.is_nan() || **s <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "normalization std must be positive, got {}",
                std
            )));
        }
        Ok(())
    }

    /// Backend named in config, or the one implied by the weights file extension.
    pub fn model_backend(&self) -> Option<ModelBackend> {
        self.model
            .backend
            .or_else(|| ModelBackend::from_path(&self.model.weights_path))
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_training_preprocessing() {
        let config = AppConfig::default();
        assert_eq!(config.preprocessing.input_size, 224);
        assert_eq!(config.preprocessing.mean, [0.485, 0.456, 0.406]);
        assert_eq!(config.preprocessing.std, [0.229, 0.224, 0.225]);
        assert_eq!(config.preprocessing.resize_method, ResizeMethod::Bilinear);
        assert_eq!(config.upload.max_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[("INPUT_SIZE", "100000")]))
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.preprocessing.input_size = MAX_INPUT_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AppConfig::from_yaml_str(
            "server:\n  port: 9000\nmodel:\n  weights_path: /srv/a.onnx\n",
        )
        .unwrap();
        config
            .apply_overrides(lookup_from(&[
                ("PORT", "8081"),
                ("CLASS_INDICES_PATH", "/srv/classes.json"),
                ("MODEL_OUTPUTS_PROBABILITIES", "yes"),
                ("RESIZE_METHOD", "lanczos3"),
                ("HOST", "   "),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.weights_path, PathBuf::from("/srv/a.onnx"));
        assert_eq!(config.model.labels_path, PathBuf::from("/srv/classes.json"));
        assert!(config.model.outputs_probabilities);
        assert_eq!(config.preprocessing.resize_method, ResizeMethod::Lanczos3);
    }

    #[test]
    fn unparsable_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("MAX_UPLOAD_BYTES", "ten megs")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAX_UPLOAD_BYTES"));
    }

    #[test]
    fn zero_std_fails_validation() {
        let config = AppConfig::from_yaml_str("preprocessing:\n  std: [0.2, 0.0, 0.2]\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn backend_follows_weights_extension_unless_set() {
        let mut config = AppConfig::default();
        assert_eq!(config.model_backend(), Some(ModelBackend::Onnx));

        config.model.weights_path = PathBuf::from("best_model.pt");
        assert_eq!(config.model_backend(), Some(ModelBackend::Torch));

        config.model.backend = Some(ModelBackend::Onnx);
        assert_eq!(config.model_backend(), Some(ModelBackend::Onnx));
    }
}
