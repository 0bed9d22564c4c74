use shared::Recommendation;
use std::collections::HashMap;
use std::path::Path;

use crate::pipeline::decoder::{HEALTHY, LABEL_SEPARATOR};

const BUILTIN_RECOMMENDATIONS: &str = include_str!("../../../config/recommendations.yaml");

#[derive(Debug, thiserror::Error)]
pub enum RecommendationError {
    #[error("Failed to read recommendations file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse recommendations: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceSource {
    Exact,
    Healthy,
    Normalized,
    Partial,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    pub recommendation: Recommendation,
    pub source: AdviceSource,
}

/// Advisory records keyed by composite label. Read-only after load.
#[derive(Debug, Clone)]
pub struct RecommendationTable {
    entries: HashMap<String, Recommendation>,
    normalized: HashMap<String, String>,
}

impl RecommendationTable {
    pub fn new(entries: HashMap<String, Recommendation>) -> Self {
        let normalized = entries
            .keys()
            .map(|key| (normalize_key(key), key.clone()))
            .collect();
        Self {
            entries,
            normalized,
        }
    }

    /// The table compiled into the binary.
    pub fn builtin() -> Result<Self, RecommendationError> {
        Self::from_yaml_str(BUILTIN_RECOMMENDATIONS)
    }

    /// YAML or JSON file mapping composite labels to records.
    pub fn load(path: &Path) -> Result<Self, RecommendationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, RecommendationError> {
        let entries: HashMap<String, Recommendation> = serde_yaml::from_str(contents)?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Never fails: unknown diseases get generic advice.
    pub fn lookup(&self, crop_name: &str, disease_name: &str) -> Advice {
        let crop = crop_name.trim();
        let disease = disease_name.trim();
        let key = format!("{}{}{}", crop, LABEL_SEPARATOR, disease);

        if let Some(rec) = self.entries.get(&key) {
            return advice(rec.clone(), AdviceSource::Exact);
        }
        if disease.is_empty() || disease.eq_ignore_ascii_case(HEALTHY) {
            return advice(healthy(crop), AdviceSource::Healthy);
        }
        if let Some(rec) = self
            .normalized
            .get(&normalize_key(&key))
            .and_then(|original| self.entries.get(original))
        {
            return advice(rec.clone(), AdviceSource::Normalized);
        }
        if let Some(rec) = self.partial_match(crop, disease) {
            return advice(rec.clone(), AdviceSource::Partial);
        }
        advice(placeholder(crop, disease), AdviceSource::Placeholder)
    }

    /// Key containing both names, case-insensitive. The shortest key wins so
    /// the result does not depend on map order.
    fn partial_match(&self, crop: &str, disease: &str) -> Option<&Recommendation> {
        let crop = crop.to_lowercase();
        let disease = disease.to_lowercase();
        if crop.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .filter(|(key, _)| {
                let key = key.to_lowercase();
                key.contains(&crop) && key.contains(&disease)
            })
            .min_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
            .map(|(_, rec)| rec)
    }
}

fn advice(recommendation: Recommendation, source: AdviceSource) -> Advice {
    Advice {
        recommendation,
        source,
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn display_name(name: &str) -> String {
    name.replace('_', " ").trim().to_string()
}

fn healthy(crop: &str) -> Recommendation {
    let crop = display_name(crop);
    Recommendation {
        disease_description: format!(
            "The {} plant appears to be healthy with no signs of disease detected.",
            crop
        ),
        symptoms: "No symptoms detected.".to_string(),
        treatment_organic: "No treatment needed. Continue regular crop management practices."
            .to_string(),
        treatment_chemical: "No chemical treatment needed.".to_string(),
        preventive_measures: "Keep monitoring the field, rotate crops, maintain spacing for air \
            circulation and remove plant debris after harvest."
            .to_string(),
    }
}

fn placeholder(crop: &str, disease: &str) -> Recommendation {
    let crop = display_name(crop);
    let disease = display_name(disease);
    Recommendation {
        disease_description: format!(
            "Detected condition on {}: {}. Detailed information for this disease is not \
             available yet.",
            crop, disease
        ),
        symptoms: "Look for spots, discoloration, wilting or unusual growth on leaves and stems. \
            Consult an agricultural expert to confirm the diagnosis."
            .to_string(),
        treatment_organic: "Remove and dispose of heavily affected plant parts and keep the field \
            clean. Ask a local agricultural extension officer about organic options."
            .to_string(),
        treatment_chemical: "Consult a local agricultural extension officer or certified \
            agronomist before applying any chemical treatment, and follow label instructions."
            .to_string(),
        preventive_measures: "Use disease-free planting material, rotate crops, maintain proper \
            spacing and irrigation, and inspect plants regularly."
            .to_string(),
    }
}
