use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LabelTableError {
    #[error("Failed to read class indices file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse class indices: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Class indices file is empty")]
    Empty,
    #[error("Invalid class index key: {0:?}")]
    InvalidIndex(String),
    #[error("Class index {0} appears more than once")]
    DuplicateIndex(usize),
    #[error("Class index {missing} is missing; indices must cover 0..{len}")]
    Gap { missing: usize, len: usize },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabels {
    List(Vec<String>),
    ByLabel(BTreeMap<String, usize>),
    ByIndex(BTreeMap<String, String>),
}

/// Closed mapping from class index to composite `"<Crop>___<Disease>"` label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Result<Self, LabelTableError> {
        if labels.is_empty() {
            return Err(LabelTableError::Empty);
        }
        Ok(Self { labels })
    }

    pub fn load(path: &Path) -> Result<Self, LabelTableError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Accepts `{"0": label}`, `{label: 0}` or `[label, ...]`.
    pub fn from_json_str(contents: &str) -> Result<Self, LabelTableError> {
        let pairs: Vec<(usize, String)> = match serde_json::from_str::<RawLabels>(contents)? {
            RawLabels::List(labels) => return Self::new(labels),
            RawLabels::ByLabel(map) => map.into_iter().map(|(label, idx)| (idx, label)).collect(),
            RawLabels::ByIndex(map) => map
                .into_iter()
                .map(|(key, label)| {
                    key.trim()
                        .parse::<usize>()
                        .map(|idx| (idx, label))
                        .map_err(|_| LabelTableError::InvalidIndex(key))
                })
                .collect::<Result<_, _>>()?,
        };
        Self::from_pairs(pairs)
    }

    fn from_pairs(pairs: Vec<(usize, String)>) -> Result<Self, LabelTableError> {
        let len = pairs.len();
        let mut slots: Vec<Option<String>> = vec![None; len];
        for (idx, label) in pairs {
            if idx >= len {
                let missing = (0..len).find(|i| slots[*i].is_none()).unwrap_or(0);
                return Err(LabelTableError::Gap { missing, len });
            }
            if slots[idx].replace(label).is_some() {
                return Err(LabelTableError::DuplicateIndex(idx));
            }
        }
        let labels = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| slot.ok_or(LabelTableError::Gap { missing: idx, len }))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(labels)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_index_keyed_table() {
        let table = LabelTable::from_json_str(
            r#"{"1": "Tomato___Early_blight", "0": "Apple___Apple_scab", "2": "Tomato___healthy"}"#,
        )
        .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("Apple___Apple_scab"));
        assert_eq!(table.get(1), Some("Tomato___Early_blight"));
        assert_eq!(table.get(3), None);
    }

    #[test]
    fn parses_label_keyed_table() {
        let table =
            LabelTable::from_json_str(r#"{"Apple___Apple_scab": 0, "Apple___healthy": 1}"#).unwrap();
        assert_eq!(table.get(1), Some("Apple___healthy"));
    }

    #[test]
    fn parses_plain_list() {
        let table = LabelTable::from_json_str(r#"["a___b", "c___d"]"#).unwrap();
        assert_eq!(table.iter().collect::<Vec<_>>(), vec!["a___b", "c___d"]);
    }

    #[test]
    fn rejects_gaps_duplicates_and_empty() {
        assert!(matches!(
            LabelTable::from_json_str(r#"{"0": "a", "2": "b"}"#),
            Err(LabelTableError::Gap { missing: 1, len: 2 })
        ));
        assert!(matches!(
            LabelTable::from_json_str(r#"{"a": 0, "b": 0}"#),
            Err(LabelTableError::DuplicateIndex(0))
        ));
        assert!(matches!(
            LabelTable::from_json_str(r#"{"x": "a"}"#),
            Err(LabelTableError::InvalidIndex(_))
        ));
        assert!(matches!(LabelTable::from_json_str("{}"), Err(LabelTableError::Empty)));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"0": "Potato___Late_blight"}}"#).unwrap();
        let table = LabelTable::load(file.path()).unwrap();
        assert_eq!(table.get(0), Some("Potato___Late_blight"));
    }

    #[test]
    fn bundled_plantvillage_table_is_complete() {
        let table = LabelTable::from_json_str(include_str!("../../../config/class_indices.json")).unwrap();
        assert_eq!(table.len(), 38);
        assert!(table.iter().any(|l| l == "Tomato___Early_blight"));
    }
}
