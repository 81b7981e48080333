//! Annotation CSV parsing.
//!
//! Each split is described by a CSV with one row per image:
//! `file,age,gender,race,service_test`. The `service_test` column marks the
//! rows belonging to the balanced subset.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Annotation file name prefix for the truncated quick-experiment files.
const SHORT_PREFIX: &str = "short_version_";

/// Dataset split selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSplit {
    Train,
    Val,
    Test,
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Val => write!(f, "val"),
            DataSplit::Test => write!(f, "test"),
        }
    }
}

/// One row of an annotation CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationRecord {
    /// Image path relative to the data directory
    pub file: String,
    /// Age bracket string; carried along but unused
    #[serde(default)]
    pub age: String,
    /// Gender attribute string
    pub gender: String,
    /// Ethnicity attribute string
    pub race: String,
    /// Whether the row belongs to the balanced subset
    #[serde(deserialize_with = "bool_from_str")]
    pub service_test: bool,
}

// The upstream CSVs write Python-style "True"/"False".
fn bool_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid service_test value '{}'",
            other
        ))),
    }
}

/// Resolve the annotation CSV path for a split.
///
/// The full train and val annotations are `train.csv` and `val.csv`; their
/// truncated variants carry the `short_version_fairface_label_` prefix. The
/// test annotations have a single version.
pub fn annotation_file(data_path: &Path, split: DataSplit, short: bool) -> PathBuf {
    let name = match (split, short) {
        (DataSplit::Train, false) => "train.csv".to_string(),
        (DataSplit::Train, true) => format!("{SHORT_PREFIX}fairface_label_train.csv"),
        (DataSplit::Val, false) => "val.csv".to_string(),
        (DataSplit::Val, true) => format!("{SHORT_PREFIX}fairface_label_val.csv"),
        (DataSplit::Test, _) => "test.csv".to_string(),
    };
    data_path.join(name)
}

/// Load annotation rows from a CSV file.
///
/// With `balanced` set, only rows flagged `service_test` are kept. An empty
/// result is an error: a run over zero samples is always a mistake.
pub fn load_annotations(path: &Path, balanced: bool) -> Result<Vec<AnnotationRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        Error::Annotation(format!("cannot open {}: {}", path.display(), e))
    })?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: AnnotationRecord = row?;
        if !balanced || record.service_test {
            records.push(record);
        }
    }

    if records.is_empty() {
        return Err(Error::Dataset(format!(
            "no annotation rows in {} (balanced = {})",
            path.display(),
            balanced
        )));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fairface_ann_{}_{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_parses_python_style_booleans() {
        let path = write_csv(
            "bools.csv",
            "file,age,gender,race,service_test\n\
             train/1.jpg,20-29,Female,White,True\n\
             train/2.jpg,30-39,Male,Indian,False\n",
        );

        let records = load_annotations(&path, false).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].service_test);
        assert!(!records[1].service_test);
        assert_eq!(records[0].gender, "Female");
        assert_eq!(records[1].race, "Indian");
    }

    #[test]
    fn test_balanced_filter_keeps_flagged_rows() {
        let path = write_csv(
            "balanced.csv",
            "file,age,gender,race,service_test\n\
             train/1.jpg,20-29,Female,White,True\n\
             train/2.jpg,30-39,Male,Indian,False\n\
             train/3.jpg,3-9,Male,Black,True\n",
        );

        let records = load_annotations(&path, true).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.service_test));
    }

    #[test]
    fn test_empty_result_is_an_error() {
        let path = write_csv(
            "empty.csv",
            "file,age,gender,race,service_test\n\
             train/1.jpg,20-29,Female,White,False\n",
        );

        let result = load_annotations(&path, true);
        assert!(matches!(result, Err(Error::Dataset(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_annotations(Path::new("/nonexistent/labels.csv"), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_annotation_file_names() {
        let base = Path::new("data");
        assert_eq!(
            annotation_file(base, DataSplit::Train, false),
            base.join("train.csv")
        );
        assert_eq!(
            annotation_file(base, DataSplit::Val, false),
            base.join("val.csv")
        );
        assert_eq!(
            annotation_file(base, DataSplit::Train, true),
            base.join("short_version_fairface_label_train.csv")
        );
        assert_eq!(
            annotation_file(base, DataSplit::Val, true),
            base.join("short_version_fairface_label_val.csv")
        );
        // No truncated variant exists for the test annotations
        assert_eq!(
            annotation_file(base, DataSplit::Test, true),
            base.join("test.csv")
        );
    }
}
