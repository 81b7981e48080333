//! Run configuration.
//!
//! A run is described by a YAML file under `configs/`. Every key has a
//! default, unknown keys are rejected, and out-of-range values fail before
//! any data is touched.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::LAYER_NAMES;

/// Which prediction target(s) a run trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    /// Binary gender head only
    Gender,
    /// 7-way ethnicity head only
    Race,
    /// Both heads jointly
    Combined,
}

impl std::fmt::Display for OutputCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputCategory::Gender => write!(f, "gender"),
            OutputCategory::Race => write!(f, "race"),
            OutputCategory::Combined => write!(f, "combined"),
        }
    }
}

/// Configuration for a training run or a tuning study.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RunConfig {
    /// Run name, taken from the config file stem. Not a YAML key.
    #[serde(skip)]
    pub name: String,

    /// Sub-modules to train; empty means train everything
    pub layers_to_train: Vec<String>,
    /// Prediction target(s)
    pub output_category: OutputCategory,
    /// Apply the augmentation pipeline during training
    pub use_data_augmentation: bool,
    /// Restrict the dataset to the balanced subset
    pub use_balanced_dataset: bool,
    /// Training batch size
    pub batch_size: usize,
    /// Initial learning rate for Adam
    pub start_learningrate: f64,
    /// Number of training epochs
    pub n_epochs: usize,
    /// Directory holding annotation CSVs and images
    pub data_path: String,
    /// Use the truncated annotation files for quick experiments
    pub use_short_data_version: bool,
    /// Train the scale/shift parameters of normalization layers
    pub train_bn_params: bool,
    /// Update the running statistics of normalization layers
    pub update_bn_estimate: bool,
    /// Apply cutmix to training batches
    pub use_cut_mix: bool,
    /// Apply mixup to training batches
    pub use_mix_up: bool,
    /// Probability of each augmentation/mixing gate firing
    pub p_augment: f64,
    /// Number of trials when tuning
    pub n_optuna_trials: usize,
    /// Run a hyperparameter study instead of a single training run
    pub do_tuning: bool,
    /// Side length images are resized to
    pub image_size: usize,
    /// Directory for charts, predictions and checkpoints
    pub output_dir: String,
    /// Seed for shuffling, augmentation and the search sampler
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "config_default".to_string(),
            layers_to_train: Vec::new(),
            output_category: OutputCategory::Gender,
            use_data_augmentation: false,
            use_balanced_dataset: false,
            batch_size: 64,
            start_learningrate: 0.001,
            n_epochs: 15,
            data_path: "DD2424_data".to_string(),
            use_short_data_version: false,
            train_bn_params: true,
            update_bn_estimate: true,
            use_cut_mix: false,
            use_mix_up: false,
            p_augment: 0.5,
            n_optuna_trials: 1,
            do_tuning: false,
            image_size: crate::dataset::IMAGE_SIZE,
            output_dir: "output".to_string(),
            seed: 42,
        }
    }
}

impl RunConfig {
    /// Load a configuration from a YAML file and validate it.
    ///
    /// The run name is taken from the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config: RunConfig = serde_yaml::from_str(&contents)?;
        config.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "config_default".to_string());

        config.validate()?;
        Ok(config)
    }

    /// Check all value ranges. Called on load, before any data is read.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".into()));
        }
        if self.n_epochs == 0 {
            return Err(Error::Config("n_epochs must be greater than 0".into()));
        }
        if self.start_learningrate <= 0.0 {
            return Err(Error::Config(
                "start_learningrate must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.p_augment) {
            return Err(Error::Config(format!(
                "p_augment must be in [0, 1], got {}",
                self.p_augment
            )));
        }
        if self.n_optuna_trials == 0 {
            return Err(Error::Config("n_optuna_trials must be greater than 0".into()));
        }
        if self.image_size < 8 {
            return Err(Error::Config(format!(
                "image_size must be at least 8, got {}",
                self.image_size
            )));
        }
        for layer in &self.layers_to_train {
            if !LAYER_NAMES.contains(&layer.as_str()) {
                return Err(Error::Config(format!(
                    "unknown layer '{}' in layers_to_train (known: {})",
                    layer,
                    LAYER_NAMES.join(", ")
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.output_category, OutputCategory::Gender);
        assert!(!config.do_tuning);
    }

    #[test]
    fn test_rejects_bad_p_augment() {
        let config = RunConfig {
            p_augment: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = RunConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_layer_name() {
        let config = RunConfig {
            layers_to_train: vec!["conv9".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_accepts_known_layer_names() {
        let config = RunConfig {
            layers_to_train: vec!["conv3".to_string(), "fc_gender".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_yaml_key() {
        let yaml = "batch_size: 32\nnonsense_key: 3\n";
        let parsed: std::result::Result<RunConfig, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parses_partial_yaml_with_defaults() {
        let yaml = "output_category: combined\nbatch_size: 128\nuse_cut_mix: true\n";
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.output_category, OutputCategory::Combined);
        assert_eq!(config.batch_size, 128);
        assert!(config.use_cut_mix);
        // Untouched keys keep their defaults
        assert_eq!(config.n_epochs, 15);
        assert!((config.p_augment - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_output_category_display() {
        assert_eq!(OutputCategory::Gender.to_string(), "gender");
        assert_eq!(OutputCategory::Combined.to_string(), "combined");
    }
}
