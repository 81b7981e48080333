//! # FairFace Attribute Training
//!
//! A Rust library for multi-task face attribute classification on the
//! FairFace dataset using the Burn framework.
//!
//! ## Features
//!
//! - **Multi-task CNN** with separate ethnicity and gender heads over a shared backbone
//! - **Burn framework** for portable neural network training on CPU or CUDA
//! - **Batch mixing** with cutmix and mixup regularization
//! - **Hyperparameter tuning** with seeded random search and median pruning
//!
//! ## Modules
//!
//! - `dataset`: Annotation parsing, image loading, batching and augmentation
//! - `model`: CNN architecture built with Burn
//! - `training`: Training loop, loss, mixing and metric history
//! - `hpo`: Hyperparameter study with pruning
//! - `utils`: Logging, charts and run artifacts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fairface_train::backend::{default_device, TrainingBackend};
//! use fairface_train::config::RunConfig;
//! use fairface_train::training::run_single;
//!
//! let config = RunConfig::load("configs/gender_baseline.yaml".as_ref())?;
//! let device = default_device();
//! run_single::<TrainingBackend>(&config, &device)?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod hpo;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{OutputCategory, RunConfig};
pub use dataset::{
    FaceBatch, FaceBatcher, FaceDataset, FaceItem, Label, LabelBatch, IMAGE_SIZE,
    NUM_GENDER_CLASSES, NUM_RACE_CLASSES, RACE_NAMES,
};
pub use error::{Error, Result};
pub use hpo::{Study, Trial, TrialOutcome};
pub use model::{FaceClassifier, FaceClassifierConfig, FaceOutput};
pub use training::{
    run_single, run_study, run_training, BestScore, DatasetBundle, MetricsHistory, RunOutcome,
    RunSettings,
};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
