//! CNN model for multi-task face attribute classification.

pub mod cnn;

pub use cnn::{
    freeze_preset, ConvBlock, FaceClassifier, FaceClassifierConfig, FaceOutput, LAYER_NAMES,
};
