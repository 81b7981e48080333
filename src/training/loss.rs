//! Binary cross-entropy loss and the accuracy metric.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use crate::dataset::LabelBatch;
use crate::model::FaceOutput;

/// Probability clamp bound; keeps the log terms finite.
const EPS: f32 = 1e-7;

/// Mean binary cross-entropy over probabilities:
/// `-(y * ln p + (1 - y) * ln(1 - p))`.
pub fn binary_cross_entropy<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    let pred = pred.clamp(EPS, 1.0 - EPS);
    let loss = target.clone() * pred.clone().log() + (target.neg() + 1.0) * (pred.neg() + 1.0).log();
    loss.neg().mean()
}

/// Loss for a batch under the run's prediction target.
///
/// Joint training averages the two per-head losses.
pub fn batch_loss<B: Backend>(output: &FaceOutput<B>, labels: &LabelBatch<B>) -> Tensor<B, 1> {
    match labels {
        LabelBatch::Binary(target) => {
            binary_cross_entropy(output.gender.clone(), target.clone())
        }
        LabelBatch::Categorical(target) => {
            binary_cross_entropy(output.race.clone(), target.clone())
        }
        LabelBatch::Joint { race, gender } => {
            let total = binary_cross_entropy(output.race.clone(), race.clone())
                + binary_cross_entropy(output.gender.clone(), gender.clone());
            total / 2.0
        }
    }
}

/// Fraction of items whose predicted class matches the label.
///
/// For joint training this is the mean of both heads' accuracies. Labels are
/// expected unmixed; mixing only affects the loss.
pub fn accuracy<B: Backend>(output: &FaceOutput<B>, labels: &LabelBatch<B>) -> f64 {
    match labels {
        LabelBatch::Binary(target) => head_accuracy(&output.gender, target),
        LabelBatch::Categorical(target) => head_accuracy(&output.race, target),
        LabelBatch::Joint { race, gender } => {
            (head_accuracy(&output.race, race) + head_accuracy(&output.gender, gender)) / 2.0
        }
    }
}

fn head_accuracy<B: Backend>(pred: &Tensor<B, 2>, target: &Tensor<B, 2>) -> f64 {
    let batch_size = pred.dims()[0];
    if batch_size == 0 {
        return 0.0;
    }

    let correct: i64 = pred
        .clone()
        .argmax(1)
        .equal(target.clone().argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem();

    correct as f64 / batch_size as f64
}
