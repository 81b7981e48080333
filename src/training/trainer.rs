//! The training loop: manual shuffled-index batching, per-batch mixing,
//! per-epoch validation and best-gated artifact persistence.

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::CompactRecorder;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use colored::Colorize;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::{OutputCategory, RunConfig};
use crate::dataset::{
    annotation_file, load_annotations, AugmentationPipeline, DataSplit, FaceBatch, FaceBatcher,
    FaceDataset, FaceItem, Label,
};
use crate::error::{Error, Result};
use crate::hpo::Trial;
use crate::model::{FaceClassifier, FaceClassifierConfig};
use crate::utils::artifacts::{
    save_accuracy_chart, save_json, save_loss_chart, EvalDump, RunStamp, ScalarLogger,
};

use super::history::{BestScore, MetricsHistory};
use super::loss::{accuracy, batch_loss};
use super::mixing::{cutmix, mixup, sample_strength};

/// Batch size for validation and test evaluation, independent of the
/// training batch size.
pub const EVAL_BATCH_SIZE: usize = 128;

/// Per-run hyperparameters, either taken from the config or sampled by a
/// tuning trial.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub learning_rate: f64,
    pub n_epochs: usize,
    pub batch_size: usize,
    pub layers_to_train: Vec<String>,
    pub train_bn_params: bool,
    pub update_bn_estimate: bool,
    pub seed: u64,
}

impl RunSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            learning_rate: config.start_learningrate,
            n_epochs: config.n_epochs,
            batch_size: config.batch_size,
            layers_to_train: config.layers_to_train.clone(),
            train_bn_params: config.train_bn_params,
            update_bn_estimate: config.update_bn_estimate,
            seed: config.seed,
        }
    }
}

/// The three dataset splits, loaded once and shared across runs.
#[derive(Debug)]
pub struct DatasetBundle {
    pub train: FaceDataset,
    pub val: FaceDataset,
    pub test: FaceDataset,
}

impl DatasetBundle {
    /// Load annotations for all splits and build their datasets.
    pub fn load(config: &RunConfig) -> Result<Self> {
        let data_path = Path::new(&config.data_path);
        let short = config.use_short_data_version;

        let mut splits = Vec::with_capacity(3);
        for split in [DataSplit::Train, DataSplit::Val, DataSplit::Test] {
            let path = annotation_file(data_path, split, short);
            let records = load_annotations(&path, config.use_balanced_dataset)?;
            info!("{}: {} samples from {}", split, records.len(), path.display());
            splits.push(FaceDataset::from_annotations(
                &records,
                data_path,
                config.output_category,
                config.image_size,
            )?);
        }

        let mut iter = splits.into_iter();
        Ok(Self {
            train: iter.next().expect("three splits were pushed"),
            val: iter.next().expect("three splits were pushed"),
            test: iter.next().expect("three splits were pushed"),
        })
    }
}

/// What a finished run hands back to its caller.
#[derive(Debug)]
pub struct RunOutcome {
    pub history: MetricsHistory,
    pub final_val_loss: f64,
    /// Whether this run improved the best validation loss seen so far.
    pub improved: bool,
}

/// Train a model with the given settings.
///
/// The best-score accumulator is threaded in by the caller so a tuning study
/// can share one across all of its trials. Artifacts are persisted only when
/// the run improves the accumulator, or always outside of tuning. When a
/// trial is given, its pruner is consulted after every epoch and a veto
/// surfaces as [`Error::TrialPruned`].
pub fn run_training<B: AutodiffBackend>(
    config: &RunConfig,
    settings: &RunSettings,
    data: &DatasetBundle,
    device: &B::Device,
    best: &mut BestScore,
    mut trial: Option<&mut Trial>,
) -> Result<RunOutcome> {
    if data.train.is_empty() {
        return Err(Error::Training("training split is empty".to_string()));
    }

    println!("\n{}", "=== Training ===".bright_cyan().bold());
    println!(
        "  target {} | lr {:.6} | epochs {} | batch {}",
        config.output_category.to_string().bright_yellow(),
        settings.learning_rate,
        settings.n_epochs,
        settings.batch_size
    );

    let model_config = FaceClassifierConfig::new()
        .with_update_bn_estimate(settings.update_bn_estimate);
    let mut model = FaceClassifier::<B>::new(&model_config, device)
        .with_trainable_layers(&settings.layers_to_train)?;
    if !settings.train_bn_params {
        model = model.with_frozen_norm_params();
    }

    let mut optimizer = AdamConfig::new().init();
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let batcher = FaceBatcher::new(config.image_size);
    let augmentation = AugmentationPipeline::for_image_size(config.image_size);

    let stamp = RunStamp::new(&config.name);
    let output_dir = PathBuf::from(&config.output_dir);
    std::fs::create_dir_all(&output_dir)?;
    let mut scalars = ScalarLogger::create(&output_dir.join(stamp.file_name("scalars", "jsonl")))?;

    let mut history = MetricsHistory::new();
    let mut indices: Vec<usize> = (0..data.train.len()).collect();

    for epoch in 0..settings.n_epochs {
        indices.shuffle(&mut rng);

        for chunk in indices.chunks(settings.batch_size) {
            let mut items = chunk
                .iter()
                .map(|&i| data.train.item(i))
                .collect::<Result<Vec<_>>>()?;

            if config.use_data_augmentation && rng.gen_bool(config.p_augment) {
                // One sampled transform per batch, matching batched tensor
                // augmentation semantics.
                let transform = augmentation.sample(&mut rng);
                items = items.iter().map(|item| transform.apply(item)).collect();
            }

            let batch: FaceBatch<B> = batcher.batch(items.clone(), device);

            // The two gates draw independently; when both fire, mixup runs
            // on the already-cutmixed batch.
            let (apply_cutmix, apply_mixup) = mixing_gates(config, &mut rng);
            let mut mixed = batch.clone();
            if apply_cutmix {
                let partner = shuffled_partner::<B>(&items, &batcher, device, &mut rng);
                let strength = sample_strength(&mut rng);
                let (images, labels, corrected) = cutmix(&mixed, &partner, strength, &mut rng);
                debug!("cutmix strength {:.3} -> corrected {:.3}", strength, corrected);
                mixed = FaceBatch { images, labels };
            }
            if apply_mixup {
                let partner = shuffled_partner::<B>(&items, &batcher, device, &mut rng);
                let strength = sample_strength(&mut rng);
                let (images, labels) = mixup(&mixed, &partner, strength);
                mixed = FaceBatch { images, labels };
            }

            let output = model.forward(mixed.images);
            let loss = batch_loss(&output, &mixed.labels);
            // Accuracy is always measured against the unmixed labels.
            let batch_accuracy = accuracy(&output, &batch.labels);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(Error::Training(format!(
                    "loss diverged to {} in epoch {}",
                    loss_value,
                    epoch + 1
                )));
            }
            history.record("loss", loss_value);
            history.record("acc", batch_accuracy);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(settings.learning_rate, model, grads);
        }

        let (val_loss, val_accuracy) = evaluate(&model.valid(), &data.val, &batcher, device)?;
        history.record("val_loss", val_loss);
        history.record("val_acc", val_accuracy);
        history.end_epoch();

        let epoch_metrics = history.last().expect("epoch was just closed").clone();
        for (name, value) in &epoch_metrics {
            scalars.log(epoch + 1, name, *value)?;
        }

        println!(
            "Epoch {:>2}/{} | loss {} | acc {} | val_loss {} | val_acc {}",
            epoch + 1,
            settings.n_epochs,
            format!("{:.4}", epoch_metrics.get("loss").copied().unwrap_or(f64::NAN)).yellow(),
            format!("{:.4}", epoch_metrics.get("acc").copied().unwrap_or(f64::NAN)).green(),
            format!("{:.4}", val_loss).yellow(),
            format!("{:.4}", val_accuracy).green(),
        );
        info!(epoch = epoch + 1, val_loss, val_accuracy, "epoch finished");

        if let Some(t) = trial.as_deref_mut() {
            t.report(val_loss);
            if t.should_prune() {
                return Err(Error::TrialPruned { epoch: epoch + 1 });
            }
        }
    }

    let final_val_loss = history
        .last()
        .and_then(|m| m.get("val_loss").copied())
        .ok_or_else(|| Error::Training("no validation loss recorded".to_string()))?;

    let improved = best.observe(final_val_loss);
    if improved || !config.do_tuning {
        persist_artifacts::<B>(config, &model.valid(), data, &batcher, device, &history, &stamp)?;
    }

    Ok(RunOutcome {
        history,
        final_val_loss,
        improved,
    })
}

/// Draw the cutmix and mixup gates for one training step.
///
/// Each enabled gate rolls its own `p_augment` chance, so both can fire in
/// the same step.
fn mixing_gates<R: Rng>(config: &RunConfig, rng: &mut R) -> (bool, bool) {
    let apply_cutmix = config.use_cut_mix && rng.gen_bool(config.p_augment);
    let apply_mixup = config.use_mix_up && rng.gen_bool(config.p_augment);
    (apply_cutmix, apply_mixup)
}

fn shuffled_partner<B: Backend>(
    items: &[FaceItem],
    batcher: &FaceBatcher,
    device: &B::Device,
    rng: &mut ChaCha8Rng,
) -> FaceBatch<B> {
    let mut partner = items.to_vec();
    partner.shuffle(rng);
    batcher.batch(partner, device)
}

/// Loss and accuracy over a full split, batched and unshuffled.
pub fn evaluate<B: Backend>(
    model: &FaceClassifier<B>,
    dataset: &FaceDataset,
    batcher: &FaceBatcher,
    device: &B::Device,
) -> Result<(f64, f64)> {
    if dataset.is_empty() {
        return Err(Error::Dataset("cannot evaluate an empty split".to_string()));
    }

    let mut loss_sum = 0.0;
    let mut accuracy_sum = 0.0;
    let mut seen = 0usize;

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(EVAL_BATCH_SIZE) {
        let items = chunk
            .iter()
            .map(|&i| dataset.item(i))
            .collect::<Result<Vec<_>>>()?;
        let count = items.len();

        let batch: FaceBatch<B> = batcher.batch(items, device);
        let output = model.forward(batch.images);

        let loss: f64 = batch_loss(&output, &batch.labels).into_scalar().elem();
        loss_sum += loss * count as f64;
        accuracy_sum += accuracy(&output, &batch.labels) * count as f64;
        seen += count;
    }

    Ok((loss_sum / seen as f64, accuracy_sum / seen as f64))
}

/// Charts, test predictions, ground truth and the model checkpoint.
fn persist_artifacts<B: AutodiffBackend>(
    config: &RunConfig,
    eval_model: &FaceClassifier<B::InnerBackend>,
    data: &DatasetBundle,
    batcher: &FaceBatcher,
    device: &B::Device,
    history: &MetricsHistory,
    stamp: &RunStamp,
) -> Result<()> {
    let output_dir = PathBuf::from(&config.output_dir);

    save_loss_chart(history, stamp, &output_dir)?;
    save_accuracy_chart(history, stamp, &output_dir)?;

    let predictions = collect_predictions(eval_model, &data.test, batcher, device)?;
    save_json(&predictions, "test_predictions", stamp, &output_dir)?;
    save_json(&ground_truth(&data.test), "test_labels", stamp, &output_dir)?;

    let checkpoint = output_dir.join(stamp.file_name("model", "mpk"));
    eval_model
        .clone()
        .save_file(checkpoint.with_extension(""), &CompactRecorder::new())
        .map_err(|e| Error::Model(format!("cannot save checkpoint: {}", e)))?;

    println!(
        "{} artifacts written to {}",
        "✓".bright_green(),
        output_dir.display()
    );
    Ok(())
}

/// Test-set probabilities for the heads the run trains.
pub fn collect_predictions<B: Backend>(
    model: &FaceClassifier<B>,
    dataset: &FaceDataset,
    batcher: &FaceBatcher,
    device: &B::Device,
) -> Result<EvalDump> {
    let category = dataset.category();
    let mut race_rows: Vec<Vec<f32>> = Vec::new();
    let mut gender_rows: Vec<Vec<f32>> = Vec::new();

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(EVAL_BATCH_SIZE) {
        let items = chunk
            .iter()
            .map(|&i| dataset.item(i))
            .collect::<Result<Vec<_>>>()?;

        let batch: FaceBatch<B> = batcher.batch(items, device);
        let output = model.forward(batch.images);

        if matches!(category, OutputCategory::Race | OutputCategory::Combined) {
            race_rows.extend(tensor_rows(output.race)?);
        }
        if matches!(category, OutputCategory::Gender | OutputCategory::Combined) {
            gender_rows.extend(tensor_rows(output.gender)?);
        }
    }

    Ok(EvalDump {
        race: (!race_rows.is_empty()).then_some(race_rows),
        gender: (!gender_rows.is_empty()).then_some(gender_rows),
    })
}

fn ground_truth(dataset: &FaceDataset) -> EvalDump {
    let mut race_rows: Vec<Vec<f32>> = Vec::new();
    let mut gender_rows: Vec<Vec<f32>> = Vec::new();

    for index in 0..dataset.len() {
        match dataset.label(index) {
            Some(Label::Binary(g)) => gender_rows.push(g.to_vec()),
            Some(Label::Categorical(r)) => race_rows.push(r.to_vec()),
            Some(Label::Joint { race, gender }) => {
                race_rows.push(race.to_vec());
                gender_rows.push(gender.to_vec());
            }
            None => {}
        }
    }

    EvalDump {
        race: (!race_rows.is_empty()).then_some(race_rows),
        gender: (!gender_rows.is_empty()).then_some(gender_rows),
    }
}

fn tensor_rows<B: Backend>(tensor: burn::tensor::Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [rows, cols] = tensor.dims();
    let flat: Vec<f32> = tensor
        .into_data()
        .to_vec()
        .map_err(|e| Error::Model(format!("cannot read tensor data: {:?}", e)))?;
    Ok((0..rows)
        .map(|r| flat[r * cols..(r + 1) * cols].to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{NUM_GENDER_CLASSES, NUM_RACE_CLASSES};
    use burn::backend::NdArray;
    use burn::tensor::{Tensor, TensorData};

    type TestBackend = NdArray;

    #[test]
    fn test_tensor_rows_reshapes() {
        let tensor: Tensor<TestBackend, 2> = Tensor::from_floats(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]),
            &Default::default(),
        );
        let rows = tensor_rows(tensor).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_ground_truth_splits_joint_labels() {
        let records = vec![crate::dataset::AnnotationRecord {
            file: "a.jpg".to_string(),
            age: "20-29".to_string(),
            gender: "Female".to_string(),
            race: "White".to_string(),
            service_test: true,
        }];
        let dataset = FaceDataset::from_annotations(
            &records,
            Path::new("data"),
            OutputCategory::Combined,
            32,
        )
        .unwrap();

        let truth = ground_truth(&dataset);
        assert_eq!(truth.race.unwrap()[0].len(), NUM_RACE_CLASSES);
        assert_eq!(truth.gender.unwrap()[0].len(), NUM_GENDER_CLASSES);
    }

    #[test]
    fn test_both_mixing_gates_can_fire_in_one_step() {
        use rand::SeedableRng;
        let config = RunConfig {
            use_cut_mix: true,
            use_mix_up: true,
            p_augment: 1.0,
            ..RunConfig::default()
        };
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        assert_eq!(mixing_gates(&config, &mut rng), (true, true));

        let neither = RunConfig {
            use_cut_mix: false,
            use_mix_up: false,
            p_augment: 1.0,
            ..RunConfig::default()
        };
        assert_eq!(mixing_gates(&neither, &mut rng), (false, false));
    }

    #[test]
    fn test_mixup_gate_is_independent_of_cutmix() {
        use rand::SeedableRng;
        // Cutmix enabled and always firing must not suppress mixup.
        let config = RunConfig {
            use_cut_mix: true,
            use_mix_up: true,
            p_augment: 1.0,
            ..RunConfig::default()
        };
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        for _ in 0..20 {
            let (cut, mix) = mixing_gates(&config, &mut rng);
            assert!(cut && mix);
        }
    }

    #[test]
    fn test_run_settings_follow_config() {
        let config = RunConfig {
            start_learningrate: 0.002,
            n_epochs: 7,
            batch_size: 128,
            ..RunConfig::default()
        };
        let settings = RunSettings::from_config(&config);
        assert_eq!(settings.learning_rate, 0.002);
        assert_eq!(settings.n_epochs, 7);
        assert_eq!(settings.batch_size, 128);
    }
}
