//! Training: loss, mixing, history and the run/tuning entry points.

pub mod history;
pub mod loss;
pub mod mixing;
pub mod trainer;

pub use history::{BestScore, MetricsHistory};
pub use trainer::{
    collect_predictions, evaluate, run_training, DatasetBundle, RunOutcome, RunSettings,
    EVAL_BATCH_SIZE,
};

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::info;

use crate::config::RunConfig;
use crate::error::Result;
use crate::hpo::Study;
use crate::model::freeze_preset;

/// One training run with the hyperparameters from the config.
pub fn run_single<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<()> {
    let data = DatasetBundle::load(config)?;
    let settings = RunSettings::from_config(config);
    let mut best = BestScore::new();

    let outcome = run_training::<B>(config, &settings, &data, device, &mut best, None)?;

    println!(
        "\n{} final validation loss {:.4}",
        "Done:".bright_green().bold(),
        outcome.final_val_loss
    );
    Ok(())
}

/// A tuning study: sample hyperparameters per trial, minimize validation
/// loss, prune laggards against the median curve.
///
/// One best-score accumulator spans the whole study, so only trials that
/// improve on every run before them persist artifacts.
pub fn run_study<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<()> {
    println!(
        "\n{} {} trials",
        "=== Hyperparameter Study ===".bright_cyan().bold(),
        config.n_optuna_trials
    );

    let data = DatasetBundle::load(config)?;
    let mut best = BestScore::new();
    let mut study = Study::new(config.seed);

    study.minimize(config.n_optuna_trials, |trial| {
        let preset = trial.suggest_choice("layers", &["all", "upper"]);
        let settings = RunSettings {
            learning_rate: trial.suggest_float_log("start_learningrate", 1e-4, 2e-3),
            n_epochs: trial.suggest_int("n_epochs", 5, 15) as usize,
            batch_size: trial.suggest_choice("batch_size", &[64usize, 128]),
            layers_to_train: freeze_preset(preset)?,
            train_bn_params: trial.suggest_bool("train_bn_params"),
            update_bn_estimate: trial.suggest_bool("update_bn_estimate"),
            seed: config.seed.wrapping_add(trial.id() as u64),
        };
        info!("trial {} settings: {:?}", trial.id(), settings);

        let outcome = run_training::<B>(config, &settings, &data, device, &mut best, Some(trial))?;
        Ok(outcome.final_val_loss)
    })?;

    match study.best_trial() {
        Some(record) => {
            println!(
                "\n{} trial {} with score {:.4}",
                "Best:".bright_green().bold(),
                record.id,
                record.score().expect("best trial is complete")
            );
            for (name, value) in &record.params {
                println!("  {} = {}", name.bright_yellow(), value);
            }
        }
        None => println!("{}", "All trials were pruned.".bright_red()),
    }
    Ok(())
}
