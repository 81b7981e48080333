//! Hyperparameter search: seeded random sampling with median pruning.
//!
//! A [`Study`] runs an objective closure once per trial. The closure draws
//! parameters through the [`Trial`] suggestion API, reports an intermediate
//! value per epoch, and asks the pruner whether to stop. Pruning surfaces as
//! [`Error::TrialPruned`], which the study records as a distinguished outcome
//! rather than a failure.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::error::{Error, Result};

/// Completed trials required before the pruner activates.
const N_STARTUP_TRIALS: usize = 1;

/// Reported epochs a trial is always allowed before pruning.
const N_WARMUP_EPOCHS: usize = 1;

/// A sampled parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Text(String),
    Bool(bool),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{:.6}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// One running trial: its RNG, sampled parameters and reported values.
#[derive(Debug)]
pub struct Trial {
    id: usize,
    rng: ChaCha8Rng,
    params: BTreeMap<String, ParamValue>,
    reports: Vec<f64>,
    // Median of completed trials' reports per epoch; empty before startup.
    median_curve: Vec<Option<f64>>,
}

impl Trial {
    fn new(id: usize, seed: u64, median_curve: Vec<Option<f64>>) -> Self {
        Self {
            id,
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(id as u64)),
            params: BTreeMap::new(),
            reports: Vec::new(),
            median_curve,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Sample log-uniformly from [low, high].
    pub fn suggest_float_log(&mut self, name: &str, low: f64, high: f64) -> f64 {
        let value = self.rng.gen_range(low.ln()..=high.ln()).exp();
        self.params.insert(name.to_string(), ParamValue::Float(value));
        value
    }

    /// Sample uniformly from [low, high] inclusive.
    pub fn suggest_int(&mut self, name: &str, low: i64, high: i64) -> i64 {
        let value = self.rng.gen_range(low..=high);
        self.params.insert(name.to_string(), ParamValue::Int(value));
        value
    }

    /// Pick one of the given choices uniformly.
    pub fn suggest_choice<T: Clone + std::fmt::Display>(&mut self, name: &str, choices: &[T]) -> T {
        let index = self.rng.gen_range(0..choices.len());
        let value = choices[index].clone();
        self.params
            .insert(name.to_string(), ParamValue::Text(value.to_string()));
        value
    }

    /// Sample a boolean with even odds.
    pub fn suggest_bool(&mut self, name: &str) -> bool {
        let value = self.rng.gen_bool(0.5);
        self.params.insert(name.to_string(), ParamValue::Bool(value));
        value
    }

    /// Report the intermediate value for one finished epoch.
    pub fn report(&mut self, value: f64) {
        self.reports.push(value);
    }

    /// Whether the pruner vetoes continuing this trial.
    ///
    /// True when the last reported value is worse than the median of
    /// completed trials at the same epoch, after the warm-up epochs.
    pub fn should_prune(&self) -> bool {
        if self.median_curve.is_empty() || self.reports.len() <= N_WARMUP_EPOCHS {
            return false;
        }
        let epoch = self.reports.len() - 1;
        match self.median_curve.get(epoch) {
            Some(Some(median)) => self.reports[epoch] > *median,
            _ => false,
        }
    }

    /// Sampled parameters so far.
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }
}

/// Final outcome of a trial.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    /// Objective finished with this score
    Complete(f64),
    /// Pruned after the given epoch
    Pruned { epoch: usize },
}

/// Record of a finished trial.
#[derive(Debug, Clone)]
pub struct TrialRecord {
    pub id: usize,
    pub params: BTreeMap<String, ParamValue>,
    pub outcome: TrialOutcome,
}

impl TrialRecord {
    pub fn score(&self) -> Option<f64> {
        match self.outcome {
            TrialOutcome::Complete(score) => Some(score),
            TrialOutcome::Pruned { .. } => None,
        }
    }
}

/// A minimization study over a fixed number of trials.
#[derive(Debug)]
pub struct Study {
    seed: u64,
    trials: Vec<TrialRecord>,
    // Per-epoch report curves of completed trials, for the median pruner.
    completed_curves: Vec<Vec<f64>>,
}

impl Study {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            trials: Vec::new(),
            completed_curves: Vec::new(),
        }
    }

    /// Run the objective `n_trials` times, minimizing its return value.
    ///
    /// [`Error::TrialPruned`] from the objective records the trial as pruned
    /// and continues; any other error aborts the study.
    pub fn minimize<F>(&mut self, n_trials: usize, mut objective: F) -> Result<()>
    where
        F: FnMut(&mut Trial) -> Result<f64>,
    {
        for id in 0..n_trials {
            let mut trial = Trial::new(id, self.seed, self.median_curve());
            info!("trial {}/{} starting", id + 1, n_trials);

            match objective(&mut trial) {
                Ok(score) => {
                    info!("trial {} complete: score {:.4}", id, score);
                    self.completed_curves.push(trial.reports.clone());
                    self.trials.push(TrialRecord {
                        id,
                        params: trial.params,
                        outcome: TrialOutcome::Complete(score),
                    });
                }
                Err(Error::TrialPruned { epoch }) => {
                    info!("trial {} pruned after epoch {}", id, epoch);
                    self.trials.push(TrialRecord {
                        id,
                        params: trial.params,
                        outcome: TrialOutcome::Pruned { epoch },
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Median of completed trials' reports per epoch, or empty before the
    /// startup count is reached.
    fn median_curve(&self) -> Vec<Option<f64>> {
        if self.completed_curves.len() < N_STARTUP_TRIALS {
            return Vec::new();
        }

        let max_len = self
            .completed_curves
            .iter()
            .map(|c| c.len())
            .max()
            .unwrap_or(0);

        (0..max_len)
            .map(|epoch| {
                let mut values: Vec<f64> = self
                    .completed_curves
                    .iter()
                    .filter_map(|curve| curve.get(epoch).copied())
                    .collect();
                if values.is_empty() {
                    return None;
                }
                values.sort_by(|a, b| a.partial_cmp(b).expect("reports are finite"));
                Some(values[values.len() / 2])
            })
            .collect()
    }

    /// All finished trials.
    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    /// Completed trial with the lowest score.
    pub fn best_trial(&self) -> Option<&TrialRecord> {
        self.trials
            .iter()
            .filter(|t| t.score().is_some())
            .min_by(|a, b| {
                a.score()
                    .partial_cmp(&b.score())
                    .expect("scores are finite")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_log_stays_in_bounds() {
        let mut trial = Trial::new(0, 42, Vec::new());
        for i in 0..100 {
            let v = trial.suggest_float_log(&format!("lr{}", i), 1e-4, 2e-3);
            assert!((1e-4..=2e-3).contains(&v));
        }
    }

    #[test]
    fn test_int_and_choice_bounds() {
        let mut trial = Trial::new(0, 7, Vec::new());
        for i in 0..50 {
            let e = trial.suggest_int(&format!("e{}", i), 5, 15);
            assert!((5..=15).contains(&e));
            let b = trial.suggest_choice(&format!("b{}", i), &[64usize, 128]);
            assert!(b == 64 || b == 128);
        }
    }

    #[test]
    fn test_same_seed_gives_same_draws() {
        let mut a = Trial::new(3, 42, Vec::new());
        let mut b = Trial::new(3, 42, Vec::new());
        assert_eq!(
            a.suggest_float_log("lr", 1e-4, 2e-3),
            b.suggest_float_log("lr", 1e-4, 2e-3)
        );
        assert_eq!(a.suggest_bool("flag"), b.suggest_bool("flag"));
    }

    #[test]
    fn test_no_pruning_before_any_completed_trial() {
        let mut trial = Trial::new(0, 1, Vec::new());
        trial.report(10.0);
        trial.report(20.0);
        trial.report(30.0);
        assert!(!trial.should_prune());
    }

    #[test]
    fn test_pruner_vetoes_worse_than_median() {
        let median = vec![Some(1.0), Some(0.8), Some(0.6)];

        let mut worse = Trial::new(1, 1, median.clone());
        worse.report(0.9);
        assert!(!worse.should_prune(), "warm-up epoch is never pruned");
        worse.report(1.5);
        assert!(worse.should_prune());

        let mut better = Trial::new(2, 1, median);
        better.report(0.9);
        better.report(0.5);
        assert!(!better.should_prune());
    }

    #[test]
    fn test_study_records_pruned_trials_without_failing() {
        let mut study = Study::new(42);
        let result = study.minimize(3, |trial| {
            if trial.id() == 1 {
                return Err(Error::TrialPruned { epoch: 2 });
            }
            trial.report(trial.id() as f64);
            Ok(trial.id() as f64)
        });

        assert!(result.is_ok());
        assert_eq!(study.trials().len(), 3);
        assert_eq!(
            study.trials()[1].outcome,
            TrialOutcome::Pruned { epoch: 2 }
        );
        assert_eq!(study.best_trial().unwrap().id, 0);
    }

    #[test]
    fn test_study_aborts_on_real_errors() {
        let mut study = Study::new(42);
        let result = study.minimize(2, |_trial| {
            Err(Error::Training("backend exploded".to_string()))
        });
        assert!(matches!(result, Err(Error::Training(_))));
    }

    #[test]
    fn test_median_curve_after_completions() {
        let mut study = Study::new(42);
        study
            .minimize(3, |trial| {
                let base = (trial.id() + 1) as f64;
                trial.report(base);
                trial.report(base * 2.0);
                Ok(base)
            })
            .unwrap();

        let curve = study.median_curve();
        assert_eq!(curve, vec![Some(2.0), Some(4.0)]);
    }
}
