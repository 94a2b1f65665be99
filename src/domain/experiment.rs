// ============================================================
// Layer 3: Experiment Log
// ============================================================
// The record of one training run:
//
//   - the full hyperparameter set the run was started with
//   - the vocabulary (so a saved model can be decoded)
//   - the criterion the model was trained against
//   - one EpochMetrics entry per finished epoch
//   - the best validation perplexity and the epoch it was seen
//
// The trainer is the only writer and only touches it at epoch
// boundaries. It is persisted next to the best model snapshot
// by infra::checkpoint.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::domain::vocabulary::Vocabulary;

/// Metrics recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Starts at 1
    pub epoch: usize,

    /// Rate the training pass of this epoch ran with
    pub learning_rate: f64,

    pub train_ppl: f64,

    pub valid_ppl: f64,

    /// Exponential moving average of pre-clip gradient norms.
    /// `None` when clipping is disabled.
    pub mean_grad_norm: Option<f64>,
}

impl EpochMetrics {
    /// True only for a strict improvement over `best`.
    pub fn is_improvement(&self, best: Option<f64>) -> bool {
        match best {
            Some(best) => self.valid_ppl < best,
            None       => !self.valid_ppl.is_nan(),
        }
    }
}

/// Description of the loss the model was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionSpec {
    pub name: String,
    /// Per-step losses are summed over the sequence
    pub sum_over_time: bool,
    /// ...and averaged over the batch
    pub average_over_batch: bool,
}

impl Default for CriterionSpec {
    fn default() -> Self {
        Self {
            name:               "sequence-nll".to_string(),
            sum_over_time:      true,
            average_over_batch: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub id:              String,
    pub hyperparameters: TrainConfig,
    pub vocabulary:      Vocabulary,
    pub criterion:       CriterionSpec,
    pub history:         Vec<EpochMetrics>,
    pub best_epoch:      Option<usize>,
    pub best_valid_ppl:  Option<f64>,
}

impl ExperimentLog {
    pub fn new(hyperparameters: TrainConfig, vocabulary: Vocabulary) -> Self {
        Self {
            id: hyperparameters.id.clone(),
            hyperparameters,
            vocabulary,
            criterion: CriterionSpec::default(),
            history: Vec::new(),
            best_epoch: None,
            best_valid_ppl: None,
        }
    }

    /// Append an epoch and return whether it set a new best.
    pub fn record(&mut self, metrics: EpochMetrics) -> bool {
        let improved = metrics.is_improvement(self.best_valid_ppl);
        if improved {
            self.best_epoch     = Some(metrics.epoch);
            self.best_valid_ppl = Some(metrics.valid_ppl);
        }
        self.history.push(metrics);
        improved
    }

    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialise experiment log")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut log: Self = serde_json::from_str(json)
            .context("Failed to parse experiment log")?;
        log.vocabulary = log.vocabulary.reindex();
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, valid_ppl: f64) -> EpochMetrics {
        EpochMetrics { epoch, learning_rate: 0.1, train_ppl: 100.0, valid_ppl, mean_grad_norm: None }
    }

    #[test]
    fn test_is_improvement_is_strict() {
        let m = metrics(2, 50.0);
        assert!(m.is_improvement(None));
        assert!(m.is_improvement(Some(60.0)));
        assert!(!m.is_improvement(Some(50.0)));
        assert!(!m.is_improvement(Some(40.0)));
    }

    #[test]
    fn test_nan_never_improves() {
        assert!(!metrics(1, f64::NAN).is_improvement(None));
    }

    #[test]
    fn test_record_tracks_best() {
        let mut log = ExperimentLog::new(TrainConfig::default(), Vocabulary::default());
        assert!(log.record(metrics(1, 80.0)));
        assert!(log.record(metrics(2, 70.0)));
        assert!(!log.record(metrics(3, 75.0)));

        assert_eq!(log.best_epoch, Some(2));
        assert_eq!(log.best_valid_ppl, Some(70.0));
        assert_eq!(log.history.iter().map(|m| m.valid_ppl).collect::<Vec<_>>(), vec![80.0, 70.0, 75.0]);
        assert_eq!(log.epochs_run(), 3);
    }

    #[test]
    fn test_json_round_trip_keeps_vocabulary_usable() {
        let vocab   = Vocabulary::build(["a b c"]);
        let mut log = ExperimentLog::new(TrainConfig::default(), vocab.clone());
        log.record(metrics(1, 12.5));

        let restored = ExperimentLog::from_json(&log.to_json().unwrap()).unwrap();
        assert_eq!(restored.vocabulary.id("c"), vocab.id("c"));
        assert_eq!(restored.history, log.history);
        assert_eq!(restored.hyperparameters, log.hyperparameters);
    }
}
