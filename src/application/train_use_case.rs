// ============================================================
// Layer 2: TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Load the corpus and build the vocabulary  (Layer 4 - data)
//   Step 2: Open the experiment store + metrics CSV   (Layer 6 - infra)
//   Step 3: Start an empty experiment log             (Layer 3 - domain)
//   Step 4: Build model, optimizer, run the trainer   (Layer 5 - ml)
//
// TrainConfig is the validated, immutable hyperparameter set.
// It is serialisable because it is stored inside every saved
// experiment and used to rebuild the model for evaluation.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::corpus::TextCorpus;
use crate::domain::{
    experiment::ExperimentLog,
    hyperparams::{CellKind, ConfigError, OptimizerKind, StatePolicy},
    schedule::LrSchedule,
    traits::CorpusProvider,
};
use crate::infra::{checkpoint::ExperimentStore, metrics::MetricsLogger};
use crate::ml::trainer::{run_training, TrainerOutcome};

// ─── Training Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Directory holding train.txt / valid.txt / test.txt
    pub data_dir:  String,
    /// Directory the experiment file and metrics CSV are written to
    pub save_path: String,
    /// Experiment identifier, names the output files
    pub id:        String,

    pub start_lr:  f64,
    pub min_lr:    f64,
    /// Epochs the linear decay takes to go from start_lr to min_lr
    pub saturate:  usize,
    /// Explicit epoch → learning rate overrides
    pub schedule:  BTreeMap<usize, f64>,
    pub optimizer: OptimizerKind,
    /// Max global L2 norm of all gradients; <= 0 disables clipping
    pub cutoff:    f64,

    pub batch_size: usize,
    /// Time steps to back-propagate through
    pub seq_len:    usize,

    pub cuda:   bool,
    /// 1-based GPU index, only used with `cuda`
    pub device: usize,

    pub max_epoch:  usize,
    /// Epochs without improvement before stopping
    pub early_stop: usize,

    pub cell:         CellKind,
    pub remember:     StatePolicy,
    pub input_size:   usize,
    pub hidden_sizes: Vec<usize>,
    pub dropout:      f64,
    /// Uniform init magnitude; <= 0 keeps each layer's own initializer
    pub uniform:      f64,

    /// Target tokens per training epoch; `None` = whole split
    pub train_size: Option<usize>,
    /// Target tokens per validation pass; `None` = whole split
    pub valid_size: Option<usize>,

    pub seed:     u64,
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:     "data/ptb".to_string(),
            save_path:    "experiments".to_string(),
            id:           "rnnlm".to_string(),
            start_lr:     0.05,
            min_lr:       0.00001,
            saturate:     400,
            schedule:     BTreeMap::new(),
            optimizer:    OptimizerKind::Sgd { momentum: 0.9 },
            cutoff:       -1.0,
            batch_size:   32,
            seq_len:      5,
            cuda:         false,
            device:       1,
            max_epoch:    1000,
            early_stop:   50,
            cell:         CellKind::Simple,
            remember:     StatePolicy::Eval,
            input_size:   200,
            hidden_sizes: vec![200],
            dropout:      0.0,
            uniform:      0.1,
            train_size:   None,
            valid_size:   None,
            seed:         1,
            progress:     false,
        }
    }
}

impl TrainConfig {
    /// Reject values the training loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError as E;

        if !(self.start_lr > 0.0 && self.start_lr.is_finite()) {
            return Err(E::out_of_range("startlr", "a positive number", self.start_lr));
        }
        if !(self.min_lr >= 0.0 && self.min_lr <= self.start_lr) {
            return Err(E::out_of_range("minlr", "between 0 and startlr", self.min_lr));
        }
        if self.saturate == 0 {
            return Err(E::out_of_range("saturate", "at least 1", self.saturate));
        }
        if let OptimizerKind::Sgd { momentum } = self.optimizer {
            if !(0.0..1.0).contains(&momentum) {
                return Err(E::out_of_range("momentum", "in [0, 1)", momentum));
            }
        }
        if self.batch_size == 0 {
            return Err(E::out_of_range("batchsize", "at least 1", self.batch_size));
        }
        if self.seq_len == 0 {
            return Err(E::out_of_range("seqlen", "at least 1", self.seq_len));
        }
        if self.cuda && self.device == 0 {
            return Err(E::out_of_range("device", "a 1-based GPU index", self.device));
        }
        if self.max_epoch == 0 {
            return Err(E::out_of_range("maxepoch", "at least 1", self.max_epoch));
        }
        if self.early_stop == 0 {
            return Err(E::out_of_range("earlystop", "at least 1", self.early_stop));
        }
        if self.input_size == 0 {
            return Err(E::out_of_range("inputsize", "at least 1", self.input_size));
        }
        if self.hidden_sizes.is_empty() || self.hidden_sizes.contains(&0) {
            return Err(E::InvalidHiddenSizes(format!("{:?}", self.hidden_sizes)));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(E::out_of_range("dropout", "in [0, 1)", self.dropout));
        }
        if self.id.trim().is_empty() {
            return Err(E::out_of_range("id", "a non-empty string", "''"));
        }
        Ok(())
    }

    pub fn lr_schedule(&self) -> LrSchedule {
        LrSchedule::new(self.start_lr, self.min_lr, self.saturate, self.schedule.clone())
    }

    pub fn clipping_enabled(&self) -> bool {
        self.cutoff > 0.0
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainerOutcome> {
        let cfg = &self.config;

        // ── Step 1: Corpus ───────────────────────────────────────────────────
        tracing::info!("Loading corpus from '{}'", cfg.data_dir);
        let corpus = TextCorpus::load(&cfg.data_dir)?;
        tracing::info!("Vocabulary size: {}", corpus.vocab_size());

        // ── Step 2: Persistence ──────────────────────────────────────────────
        let store   = ExperimentStore::new(&cfg.save_path)?;
        let metrics = MetricsLogger::new(&cfg.save_path, &cfg.id)?;
        tracing::info!(
            "Experiment '{}' will be saved to '{}'",
            cfg.id,
            store.path_for(&cfg.id).display()
        );

        // ── Step 3: Experiment log ───────────────────────────────────────────
        let log = ExperimentLog::new(cfg.clone(), corpus.vocabulary().clone());

        // ── Step 4: Train ────────────────────────────────────────────────────
        run_training(cfg, &corpus, log, store, metrics)
    }
}
