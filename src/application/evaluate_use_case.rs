// ============================================================
// Layer 2: EvaluateUseCase
// ============================================================
// Scores a saved experiment on one split of a corpus:
//
//   Step 1: Open the experiment store                  (Layer 6)
//   Step 2: Load log + model, re-encode the corpus with
//           the saved vocabulary, compute perplexity   (Layer 5)
//   Step 3: Optionally sample text from the model      (Layer 5)
//
// Batch size and window length default to the ones the
// experiment was trained with.

use anyhow::Result;

use crate::domain::{hyperparams::ConfigError, traits::Split};
use crate::infra::checkpoint::ExperimentStore;
use crate::ml::evaluator::run_evaluation;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateConfig {
    pub save_path:   String,
    pub id:          String,
    /// Corpus directory; `None` = the one recorded in the experiment
    pub data_dir:    Option<String>,
    pub split:       Split,
    pub batch_size:  Option<usize>,
    pub seq_len:     Option<usize>,
    pub cuda:        bool,
    pub device:      usize,
    /// Words to sample after scoring; 0 disables sampling
    pub n_sample:    usize,
    pub temperature: f64,
    pub seed:        u64,
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            save_path:   "experiments".to_string(),
            id:          "rnnlm".to_string(),
            data_dir:    None,
            split:       Split::Test,
            batch_size:  None,
            seq_len:     None,
            cuda:        false,
            device:      1,
            n_sample:    0,
            temperature: 1.0,
            seed:        1,
        }
    }
}

impl EvaluateConfig {
    /// Same range checks `train` applies to the flags both commands share.
    pub fn validate(&self) -> Result<(), ConfigError> {
        type E = ConfigError;

        if self.batch_size == Some(0) {
            return Err(E::out_of_range("batchsize", "at least 1", 0));
        }
        if self.seq_len == Some(0) {
            return Err(E::out_of_range("seqlen", "at least 1", 0));
        }
        if self.cuda && self.device == 0 {
            return Err(E::out_of_range("device", "a 1-based GPU index", self.device));
        }
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(E::out_of_range("temperature", "positive", self.temperature));
        }
        Ok(())
    }
}

/// What `rnnlm evaluate` prints.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateReport {
    pub id:             String,
    pub split:          Split,
    pub perplexity:     f64,
    pub tokens:         usize,
    pub best_epoch:     Option<usize>,
    pub best_valid_ppl: Option<f64>,
    pub sample:         Option<String>,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvaluateReport> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Store ────────────────────────────────────────────────────
        let store = ExperimentStore::new(&cfg.save_path)?;
        anyhow::ensure!(
            store.exists(&cfg.id),
            "No experiment '{}' in '{}'. Have you run 'train' first?",
            cfg.id,
            cfg.save_path
        );

        // ── Step 2 + 3: Score and sample ─────────────────────────────────────
        tracing::info!("Evaluating experiment '{}' on the {} split", cfg.id, cfg.split);
        run_evaluation(cfg, &store)
    }
}
