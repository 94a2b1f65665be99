// ============================================================
// Layer 3: Core Traits (Abstractions)
// ============================================================
// The seams between the training loop and what it drives:
//
//   CorpusProvider - anything that hands out tokenised splits
//                    and the vocabulary they were encoded with
//                    (TextCorpus reads a directory of .txt files)
//
//   EpochRunner    - one epoch of work: a training pass, a
//                    validation pass, and persisting a new best.
//                    The burn-backed LmSession implements it;
//                    the Trainer state machine only sees the trait.

use std::{fmt, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::experiment::ExperimentLog;
use crate::domain::vocabulary::Vocabulary;

// ─── Split ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Train => "train",
            Self::Valid => "valid",
            Self::Test  => "test",
        })
    }
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "valid" => Ok(Self::Valid),
            "test"  => Ok(Self::Test),
            other   => anyhow::bail!("unknown split '{other}': expected train, valid or test"),
        }
    }
}

// ─── CorpusProvider ───────────────────────────────────────────────────────────
/// A tokenised corpus with a fixed vocabulary.
pub trait CorpusProvider {
    fn vocabulary(&self) -> &Vocabulary;

    /// Token ids of one split, in corpus order.
    /// Errors if the split is not available.
    fn tokens(&self, split: Split) -> Result<&[u32]>;

    fn vocab_size(&self) -> usize {
        self.vocabulary().len()
    }
}

// ─── EpochRunner ──────────────────────────────────────────────────────────────
/// What a training pass reports back to the trainer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSummary {
    pub perplexity:     f64,
    pub tokens:         usize,
    /// Moving average of pre-clip gradient norms, if clipping is on
    pub mean_grad_norm: Option<f64>,
}

pub trait EpochRunner {
    /// Run the training pass of `epoch` with learning rate `lr`.
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<TrainSummary>;

    /// Forward-only pass over the validation split; returns perplexity.
    fn validate(&mut self) -> Result<f64>;

    /// Persist the current model together with `log`.
    fn save_best(&mut self, log: &ExperimentLog) -> Result<()>;
}
