// ============================================================
// Layer 3: Hyperparameter Types
// ============================================================
// Typed replacements for the loosely-formatted flags a training
// run is configured with:
//
//   CellKind      - which recurrent cell every layer uses
//   StatePolicy   - when hidden state flows from batch to batch
//   OptimizerKind - SGD with momentum, or Adam
//   ConfigError   - everything that can go wrong while parsing
//
// List-valued flags are parsed here so a malformed value is
// rejected before any data is loaded.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while turning command-line values into a config.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at most one of --lstm, --gru and --mfru may be set")]
    ConflictingCells,

    #[error("invalid hidden size list '{0}': expected comma separated positive integers")]
    InvalidHiddenSizes(String),

    #[error("invalid schedule entry '{0}': expected <epoch>=<learning rate>")]
    InvalidSchedule(String),

    #[error("unknown state policy '{0}': expected both, eval, train or neither")]
    InvalidStatePolicy(String),

    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        name:     &'static str,
        expected: &'static str,
        value:    String,
    },
}

impl ConfigError {
    pub fn out_of_range(name: &'static str, expected: &'static str, value: impl fmt::Display) -> Self {
        Self::OutOfRange { name, expected, value: value.to_string() }
    }
}

// ─── CellKind ─────────────────────────────────────────────────────────────────
/// The recurrent cell used by every layer of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    /// Sigmoid RNN: h = σ(W_x·x + W_h·h)
    Simple,
    Lstm,
    Gru,
    /// Multi-function recurrent unit
    MuFuRu,
}

impl CellKind {
    /// Resolve the three mutually exclusive command-line switches.
    pub fn from_flags(lstm: bool, gru: bool, mfru: bool) -> Result<Self, ConfigError> {
        match (lstm, gru, mfru) {
            (false, false, false) => Ok(Self::Simple),
            (true, false, false)  => Ok(Self::Lstm),
            (false, true, false)  => Ok(Self::Gru),
            (false, false, true)  => Ok(Self::MuFuRu),
            _ => Err(ConfigError::ConflictingCells),
        }
    }

    pub fn is_gated(self) -> bool {
        !matches!(self, Self::Simple)
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "rnn",
            Self::Lstm   => "lstm",
            Self::Gru    => "gru",
            Self::MuFuRu => "mufuru",
        };
        f.write_str(name)
    }
}

// ─── StatePolicy ──────────────────────────────────────────────────────────────
/// Which phases carry recurrent state from one batch to the next.
///
/// In a phase that does not carry state, every batch starts from zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatePolicy {
    Both,
    Eval,
    Train,
    Neither,
}

impl StatePolicy {
    /// Gated cells carry their memory in both phases, the plain cell
    /// only while evaluating.
    pub fn default_for(cell: CellKind) -> Self {
        if cell.is_gated() { Self::Both } else { Self::Eval }
    }

    pub fn carries_in_training(self) -> bool {
        matches!(self, Self::Both | Self::Train)
    }

    pub fn carries_in_evaluation(self) -> bool {
        matches!(self, Self::Both | Self::Eval)
    }
}

impl fmt::Display for StatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Both    => "both",
            Self::Eval    => "eval",
            Self::Train   => "train",
            Self::Neither => "neither",
        })
    }
}

impl FromStr for StatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both"    => Ok(Self::Both),
            "eval"    => Ok(Self::Eval),
            "train"   => Ok(Self::Train),
            "neither" => Ok(Self::Neither),
            other     => Err(ConfigError::InvalidStatePolicy(other.to_string())),
        }
    }
}

// ─── OptimizerKind ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Plain SGD when momentum is 0
    Sgd { momentum: f64 },
    Adam,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sgd { momentum } => write!(f, "sgd(momentum={momentum})"),
            Self::Adam             => f.write_str("adam"),
        }
    }
}

// ─── List parsing ─────────────────────────────────────────────────────────────
/// Strip one pair of surrounding braces, so both `200,200` and
/// `{200,200}` are accepted.
pub(crate) fn strip_braces(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
}

/// Parse the `--hiddensize` list, e.g. `"200,200"` for two layers.
pub fn parse_hidden_sizes(raw: &str) -> Result<Vec<usize>, ConfigError> {
    let invalid = || ConfigError::InvalidHiddenSizes(raw.to_string());

    let sizes = strip_braces(raw)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok().filter(|&n| n > 0).ok_or_else(invalid))
        .collect::<Result<Vec<_>, _>>()?;

    if sizes.is_empty() {
        return Err(invalid());
    }
    Ok(sizes)
}
