// ============================================================
// Layer 1: CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their flags. Flag names are single words (--startlr,
// --hiddensize, ...) so existing experiment scripts keep
// working.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, etc.)
//
// List-valued flags arrive as strings and are parsed in the
// TryFrom conversions below, which are the only way into the
// application layer.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::{evaluate_use_case::EvaluateConfig, train_use_case::TrainConfig};
use crate::domain::{
    hyperparams::{parse_hidden_sizes, CellKind, ConfigError, OptimizerKind, StatePolicy},
    schedule::parse_schedule,
};
use crate::infra::checkpoint::generate_experiment_id;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a recurrent language model on a word-level corpus
    Train(TrainArgs),

    /// Compute perplexity (and optionally sample text) with a saved experiment
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory containing train.txt, valid.txt and optionally test.txt
    #[arg(long = "data-dir", default_value = "data/ptb")]
    pub data_dir: String,

    // ── Optimization ─────────────────────────────────────────────────────────
    /// Learning rate at epoch 1
    #[arg(long, default_value_t = 0.05)]
    pub startlr: f64,

    /// Learning rate never goes below this
    #[arg(long, default_value_t = 0.00001)]
    pub minlr: f64,

    /// Epochs the linear decay takes to reach --minlr
    #[arg(long, default_value_t = 400)]
    pub saturate: usize,

    /// Explicit learning rates per epoch, e.g. "5=0.004,6=0.001"
    #[arg(long, default_value = "")]
    pub schedule: String,

    /// SGD momentum (0 = plain SGD)
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// Use Adam instead of SGD
    #[arg(long)]
    pub adam: bool,

    /// Max global gradient norm; <= 0 disables clipping
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    pub cutoff: f64,

    /// Rows per minibatch
    #[arg(long, default_value_t = 32)]
    pub batchsize: usize,

    /// Time steps back-propagated through per batch
    #[arg(long, default_value_t = 5)]
    pub seqlen: usize,

    // ── Device ───────────────────────────────────────────────────────────────
    /// Train on the GPU (wgpu backend)
    #[arg(long)]
    pub cuda: bool,

    /// 1-based GPU index used with --cuda
    #[arg(long, default_value_t = 1)]
    pub device: usize,

    // ── Stopping ─────────────────────────────────────────────────────────────
    /// Maximum number of epochs
    #[arg(long, default_value_t = 1000)]
    pub maxepoch: usize,

    /// Stop after this many epochs without a better validation perplexity
    #[arg(long, default_value_t = 50)]
    pub earlystop: usize,

    // ── Model ────────────────────────────────────────────────────────────────
    /// Use LSTM layers
    #[arg(long)]
    pub lstm: bool,

    /// Use GRU layers
    #[arg(long)]
    pub gru: bool,

    /// Use multi-function recurrent units
    #[arg(long)]
    pub mfru: bool,

    /// Carry state between batches: both, eval, train or neither
    /// (default: both for gated cells, eval for the plain RNN)
    #[arg(long)]
    pub remember: Option<String>,

    /// Embedding width; -1 = first hidden size
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub inputsize: i64,

    /// Hidden width of each layer, e.g. "200,200"
    #[arg(long, default_value = "200")]
    pub hiddensize: String,

    /// Dropout probability after the embedding and every layer
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    /// Initialize parameters uniformly in [-uniform, uniform]; <= 0 disables
    #[arg(long, default_value_t = 0.1, allow_hyphen_values = true)]
    pub uniform: f64,

    // ── Data budget ──────────────────────────────────────────────────────────
    /// Training tokens per epoch; -1 = whole split
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub trainsize: i64,

    /// Validation tokens per epoch; -1 = whole split
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub validsize: i64,

    // ── Output ───────────────────────────────────────────────────────────────
    /// Directory experiments are saved to
    #[arg(long, default_value = "experiments")]
    pub savepath: String,

    /// Experiment id (default: generated from time, pid and a random suffix)
    #[arg(long)]
    pub id: Option<String>,

    /// Random seed
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Log progress every 100 batches
    #[arg(long)]
    pub progress: bool,
}

/// -1 (or any negative value) means "no limit".
fn token_budget(name: &'static str, value: i64) -> Result<Option<usize>, ConfigError> {
    match value {
        v if v < 0 => Ok(None),
        0 => Err(ConfigError::out_of_range(name, "positive or -1", value)),
        v => Ok(Some(v as usize)),
    }
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2: the
/// application layer never sees clap types or unvalidated values.
impl TryFrom<TrainArgs> for TrainConfig {
    type Error = ConfigError;

    fn try_from(a: TrainArgs) -> Result<Self, Self::Error> {
        let cell         = CellKind::from_flags(a.lstm, a.gru, a.mfru)?;
        let hidden_sizes = parse_hidden_sizes(&a.hiddensize)?;

        let remember = match a.remember.as_deref() {
            Some(raw) => raw.parse::<StatePolicy>()?,
            None      => StatePolicy::default_for(cell),
        };

        let input_size = match a.inputsize {
            n if n < 0 => hidden_sizes
                .first()
                .copied()
                .ok_or_else(|| ConfigError::InvalidHiddenSizes(a.hiddensize.clone()))?,
            0 => return Err(ConfigError::out_of_range("inputsize", "positive or -1", 0)),
            n => n as usize,
        };

        let optimizer = if a.adam {
            OptimizerKind::Adam
        } else {
            OptimizerKind::Sgd { momentum: a.momentum }
        };

        let config = TrainConfig {
            data_dir:   a.data_dir,
            save_path:  a.savepath,
            id:         a.id.unwrap_or_else(generate_experiment_id),
            start_lr:   a.startlr,
            min_lr:     a.minlr,
            saturate:   a.saturate,
            schedule:   parse_schedule(&a.schedule)?,
            optimizer,
            cutoff:     a.cutoff,
            batch_size: a.batchsize,
            seq_len:    a.seqlen,
            cuda:       a.cuda,
            device:     a.device,
            max_epoch:  a.maxepoch,
            early_stop: a.earlystop,
            cell,
            remember,
            input_size,
            hidden_sizes,
            dropout:    a.dropout,
            uniform:    a.uniform,
            train_size: token_budget("trainsize", a.trainsize)?,
            valid_size: token_budget("validsize", a.validsize)?,
            seed:       a.seed,
            progress:   a.progress,
        };
        config.validate()?;
        Ok(config)
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Id of the experiment to load
    #[arg(long)]
    pub id: String,

    /// Directory experiments were saved to
    #[arg(long, default_value = "experiments")]
    pub savepath: String,

    /// Corpus directory (default: the one used for training)
    #[arg(long = "data-dir")]
    pub data_dir: Option<String>,

    /// Split to score: train, valid or test
    #[arg(long, default_value = "test")]
    pub split: String,

    /// Rows per minibatch (default: training value)
    #[arg(long)]
    pub batchsize: Option<usize>,

    /// Window length (default: training value)
    #[arg(long)]
    pub seqlen: Option<usize>,

    /// Evaluate on the GPU (wgpu backend)
    #[arg(long)]
    pub cuda: bool,

    /// 1-based GPU index used with --cuda
    #[arg(long, default_value_t = 1)]
    pub device: usize,

    /// Number of words to sample after scoring
    #[arg(long, default_value_t = 0)]
    pub nsample: usize,

    /// Sampling temperature; lower is more conservative
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,

    /// Random seed for sampling
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

impl TryFrom<EvaluateArgs> for EvaluateConfig {
    type Error = anyhow::Error;

    fn try_from(a: EvaluateArgs) -> Result<Self, Self::Error> {
        let config = EvaluateConfig {
            save_path:   a.savepath,
            id:          a.id,
            data_dir:    a.data_dir,
            split:       a.split.parse()?,
            batch_size:  a.batchsize,
            seq_len:     a.seqlen,
            cuda:        a.cuda,
            device:      a.device,
            n_sample:    a.nsample,
            temperature: a.temperature,
            seed:        a.seed,
        };
        config.validate()?;
        Ok(config)
    }
}
