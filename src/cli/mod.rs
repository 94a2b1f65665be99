// ============================================================
// Layer 1: CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    - trains a language model on a text corpus
//   2. `evaluate` - reloads a saved experiment, reports
//                   perplexity and optionally samples text
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

use crate::application::{
    evaluate_use_case::{EvaluateConfig, EvaluateUseCase},
    train_use_case::{TrainConfig, TrainUseCase},
};

#[derive(Parser, Debug)]
#[command(
    name = "rnnlm",
    version,
    about = "Train and evaluate recurrent neural-network language models."
)]
pub struct Cli {
    /// Only log warnings and errors
    #[arg(long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default tracing filter for this invocation.
    pub fn log_directive(&self) -> &'static str {
        if self.silent { "rnnlm=warn" } else { "rnnlm=info" }
    }

    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    // Every config error is reported here, before any data is read.
    let config = TrainConfig::try_from(args)?;
    tracing::info!("Starting experiment '{}' on corpus '{}'", config.id, config.data_dir);

    let outcome = TrainUseCase::new(config.clone()).execute()?;

    println!("Training finished ({:?}) after {} epochs.", outcome.final_state, outcome.epochs_run);
    match (outcome.best_epoch, outcome.best_valid_ppl) {
        (Some(epoch), Some(ppl)) => println!(
            "Best validation perplexity {ppl:.3} at epoch {epoch}, saved to '{}/{}.mpk'.",
            config.save_path, config.id
        ),
        _ => println!("Validation perplexity never improved; nothing was saved."),
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let config = EvaluateConfig::try_from(args)?;
    let report = EvaluateUseCase::new(config).execute()?;

    println!(
        "Experiment '{}': {} perplexity {:.3} over {} tokens",
        report.id, report.split, report.perplexity, report.tokens
    );
    if let (Some(epoch), Some(ppl)) = (report.best_epoch, report.best_valid_ppl) {
        println!("Saved at epoch {epoch} with validation perplexity {ppl:.3}");
    }
    if let Some(sample) = report.sample {
        println!("\nSample:\n{sample}");
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        hyperparams::{CellKind, ConfigError, OptimizerKind, StatePolicy},
        traits::Split,
    };

    fn train_config(args: &[&str]) -> Result<TrainConfig, ConfigError> {
        let argv = ["rnnlm", "train"].iter().chain(args).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Train(a) => TrainConfig::try_from(a),
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = train_config(&["--id", "x"]).unwrap();
        assert_eq!(cfg.cell, CellKind::Simple);
        assert_eq!(cfg.remember, StatePolicy::Eval);
        assert_eq!(cfg.hidden_sizes, vec![200]);
        assert_eq!(cfg.input_size, 200);
        assert_eq!(cfg.optimizer, OptimizerKind::Sgd { momentum: 0.9 });
        assert_eq!(cfg.train_size, None);
        assert!(!cfg.clipping_enabled());
    }

    #[test]
    fn test_full_flag_set() {
        let cfg = train_config(&[
            "--lstm", "--hiddensize", "{650,650}", "--inputsize", "300",
            "--schedule", "{[5]=0.004,[6]=0.001}", "--adam", "--cutoff", "5",
            "--trainsize", "10000", "--validsize", "-1", "--remember", "train",
            "--id", "ptb-lstm",
        ])
        .unwrap();

        assert_eq!(cfg.cell, CellKind::Lstm);
        assert_eq!(cfg.remember, StatePolicy::Train);
        assert_eq!(cfg.hidden_sizes, vec![650, 650]);
        assert_eq!(cfg.input_size, 300);
        assert_eq!(cfg.schedule.get(&6), Some(&0.001));
        assert_eq!(cfg.optimizer, OptimizerKind::Adam);
        assert_eq!(cfg.train_size, Some(10000));
        assert_eq!(cfg.valid_size, None);
        assert_eq!(cfg.id, "ptb-lstm");
    }

    #[test]
    fn test_gated_cells_remember_by_default() {
        assert_eq!(train_config(&["--gru"]).unwrap().remember, StatePolicy::Both);
    }

    #[test]
    fn test_generated_id_when_missing() {
        assert!(!train_config(&[]).unwrap().id.is_empty());
    }

    #[test]
    fn test_config_errors() {
        assert_eq!(train_config(&["--lstm", "--gru"]), Err(ConfigError::ConflictingCells));
        assert!(matches!(
            train_config(&["--hiddensize", "200,x"]),
            Err(ConfigError::InvalidHiddenSizes(_))
        ));
        assert!(matches!(train_config(&["--schedule", "5"]), Err(ConfigError::InvalidSchedule(_))));
        assert!(matches!(
            train_config(&["--remember", "always"]),
            Err(ConfigError::InvalidStatePolicy(_))
        ));
        assert!(train_config(&["--dropout", "1.5"]).is_err());
        assert!(train_config(&["--trainsize", "0"]).is_err());
        assert!(train_config(&["--earlystop", "0"]).is_err());
    }

    #[test]
    fn test_evaluate_args() {
        let cli = Cli::try_parse_from(["rnnlm", "--silent", "evaluate", "--id", "run", "--split", "valid"])
            .unwrap();
        assert_eq!(cli.log_directive(), "rnnlm=warn");
        let Commands::Evaluate(args) = cli.command else { panic!("expected evaluate") };
        let cfg = EvaluateConfig::try_from(args).unwrap();
        assert_eq!(cfg.split, Split::Valid);
        assert_eq!(cfg.batch_size, None);
    }

    #[test]
    fn test_evaluate_rejects_what_train_rejects() {
        let evaluate = |args: &[&str]| {
            let argv = ["rnnlm", "evaluate", "--id", "run"].iter().chain(args).copied();
            match Cli::try_parse_from(argv).unwrap().command {
                Commands::Evaluate(a) => EvaluateConfig::try_from(a),
                other => panic!("parsed {other:?}"),
            }
        };
        assert!(evaluate(&["--seqlen", "0"]).is_err());
        assert!(evaluate(&["--batchsize", "0"]).is_err());
        assert!(evaluate(&["--cuda", "--device", "0"]).is_err());
        assert!(train_config(&["--cuda", "--device", "0"]).is_err());
        assert!(evaluate(&["--cuda", "--device", "2"]).is_ok());
    }
}
