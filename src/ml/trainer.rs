// ============================================================
// Layer 5: Training Loop
// ============================================================
// Epoch-level control of a run, as a small state machine:
//
//   Training ──► Validating ──┬──► Training      (next epoch)
//                             ├──► EarlyStopped  (no improvement
//                             │                   for `earlystop`
//                             │                   epochs)
//                             └──► Done          (maxepoch reached)
//
// After every validation:
//   - strictly lower perplexity → reset the trial counter and
//     save the model + log
//   - otherwise                 → one more failed trial
//   - early stopping is checked before maxepoch
//
// Key Burn insight:
//   - Training uses Autodiff<NdArray> or Autodiff<Wgpu>
//   - model.valid() drops the autodiff wrapper for validation
//     and for what gets written to disk
//   - The optimizer consumes the model each step and returns the
//     updated one, so recurrent state lives outside the model
//
// Reference: Burn Book §5, Sutskever (2013) SGD with momentum

use anyhow::Result;
use burn::{
    backend::{
        ndarray::{NdArray, NdArrayDevice},
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    },
    optim::{momentum::MomentumConfig, AdamConfig, SgdConfig},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::{
    experiment::{EpochMetrics, ExperimentLog},
    hyperparams::OptimizerKind,
    schedule::LrSchedule,
    traits::{CorpusProvider, EpochRunner},
};
use crate::infra::{checkpoint::ExperimentStore, metrics::MetricsLogger};
use crate::ml::{
    model::{RnnLm, RnnLmConfig},
    session::LmSession,
    DeviceChoice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Training,
    Validating,
    EarlyStopped,
    Done,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerOutcome {
    pub final_state:    TrainerState,
    pub epochs_run:     usize,
    pub best_epoch:     Option<usize>,
    pub best_valid_ppl: Option<f64>,
    /// Number of times the best model was written
    pub checkpoints:    usize,
}

pub struct Trainer {
    schedule:   LrSchedule,
    max_epoch:  usize,
    early_stop: usize,
    state:      TrainerState,
    metrics:    Option<MetricsLogger>,
}

impl Trainer {
    pub fn new(cfg: &TrainConfig) -> Self {
        Self {
            schedule:   cfg.lr_schedule(),
            max_epoch:  cfg.max_epoch,
            early_stop: cfg.early_stop,
            state:      TrainerState::Training,
            metrics:    None,
        }
    }

    /// Also append every epoch to a metrics CSV.
    pub fn with_metrics(mut self, metrics: MetricsLogger) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Run epochs until early stopping or `max_epoch`. Any error from
    /// the runner aborts the run; nothing is saved for that epoch.
    pub fn run<R: EpochRunner>(
        &mut self,
        runner: &mut R,
        log:    &mut ExperimentLog,
    ) -> Result<TrainerOutcome> {
        let mut lr          = self.schedule.initial();
        let mut trials      = 0usize;
        let mut checkpoints = 0usize;
        let mut epoch       = 0usize;

        loop {
            epoch += 1;

            // ── Training phase ────────────────────────────────────────────────
            self.state  = TrainerState::Training;
            let summary = runner.train_epoch(epoch, lr)?;

            // ── Validation phase ──────────────────────────────────────────────
            self.state    = TrainerState::Validating;
            let valid_ppl = runner.validate()?;

            let metrics = EpochMetrics {
                epoch,
                learning_rate:  lr,
                train_ppl:      summary.perplexity,
                valid_ppl,
                mean_grad_norm: summary.mean_grad_norm,
            };
            let improved = log.record(metrics.clone());

            if improved {
                trials = 0;
                runner.save_best(log)?;
                checkpoints += 1;
            } else {
                trials += 1;
            }

            if let Some(csv) = &self.metrics {
                csv.log(&metrics, improved)?;
            }

            tracing::info!(
                "Epoch {:>4}/{} | lr={:.6} | train_ppl={:.3} | valid_ppl={:.3}{}{}",
                epoch,
                self.max_epoch,
                lr,
                summary.perplexity,
                valid_ppl,
                summary
                    .mean_grad_norm
                    .map(|n| format!(" | grad_norm={n:.3}"))
                    .unwrap_or_default(),
                if improved { " *" } else { "" },
            );

            if trials >= self.early_stop {
                tracing::info!("No improvement for {} epochs, stopping early", trials);
                self.state = TrainerState::EarlyStopped;
                break;
            }
            if epoch >= self.max_epoch {
                self.state = TrainerState::Done;
                break;
            }

            lr = self.schedule.next(lr, epoch + 1);
        }

        Ok(TrainerOutcome {
            final_state:    self.state,
            epochs_run:     epoch,
            best_epoch:     log.best_epoch,
            best_valid_ppl: log.best_valid_ppl,
            checkpoints,
        })
    }
}

/// Build model and optimizer on the configured device and train.
pub fn run_training(
    cfg:     &TrainConfig,
    corpus:  &impl CorpusProvider,
    log:     ExperimentLog,
    store:   ExperimentStore,
    metrics: MetricsLogger,
) -> Result<TrainerOutcome> {
    match DeviceChoice::from_flags(cfg.cuda, cfg.device) {
        DeviceChoice::Cpu => {
            tracing::info!("Using NdArray CPU backend");
            train_on::<Autodiff<NdArray>>(cfg, corpus, log, store, metrics, NdArrayDevice::Cpu)
        }
        DeviceChoice::Gpu { index } => {
            let device = WgpuDevice::DiscreteGpu(index);
            tracing::info!("Using WGPU device: {:?}", device);
            train_on::<Autodiff<Wgpu>>(cfg, corpus, log, store, metrics, device)
        }
    }
}

fn train_on<B: AutodiffBackend>(
    cfg:     &TrainConfig,
    corpus:  &impl CorpusProvider,
    mut log: ExperimentLog,
    store:   ExperimentStore,
    metrics: MetricsLogger,
    device:  B::Device,
) -> Result<TrainerOutcome> {
    B::seed(cfg.seed);

    // ── Build model ───────────────────────────────────────────────────────────
    let model: RnnLm<B> = RnnLmConfig::from_train_config(cfg, corpus.vocab_size()).init(&device);
    tracing::info!(
        "Model ready: {} cell, {} layer(s) {:?}, input size {}, vocab {}",
        cfg.cell,
        model.num_layers(),
        cfg.hidden_sizes,
        cfg.input_size,
        corpus.vocab_size()
    );
    tracing::info!("Optimizer: {} | state policy: {}", cfg.optimizer, cfg.remember);

    let mut trainer = Trainer::new(cfg).with_metrics(metrics);

    // ── Optimizer ─────────────────────────────────────────────────────────────
    match cfg.optimizer {
        OptimizerKind::Sgd { momentum } => {
            // v = μ·v + g ;  θ = θ − lr·v
            let momentum = (momentum > 0.0).then_some(MomentumConfig {
                momentum,
                dampening: 0.0,
                nesterov:  false,
            });
            let optim = SgdConfig::new().with_momentum(momentum).init::<B, RnnLm<B>>();
            let mut session = LmSession::new(cfg, corpus, model, optim, store, device)?;
            trainer.run(&mut session, &mut log)
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new().init::<B, RnnLm<B>>();
            let mut session = LmSession::new(cfg, corpus, model, optim, store, device)?;
            trainer.run(&mut session, &mut log)
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{traits::TrainSummary, vocabulary::Vocabulary};
    use std::collections::BTreeMap;

    /// Replays a fixed list of validation perplexities.
    #[derive(Default)]
    struct ScriptedRunner {
        valid:          Vec<f64>,
        fail_at:        Option<usize>,
        learning_rates: Vec<f64>,
        saved_epochs:   Vec<usize>,
        epoch:          usize,
    }

    impl ScriptedRunner {
        fn new(valid: &[f64]) -> Self {
            Self { valid: valid.to_vec(), ..Self::default() }
        }
    }

    impl EpochRunner for ScriptedRunner {
        fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<TrainSummary> {
            self.epoch = epoch;
            self.learning_rates.push(lr);
            Ok(TrainSummary { perplexity: 100.0, tokens: 10, mean_grad_norm: None })
        }

        fn validate(&mut self) -> Result<f64> {
            if self.fail_at == Some(self.epoch) {
                anyhow::bail!("validation failed");
            }
            Ok(self.valid.get(self.epoch - 1).copied().unwrap_or(1000.0))
        }

        fn save_best(&mut self, log: &ExperimentLog) -> Result<()> {
            assert_eq!(log.best_epoch, Some(self.epoch));
            self.saved_epochs.push(self.epoch);
            Ok(())
        }
    }

    fn cfg(max_epoch: usize, early_stop: usize) -> TrainConfig {
        TrainConfig { max_epoch, early_stop, ..TrainConfig::default() }
    }

    fn run(cfg: &TrainConfig, runner: &mut ScriptedRunner) -> Result<TrainerOutcome> {
        let mut log = ExperimentLog::new(cfg.clone(), Vocabulary::default());
        Trainer::new(cfg).run(runner, &mut log)
    }

    #[test]
    fn test_two_epochs_patience_one() {
        let mut runner = ScriptedRunner::new(&[50.0, 60.0]);
        let outcome    = run(&cfg(2, 1), &mut runner).unwrap();

        assert_eq!(outcome.final_state, TrainerState::EarlyStopped);
        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.best_epoch, Some(1));
        assert_eq!(outcome.best_valid_ppl, Some(50.0));
        assert_eq!(outcome.checkpoints, 1);
        assert_eq!(runner.saved_epochs, vec![1]);
    }

    #[test]
    fn test_checkpoint_only_on_strict_improvement() {
        let mut runner = ScriptedRunner::new(&[10.0, 10.0, 9.0, 12.0, 8.0]);
        let outcome    = run(&cfg(5, 10), &mut runner).unwrap();

        assert_eq!(runner.saved_epochs, vec![1, 3, 5]);
        assert_eq!(outcome.checkpoints, 3);
        assert_eq!(outcome.best_valid_ppl, Some(8.0));
    }

    #[test]
    fn test_early_stop_exactly_at_patience() {
        let mut runner = ScriptedRunner::new(&[10.0, 11.0, 12.0, 13.0, 5.0]);
        let outcome    = run(&cfg(100, 3), &mut runner).unwrap();

        assert_eq!(outcome.final_state, TrainerState::EarlyStopped);
        assert_eq!(outcome.epochs_run, 4);
        assert_eq!(outcome.best_epoch, Some(1));
    }

    #[test]
    fn test_improvement_resets_patience() {
        let mut runner = ScriptedRunner::new(&[10.0, 11.0, 9.0, 12.0, 13.0]);
        let outcome    = run(&cfg(100, 2), &mut runner).unwrap();
        assert_eq!(outcome.epochs_run, 5);
        assert_eq!(outcome.best_epoch, Some(3));
    }

    #[test]
    fn test_done_at_max_epoch() {
        let mut runner = ScriptedRunner::new(&[5.0, 4.0, 3.0]);
        let mut trainer_cfg = cfg(3, 2);
        trainer_cfg.id = "done".to_string();

        let mut log     = ExperimentLog::new(trainer_cfg.clone(), Vocabulary::default());
        let mut trainer = Trainer::new(&trainer_cfg);
        let outcome     = trainer.run(&mut runner, &mut log).unwrap();

        assert_eq!(trainer.state(), TrainerState::Done);
        assert_eq!(outcome.final_state, TrainerState::Done);
        assert_eq!(outcome.epochs_run, 3);
        assert_eq!(log.history.len(), 3);
    }

    #[test]
    fn test_learning_rate_never_below_minimum() {
        let config = TrainConfig {
            start_lr: 1.0,
            min_lr:   0.1,
            saturate: 3,
            schedule: BTreeMap::from([(6, 0.01)]),
            ..cfg(8, 100)
        };
        let mut runner = ScriptedRunner::new(&[8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
        run(&config, &mut runner).unwrap();

        assert_eq!(runner.learning_rates.len(), 8);
        let expected = [1.0, 0.7, 0.4, 0.1, 0.1, 0.1, 0.1, 0.1];
        for (got, want) in runner.learning_rates.iter().zip(expected) {
            assert!(*got >= 0.1);
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
    }

    #[test]
    fn test_explicit_first_epoch_rate() {
        let config = TrainConfig {
            schedule: BTreeMap::from([(1, 0.5), (3, 0.25)]),
            start_lr: 1.0,
            min_lr:   0.0,
            saturate: 1000,
            ..cfg(3, 10)
        };
        let mut runner = ScriptedRunner::new(&[3.0, 2.0, 1.0]);
        run(&config, &mut runner).unwrap();

        assert_eq!(runner.learning_rates[0], 0.5);
        assert!((runner.learning_rates[1] - (0.5 - 0.001)).abs() < 1e-12);
        assert_eq!(runner.learning_rates[2], 0.25);
    }

    #[test]
    fn test_runner_error_aborts_without_checkpoint() {
        let mut runner = ScriptedRunner { fail_at: Some(2), ..ScriptedRunner::new(&[10.0, 5.0]) };
        assert!(run(&cfg(5, 5), &mut runner).is_err());
        assert_eq!(runner.saved_epochs, vec![1]);
    }

    #[test]
    fn test_metrics_csv_gets_one_row_per_epoch() {
        let tmp     = tempfile::tempdir().unwrap();
        let metrics = MetricsLogger::new(tmp.path(), "csv").unwrap();
        let config  = cfg(3, 10);

        let mut runner = ScriptedRunner::new(&[3.0, 4.0, 2.0]);
        let mut log    = ExperimentLog::new(config.clone(), Vocabulary::default());
        Trainer::new(&config).with_metrics(metrics).run(&mut runner, &mut log).unwrap();

        let csv = std::fs::read_to_string(tmp.path().join("csv.csv")).unwrap();
        assert_eq!(csv.lines().count(), 4);
    }
}
