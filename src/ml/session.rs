// ============================================================
// Layer 5: Training Session
// ============================================================
// Everything one run needs on a concrete backend: the model,
// its optimizer, the ordered training stream and the validation
// tokens. Implements EpochRunner, so the Trainer state machine
// drives it without knowing about tensors.
//
// One training epoch:
//   for each window of the training stream
//     forward from the carried state (or zeros)
//     loss = Σ_t NLL / batch_size
//     backward → clip global norm → optimizer step
//     detach the new state (truncated BPTT)
//
// Validation runs on model.valid(), i.e. the inner backend
// with no autodiff graph and dropout disabled.

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::batcher::SequenceBatcher;
use crate::domain::{
    experiment::ExperimentLog,
    traits::{CorpusProvider, EpochRunner, Split, TrainSummary},
};
use crate::infra::checkpoint::ExperimentStore;
use crate::ml::{
    clipping::{clip_global_norm, NormTracker},
    criterion::{PerplexityMeter, SequenceNllLoss},
    evaluator::{evaluate_perplexity, EvalOptions},
    model::RnnLm,
};

/// Batches between two progress lines
const PROGRESS_EVERY: usize = 100;

pub struct LmSession<B: AutodiffBackend, O> {
    model:        RnnLm<B>,
    optim:        O,
    cfg:          TrainConfig,
    train:        SequenceBatcher,
    valid_tokens: Vec<u32>,
    criterion:    SequenceNllLoss,
    norms:        NormTracker,
    store:        ExperimentStore,
    device:       B::Device,
}

impl<B, O> LmSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<RnnLm<B>, B>,
{
    pub fn new(
        cfg:    &TrainConfig,
        corpus: &impl CorpusProvider,
        model:  RnnLm<B>,
        optim:  O,
        store:  ExperimentStore,
        device: B::Device,
    ) -> Result<Self> {
        let train        = SequenceBatcher::new(corpus.tokens(Split::Train)?, cfg.batch_size)?;
        let valid_tokens = corpus.tokens(Split::Valid)?.to_vec();
        // fail now rather than after the first training epoch
        SequenceBatcher::new(&valid_tokens, cfg.batch_size)?;

        tracing::info!(
            "Training stream: {} target tokens per pass, {} validation tokens",
            train.tokens_per_pass(),
            valid_tokens.len()
        );

        Ok(Self {
            model,
            optim,
            cfg: cfg.clone(),
            train,
            valid_tokens,
            criterion: SequenceNllLoss::new(),
            norms: NormTracker::new(),
            store,
            device,
        })
    }

    /// Window length for the next batch given what the epoch has used.
    fn next_steps(&self, seen: usize) -> Option<usize> {
        match self.cfg.train_size {
            Some(budget) if seen >= budget => None,
            Some(budget) => Some(self.cfg.seq_len.min((budget - seen).div_ceil(self.cfg.batch_size))),
            None => Some(self.cfg.seq_len),
        }
    }
}

impl<B, O> EpochRunner for LmSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<RnnLm<B>, B>,
{
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<TrainSummary> {
        let carry     = self.cfg.remember.carries_in_training();
        let bounded   = self.cfg.train_size.is_some();
        let mut model = self.model.clone();
        let mut state = model.empty_state();
        let mut meter = PerplexityMeter::new();
        let mut batches = 0usize;

        // A bounded epoch resumes where the previous one stopped.
        if !bounded {
            self.train.rewind();
        }

        while let Some(steps) = self.next_steps(meter.tokens()) {
            let batch = match self.train.next_batch(steps) {
                Some(batch) => batch,
                None if bounded => {
                    tracing::debug!("Epoch {}: wrapping around the training split", epoch);
                    self.train.rewind();
                    state.reset();
                    continue;
                }
                None => break,
            };

            if !carry {
                state.reset();
            }

            let batch = batch.to_tensors::<B>(&self.device);
            let (log_probs, next) = model.forward(batch.inputs, state);
            let out = self.criterion.forward(log_probs, batch.targets);
            meter.add(out.summed_nll_value(), out.tokens);

            let mut grads = GradientsParams::from_grads(out.loss.backward(), &model);
            if self.cfg.clipping_enabled() {
                let norm = clip_global_norm::<B, _>(&model, &mut grads, self.cfg.cutoff);
                self.norms.update(norm);
            }
            model = self.optim.step(lr, model, grads);
            state = next.detach();

            batches += 1;
            if self.cfg.progress && batches % PROGRESS_EVERY == 0 {
                tracing::info!(
                    "epoch {:>3} | batch {:>6} | {} tokens | ppl {:.2}",
                    epoch,
                    batches,
                    meter.tokens(),
                    meter.perplexity()
                );
            }
        }

        self.model = model;
        Ok(TrainSummary {
            perplexity:     meter.perplexity(),
            tokens:         meter.tokens(),
            mean_grad_norm: self.norms.average(),
        })
    }

    fn validate(&mut self) -> Result<f64> {
        let options = EvalOptions {
            batch_size:  self.cfg.batch_size,
            seq_len:     self.cfg.seq_len,
            carry_state: self.cfg.remember.carries_in_evaluation(),
            max_tokens:  self.cfg.valid_size,
        };
        evaluate_perplexity(&self.model.valid(), &self.valid_tokens, options, &self.device)
    }

    fn save_best(&mut self, log: &ExperimentLog) -> Result<()> {
        self.store.save(log, &self.model.valid())?;
        tracing::info!("Saved new best model to '{}'", self.store.path_for(&log.id).display());
        Ok(())
    }
}
