// ============================================================
// Layer 5: Evaluator
// ============================================================
// Forward-only use of a model: perplexity over a token stream,
// and sampling text from a trained experiment.
//
// evaluate_perplexity() is shared by the trainer's validation
// phase and the `evaluate` command, so both report exactly the
// same number for the same model and data.

use anyhow::{Context, Result};
use burn::{
    backend::{
        ndarray::{NdArray, NdArrayDevice},
        wgpu::{Wgpu, WgpuDevice},
    },
    prelude::*,
    tensor::activation::softmax,
};
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    Rng, SeedableRng,
};

use crate::application::evaluate_use_case::{EvaluateConfig, EvaluateReport};
use crate::data::{batcher::SequenceBatcher, corpus::TextCorpus};
use crate::domain::{experiment::ExperimentLog, traits::CorpusProvider};
use crate::infra::checkpoint::ExperimentStore;
use crate::ml::{
    criterion::{PerplexityMeter, SequenceNllLoss},
    model::RnnLm,
    DeviceChoice,
};

/// How a pass over a token stream is run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalOptions {
    pub batch_size:  usize,
    pub seq_len:     usize,
    /// Carry hidden state from one window to the next
    pub carry_state: bool,
    /// Stop once this many target tokens have been scored
    pub max_tokens:  Option<usize>,
}

/// Score `model` on `tokens`, starting from an empty state. The meter
/// holds the summed NLL and the number of targets scored.
pub fn score_tokens<B: Backend>(
    model:   &RnnLm<B>,
    tokens:  &[u32],
    options: EvalOptions,
    device:  &B::Device,
) -> Result<PerplexityMeter> {
    let mut batcher = SequenceBatcher::new(tokens, options.batch_size)?;
    let criterion   = SequenceNllLoss::new();
    let mut meter   = PerplexityMeter::new();
    let mut state   = model.empty_state();

    loop {
        let steps = match options.max_tokens {
            Some(max) if meter.tokens() >= max => break,
            Some(max) => options.seq_len.min((max - meter.tokens()).div_ceil(options.batch_size)),
            None      => options.seq_len,
        };
        let Some(batch) = batcher.next_batch(steps) else { break };

        if !options.carry_state {
            state.reset();
        }

        let batch = batch.to_tensors::<B>(device);
        let (log_probs, next) = model.forward(batch.inputs, state);
        let out = criterion.forward(log_probs, batch.targets);

        meter.add(out.summed_nll_value(), out.tokens);
        state = next;
    }

    tracing::debug!("Scored {} tokens", meter.tokens());
    Ok(meter)
}

/// Perplexity of `model` on `tokens`.
pub fn evaluate_perplexity<B: Backend>(
    model:   &RnnLm<B>,
    tokens:  &[u32],
    options: EvalOptions,
    device:  &B::Device,
) -> Result<f64> {
    score_tokens(model, tokens, options, device).map(|meter| meter.perplexity())
}

/// Draw one id from `log_probs` ([vocab]) sharpened or flattened by
/// `temperature`.
pub fn sample_token<B: Backend, R: Rng>(
    log_probs:   Tensor<B, 1>,
    temperature: f64,
    rng:         &mut R,
) -> Result<u32> {
    let probs = softmax(log_probs.div_scalar(temperature), 0)
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Cannot read probabilities: {e:?}"))?;

    let dist = WeightedIndex::new(&probs).context("Model produced an invalid distribution")?;
    Ok(dist.sample(rng) as u32)
}

// ─── Evaluator ────────────────────────────────────────────────────────────────
/// A trained experiment ready for forward passes.
pub struct Evaluator<B: Backend> {
    model:  RnnLm<B>,
    log:    ExperimentLog,
    device: B::Device,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(model: RnnLm<B>, log: ExperimentLog, device: B::Device) -> Self {
        Self { model, log, device }
    }

    pub fn from_store(store: &ExperimentStore, id: &str, device: B::Device) -> Result<Self> {
        let (log, model) = store.load::<B>(id, &device)?;
        Ok(Self::new(model, log, device))
    }

    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    /// Score all of `tokens`, carrying state the way the run was
    /// configured to during validation.
    pub fn score(&self, tokens: &[u32], batch_size: usize, seq_len: usize) -> Result<PerplexityMeter> {
        let options = EvalOptions {
            batch_size,
            seq_len,
            carry_state: self.log.hyperparameters.remember.carries_in_evaluation(),
            max_tokens:  None,
        };
        score_tokens(&self.model, tokens, options, &self.device)
    }

    /// Generate `n_words` words, starting after an end-of-sentence.
    pub fn sample<R: Rng>(&self, n_words: usize, temperature: f64, rng: &mut R) -> Result<String> {
        anyhow::ensure!(temperature > 0.0, "temperature must be positive, got {temperature}");

        let vocab     = &self.log.vocabulary;
        let mut state = self.model.empty_state();
        let mut token = vocab.eos_id();
        let mut words = Vec::with_capacity(n_words);

        for _ in 0..n_words {
            let input = Tensor::<B, 1, Int>::from_ints([token as i32], &self.device)
                .reshape([1, 1]);
            let (log_probs, next) = self.model.forward(input, state);
            state = next;

            let [_, _, vocab_size] = log_probs.dims();
            token = sample_token(log_probs.reshape([vocab_size]), temperature, rng)?;
            words.push(token);
        }

        Ok(vocab.decode(&words))
    }
}

// ─── Evaluate command ─────────────────────────────────────────────────────────
/// Load experiment `cfg.id` on the configured device, score the chosen
/// split and optionally sample text.
pub fn run_evaluation(cfg: &EvaluateConfig, store: &ExperimentStore) -> Result<EvaluateReport> {
    match DeviceChoice::from_flags(cfg.cuda, cfg.device) {
        DeviceChoice::Cpu => evaluate_on::<NdArray>(cfg, store, NdArrayDevice::Cpu),
        DeviceChoice::Gpu { index } => {
            evaluate_on::<Wgpu>(cfg, store, WgpuDevice::DiscreteGpu(index))
        }
    }
}

fn evaluate_on<B: Backend>(
    cfg:    &EvaluateConfig,
    store:  &ExperimentStore,
    device: B::Device,
) -> Result<EvaluateReport> {
    B::seed(cfg.seed);
    let evaluator = Evaluator::<B>::from_store(store, &cfg.id, device)?;
    let trained   = &evaluator.log().hyperparameters;

    let data_dir = cfg.data_dir.as_deref().unwrap_or(&trained.data_dir);
    let corpus   = TextCorpus::with_vocabulary(evaluator.log().vocabulary.clone(), data_dir)?;
    let tokens   = corpus.tokens(cfg.split)?;

    let meter = evaluator.score(
        tokens,
        cfg.batch_size.unwrap_or(trained.batch_size),
        cfg.seq_len.unwrap_or(trained.seq_len),
    )?;
    tracing::info!(
        "{} perplexity of '{}': {:.3} over {} tokens",
        cfg.split,
        cfg.id,
        meter.perplexity(),
        meter.tokens()
    );

    let sample = if cfg.n_sample > 0 {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        Some(evaluator.sample(cfg.n_sample, cfg.temperature, &mut rng)?)
    } else {
        None
    };

    Ok(EvaluateReport {
        id:             evaluator.log().id.clone(),
        split:          cfg.split,
        perplexity:     meter.perplexity(),
        tokens:         meter.tokens(),
        best_epoch:     evaluator.log().best_epoch,
        best_valid_ppl: evaluator.log().best_valid_ppl,
        sample,
    })
}
