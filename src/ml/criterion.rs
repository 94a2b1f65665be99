// ============================================================
// Layer 5: Sequence NLL Criterion
// ============================================================
// Negative log-likelihood of the target word at every step:
//
//   nll   = −Σ_{b,t} log p(target_{b,t})
//   loss  = nll / batch_size        ← what gets back-propagated
//
// Summing over time and averaging over the batch keeps the
// gradient scale independent of the batch size while letting
// longer windows contribute proportionally more.
//
// Perplexity is computed from the summed NLL and the number of
// target tokens, never from the averaged loss:
//
//   ppl = exp(Σ nll / Σ tokens)

use burn::{prelude::*, tensor::ElementConversion};

/// Output of one criterion evaluation.
#[derive(Debug, Clone)]
pub struct NllOutput<B: Backend> {
    /// Summed over time, averaged over the batch: shape [1]
    pub loss:       Tensor<B, 1>,
    /// Summed over batch and time: shape [1]
    pub summed_nll: Tensor<B, 1>,
    pub tokens:     usize,
}

impl<B: Backend> NllOutput<B> {
    /// Pull the summed NLL back to the host.
    pub fn summed_nll_value(&self) -> f64 {
        self.summed_nll.clone().into_scalar().elem::<f64>()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceNllLoss;

impl SequenceNllLoss {
    pub fn new() -> Self {
        Self
    }

    /// log_probs: [batch, steps, vocab], targets: [batch, steps]
    pub fn forward<B: Backend>(
        &self,
        log_probs: Tensor<B, 3>,
        targets:   Tensor<B, 2, Int>,
    ) -> NllOutput<B> {
        let [batch, steps, _] = log_probs.dims();

        // pick log p(target) at every position → [batch, steps, 1]
        let picked     = log_probs.gather(2, targets.unsqueeze_dim::<3>(2));
        let summed_nll = picked.sum().neg();
        let loss       = summed_nll.clone().div_scalar(batch as f64);

        NllOutput { loss, summed_nll, tokens: batch * steps }
    }
}

/// exp(total NLL / tokens). Infinite when nothing was measured.
pub fn perplexity(total_nll: f64, tokens: usize) -> f64 {
    if tokens == 0 {
        return f64::INFINITY;
    }
    (total_nll / tokens as f64).exp()
}

/// Running NLL / token totals over many batches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerplexityMeter {
    nll:    f64,
    tokens: usize,
}

impl PerplexityMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, summed_nll: f64, tokens: usize) {
        self.nll    += summed_nll;
        self.tokens += tokens;
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn perplexity(&self) -> f64 {
        perplexity(self.nll, self.tokens)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::activation::log_softmax};

    type TestBackend = NdArray;

    #[test]
    fn test_nll_matches_manual_reference() {
        let device = Default::default();
        // batch 2, steps 2, vocab 3
        let logits = [
            [[1.0f32, 2.0, 0.5], [0.0, 0.0, 0.0]],
            [[3.0, -1.0, 0.0], [0.2, 0.4, 0.6]],
        ];
        let targets = [[1i32, 2], [0, 2]];

        let log_probs = log_softmax(Tensor::<TestBackend, 3>::from_floats(logits, &device), 2);
        let out = SequenceNllLoss::new().forward(
            log_probs,
            Tensor::<TestBackend, 2, Int>::from_ints(targets, &device),
        );

        let mut expected = 0.0f64;
        for b in 0..2 {
            for t in 0..2 {
                let row = logits[b][t].map(f64::from);
                let lse = row.iter().map(|v| v.exp()).sum::<f64>().ln();
                expected += lse - row[targets[b][t] as usize];
            }
        }

        assert_eq!(out.tokens, 4);
        assert!((out.summed_nll_value() - expected).abs() < 1e-4);
        let loss: f64 = out.loss.into_scalar().elem();
        assert!((loss - expected / 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_uniform_prediction_has_vocab_perplexity() {
        let device    = Default::default();
        let log_probs = log_softmax(Tensor::<TestBackend, 3>::zeros([3, 4, 10], &device), 2);
        let targets   = Tensor::<TestBackend, 2, Int>::zeros([3, 4], &device);

        let out = SequenceNllLoss::new().forward(log_probs, targets);
        let ppl = perplexity(out.summed_nll_value(), out.tokens);
        assert!((ppl - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_meter_is_exp_of_mean_nll() {
        let mut meter = PerplexityMeter::new();
        meter.add(6.0, 4);
        meter.add(2.0, 4);
        assert_eq!(meter.tokens(), 8);
        assert!((meter.perplexity() - 1.0f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_meter_is_infinite() {
        assert!(PerplexityMeter::new().perplexity().is_infinite());
    }
}
