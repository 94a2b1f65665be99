// ============================================================
// Layer 4: Sequence Batcher
// ============================================================
// Turns one long token stream into language-model minibatches.
//
// How batching works here:
//   The stream is cut into `batch_size` equally long columns,
//   one per batch row. A batch is the next window of at most
//   `seq_len` steps taken from every column at the same offset:
//
//     column 0:  t0 t1 t2 t3 t4 | t5 ...
//     column 1:  u0 u1 u2 u3 u4 | u5 ...
//                \_ batch 1 _/    \_ batch 2
//
//   Targets are the inputs shifted one step ahead. Windows are
//   consecutive, so row i of batch n+1 continues row i of batch
//   n, which is what lets recurrent state carry across batches.
//
// Output: TokenBatch (plain ids) → LmBatch<B> (tensors of shape
// [batch_size, steps]).

use anyhow::Result;
use burn::prelude::*;

// ─── TokenBatch ───────────────────────────────────────────────────────────────
/// One window of ids, row-major `[batch_size, steps]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
    pub inputs:     Vec<i32>,
    pub targets:    Vec<i32>,
    pub batch_size: usize,
    pub steps:      usize,
}

impl TokenBatch {
    /// Create tensors on `device`.
    ///
    /// Flatten → 1D tensor → reshape to [batch_size, steps].
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> LmBatch<B> {
        let shape = [self.batch_size, self.steps];

        let inputs = Tensor::<B, 1, Int>::from_ints(self.inputs.as_slice(), device)
            .reshape(shape);
        let targets = Tensor::<B, 1, Int>::from_ints(self.targets.as_slice(), device)
            .reshape(shape);

        LmBatch { inputs, targets }
    }
}

// ─── LmBatch ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LmBatch<B: Backend> {
    /// Token ids - shape: [batch_size, steps]
    pub inputs: Tensor<B, 2, Int>,

    /// Next-token ids - shape: [batch_size, steps]
    pub targets: Tensor<B, 2, Int>,
}

// ─── SequenceBatcher ──────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SequenceBatcher {
    tokens:     Vec<u32>,
    batch_size: usize,
    column_len: usize,
    cursor:     usize,
}

impl SequenceBatcher {
    /// Lay `tokens` out as `batch_size` columns. Tokens that do not
    /// fill a whole column are dropped.
    pub fn new(tokens: &[u32], batch_size: usize) -> Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch size must be at least 1");

        let column_len = tokens.len() / batch_size;
        anyhow::ensure!(
            column_len >= 2,
            "{} tokens are too few for a batch size of {} (need at least {})",
            tokens.len(),
            batch_size,
            batch_size * 2,
        );

        Ok(Self {
            tokens: tokens[..column_len * batch_size].to_vec(),
            batch_size,
            column_len,
            cursor: 0,
        })
    }

    /// Target tokens in one full pass
    pub fn tokens_per_pass(&self) -> usize {
        (self.column_len - 1) * self.batch_size
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Next window of at most `seq_len` steps, or `None` at the end of
    /// the pass. The last window of a pass may be shorter.
    pub fn next_batch(&mut self, seq_len: usize) -> Option<TokenBatch> {
        let remaining = self.column_len - 1 - self.cursor;
        let steps     = seq_len.min(remaining);
        if steps == 0 {
            return None;
        }

        let mut inputs  = Vec::with_capacity(self.batch_size * steps);
        let mut targets = Vec::with_capacity(self.batch_size * steps);

        for row in 0..self.batch_size {
            let start = row * self.column_len + self.cursor;
            inputs.extend(self.tokens[start..start + steps].iter().map(|&t| t as i32));
            targets.extend(self.tokens[start + 1..start + steps + 1].iter().map(|&t| t as i32));
        }

        self.cursor += steps;

        Some(TokenBatch { inputs, targets, batch_size: self.batch_size, steps })
    }
}
