// ============================================================
// Layer 5: ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here; the other layers only see plain
// ids, perplexities and the EpochRunner trait.
//
//   cells.rs     - hand-written SimpleRnn, GRU and MuFuRu cells
//                  (sigmoid RNN, MuFuRu)
//   state.rs     - per-layer hidden state carried across batches
//   model.rs     - embedding → recurrent stack → log-softmax
//   criterion.rs - sequence NLL and perplexity
//   clipping.rs  - global gradient-norm clipping
//   evaluator.rs - perplexity passes and text sampling
//   session.rs   - one run's model + optimizer + data streams
//   trainer.rs   - the epoch state machine and backend dispatch
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Mikolov et al. (2010) Recurrent neural network LM

/// Plain sigmoid RNN and MuFuRu cells
pub mod cells;

/// Recurrent state threaded through the forward pass
pub mod state;

/// RNN language model architecture
pub mod model;

/// Sequence negative log-likelihood and perplexity
pub mod criterion;

/// Global gradient-norm clipping
pub mod clipping;

/// Forward-only evaluation and sampling
pub mod evaluator;

/// EpochRunner over a concrete backend
pub mod session;

/// Epoch loop with early stopping and checkpointing
pub mod trainer;

/// Which backend a run executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChoice {
    /// NdArray on the CPU
    Cpu,
    /// Wgpu on a discrete GPU, 0-based
    Gpu { index: usize },
}

impl DeviceChoice {
    /// `device` is the 1-based GPU index given on the command line.
    pub fn from_flags(cuda: bool, device: usize) -> Self {
        if cuda {
            Self::Gpu { index: device.saturating_sub(1) }
        } else {
            Self::Cpu
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_choice() {
        assert_eq!(DeviceChoice::from_flags(false, 3), DeviceChoice::Cpu);
        assert_eq!(DeviceChoice::from_flags(true, 1), DeviceChoice::Gpu { index: 0 });
        assert_eq!(DeviceChoice::from_flags(true, 2), DeviceChoice::Gpu { index: 1 });
    }
}
