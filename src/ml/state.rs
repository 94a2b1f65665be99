// ============================================================
// Layer 5: Recurrent State
// ============================================================
// Per-layer hidden state threaded through RnnLm::forward.
//
// burn modules are values that the optimizer replaces on every
// step, so the state is an explicit object passed in and handed
// back by the forward pass instead of living inside the module.
//
//   reset()  - back to "no state": every layer starts from zeros
//   detach() - cut the autodiff graph between two training
//              batches (truncated BPTT) while keeping the values

use burn::{nn::LstmState, prelude::*};

#[derive(Debug, Clone)]
pub enum LayerState<B: Backend> {
    /// Plain RNN, GRU and MuFuRu carry a single hidden tensor
    Hidden(Tensor<B, 2>),
    /// LSTM carries hidden output and cell memory
    Lstm { hidden: Tensor<B, 2>, cell: Tensor<B, 2> },
}

impl<B: Backend> LayerState<B> {
    pub fn detach(self) -> Self {
        match self {
            Self::Hidden(h) => Self::Hidden(h.detach()),
            Self::Lstm { hidden, cell } => Self::Lstm {
                hidden: hidden.detach(),
                cell:   cell.detach(),
            },
        }
    }

    #[cfg(test)]
    pub fn hidden(&self) -> &Tensor<B, 2> {
        match self {
            Self::Hidden(h) | Self::Lstm { hidden: h, .. } => h,
        }
    }

    pub fn from_lstm(state: LstmState<B, 2>) -> Self {
        Self::Lstm { hidden: state.hidden, cell: state.cell }
    }

    /// `None` unless this is an LSTM state.
    pub fn into_lstm(self) -> Option<LstmState<B, 2>> {
        match self {
            Self::Lstm { hidden, cell } => Some(LstmState::new(cell, hidden)),
            Self::Hidden(_) => None,
        }
    }

    /// `None` unless this is a single-tensor state.
    pub fn into_hidden(self) -> Option<Tensor<B, 2>> {
        match self {
            Self::Hidden(h) => Some(h),
            Self::Lstm { .. } => None,
        }
    }
}

/// State of every layer of the stack, bottom first.
#[derive(Debug, Clone)]
pub struct RecurrentState<B: Backend> {
    layers: Vec<Option<LayerState<B>>>,
}

impl<B: Backend> RecurrentState<B> {
    /// Empty state for a stack of `num_layers` layers.
    pub fn new(num_layers: usize) -> Self {
        Self { layers: (0..num_layers).map(|_| None).collect() }
    }

    pub fn from_layers(layers: Vec<Option<LayerState<B>>>) -> Self {
        Self { layers }
    }

    pub fn into_layers(self) -> Vec<Option<LayerState<B>>> {
        self.layers
    }

    pub fn reset(&mut self) {
        self.layers.iter_mut().for_each(|layer| *layer = None);
    }

    pub fn detach(self) -> Self {
        Self {
            layers: self
                .layers
                .into_iter()
                .map(|layer| layer.map(LayerState::detach))
                .collect(),
        }
    }
}

#[cfg(test)]
impl<B: Backend> RecurrentState<B> {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&LayerState<B>> {
        self.layers.get(index).and_then(Option::as_ref)
    }

    pub fn is_reset(&self) -> bool {
        self.layers.iter().all(Option::is_none)
    }
}
