use burn::{
    nn::{
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig, Lstm,
        LstmConfig,
    },
    prelude::*,
    tensor::activation::log_softmax,
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::hyperparams::CellKind;
use crate::ml::cells::{Gru, GruConfig, MuFuRu, MuFuRuConfig, SimpleRnn, SimpleRnnConfig};
use crate::ml::state::{LayerState, RecurrentState};

// #[derive(Config)] already brings Clone and serde; deriving them again conflicts.
#[derive(Config, Debug)]
pub struct RnnLmConfig {
    pub vocab_size:   usize,
    /// Embedding width
    pub input_size:   usize,
    /// One recurrent layer per entry, bottom first
    pub hidden_sizes: Vec<usize>,
    pub cell:         CellKind,
    #[config(default = 0.0)]
    pub dropout:      f64,
    /// Uniform init magnitude; <= 0 keeps every layer's default initializer
    #[config(default = 0.0)]
    pub uniform:      f64,
}

impl RnnLmConfig {
    pub fn from_train_config(cfg: &TrainConfig, vocab_size: usize) -> Self {
        Self::new(vocab_size, cfg.input_size, cfg.hidden_sizes.clone(), cfg.cell)
            .with_dropout(cfg.dropout)
            .with_uniform(cfg.uniform)
    }

    fn initializer(&self) -> Option<Initializer> {
        (self.uniform > 0.0).then(|| Initializer::Uniform {
            min: -self.uniform,
            max:  self.uniform,
        })
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> RnnLm<B> {
        let init = self.initializer();

        let embedding = match &init {
            Some(init) => EmbeddingConfig::new(self.vocab_size, self.input_size)
                .with_initializer(init.clone()),
            None => EmbeddingConfig::new(self.vocab_size, self.input_size),
        }
        .init(device);

        let mut layers  = Vec::with_capacity(self.hidden_sizes.len());
        let mut d_input = self.input_size;
        for &d_hidden in &self.hidden_sizes {
            layers.push(self.build_layer(d_input, d_hidden, &init, device));
            d_input = d_hidden;
        }

        let output = match &init {
            Some(init) => LinearConfig::new(d_input, self.vocab_size).with_initializer(init.clone()),
            None => LinearConfig::new(d_input, self.vocab_size),
        }
        .init(device);

        RnnLm {
            embedding,
            layers,
            output,
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }

    fn build_layer<B: Backend>(
        &self,
        d_input:  usize,
        d_hidden: usize,
        init:     &Option<Initializer>,
        device:   &B::Device,
    ) -> RecurrentLayer<B> {
        match self.cell {
            CellKind::Simple => RecurrentLayer::Simple(
                SimpleRnnConfig::new(d_input, d_hidden)
                    .with_initializer(init.clone())
                    .init(device),
            ),
            CellKind::MuFuRu => RecurrentLayer::MuFuRu(
                MuFuRuConfig::new(d_input, d_hidden)
                    .with_initializer(init.clone())
                    .init(device),
            ),
            CellKind::Lstm => {
                let config = LstmConfig::new(d_input, d_hidden, true);
                let config = match init {
                    Some(init) => config.with_initializer(init.clone()),
                    None       => config,
                };
                RecurrentLayer::Lstm(config.init(device))
            }
            CellKind::Gru => RecurrentLayer::Gru(
                GruConfig::new(d_input, d_hidden)
                    .with_initializer(init.clone())
                    .init(device),
            ),
        }
    }
}

/// One layer of the recurrent stack. The variant is chosen once, when the
/// model is built.
#[derive(Module, Debug)]
pub enum RecurrentLayer<B: Backend> {
    Simple(SimpleRnn<B>),
    Lstm(Lstm<B>),
    Gru(Gru<B>),
    MuFuRu(MuFuRu<B>),
}

impl<B: Backend> RecurrentLayer<B> {
    /// x: [batch, steps, d_input] → [batch, steps, d_hidden] plus the
    /// state after the last step.
    pub fn forward(
        &self,
        x:     Tensor<B, 3>,
        state: Option<LayerState<B>>,
    ) -> (Tensor<B, 3>, LayerState<B>) {
        match self {
            Self::Simple(cell) => {
                let (out, h) = cell.forward(x, state.and_then(LayerState::into_hidden));
                (out, LayerState::Hidden(h))
            }
            Self::MuFuRu(cell) => {
                let (out, h) = cell.forward(x, state.and_then(LayerState::into_hidden));
                (out, LayerState::Hidden(h))
            }
            Self::Lstm(lstm) => {
                let (out, s) = lstm.forward(x, state.and_then(LayerState::into_lstm));
                (out, LayerState::from_lstm(s))
            }
            Self::Gru(cell) => {
                let (out, h) = cell.forward(x, state.and_then(LayerState::into_hidden));
                (out, LayerState::Hidden(h))
            }
        }
    }
}

#[derive(Module, Debug)]
pub struct RnnLm<B: Backend> {
    pub embedding: Embedding<B>,
    pub layers:    Vec<RecurrentLayer<B>>,
    pub output:    Linear<B>,
    pub dropout:   Dropout,
}

impl<B: Backend> RnnLm<B> {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Fresh state matching this stack.
    pub fn empty_state(&self) -> RecurrentState<B> {
        RecurrentState::new(self.layers.len())
    }

    /// inputs: [batch, steps] → log-probabilities [batch, steps, vocab].
    ///
    /// `state` must come from this model (or be empty); the returned state
    /// is the one after the last step.
    pub fn forward(
        &self,
        inputs: Tensor<B, 2, Int>,
        state:  RecurrentState<B>,
    ) -> (Tensor<B, 3>, RecurrentState<B>) {
        let mut x    = self.dropout.forward(self.embedding.forward(inputs));
        let mut next = Vec::with_capacity(self.layers.len());

        for (layer, previous) in self.layers.iter().zip(state.into_layers()) {
            let (out, layer_state) = layer.forward(x, previous);
            x = self.dropout.forward(out);
            next.push(Some(layer_state));
        }

        let logits = self.output.forward(x);
        (log_softmax(logits, 2), RecurrentState::from_layers(next))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        module::{ModuleVisitor, ParamId},
        tensor::ElementConversion,
    };

    type TestBackend = NdArray;

    const VOCAB: usize = 11;

    fn tokens(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2, Int> {
        Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 3, 4, 5, 6], device).reshape([2, 3])
    }

    fn config(cell: CellKind) -> RnnLmConfig {
        RnnLmConfig::new(VOCAB, 6, vec![5, 4], cell).with_uniform(0.1)
    }

    #[test]
    fn test_every_cell_kind_produces_distributions() {
        let device = Default::default();
        for cell in [CellKind::Simple, CellKind::Lstm, CellKind::Gru, CellKind::MuFuRu] {
            let model = config(cell).init::<TestBackend>(&device);
            let (log_probs, state) = model.forward(tokens(&device), model.empty_state());

            assert_eq!(log_probs.dims(), [2, 3, VOCAB], "{cell}");
            assert_eq!(state.num_layers(), 2);
            assert_eq!(state.layer(0).unwrap().hidden().dims(), [2, 5]);
            assert_eq!(state.layer(1).unwrap().hidden().dims(), [2, 4]);

            // each row of exp(log_probs) sums to one
            let sums = log_probs.exp().sum_dim(2).reshape([6]);
            for s in sums.into_data().to_vec::<f32>().unwrap() {
                assert!((s - 1.0).abs() < 1e-4, "{cell}: row sums to {s}");
            }
        }
    }

    #[test]
    fn test_lstm_state_carries_cell_memory() {
        let device = Default::default();
        let model  = config(CellKind::Lstm).init::<TestBackend>(&device);
        let (_, state) = model.forward(tokens(&device), model.empty_state());
        assert!(matches!(state.layer(0), Some(LayerState::Lstm { .. })));
    }

    #[test]
    fn test_carried_state_changes_predictions() {
        let device = Default::default();
        let model  = config(CellKind::Gru).init::<TestBackend>(&device);

        let (first, state) = model.forward(tokens(&device), model.empty_state());
        let (second, _)    = model.forward(tokens(&device), state);
        let diff: f32 = (first - second).abs().sum().into_scalar().elem();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_last_prediction_depends_on_first_token() {
        let device = Default::default();
        for cell in [CellKind::Simple, CellKind::Lstm, CellKind::Gru, CellKind::MuFuRu] {
            let model = RnnLmConfig::new(VOCAB, 6, vec![5], cell)
                .with_uniform(0.5)
                .init::<TestBackend>(&device);

            let sentence = |first: i32| {
                Tensor::<TestBackend, 1, Int>::from_ints([first, 2, 3, 4], &device).reshape([1, 4])
            };
            let last = |log_probs: Tensor<TestBackend, 3>| log_probs.slice([0..1, 3..4, 0..VOCAB]);

            let (a, _) = model.forward(sentence(1), model.empty_state());
            let (b, _) = model.forward(sentence(9), model.empty_state());
            let diff: f32 = (last(a) - last(b)).abs().sum().into_scalar().elem();
            assert!(diff > 0.0, "{cell}: last step ignores the first token");
        }
    }

    struct Bounds {
        min: f64,
        max: f64,
    }

    impl<B: Backend> ModuleVisitor<B> for Bounds {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
            let min: f64 = tensor.clone().min().into_scalar().elem();
            let max: f64 = tensor.clone().max().into_scalar().elem();
            self.min = self.min.min(min);
            self.max = self.max.max(max);
        }
    }

    #[test]
    fn test_uniform_init_bounds_every_parameter() {
        let device = Default::default();
        for cell in [CellKind::Simple, CellKind::Lstm, CellKind::Gru, CellKind::MuFuRu] {
            let model = RnnLmConfig::new(VOCAB, 8, vec![8], cell)
                .with_uniform(0.05)
                .init::<TestBackend>(&device);

            let mut bounds = Bounds { min: f64::MAX, max: f64::MIN };
            model.visit(&mut bounds);
            assert!(bounds.min >= -0.05 && bounds.max <= 0.05, "{cell}: [{}, {}]", bounds.min, bounds.max);
        }
    }

    #[test]
    fn test_from_train_config() {
        let cfg = TrainConfig {
            input_size:   16,
            hidden_sizes: vec![32, 8],
            cell:         CellKind::MuFuRu,
            dropout:      0.25,
            ..TrainConfig::default()
        };
        let model_cfg = RnnLmConfig::from_train_config(&cfg, 100);
        assert_eq!(model_cfg.vocab_size, 100);
        assert_eq!(model_cfg.input_size, 16);
        assert_eq!(model_cfg.hidden_sizes, vec![32, 8]);
        assert_eq!(model_cfg.cell, CellKind::MuFuRu);
        assert_eq!(model_cfg.dropout, 0.25);
    }
}
