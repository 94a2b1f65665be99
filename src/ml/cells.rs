// ============================================================
// Layer 5: Recurrent Cells
// ============================================================
// burn's Lstm is used as-is. The other three cell types are
// built here from Linear layers; autodiff takes care of their
// backward pass. burn's Gru reads the hidden state of step t
// from the initial state instead of from step t-1, so the GRU
// is one of them.
//
//   SimpleRnn - h_t = σ(W_x·x_t + W_h·h_{t-1})
//
//   Gru       - z = σ(W_z·x + U_z·h)          update gate
//               r = σ(W_r·x + U_r·h)          reset gate
//               n = tanh(W_n·x + r⊙(U_n·h))   candidate
//               h' = (1 − z)⊙n + z⊙h
//
//   MuFuRu    - multi-function recurrent unit. Each hidden unit
//               picks a soft mixture of eight operations that
//               combine the previous state s with a candidate v:
//
//                 r  = σ(W_r·[x, s])
//                 v  = tanh(W_v·[x, r⊙s])
//                 p  = softmax_ops(W_p·[x, s])      per unit
//                 s' = Σ_k p_k · op_k(s, v)
//
//               ops: keep s, replace v, mul s⊙v, diff |s−v|,
//                    forget 0, sqrt-diff √|s²−v²|, max, min
//
// All take [batch, steps, d_input] and an optional initial
// state [batch, d_hidden], and return every step's output plus
// the final state.

use burn::{
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

/// Number of MuFuRu operations
pub const MUFURU_OPS: usize = 8;

const SQRT_EPS: f64 = 1e-6;

fn linear<B: Backend>(
    d_input:     usize,
    d_output:    usize,
    bias:        bool,
    initializer: &Option<Initializer>,
    device:      &B::Device,
) -> Linear<B> {
    let config = LinearConfig::new(d_input, d_output).with_bias(bias);
    let config = match initializer {
        Some(init) => config.with_initializer(init.clone()),
        None       => config,
    };
    config.init(device)
}

/// Slice time step `t` out of `[batch, steps, dim]` as `[batch, dim]`.
fn step<B: Backend>(input: &Tensor<B, 3>, t: usize) -> Tensor<B, 2> {
    let [batch, _, dim] = input.dims();
    input.clone().slice([0..batch, t..t + 1, 0..dim]).reshape([batch, dim])
}

fn initial_state<B: Backend>(
    state:    Option<Tensor<B, 2>>,
    batch:    usize,
    d_hidden: usize,
    device:   &B::Device,
) -> Tensor<B, 2> {
    state.unwrap_or_else(|| Tensor::zeros([batch, d_hidden], device))
}

// ─── SimpleRnn ────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct SimpleRnnConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl SimpleRnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SimpleRnn<B> {
        SimpleRnn {
            input:     linear(self.d_input, self.d_hidden, true, &self.initializer, device),
            recurrent: linear(self.d_hidden, self.d_hidden, false, &self.initializer, device),
            d_hidden:  self.d_hidden,
        }
    }
}

#[derive(Module, Debug)]
pub struct SimpleRnn<B: Backend> {
    pub input:     Linear<B>,
    pub recurrent: Linear<B>,
    pub d_hidden:  usize,
}

impl<B: Backend> SimpleRnn<B> {
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [batch, steps, _] = input.dims();
        let mut hidden = initial_state(state, batch, self.d_hidden, &input.device());

        // The input projection does not depend on h, so do it for all steps at once.
        let projected   = self.input.forward(input);
        let mut outputs = Vec::with_capacity(steps);

        for t in 0..steps {
            hidden = sigmoid(step(&projected, t) + self.recurrent.forward(hidden));
            outputs.push(hidden.clone().unsqueeze_dim::<3>(1));
        }

        (Tensor::cat(outputs, 1), hidden)
    }
}

// ─── Gru ──────────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct GruConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl GruConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Gru<B> {
        let gates = 3 * self.d_hidden;
        Gru {
            input:     linear(self.d_input, gates, true, &self.initializer, device),
            recurrent: linear(self.d_hidden, gates, true, &self.initializer, device),
            d_hidden:  self.d_hidden,
        }
    }
}

/// Gate rows are laid out [update | reset | candidate] in both projections.
#[derive(Module, Debug)]
pub struct Gru<B: Backend> {
    pub input:     Linear<B>,
    pub recurrent: Linear<B>,
    pub d_hidden:  usize,
}

impl<B: Backend> Gru<B> {
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [batch, steps, _] = input.dims();
        let d = self.d_hidden;
        let mut hidden = initial_state(state, batch, d, &input.device());

        let projected   = self.input.forward(input);
        let mut outputs = Vec::with_capacity(steps);

        for t in 0..steps {
            let x = step(&projected, t);
            let h = self.recurrent.forward(hidden.clone());

            let gate = |m: &Tensor<B, 2>, k: usize| m.clone().slice([0..batch, k * d..(k + 1) * d]);

            let z = sigmoid(gate(&x, 0) + gate(&h, 0));
            let r = sigmoid(gate(&x, 1) + gate(&h, 1));
            let n = (gate(&x, 2) + r * gate(&h, 2)).tanh();

            hidden = z.clone().neg().add_scalar(1.0) * n + z * hidden;
            outputs.push(hidden.clone().unsqueeze_dim::<3>(1));
        }

        (Tensor::cat(outputs, 1), hidden)
    }
}

// ─── MuFuRu ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct MuFuRuConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl MuFuRuConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MuFuRu<B> {
        let joint = self.d_input + self.d_hidden;
        MuFuRu {
            reset_gate: linear(joint, self.d_hidden, true, &self.initializer, device),
            feature:    linear(joint, self.d_hidden, true, &self.initializer, device),
            op_weights: linear(joint, self.d_hidden * MUFURU_OPS, true, &self.initializer, device),
            d_hidden:   self.d_hidden,
        }
    }
}

#[derive(Module, Debug)]
pub struct MuFuRu<B: Backend> {
    pub reset_gate: Linear<B>,
    pub feature:    Linear<B>,
    pub op_weights: Linear<B>,
    pub d_hidden:   usize,
}

impl<B: Backend> MuFuRu<B> {
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [batch, steps, _] = input.dims();
        let mut s       = initial_state(state, batch, self.d_hidden, &input.device());
        let mut outputs = Vec::with_capacity(steps);

        for t in 0..steps {
            let x  = step(&input, t);
            let xs = Tensor::cat(vec![x.clone(), s.clone()], 1);

            let r = sigmoid(self.reset_gate.forward(xs.clone()));
            let v = self
                .feature
                .forward(Tensor::cat(vec![x, r * s.clone()], 1))
                .tanh();

            // [batch, hidden, ops], normalised over the ops of each unit
            let weights = softmax(
                self.op_weights.forward(xs).reshape([batch, self.d_hidden, MUFURU_OPS]),
                2,
            );

            s = (weights * Self::operations(s, v))
                .sum_dim(2)
                .reshape([batch, self.d_hidden]);
            outputs.push(s.clone().unsqueeze_dim::<3>(1));
        }

        (Tensor::cat(outputs, 1), s)
    }

    /// Stack every op(s, v) along a trailing dimension: [batch, hidden, ops].
    fn operations(s: Tensor<B, 2>, v: Tensor<B, 2>) -> Tensor<B, 3> {
        let keep      = s.clone();
        let replace   = v.clone();
        let mul       = s.clone() * v.clone();
        let diff      = (s.clone() - v.clone()).abs();
        let forget    = s.zeros_like();
        let sqrt_diff = (s.clone() * s.clone() - v.clone() * v.clone())
            .abs()
            .add_scalar(SQRT_EPS)
            .sqrt();
        let max       = s.clone().max_pair(v.clone());
        let min       = s.min_pair(v);

        Tensor::stack(vec![keep, replace, mul, diff, forget, sqrt_diff, max, min], 2)
    }
}
