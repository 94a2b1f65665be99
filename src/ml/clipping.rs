// ============================================================
// Layer 5: Global Gradient-Norm Clipping
// ============================================================
// burn's GradientClipping works per parameter tensor. Language
// models are usually clipped on the norm of ALL gradients taken
// together, so that is done here with two module visitors:
//
//   1. NormVisitor  - Σ ||g_p||² over every float parameter p
//   2. ScaleVisitor - g_p ← g_p · cutoff / ||g||  (only when the
//                     global norm exceeds the cutoff)
//
// Gradients live on the inner backend (B::InnerBackend), keyed
// by parameter id, so both visitors walk the module only to learn
// the ids and ranks.

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

/// Decay of the gradient-norm moving average
pub const NORM_EMA_DECAY: f64 = 0.9;

struct NormVisitor<'a> {
    grads:  &'a GradientsParams,
    sq_sum: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for NormVisitor<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.sq_sum += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct ScaleVisitor<'a> {
    grads: &'a mut GradientsParams,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleVisitor<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register::<B::InnerBackend, D>(id, grad.mul_scalar(self.scale));
        }
    }
}

/// L2 norm of every gradient of `module` taken as one vector.
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = NormVisitor { grads, sq_sum: 0.0 };
    module.visit(&mut visitor);
    visitor.sq_sum.sqrt()
}

/// Factor that brings `norm` down to `cutoff`; 1 when no clipping applies.
pub fn clip_coefficient(norm: f64, cutoff: f64) -> f64 {
    if cutoff > 0.0 && norm > cutoff {
        cutoff / norm
    } else {
        1.0
    }
}

/// Rescale `grads` in place so their global norm is at most `cutoff`.
/// Returns the norm measured before clipping.
pub fn clip_global_norm<B, M>(module: &M, grads: &mut GradientsParams, cutoff: f64) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm  = global_grad_norm::<B, M>(module, grads);
    let scale = clip_coefficient(norm, cutoff);
    if scale < 1.0 {
        tracing::debug!("Clipping gradient norm {:.4} to {:.4}", norm, cutoff);
        let mut visitor = ScaleVisitor { grads, scale };
        module.visit(&mut visitor);
    }
    norm
}

/// Exponential moving average of pre-clip gradient norms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormTracker {
    average: Option<f64>,
}

impl NormTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, norm: f64) {
        self.average = Some(match self.average {
            Some(avg) => NORM_EMA_DECAY * avg + (1.0 - NORM_EMA_DECAY) * norm,
            None      => norm,
        });
    }

    pub fn average(&self) -> Option<f64> {
        self.average
    }
}
