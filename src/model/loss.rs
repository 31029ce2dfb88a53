use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;

use crate::error::Result;
use crate::model::architecture::StackOutput;

/// Reconstruction objective for one greedy stage.
///
/// Mean squared error between the decoded output and the input, plus an
/// optional L1 penalty on the code produced by the layer being trained.
#[derive(Clone, Debug, Default)]
pub struct ReconstructionLoss {
    sparsity_weight: f64,
}

impl ReconstructionLoss {
    pub fn new(sparsity_weight: f64) -> Self {
        Self { sparsity_weight }
    }

    /// Loss of `output` when training `layer`
    pub fn forward<B: Backend>(&self, output: &StackOutput<B>, layer: usize) -> Result<Tensor<B, 1>> {
        let input = output.encoded(Some(0))?.clone();
        let mse = MseLoss::new().forward(output.decoded().clone(), input, Reduction::Mean);

        if self.sparsity_weight <= 0.0 {
            return Ok(mse);
        }

        let code = output.encoded(Some(layer + 1))?.clone();
        let penalty = code.abs().mean().mul_scalar(self.sparsity_weight);
        Ok(mse + penalty)
    }
}

/// Metrics for evaluation
pub mod metrics {
    use burn::prelude::*;

    /// Mean squared error between two tensors of equal shape
    pub fn mse<B: Backend, const D: usize>(predictions: Tensor<B, D>, targets: Tensor<B, D>) -> f64 {
        (predictions - targets)
            .powf_scalar(2.0)
            .mean()
            .into_scalar()
            .elem::<f64>()
    }

    /// Peak signal-to-noise ratio in dB for images scaled to `[0, peak]`
    pub fn psnr(mse: f64, peak: f64) -> f64 {
        if mse <= 0.0 {
            return f64::INFINITY;
        }
        10.0 * (peak * peak / mse).log10()
    }
}
