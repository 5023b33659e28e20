//! Classifier-Free Guidance utilities

use burn::prelude::*;

/// Apply classifier-free guidance
///
/// Combines conditional and unconditional predictions:
/// `output = uncond + guidance_scale * (cond - uncond)`
pub fn apply_guidance<B: Backend>(
    noise_pred_uncond: Tensor<B, 4>,
    noise_pred_cond: Tensor<B, 4>,
    guidance_scale: f64,
) -> Tensor<B, 4> {
    noise_pred_uncond.clone() + (noise_pred_cond - noise_pred_uncond) * guidance_scale
}

/// Whether a guidance scale makes the unconditional branch irrelevant
pub fn is_unit_scale(guidance_scale: f64) -> bool {
    guidance_scale == 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_guidance_extrapolates() {
        let device = Default::default();
        let uncond: Tensor<TestBackend, 4> = Tensor::full([1, 1, 2, 2], 1.0, &device);
        let cond: Tensor<TestBackend, 4> = Tensor::full([1, 1, 2, 2], 2.0, &device);

        let out: Vec<f32> = apply_guidance(uncond, cond, 7.5).into_data().to_vec().unwrap();
        assert!(out.iter().all(|v| (v - 8.5).abs() < 1e-6));
    }

    #[test]
    fn test_unit_scale_returns_conditional() {
        let device = Default::default();
        let uncond: Tensor<TestBackend, 4> = Tensor::full([1, 1, 2, 2], -3.0, &device);
        let cond: Tensor<TestBackend, 4> = Tensor::full([1, 1, 2, 2], 0.25, &device);

        let out: Vec<f32> = apply_guidance(uncond, cond, 1.0).into_data().to_vec().unwrap();
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
        assert!(is_unit_scale(1.0));
        assert!(!is_unit_scale(7.5));
    }
}
