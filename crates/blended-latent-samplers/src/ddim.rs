//! DDIM (Denoising Diffusion Implicit Models) reverse step
//!
//! Deterministic for `eta = 0`; injects fresh noise scaled by the schedule's
//! sigma otherwise.

use burn::prelude::*;

use crate::noise::NoiseSource;
use crate::scheduler::{NoiseSchedule, ScheduleError};

/// DDIM sampler configuration
#[derive(Debug, Clone)]
pub struct DdimConfig {
    /// Number of inference steps
    pub num_inference_steps: usize,
    /// Eta parameter (0.0 = deterministic DDIM, 1.0 = DDPM-like)
    pub eta: f64,
}

impl Default for DdimConfig {
    fn default() -> Self {
        Self {
            num_inference_steps: 50,
            eta: 0.0,
        }
    }
}

/// Result of one reverse step
pub struct DdimStep<B: Backend> {
    /// Latent at the level the step lands on
    pub prev_latent: Tensor<B, 4>,
    /// Predicted clean latent x0
    pub pred_original: Tensor<B, 4>,
}

/// DDIM Sampler
pub struct DdimSampler {
    schedule: NoiseSchedule,
}

impl DdimSampler {
    pub fn new(schedule: NoiseSchedule) -> Self {
        Self { schedule }
    }

    /// Build the SD 1.x schedule for `config` and wrap it
    pub fn sd1x(config: &DdimConfig) -> Result<Self, ScheduleError> {
        Ok(Self::new(NoiseSchedule::sd1x(
            config.num_inference_steps,
            config.eta,
        )?))
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    /// Get the number of inference steps
    pub fn num_steps(&self) -> usize {
        self.schedule.len()
    }

    /// Perform one DDIM step
    ///
    /// # Arguments
    /// * `latent` - Current noisy latent [batch, channels, height, width]
    /// * `noise_pred` - Guided noise estimate for `latent`
    /// * `step` - Schedule index of `latent` (0 = least noisy)
    /// * `noise` - Source for the stochastic term; untouched when sigma is 0
    pub fn step<B: Backend>(
        &self,
        latent: Tensor<B, 4>,
        noise_pred: Tensor<B, 4>,
        step: usize,
        noise: &mut NoiseSource,
    ) -> Result<DdimStep<B>, ScheduleError> {
        let entry = self.schedule.entry(step)?;
        let alpha_prev = entry.alpha_cumprod_prev;
        let sigma = entry.sigma;

        // pred_x0 = (latent - sqrt(1-alpha_t) * noise_pred) / sqrt(alpha_t)
        let pred_original = (latent.clone()
            - noise_pred.clone() * entry.sqrt_one_minus_alpha_cumprod())
            / entry.sqrt_alpha_cumprod();

        // Direction pointing to x_t
        let dir_coef = (1.0 - alpha_prev - sigma * sigma).max(0.0).sqrt();
        let prev_latent = pred_original.clone() * alpha_prev.sqrt() + noise_pred * dir_coef;

        let prev_latent = if sigma > 0.0 {
            prev_latent + noise.normal_like(&latent) * sigma
        } else {
            prev_latent
        };

        Ok(DdimStep {
            prev_latent,
            pred_original,
        })
    }
}
