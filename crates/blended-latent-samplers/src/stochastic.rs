//! Stochastic encoding (single-jump forward diffusion)
//!
//! `q(x_t | x_0)` is Gaussian, so a clean latent can be taken to any noise
//! level in one step:
//!
//! `x_t = sqrt(ᾱ_t) * x_0 + sqrt(1 - ᾱ_t) * noise`
//!
//! The blended sampler uses this twice: once to partially invert the source
//! latent to the starting step, and once per reverse step to re-noise the
//! source latent to the level the step lands on.

use burn::prelude::*;

use crate::scheduler::{NoiseSchedule, ScheduleError};

/// Forward-diffusion jump from a clean latent to a schedule step
#[derive(Debug, Clone, Copy, Default)]
pub struct StochasticEncoder;

impl StochasticEncoder {
    /// Noise `latent` to the level of `step`
    ///
    /// `noise` must have the same shape as `latent`.
    pub fn encode<B: Backend>(
        &self,
        latent: Tensor<B, 4>,
        step: usize,
        schedule: &NoiseSchedule,
        noise: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, ScheduleError> {
        let entry = schedule.entry(step)?;
        Ok(add_noise(latent, entry.alpha_cumprod, noise))
    }

    /// Noise `latent` to the level the update at `step` lands on
    pub fn encode_to_prev<B: Backend>(
        &self,
        latent: Tensor<B, 4>,
        step: usize,
        schedule: &NoiseSchedule,
        noise: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, ScheduleError> {
        let entry = schedule.entry(step)?;
        Ok(add_noise(latent, entry.alpha_cumprod_prev, noise))
    }
}

/// `sqrt(ᾱ) * latent + sqrt(1 - ᾱ) * noise`
pub fn add_noise<B: Backend>(
    latent: Tensor<B, 4>,
    alpha_cumprod: f64,
    noise: Tensor<B, 4>,
) -> Tensor<B, 4> {
    latent * alpha_cumprod.sqrt() + noise * (1.0 - alpha_cumprod).sqrt()
}
