//! Interfaces to the external models
//!
//! The blended sampler never looks inside the first-stage autoencoder, the
//! denoiser network or the text encoder. It only calls them through these
//! traits, passing the run's [`ExecutionContext`] along.

use burn::prelude::*;

use crate::context::ExecutionContext;
use crate::error::CollaboratorError;

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Diagonal Gaussian over latents, as produced by a VAE encoder
#[derive(Debug, Clone)]
pub struct LatentDistribution<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub logvar: Tensor<B, 4>,
}

impl<B: Backend> LatentDistribution<B> {
    /// Split encoder moments `[batch, 2C, h, w]` into mean and log-variance
    pub fn from_moments(moments: Tensor<B, 4>) -> Self {
        let [b, c, h, w] = moments.dims();
        let half_c = c / 2;

        let mean = moments.clone().slice([0..b, 0..half_c, 0..h, 0..w]);
        let logvar = moments.slice([0..b, half_c..c, 0..h, 0..w]);

        Self {
            mean,
            // Clamp logvar for stability
            logvar: logvar.clamp(-30.0, 20.0),
        }
    }

    /// Deterministic latent (the mean)
    pub fn mode(&self) -> Tensor<B, 4> {
        self.mean.clone()
    }

    /// Reparameterised sample `mean + std * noise`
    pub fn sample(&self, noise: Tensor<B, 4>) -> Tensor<B, 4> {
        let std = (self.logvar.clone() * 0.5).exp();
        self.mean.clone() + std * noise
    }
}

/// First-stage encoder: pixels in `[-1, 1]` to a latent distribution
pub trait LatentEncoder<B: Backend> {
    fn encode(
        &self,
        image: Tensor<B, 4>,
        ctx: &ExecutionContext<B>,
    ) -> CollaboratorResult<LatentDistribution<B>>;
}

/// First-stage decoder: unscaled latents to pixels in `[-1, 1]`
pub trait LatentDecoder<B: Backend> {
    fn decode(&self, latent: Tensor<B, 4>, ctx: &ExecutionContext<B>)
        -> CollaboratorResult<Tensor<B, 4>>;
}

/// Text conditioning model
pub trait TextEncoder<B: Backend> {
    /// Embed each prompt, returning `[prompts.len(), seq_len, embed_dim]`
    fn embed(&self, prompts: &[String], ctx: &ExecutionContext<B>)
        -> CollaboratorResult<Tensor<B, 3>>;
}

/// Noise-predicting denoiser network
pub trait DenoiserNetwork<B: Backend> {
    /// Predict the noise in `latent` at the given training timesteps
    ///
    /// `timesteps` holds one entry per batch element.
    fn forward(
        &self,
        latent: Tensor<B, 4>,
        timesteps: Tensor<B, 1>,
        conditioning: Tensor<B, 3>,
        ctx: &ExecutionContext<B>,
    ) -> CollaboratorResult<Tensor<B, 4>>;

    /// Whether conditional and unconditional passes may share one call on a
    /// doubled batch
    fn supports_batched_guidance(&self) -> bool {
        true
    }
}

impl<B: Backend, T: LatentEncoder<B> + ?Sized> LatentEncoder<B> for &T {
    fn encode(
        &self,
        image: Tensor<B, 4>,
        ctx: &ExecutionContext<B>,
    ) -> CollaboratorResult<LatentDistribution<B>> {
        (**self).encode(image, ctx)
    }
}

impl<B: Backend, T: LatentDecoder<B> + ?Sized> LatentDecoder<B> for &T {
    fn decode(
        &self,
        latent: Tensor<B, 4>,
        ctx: &ExecutionContext<B>,
    ) -> CollaboratorResult<Tensor<B, 4>> {
        (**self).decode(latent, ctx)
    }
}

impl<B: Backend, T: TextEncoder<B> + ?Sized> TextEncoder<B> for &T {
    fn embed(
        &self,
        prompts: &[String],
        ctx: &ExecutionContext<B>,
    ) -> CollaboratorResult<Tensor<B, 3>> {
        (**self).embed(prompts, ctx)
    }
}

impl<B: Backend, T: DenoiserNetwork<B> + ?Sized> DenoiserNetwork<B> for &T {
    fn forward(
        &self,
        latent: Tensor<B, 4>,
        timesteps: Tensor<B, 1>,
        conditioning: Tensor<B, 3>,
        ctx: &ExecutionContext<B>,
    ) -> CollaboratorResult<Tensor<B, 4>> {
        (**self).forward(latent, timesteps, conditioning, ctx)
    }

    fn supports_batched_guidance(&self) -> bool {
        (**self).supports_batched_guidance()
    }
}
