//! Classifier-free guided noise prediction

use blended_latent_samplers::{apply_guidance, is_unit_scale, ScheduleEntry};
use burn::prelude::*;

use crate::collaborators::DenoiserNetwork;
use crate::context::ExecutionContext;
use crate::debug::check_tensor_if;
use crate::error::{BlendError, CollaboratorError, ConfigError, Result, Stage};

/// Wraps a [`DenoiserNetwork`] with classifier-free guidance
#[derive(Debug, Clone)]
pub struct GuidedDenoiser<N> {
    network: N,
}

impl<N> GuidedDenoiser<N> {
    pub fn new(network: N) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Check the guidance inputs for a latent batch of `batch`
    pub fn check_inputs<B: Backend>(
        &self,
        batch: usize,
        conditioning: &Tensor<B, 3>,
        unconditional: Option<&Tensor<B, 3>>,
        scale: f64,
    ) -> Result<(), ConfigError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::InvalidGuidanceScale(scale));
        }

        let [cond_batch, seq_len, embed_dim] = conditioning.dims();
        if cond_batch != batch {
            return Err(ConfigError::shape_mismatch(
                "conditioning",
                &[batch, seq_len, embed_dim],
                &conditioning.dims(),
            ));
        }

        if is_unit_scale(scale) {
            return Ok(());
        }

        let unconditional = unconditional.ok_or(ConfigError::MissingUnconditional(scale))?;
        if unconditional.dims() != conditioning.dims() {
            return Err(ConfigError::shape_mismatch(
                "unconditional conditioning",
                &conditioning.dims(),
                &unconditional.dims(),
            ));
        }

        Ok(())
    }

    /// Guided noise estimate for `latent` at schedule step `step`
    ///
    /// `eps = eps_u + scale * (eps_c - eps_u)`. At scale 1 the unconditional
    /// pass is skipped and `unconditional` may be `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn predict<B: Backend>(
        &self,
        latent: Tensor<B, 4>,
        step: usize,
        entry: &ScheduleEntry,
        conditioning: &Tensor<B, 3>,
        unconditional: Option<&Tensor<B, 3>>,
        scale: f64,
        ctx: &ExecutionContext<B>,
    ) -> Result<Tensor<B, 4>>
    where
        N: DenoiserNetwork<B>,
    {
        let dims = latent.dims();
        let batch = dims[0];
        self.check_inputs(batch, conditioning, unconditional, scale)?;

        let stage = Stage::Denoising { step };
        let timestep = entry.timestep as f32;

        let unconditional = match unconditional {
            Some(uc) if !is_unit_scale(scale) => uc,
            _ => {
                let timesteps = Tensor::<B, 1>::full([batch], timestep, &ctx.device);
                let eps = self
                    .network
                    .forward(latent, timesteps, conditioning.clone(), ctx)
                    .map_err(BlendError::collaborator(stage))?;
                ensure_shape(&eps, dims, stage)?;
                check_tensor_if(&eps, &format!("step_{}_noise_cond", step), ctx.debug.nan);
                return Ok(eps);
            }
        };

        let (eps_uncond, eps_cond) = if self.network.supports_batched_guidance() {
            let latent_in = Tensor::cat(vec![latent.clone(), latent], 0);
            let timesteps = Tensor::<B, 1>::full([batch * 2], timestep, &ctx.device);
            let cond_in = Tensor::cat(vec![unconditional.clone(), conditioning.clone()], 0);

            let eps = self
                .network
                .forward(latent_in, timesteps, cond_in, ctx)
                .map_err(BlendError::collaborator(stage))?;
            let [_, c, h, w] = dims;
            ensure_shape(&eps, [batch * 2, c, h, w], stage)?;

            (
                eps.clone().slice([0..batch, 0..c, 0..h, 0..w]),
                eps.slice([batch..batch * 2, 0..c, 0..h, 0..w]),
            )
        } else {
            let timesteps = Tensor::<B, 1>::full([batch], timestep, &ctx.device);
            let eps_uncond = self
                .network
                .forward(latent.clone(), timesteps.clone(), unconditional.clone(), ctx)
                .map_err(BlendError::collaborator(stage))?;
            ensure_shape(&eps_uncond, dims, stage)?;

            let eps_cond = self
                .network
                .forward(latent, timesteps, conditioning.clone(), ctx)
                .map_err(BlendError::collaborator(stage))?;
            ensure_shape(&eps_cond, dims, stage)?;

            (eps_uncond, eps_cond)
        };

        check_tensor_if(&eps_uncond, &format!("step_{}_noise_uncond", step), ctx.debug.nan);
        check_tensor_if(&eps_cond, &format!("step_{}_noise_cond", step), ctx.debug.nan);

        Ok(apply_guidance(eps_uncond, eps_cond, scale))
    }
}

fn ensure_shape<B: Backend>(eps: &Tensor<B, 4>, expected: [usize; 4], stage: Stage) -> Result<()> {
    let actual = eps.dims();
    if actual == expected {
        return Ok(());
    }
    Err(BlendError::Collaborator {
        stage,
        source: CollaboratorError::new(format!(
            "noise prediction has shape {:?}, expected {:?}",
            actual, expected
        )),
    })
}
