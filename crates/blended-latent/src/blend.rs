//! Masked DDIM reverse process
//!
//! Each step denoises the whole latent, then puts back the source latent
//! (noised to the level the step lands on) everywhere the mask is 0.

use blended_latent_samplers::{DdimSampler, DdimStep, NoiseSource, StochasticEncoder};
use burn::prelude::*;
use tracing::{debug, info_span};

use crate::collaborators::DenoiserNetwork;
use crate::context::ExecutionContext;
use crate::debug::{check_tensor_if, tensor_stats};
use crate::denoiser::GuidedDenoiser;
use crate::error::{ConfigError, Result};
use crate::mask::Mask;

/// What to report in [`StepInfo`] after each step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepOutput {
    /// No output, minimal overhead
    #[default]
    None,
    /// Blended latent after the step
    Latent,
    /// Predicted clean latent x0 of the step
    PredictedOriginal,
}

/// Information passed to step callback
pub struct StepInfo<B: Backend> {
    /// Iterations completed so far, minus one (0-indexed)
    pub step: usize,
    /// Total number of iterations (`t_enc + 1`)
    pub total_steps: usize,
    /// Training timestep of the schedule step just taken
    pub timestep: usize,
    /// Output based on StepOutput setting
    pub output: Option<Tensor<B, 4>>,
}

/// Inputs of one blended reverse run
#[derive(Debug, Clone)]
pub struct BlendInputs<B: Backend> {
    /// Source latent noised to `t_enc`
    pub z_enc: Tensor<B, 4>,
    /// Clean source latent
    pub z0: Tensor<B, 4>,
    pub conditioning: Tensor<B, 3>,
    /// Required unless `scale == 1`
    pub unconditional: Option<Tensor<B, 3>>,
    /// Latent-resolution mask `[1 | batch, 1, h, w]`
    pub mask: Tensor<B, 4>,
    /// Noise used to re-noise `z0`; the same sample every step
    pub noise: Tensor<B, 4>,
    pub t_enc: usize,
    pub scale: f64,
}

/// Reverse process from `t_enc` down to step 0 with per-step blending
pub struct BlendedReverseLoop<'a, N> {
    sampler: &'a DdimSampler,
    denoiser: &'a GuidedDenoiser<N>,
}

impl<'a, N> BlendedReverseLoop<'a, N> {
    pub fn new(sampler: &'a DdimSampler, denoiser: &'a GuidedDenoiser<N>) -> Self {
        Self { sampler, denoiser }
    }

    pub fn run<B: Backend>(
        &self,
        inputs: BlendInputs<B>,
        noise_source: &mut NoiseSource,
        ctx: &ExecutionContext<B>,
    ) -> Result<Tensor<B, 4>>
    where
        N: DenoiserNetwork<B>,
    {
        self.run_with_callback(inputs, noise_source, ctx, StepOutput::None, |_| {})
    }

    /// Run the loop, reporting every step to `callback`
    pub fn run_with_callback<B: Backend, F>(
        &self,
        inputs: BlendInputs<B>,
        noise_source: &mut NoiseSource,
        ctx: &ExecutionContext<B>,
        step_output: StepOutput,
        mut callback: F,
    ) -> Result<Tensor<B, 4>>
    where
        N: DenoiserNetwork<B>,
        F: FnMut(StepInfo<B>),
    {
        let mask = self.check(&inputs)?;
        let BlendInputs {
            z_enc,
            z0,
            conditioning,
            unconditional,
            noise,
            t_enc,
            scale,
            ..
        } = inputs;

        let schedule = self.sampler.schedule();
        let total_steps = t_enc + 1;
        let debug_sampler = ctx.debug.sampler;
        let debug_nan = ctx.debug.nan;

        let _span = info_span!("blended_reverse_loop", t_enc, total_steps, scale).entered();
        if debug_sampler {
            debug!(latent = %tensor_stats(&z_enc), "initial latent");
        }

        let keep = mask.clone().neg() + 1.0;
        let mut latent = z_enc;

        for (i, step) in (0..=t_enc).rev().enumerate() {
            let entry = schedule.entry(step).map_err(ConfigError::from)?;

            let noise_pred = self.denoiser.predict(
                latent.clone(),
                step,
                entry,
                &conditioning,
                unconditional.as_ref(),
                scale,
                ctx,
            )?;

            let DdimStep {
                prev_latent,
                pred_original,
            } = self
                .sampler
                .step(latent, noise_pred, step, noise_source)
                .map_err(ConfigError::from)?;

            let orig = StochasticEncoder
                .encode_to_prev(z0.clone(), step, schedule, noise.clone())
                .map_err(ConfigError::from)?;

            latent = prev_latent * mask.clone() + orig * keep.clone();
            check_tensor_if(&latent, &format!("step_{}_latent", step), debug_nan);

            debug!(step, timestep = entry.timestep, "blended step");
            if debug_sampler && i < 3 {
                debug!(
                    step,
                    latent = %tensor_stats(&latent),
                    pred_original = %tensor_stats(&pred_original),
                    "step stats"
                );
            }

            let output = match step_output {
                StepOutput::None => None,
                StepOutput::Latent => Some(latent.clone()),
                StepOutput::PredictedOriginal => Some(pred_original),
            };

            callback(StepInfo {
                step: i,
                total_steps,
                timestep: entry.timestep,
                output,
            });
        }

        if debug_sampler {
            debug!(latent = %tensor_stats(&latent), "final latent");
        }

        Ok(latent)
    }

    /// Validate everything before the first denoiser call, returning the mask
    /// expanded to the latent shape
    fn check<B: Backend>(&self, inputs: &BlendInputs<B>) -> Result<Tensor<B, 4>> {
        let steps = self.sampler.num_steps();
        if inputs.t_enc >= steps {
            return Err(ConfigError::StartStepOutOfRange {
                t_enc: inputs.t_enc,
                steps,
            }
            .into());
        }

        let dims = inputs.z_enc.dims();
        if inputs.z0.dims() != dims {
            return Err(ConfigError::shape_mismatch("source latent", &dims, &inputs.z0.dims()).into());
        }
        if inputs.noise.dims() != dims {
            return Err(ConfigError::shape_mismatch("noise", &dims, &inputs.noise.dims()).into());
        }

        let [batch, channels, height, width] = dims;
        let [mask_batch, mask_channels, mask_height, mask_width] = inputs.mask.dims();
        if (mask_batch != 1 && mask_batch != batch)
            || (mask_height, mask_width) != (height, width)
        {
            return Err(ConfigError::shape_mismatch(
                "latent mask",
                &[batch, mask_channels, height, width],
                &inputs.mask.dims(),
            )
            .into());
        }

        let mask = Mask::new(inputs.mask.clone())?;

        self.denoiser.check_inputs(
            batch,
            &inputs.conditioning,
            inputs.unconditional.as_ref(),
            inputs.scale,
        )?;

        Ok(mask.into_tensor().expand([batch, channels, height, width]))
    }
}
