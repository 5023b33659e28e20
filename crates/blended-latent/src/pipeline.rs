//! Blended latent diffusion pipeline
//!
//! Ties the collaborators, the sampler and the compositor together:
//!
//! 1. Encode the source image to a latent (mode of the encoder distribution,
//!    times the latent scale factor)
//! 2. Noise it to `t_enc` with one fixed noise sample
//! 3. Run the masked reverse loop down to step 0
//! 4. Decode and composite into the source with a feathered mask

use std::path::PathBuf;

use blended_latent_samplers::{is_unit_scale, DdimSampler, NoiseSource, StochasticEncoder};
use burn::prelude::*;
use tracing::{debug, info};

use crate::blend::{BlendInputs, BlendedReverseLoop, StepInfo, StepOutput};
use crate::collaborators::{DenoiserNetwork, LatentDecoder, LatentEncoder, TextEncoder};
use crate::composite::Compositor;
use crate::config::{Mode, RunConfig};
use crate::context::ExecutionContext;
use crate::debug::{check_tensor_if, tensor_stats};
use crate::denoiser::GuidedDenoiser;
use crate::error::{BlendError, ConfigError, Result, Stage};
use crate::image_io::{save_batch_images, save_grid};
use crate::mask::Mask;

/// Result of a blended edit
#[derive(Debug, Clone)]
pub struct EditOutput<B: Backend> {
    /// Decoded samples, before compositing
    pub samples: Tensor<B, 4>,
    /// Samples composited into the source image
    pub merged: Tensor<B, 4>,
    /// Final latent (scaled)
    pub latent: Tensor<B, 4>,
}

/// Blended latent diffusion editor
pub struct BlendedLatentDiffusion<B: Backend, E, D, T, N> {
    config: RunConfig,
    ctx: ExecutionContext<B>,
    sampler: DdimSampler,
    compositor: Compositor,
    encoder: E,
    decoder: D,
    text_encoder: T,
    denoiser: GuidedDenoiser<N>,
}

impl<B, E, D, T, N> BlendedLatentDiffusion<B, E, D, T, N>
where
    B: Backend,
    E: LatentEncoder<B>,
    D: LatentDecoder<B>,
    T: TextEncoder<B>,
    N: DenoiserNetwork<B>,
{
    /// Validate `config` and build the sampling schedule
    pub fn new(
        config: RunConfig,
        ctx: ExecutionContext<B>,
        encoder: E,
        decoder: D,
        text_encoder: T,
        denoiser: N,
    ) -> Result<Self> {
        config.validate()?;
        let sampler = DdimSampler::new(config.noise_schedule()?);
        let compositor = Compositor::new(config.downsample_factor);

        Ok(Self {
            config,
            ctx,
            sampler,
            compositor,
            encoder,
            decoder,
            text_encoder,
            denoiser: GuidedDenoiser::new(denoiser),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn context(&self) -> &ExecutionContext<B> {
        &self.ctx
    }

    pub fn sampler(&self) -> &DdimSampler {
        &self.sampler
    }

    /// Image to scaled latent (mode of the encoder distribution)
    pub fn encode(&self, image: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        self.check_image(&image)?;
        let dist = self
            .encoder
            .encode(image, &self.ctx)
            .map_err(BlendError::collaborator(Stage::Inversion))?;

        let latent = dist.mode() * self.config.latent_scale_factor;
        let (lh, lw) = self.config.latent_size();
        let [b, c, h, w] = latent.dims();
        if (c, h, w) != (self.config.latent_channels, lh, lw) {
            return Err(ConfigError::shape_mismatch(
                "latent",
                &[b, self.config.latent_channels, lh, lw],
                &latent.dims(),
            )
            .into());
        }
        check_tensor_if(&latent, "init_latent", self.ctx.debug.nan);
        Ok(latent)
    }

    /// Scaled latent to image
    pub fn decode(&self, latent: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let image = self
            .decoder
            .decode(latent / self.config.latent_scale_factor, &self.ctx)
            .map_err(BlendError::collaborator(Stage::Decode))?;
        check_tensor_if(&image, "decoded", self.ctx.debug.nan);
        Ok(image)
    }

    /// Encode then decode, without blending
    pub fn reconstruct_test(&self, image: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        info!("reconstruct test");
        let latent = self.encode(image)?;
        self.decode(latent)
    }

    /// Regenerate the masked region of `image` guided by `prompts`
    ///
    /// One sample is produced per prompt. `image` may have batch 1 or one
    /// image per prompt.
    pub fn edit(
        &self,
        image: Tensor<B, 4>,
        mask: &Mask<B>,
        prompts: &[String],
        noise_source: &mut NoiseSource,
    ) -> Result<EditOutput<B>> {
        self.edit_with_callback(image, mask, prompts, noise_source, StepOutput::None, |_| {})
    }

    /// [`edit`](Self::edit) reporting every reverse step to `callback`
    pub fn edit_with_callback<F>(
        &self,
        image: Tensor<B, 4>,
        mask: &Mask<B>,
        prompts: &[String],
        noise_source: &mut NoiseSource,
        step_output: StepOutput,
        callback: F,
    ) -> Result<EditOutput<B>>
    where
        F: FnMut(StepInfo<B>),
    {
        let batch = prompts.len();
        if batch == 0 {
            return Err(ConfigError::invalid("prompts", "at least one prompt is required").into());
        }
        let image_batch = image.dims()[0];
        if image_batch != 1 && image_batch != batch {
            return Err(ConfigError::invalid(
                "prompts",
                format!("{batch} prompts for a batch of {image_batch} images"),
            )
            .into());
        }
        self.check_mask(mask)?;

        let t_enc = self.config.start_step();
        let scale = self.config.scale;
        info!(
            batch,
            t_enc,
            steps = self.sampler.num_steps(),
            scale,
            precision = self.ctx.precision.name(),
            "blended edit"
        );

        // Conditioning
        let unconditional = if is_unit_scale(scale) {
            None
        } else {
            let empty = vec![String::new(); batch];
            Some(
                self.text_encoder
                    .embed(&empty, &self.ctx)
                    .map_err(BlendError::collaborator(Stage::TextEncoding))?,
            )
        };
        let conditioning = self
            .text_encoder
            .embed(prompts, &self.ctx)
            .map_err(BlendError::collaborator(Stage::TextEncoding))?;

        // Partial inversion
        let mut z0 = self.encode(image.clone())?;
        if z0.dims()[0] != batch {
            z0 = z0.repeat_dim(0, batch);
        }
        let noise = noise_source.normal_like(&z0);
        let z_enc = StochasticEncoder
            .encode(z0.clone(), t_enc, self.sampler.schedule(), noise.clone())
            .map_err(ConfigError::from)?;
        if self.ctx.debug.sampler {
            debug!(z_enc = %tensor_stats(&z_enc), "inverted source");
        }

        let (lh, lw) = self.config.latent_size();
        let latent = BlendedReverseLoop::new(&self.sampler, &self.denoiser).run_with_callback(
            BlendInputs {
                z_enc,
                z0,
                conditioning,
                unconditional,
                mask: mask.to_latent(lh, lw),
                noise,
                t_enc,
                scale,
            },
            noise_source,
            &self.ctx,
            step_output,
            callback,
        )?;

        let samples = self.decode(latent.clone())?;
        let merged = self
            .compositor
            .composite(image, samples.clone(), mask.tensor().clone())?;

        Ok(EditOutput {
            samples,
            merged,
            latent,
        })
    }

    /// Run the configured mode
    ///
    /// `reconstruct_test` returns the round-tripped image, `bld` the
    /// composited edit of `n_samples` copies of the prompt.
    pub fn run(
        &self,
        image: Tensor<B, 4>,
        mask: &Mask<B>,
        noise_source: &mut NoiseSource,
    ) -> Result<Tensor<B, 4>> {
        match self.config.mode {
            Mode::ReconstructTest => self.reconstruct_test(image),
            Mode::Blended => {
                let mask = if self.config.invert_mask {
                    mask.inverted()
                } else {
                    mask.clone()
                };
                let prompts = vec![self.config.prompt.clone(); self.config.n_samples];
                Ok(self.edit(image, &mask, &prompts, noise_source)?.merged)
            }
        }
    }

    /// [`run`](Self::run), then write the results under `outdir`
    ///
    /// Honours `skip_save` and `skip_grid`; returns the paths written.
    pub fn run_and_save(
        &self,
        image: Tensor<B, 4>,
        mask: &Mask<B>,
        noise_source: &mut NoiseSource,
    ) -> Result<Vec<PathBuf>> {
        let result = self.run(image, mask, noise_source)?;

        let mut paths = Vec::new();
        if !self.config.skip_save {
            paths.extend(save_batch_images(result.clone(), &self.config.outdir)?);
        }
        if !self.config.skip_grid {
            paths.push(save_grid(result, &self.config.outdir, self.config.grid_rows())?);
        }
        Ok(paths)
    }

    fn check_image(&self, image: &Tensor<B, 4>) -> Result<(), ConfigError> {
        let [b, c, h, w] = image.dims();
        if (c, h, w) != (3, self.config.height, self.config.width) {
            return Err(ConfigError::shape_mismatch(
                "image",
                &[b, 3, self.config.height, self.config.width],
                &image.dims(),
            ));
        }
        Ok(())
    }

    fn check_mask(&self, mask: &Mask<B>) -> Result<(), ConfigError> {
        let [b, c, h, w] = mask.dims();
        if (c, h, w) != (1, self.config.height, self.config.width) {
            return Err(ConfigError::shape_mismatch(
                "mask",
                &[b, 1, self.config.height, self.config.width],
                &mask.dims(),
            ));
        }
        Ok(())
    }
}
