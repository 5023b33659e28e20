//! Blended latent diffusion
//!
//! Mask-guided local editing of an image with a latent diffusion model: the
//! source is partially inverted into the latent space, then denoised under a
//! text prompt while the unmasked region is pinned to a re-noised copy of the
//! source at every step.
//!
//! The models themselves stay outside this crate and are reached through the
//! traits in [`collaborators`].
//!
//! # Example
//!
//! ```ignore
//! use blended_latent::{BlendedLatentDiffusion, ExecutionContext, RunConfig};
//! use blended_latent::image_io::load_inputs;
//!
//! let config = RunConfig::from_json_file("run.json")?;
//! let ctx = ExecutionContext::from_config(device, &config);
//! let (image, mask) = load_inputs(&config, &ctx.device)?;
//! let mut noise = config.noise_source();
//! let pipeline = BlendedLatentDiffusion::new(config, ctx, vae_enc, vae_dec, clip, unet)?;
//! let paths = pipeline.run_and_save(image, &mask, &mut noise)?;
//! ```

pub mod blend;
pub mod collaborators;
pub mod composite;
pub mod config;
pub mod context;
pub mod debug;
pub mod denoiser;
pub mod error;
pub mod image_io;
pub mod mask;
pub mod pipeline;

pub use blend::{BlendInputs, BlendedReverseLoop, StepInfo, StepOutput};
pub use collaborators::{
    DenoiserNetwork, LatentDecoder, LatentDistribution, LatentEncoder, TextEncoder,
};
pub use composite::Compositor;
pub use config::{BetaScheduleConfig, DebugConfig, Mode, PrecisionMode, RunConfig, SolverKind};
pub use context::ExecutionContext;
pub use debug::{check_tensor_if, tensor_stats, TensorStats};
pub use denoiser::GuidedDenoiser;
pub use error::{
    BlendError, CollaboratorError, ConfigError, InvalidMaskError, Result, Stage,
};
pub use mask::Mask;
pub use pipeline::{BlendedLatentDiffusion, EditOutput};

pub use blended_latent_samplers as samplers;
