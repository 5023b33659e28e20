//! Run-level configuration
//!
//! A [`RunConfig`] is built once (in code or from JSON) and passed by
//! reference to every component. [`RunConfig::validate`] checks everything
//! that can be checked before a model is touched.

use std::path::{Path, PathBuf};

use blended_latent_samplers::{BetaKind, BetaSchedule, NoiseSchedule, NoiseSource};
use serde::{Deserialize, Serialize};

use crate::error::{BlendError, ConfigError, Result};

/// What a run does with the source image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Encode then decode, no blending (identity-path sanity check)
    #[default]
    ReconstructTest,
    /// Full blended latent diffusion edit
    #[serde(rename = "bld")]
    Blended,
}

/// Reverse-process solver
///
/// Only DDIM is implemented; PLMS is kept as a named variant so that a request
/// for it is rejected explicitly instead of silently falling back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    Ddim,
    Plms,
}

impl SolverKind {
    pub fn name(&self) -> &'static str {
        match self {
            SolverKind::Ddim => "DDIM",
            SolverKind::Plms => "PLMS",
        }
    }

    pub fn ensure_supported(self) -> Result<(), ConfigError> {
        match self {
            SolverKind::Ddim => Ok(()),
            SolverKind::Plms => Err(ConfigError::UnsupportedSolver(self.name())),
        }
    }
}

/// Numeric precision requested for collaborator calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionMode {
    /// Full 32-bit precision everywhere
    Full,
    /// Collaborators may run in reduced precision
    #[default]
    Autocast,
}

impl PrecisionMode {
    pub fn name(&self) -> &'static str {
        match self {
            PrecisionMode::Full => "full",
            PrecisionMode::Autocast => "autocast",
        }
    }
}

/// Debug flags for pipeline and sampler diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Log latent statistics while sampling
    pub sampler: bool,
    /// Panic on NaN/Inf values in tensors
    pub nan: bool,
}

/// Beta schedule as stored in a run configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BetaScheduleConfig {
    pub num_train_steps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    /// Scaled-linear (SD 1.x) when true, plain linear otherwise
    pub scaled_linear: bool,
}

impl Default for BetaScheduleConfig {
    fn default() -> Self {
        let sd = BetaSchedule::sd1x();
        Self {
            num_train_steps: sd.num_train_steps,
            beta_start: sd.beta_start,
            beta_end: sd.beta_end,
            scaled_linear: sd.kind == BetaKind::ScaledLinear,
        }
    }
}

impl From<BetaScheduleConfig> for BetaSchedule {
    fn from(config: BetaScheduleConfig) -> Self {
        BetaSchedule {
            num_train_steps: config.num_train_steps,
            beta_start: config.beta_start,
            beta_end: config.beta_end,
            kind: if config.scaled_linear {
                BetaKind::ScaledLinear
            } else {
                BetaKind::Linear
            },
        }
    }
}

/// Configuration for a blended editing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Prompt describing the content of the masked region
    pub prompt: String,
    /// Directory results are written to
    pub outdir: PathBuf,
    pub ddim_steps: usize,
    /// 0.0 = deterministic sampling
    pub ddim_eta: f64,
    /// Image height in pixel space
    pub height: usize,
    /// Image width in pixel space
    pub width: usize,
    pub latent_channels: usize,
    /// Pixel-to-latent downsampling factor
    pub downsample_factor: usize,
    /// Samples per prompt (batch size)
    pub n_samples: usize,
    /// Images per grid row (0 = n_samples)
    pub n_rows: usize,
    /// Classifier-free guidance scale
    pub scale: f64,
    /// Seed of [`RunConfig::noise_source`]
    pub seed: u64,
    pub precision: PrecisionMode,
    /// Mask image path
    pub mask: PathBuf,
    /// Source image path
    pub src: PathBuf,
    pub mode: Mode,
    pub invert_mask: bool,
    pub solver: SolverKind,
    /// Step the source is inverted to; `None` = last step
    pub t_enc: Option<usize>,
    pub skip_save: bool,
    pub skip_grid: bool,
    pub beta_schedule: BetaScheduleConfig,
    /// Multiplier applied to encoder latents (and divided out before decoding)
    pub latent_scale_factor: f64,
    pub debug: DebugConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prompt: "a painting of a virus monster playing guitar".to_string(),
            outdir: PathBuf::from("outputs/blended-latent-diffusion-samples"),
            ddim_steps: 50,
            ddim_eta: 0.0,
            height: 512,
            width: 512,
            latent_channels: 4,
            downsample_factor: 8,
            n_samples: 1,
            n_rows: 0,
            scale: 7.5,
            seed: 42,
            precision: PrecisionMode::default(),
            mask: PathBuf::from("data/inpainting_examples/mask.png"),
            src: PathBuf::from("data/inpainting_examples/src.png"),
            mode: Mode::default(),
            invert_mask: false,
            solver: SolverKind::default(),
            t_enc: None,
            skip_save: false,
            skip_grid: false,
            beta_schedule: BetaScheduleConfig::default(),
            latent_scale_factor: 0.18215,
            debug: DebugConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| BlendError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Noise source seeded with `seed`
    pub fn noise_source(&self) -> NoiseSource {
        NoiseSource::seeded(self.seed)
    }

    /// Step the source image is partially inverted to
    pub fn start_step(&self) -> usize {
        self.t_enc.unwrap_or(self.ddim_steps.saturating_sub(1))
    }

    /// Latent spatial size `(height, width)`
    pub fn latent_size(&self) -> (usize, usize) {
        (
            self.height / self.downsample_factor,
            self.width / self.downsample_factor,
        )
    }

    /// Images per grid row
    pub fn grid_rows(&self) -> usize {
        if self.n_rows > 0 {
            self.n_rows
        } else {
            self.n_samples
        }
    }

    /// Build the sampling schedule this configuration describes
    pub fn noise_schedule(&self) -> Result<NoiseSchedule, ConfigError> {
        Ok(NoiseSchedule::build(
            &self.beta_schedule.into(),
            self.ddim_steps,
            self.ddim_eta,
        )?)
    }

    /// Check every constraint that does not need a model
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.solver.ensure_supported()?;

        for (field, value) in [
            ("height", self.height),
            ("width", self.width),
            ("latent_channels", self.latent_channels),
            ("downsample_factor", self.downsample_factor),
            ("n_samples", self.n_samples),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }

        for (field, value) in [("height", self.height), ("width", self.width)] {
            if value % self.downsample_factor != 0 {
                return Err(ConfigError::invalid(
                    field,
                    format!(
                        "{value} is not a multiple of the downsampling factor {}",
                        self.downsample_factor
                    ),
                ));
            }
        }

        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ConfigError::InvalidGuidanceScale(self.scale));
        }

        if !self.latent_scale_factor.is_finite() || self.latent_scale_factor <= 0.0 {
            return Err(ConfigError::invalid(
                "latent_scale_factor",
                format!("must be positive and finite, got {}", self.latent_scale_factor),
            ));
        }

        let schedule = self.noise_schedule()?;
        let t_enc = self.start_step();
        if t_enc >= schedule.len() {
            return Err(ConfigError::StartStepOutOfRange {
                t_enc,
                steps: schedule.len(),
            });
        }

        Ok(())
    }
}
