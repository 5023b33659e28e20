//! Error taxonomy for blended editing runs

use std::fmt;
use std::path::PathBuf;

use blended_latent_samplers::ScheduleError;
use thiserror::Error;

pub type Result<T, E = BlendError> = std::result::Result<T, E>;

/// Top-level error for a blended editing run
#[derive(Error, Debug)]
pub enum BlendError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid mask: {0}")]
    InvalidMask(#[from] InvalidMaskError),

    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("could not parse run configuration: {0}")]
    ConfigFile(#[from] serde_json::Error),
}

impl BlendError {
    pub(crate) fn collaborator(stage: Stage) -> impl FnOnce(CollaboratorError) -> Self {
        move |source| BlendError::Collaborator { stage, source }
    }

    /// Stage that failed, for collaborator errors
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BlendError::Collaborator { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Invalid configuration, detected before the reverse loop starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("t_enc {t_enc} is outside a schedule of {steps} steps")]
    StartStepOutOfRange { t_enc: usize, steps: usize },

    #[error("{0} sampler not supported")]
    UnsupportedSolver(&'static str),

    #[error("{what}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("guidance scale must be positive and finite, got {0}")]
    InvalidGuidanceScale(f64),

    #[error("guidance scale {0} requires an unconditional conditioning")]
    MissingUnconditional(f64),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn shape_mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        ConfigError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidMaskError {
    #[error("{count} values outside [0, 1] (min {min}, max {max})")]
    OutOfRange { count: usize, min: f32, max: f32 },

    #[error("{0} non-finite values")]
    NonFinite(usize),

    #[error("expected a single channel, got {0}")]
    Channels(usize),

    #[error("mask data unreadable: {0}")]
    Unreadable(String),
}

/// Failure reported by an external collaborator (encoder, decoder, text
/// encoder or denoiser network)
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CollaboratorError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it as the source
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Pipeline stage, used to say where a run aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TextEncoding,
    Inversion,
    Denoising { step: usize },
    Decode,
    Composite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::TextEncoding => write!(f, "text encoding"),
            Stage::Inversion => write!(f, "inversion"),
            Stage::Denoising { step } => write!(f, "denoising step {step}"),
            Stage::Decode => write!(f, "decode"),
            Stage::Composite => write!(f, "composite"),
        }
    }
}
