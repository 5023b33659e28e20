//! Samplers for blended latent diffusion
//!
//! Host-side noise schedules, the single-jump stochastic encoder used for
//! partial inversion, the DDIM reverse step, and classifier-free guidance.
//! Randomness always comes from an explicit [`NoiseSource`].

pub mod scheduler;
pub mod stochastic;
pub mod ddim;
pub mod guidance;
pub mod noise;

pub use scheduler::{
    BetaKind, BetaSchedule, NoiseSchedule, ScheduleEntry, ScheduleError, ddim_timesteps,
};
pub use stochastic::{StochasticEncoder, add_noise};
pub use ddim::{DdimConfig, DdimSampler, DdimStep};
pub use guidance::{apply_guidance, is_unit_scale};
pub use noise::NoiseSource;
