//! Noise schedules for blended latent diffusion
//!
//! Two layers of precomputation live here:
//! - [`BetaSchedule`]: the training-time beta schedule, producing ᾱ over every
//!   training timestep.
//! - [`NoiseSchedule`]: the DDIM discretisation of that schedule for a given
//!   sampling step count and stochasticity `eta`.
//!
//! Everything is host-side `f64`; samplers turn entries into tensor scalars
//! at the point of use.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("number of sampling steps must be positive")]
    ZeroSteps,

    #[error("{requested} sampling steps requested but the model was trained with {available}")]
    TooManySteps { requested: usize, available: usize },

    #[error("eta must be finite and non-negative, got {0}")]
    InvalidEta(f64),

    #[error("invalid beta range [{start}, {end}] over {steps} training steps")]
    InvalidBetas { start: f64, end: f64, steps: usize },

    #[error("step {step} is outside a schedule of {len} steps")]
    StepOutOfRange { step: usize, len: usize },
}

// ============================================================================
// Training-time beta schedule
// ============================================================================

/// How betas are spaced between `beta_start` and `beta_end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BetaKind {
    /// Uniform spacing in beta
    Linear,
    /// Uniform spacing in sqrt(beta), then squared (SD 1.x / LDM default)
    #[default]
    ScaledLinear,
}

/// Training-time beta schedule configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaSchedule {
    /// Number of training timesteps
    pub num_train_steps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    pub kind: BetaKind,
}

impl Default for BetaSchedule {
    fn default() -> Self {
        Self::sd1x()
    }
}

impl BetaSchedule {
    /// Stable Diffusion 1.x schedule
    pub fn sd1x() -> Self {
        Self {
            num_train_steps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            kind: BetaKind::ScaledLinear,
        }
    }

    fn validate(&self) -> Result<(), ScheduleError> {
        let invalid = || ScheduleError::InvalidBetas {
            start: self.beta_start,
            end: self.beta_end,
            steps: self.num_train_steps,
        };

        if self.num_train_steps < 2 {
            return Err(invalid());
        }
        let in_range = |b: f64| b.is_finite() && b > 0.0 && b < 1.0;
        if !in_range(self.beta_start) || !in_range(self.beta_end) {
            return Err(invalid());
        }
        Ok(())
    }

    /// Beta at every training timestep
    pub fn betas(&self) -> Vec<f64> {
        let n = self.num_train_steps;
        let lerp = |a: f64, b: f64, i: usize| a + (b - a) * i as f64 / (n - 1) as f64;

        (0..n)
            .map(|i| match self.kind {
                BetaKind::Linear => lerp(self.beta_start, self.beta_end, i),
                BetaKind::ScaledLinear => {
                    lerp(self.beta_start.sqrt(), self.beta_end.sqrt(), i).powi(2)
                }
            })
            .collect()
    }

    /// Cumulative product of alphas: ᾱₜ = Π (1 - βᵢ)
    pub fn alphas_cumprod(&self) -> Vec<f64> {
        let mut cumprod = 1.0;
        self.betas()
            .into_iter()
            .map(|beta| {
                cumprod *= 1.0 - beta;
                cumprod
            })
            .collect()
    }
}

// ============================================================================
// DDIM sampling schedule
// ============================================================================

/// Coefficients for one sampling step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEntry {
    /// Training timestep this step evaluates the denoiser at
    pub timestep: usize,
    /// ᾱ at this step
    pub alpha_cumprod: f64,
    /// ᾱ at the step the update lands on
    pub alpha_cumprod_prev: f64,
    /// Standard deviation of the fresh noise injected by the update
    pub sigma: f64,
}

impl ScheduleEntry {
    pub fn sqrt_alpha_cumprod(&self) -> f64 {
        self.alpha_cumprod.sqrt()
    }

    pub fn sqrt_one_minus_alpha_cumprod(&self) -> f64 {
        (1.0 - self.alpha_cumprod).sqrt()
    }
}

/// Per-step diffusion coefficients for a fixed number of sampling steps
///
/// Step `0` is the least noisy step; ᾱ strictly decreases as the step index
/// grows. The reverse process walks the indices downwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSchedule {
    entries: Vec<ScheduleEntry>,
    eta: f64,
    num_train_steps: usize,
}

impl NoiseSchedule {
    /// Discretise `betas` into `num_sample_steps` uniformly spaced DDIM steps
    pub fn build(
        betas: &BetaSchedule,
        num_sample_steps: usize,
        eta: f64,
    ) -> Result<Self, ScheduleError> {
        betas.validate()?;
        let num_train_steps = betas.num_train_steps;

        if num_sample_steps == 0 {
            return Err(ScheduleError::ZeroSteps);
        }
        if num_sample_steps > num_train_steps {
            return Err(ScheduleError::TooManySteps {
                requested: num_sample_steps,
                available: num_train_steps,
            });
        }
        if !eta.is_finite() || eta < 0.0 {
            return Err(ScheduleError::InvalidEta(eta));
        }

        let alphas_cumprod = betas.alphas_cumprod();
        let timesteps = ddim_timesteps(num_sample_steps, num_train_steps);

        let entries = timesteps
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                let alpha = alphas_cumprod[t];
                let alpha_prev = if i == 0 {
                    alphas_cumprod[0]
                } else {
                    alphas_cumprod[timesteps[i - 1]]
                };
                let sigma = eta
                    * ((1.0 - alpha_prev) / (1.0 - alpha)).sqrt()
                    * (1.0 - alpha / alpha_prev).sqrt();

                ScheduleEntry {
                    timestep: t,
                    alpha_cumprod: alpha,
                    alpha_cumprod_prev: alpha_prev,
                    sigma,
                }
            })
            .collect();

        Ok(Self {
            entries,
            eta,
            num_train_steps,
        })
    }

    /// SD 1.x betas discretised into `num_sample_steps`
    pub fn sd1x(num_sample_steps: usize, eta: f64) -> Result<Self, ScheduleError> {
        Self::build(&BetaSchedule::sd1x(), num_sample_steps, eta)
    }

    /// Number of sampling steps
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    pub fn num_train_steps(&self) -> usize {
        self.num_train_steps
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Entry for a step, failing when the step is past the end of the schedule
    pub fn entry(&self, step: usize) -> Result<&ScheduleEntry, ScheduleError> {
        self.entries.get(step).ok_or(ScheduleError::StepOutOfRange {
            step,
            len: self.entries.len(),
        })
    }

    /// Training timesteps, least noisy first
    pub fn timesteps(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.timestep).collect()
    }
}

/// Uniformly spaced training timesteps, least noisy first
///
/// Uses the `+1` offset of the LDM reference sampler whenever it keeps the
/// last timestep inside the training range.
pub fn ddim_timesteps(num_sample_steps: usize, num_train_steps: usize) -> Vec<usize> {
    let stride = num_train_steps / num_sample_steps;
    let offset = usize::from((num_sample_steps - 1) * stride + 1 < num_train_steps);
    (0..num_sample_steps).map(|i| i * stride + offset).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddim_timesteps() {
        let steps = ddim_timesteps(50, 1000);
        assert_eq!(steps.len(), 50);
        assert_eq!(steps[0], 1);
        assert_eq!(steps[1], 21);
        assert_eq!(steps[49], 981);
    }

    #[test]
    fn test_ddim_timesteps_every_train_step() {
        let steps = ddim_timesteps(1000, 1000);
        assert_eq!(steps[0], 0);
        assert_eq!(steps[999], 999);
    }

    #[test]
    fn test_alphas_cumprod_first_value() {
        let alphas = BetaSchedule::sd1x().alphas_cumprod();
        assert_eq!(alphas.len(), 1000);
        assert!((alphas[0] - (1.0 - 0.00085)).abs() < 1e-12);
    }

    #[test]
    fn test_linear_betas_endpoints() {
        let schedule = BetaSchedule {
            kind: BetaKind::Linear,
            ..BetaSchedule::sd1x()
        };
        let betas = schedule.betas();
        assert!((betas[0] - 0.00085).abs() < 1e-12);
        assert!((betas[999] - 0.012).abs() < 1e-12);
    }

    #[test]
    fn test_alpha_cumprod_strictly_decreasing() {
        for steps in [1, 2, 7, 25, 50, 333, 1000] {
            for eta in [0.0, 0.5, 1.0] {
                let schedule = NoiseSchedule::sd1x(steps, eta).unwrap();
                for pair in schedule.entries().windows(2) {
                    assert!(
                        pair[1].alpha_cumprod < pair[0].alpha_cumprod,
                        "steps={steps} eta={eta}: {:?}",
                        pair
                    );
                }
            }
        }
    }

    #[test]
    fn test_prev_alpha_chains_to_previous_step() {
        let schedule = NoiseSchedule::sd1x(50, 0.0).unwrap();
        let entries = schedule.entries();
        assert!((entries[0].alpha_cumprod_prev - 0.99915).abs() < 1e-12);
        for i in 1..entries.len() {
            assert_eq!(entries[i].alpha_cumprod_prev, entries[i - 1].alpha_cumprod);
        }
    }

    #[test]
    fn test_zero_eta_is_deterministic() {
        let schedule = NoiseSchedule::sd1x(50, 0.0).unwrap();
        assert!(schedule.entries().iter().all(|e| e.sigma == 0.0));
    }

    #[test]
    fn test_sigma_scales_with_eta() {
        let half = NoiseSchedule::sd1x(20, 0.5).unwrap();
        let full = NoiseSchedule::sd1x(20, 1.0).unwrap();
        for (h, f) in half.entries().iter().zip(full.entries()) {
            assert!((f.sigma - 2.0 * h.sigma).abs() < 1e-12);
            // sigma² never exceeds 1 - ᾱ_prev, so the direction term stays real
            assert!(f.sigma.powi(2) <= 1.0 - f.alpha_cumprod_prev + 1e-12);
        }
    }

    #[test]
    fn test_invalid_step_counts() {
        assert_eq!(NoiseSchedule::sd1x(0, 0.0), Err(ScheduleError::ZeroSteps));
        assert_eq!(
            NoiseSchedule::sd1x(1001, 0.0),
            Err(ScheduleError::TooManySteps {
                requested: 1001,
                available: 1000
            })
        );
    }

    #[test]
    fn test_invalid_eta() {
        assert!(matches!(
            NoiseSchedule::sd1x(50, -0.1),
            Err(ScheduleError::InvalidEta(_))
        ));
        assert!(matches!(
            NoiseSchedule::sd1x(50, f64::NAN),
            Err(ScheduleError::InvalidEta(_))
        ));
    }

    #[test]
    fn test_invalid_betas() {
        let betas = BetaSchedule {
            beta_end: 1.5,
            ..BetaSchedule::sd1x()
        };
        assert!(matches!(
            NoiseSchedule::build(&betas, 50, 0.0),
            Err(ScheduleError::InvalidBetas { .. })
        ));
    }

    #[test]
    fn test_entry_out_of_range() {
        let schedule = NoiseSchedule::sd1x(10, 0.0).unwrap();
        assert!(schedule.entry(9).is_ok());
        assert_eq!(
            schedule.entry(10),
            Err(ScheduleError::StepOutOfRange { step: 10, len: 10 })
        );
    }
}
