//! Toy collaborators for pipeline tests
//!
//! The encoder block-averages pixels, the decoder repeats latent cells, and
//! the denoiser predicts the exact noise for a flat target latent taken from
//! the conditioning, so guided sampling converges on a known value.

#![allow(dead_code)]

use std::cell::Cell;

use blended_latent::{
    CollaboratorError, DenoiserNetwork, ExecutionContext, LatentDecoder, LatentDistribution,
    LatentEncoder, RunConfig, TextEncoder,
};
use blended_latent::collaborators::CollaboratorResult;
use blended_latent::samplers::BetaSchedule;
use burn::prelude::*;
use burn_ndarray::NdArray;

pub type TestBackend = NdArray<f32>;

pub const FACTOR: usize = 8;

/// Embedding shape of the toy text encoder
pub const SEQ_LEN: usize = 4;
pub const EMBED_DIM: usize = 8;

/// Latent value the toy denoiser steers towards at guidance scale 7.5 so that
/// the decoded pixel value is 0.5
pub const PROMPT_TARGET: f32 = 0.5 * 0.18215 / 7.5;

pub fn device() -> <TestBackend as Backend>::Device {
    Default::default()
}

pub fn ctx() -> ExecutionContext<TestBackend> {
    ExecutionContext::new(device())
}

pub fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
    t.into_data().to_vec().unwrap()
}

pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Config for a `size x size` run with the given steps and start step
pub fn config(size: usize, steps: usize, t_enc: usize, scale: f64) -> RunConfig {
    RunConfig {
        prompt: "a red bench".to_string(),
        height: size,
        width: size,
        ddim_steps: steps,
        t_enc: Some(t_enc),
        scale,
        mode: blended_latent::Mode::Blended,
        ..RunConfig::default()
    }
}

/// Smooth dark image in `[-0.9, -0.1]`
pub fn source_image(size: usize) -> Tensor<TestBackend, 4> {
    let mut data = Vec::with_capacity(3 * size * size);
    for c in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let t = ((x + 2 * y + 17 * c) % size) as f32 / size as f32;
                data.push(-0.9 + 0.8 * t);
            }
        }
    }
    Tensor::from_data(TensorData::new(data, [1, 3, size, size]), &device())
}

/// `[1, 1, size, size]` mask set on rows `top..bottom`, columns `left..right`
pub fn rect_mask(
    size: usize,
    (top, bottom): (usize, usize),
    (left, right): (usize, usize),
) -> Tensor<TestBackend, 4> {
    let mut data = vec![0.0f32; size * size];
    for y in top..bottom {
        for x in left..right {
            data[y * size + x] = 1.0;
        }
    }
    Tensor::from_data(TensorData::new(data, [1, 1, size, size]), &device())
}

/// Average-pools pixels into 4 latent channels: RGB and their mean
#[derive(Default)]
pub struct ToyEncoder {
    pub fail: bool,
}

impl LatentEncoder<TestBackend> for ToyEncoder {
    fn encode(
        &self,
        image: Tensor<TestBackend, 4>,
        _ctx: &ExecutionContext<TestBackend>,
    ) -> CollaboratorResult<LatentDistribution<TestBackend>> {
        if self.fail {
            return Err(CollaboratorError::new("encoder weights missing"));
        }
        let [b, c, h, w] = image.dims();
        let (lh, lw) = (h / FACTOR, w / FACTOR);

        let pooled: Tensor<TestBackend, 4> = image
            .reshape([b, c, lh, FACTOR, lw, FACTOR])
            .mean_dim(5)
            .mean_dim(3)
            .reshape([b, c, lh, lw]);
        let mean = pooled.clone().mean_dim(1);
        let latent = Tensor::cat(vec![pooled, mean], 1);

        let moments = Tensor::cat(vec![latent.clone(), latent.zeros_like()], 1);
        Ok(LatentDistribution::from_moments(moments))
    }
}

/// Repeats every latent cell over a `FACTOR x FACTOR` block, dropping the
/// fourth channel
#[derive(Default)]
pub struct ToyDecoder {
    pub calls: Cell<usize>,
}

impl LatentDecoder<TestBackend> for ToyDecoder {
    fn decode(
        &self,
        latent: Tensor<TestBackend, 4>,
        _ctx: &ExecutionContext<TestBackend>,
    ) -> CollaboratorResult<Tensor<TestBackend, 4>> {
        self.calls.set(self.calls.get() + 1);
        let [b, _, h, w] = latent.dims();
        Ok(latent
            .slice([0..b, 0..3, 0..h, 0..w])
            .reshape([b, 3, h, 1, w, 1])
            .expand([b, 3, h, FACTOR, w, FACTOR])
            .reshape([b, 3, h * FACTOR, w * FACTOR]))
    }
}

/// Constant embeddings: `target` for prompts, zeros for the empty prompt
pub struct ToyTextEncoder {
    pub target: f32,
    pub calls: Cell<usize>,
    pub fail: bool,
}

impl Default for ToyTextEncoder {
    fn default() -> Self {
        Self {
            target: PROMPT_TARGET,
            calls: Cell::new(0),
            fail: false,
        }
    }
}

impl TextEncoder<TestBackend> for ToyTextEncoder {
    fn embed(
        &self,
        prompts: &[String],
        ctx: &ExecutionContext<TestBackend>,
    ) -> CollaboratorResult<Tensor<TestBackend, 3>> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(CollaboratorError::new("tokenizer vocabulary missing"));
        }
        let rows: Vec<Tensor<TestBackend, 3>> = prompts
            .iter()
            .map(|p| {
                let value = if p.is_empty() { 0.0 } else { self.target };
                Tensor::full([1, SEQ_LEN, EMBED_DIM], value, &ctx.device)
            })
            .collect();
        Ok(Tensor::cat(rows, 0))
    }
}

/// Predicts the noise that would turn a flat latent of value
/// `conditioning[b, 0, 0]` into the input at the given timestep
pub struct ToyDenoiser {
    pub alphas_cumprod: Vec<f64>,
    pub batched: bool,
    pub calls: Cell<usize>,
    pub max_batch: Cell<usize>,
    /// Fail on this (0-indexed) call
    pub fail_at: Option<usize>,
}

impl Default for ToyDenoiser {
    fn default() -> Self {
        Self {
            alphas_cumprod: BetaSchedule::sd1x().alphas_cumprod(),
            batched: true,
            calls: Cell::new(0),
            max_batch: Cell::new(0),
            fail_at: None,
        }
    }
}

impl DenoiserNetwork<TestBackend> for ToyDenoiser {
    fn forward(
        &self,
        latent: Tensor<TestBackend, 4>,
        timesteps: Tensor<TestBackend, 1>,
        conditioning: Tensor<TestBackend, 3>,
        _ctx: &ExecutionContext<TestBackend>,
    ) -> CollaboratorResult<Tensor<TestBackend, 4>> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if self.fail_at == Some(call) {
            return Err(CollaboratorError::new("out of memory"));
        }

        let [b, c, h, w] = latent.dims();
        self.max_batch.set(self.max_batch.get().max(b));

        let timesteps: Vec<f32> = timesteps.into_data().to_vec().unwrap();
        assert_eq!(timesteps.len(), b);
        let alpha = self.alphas_cumprod[timesteps[0] as usize];

        let target = conditioning
            .slice([0..b, 0..1, 0..1])
            .reshape([b, 1, 1, 1])
            .expand([b, c, h, w]);
        Ok((latent - target * alpha.sqrt()) / (1.0 - alpha).sqrt())
    }

    fn supports_batched_guidance(&self) -> bool {
        self.batched
    }
}
