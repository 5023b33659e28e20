//! Pixel-space compositing with a feathered mask

use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use tracing::debug_span;

use crate::error::{ConfigError, Result};

/// Blends the decoded result into the source image
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    factor: usize,
}

impl Compositor {
    /// `factor` is the pixel-to-latent downsampling factor
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Soften a hard mask: bicubic down by the factor, bicubic back up, clamp
    pub fn feather<B: Backend>(&self, mask: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = mask.dims();
        let small = [(h / self.factor).max(1), (w / self.factor).max(1)];

        let down = interpolate(
            mask,
            small,
            InterpolateOptions::new(InterpolateMode::Bicubic),
        );
        interpolate(down, [h, w], InterpolateOptions::new(InterpolateMode::Bicubic)).clamp(0.0, 1.0)
    }

    /// `original * (1 - soft) + generated * soft`
    ///
    /// `original` may have batch 1 against a larger `generated` batch; the
    /// mask may have batch 1 or the generated batch.
    pub fn composite<B: Backend>(
        &self,
        original: Tensor<B, 4>,
        generated: Tensor<B, 4>,
        mask: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>> {
        let _span = debug_span!("composite", factor = self.factor).entered();

        let dims = generated.dims();
        let [batch, channels, height, width] = dims;

        let [orig_batch, orig_channels, orig_height, orig_width] = original.dims();
        if (orig_batch != 1 && orig_batch != batch)
            || (orig_channels, orig_height, orig_width) != (channels, height, width)
        {
            return Err(ConfigError::shape_mismatch("original image", &dims, &original.dims()).into());
        }

        let [mask_batch, mask_channels, mask_height, mask_width] = mask.dims();
        if (mask_batch != 1 && mask_batch != batch)
            || mask_channels != 1
            || (mask_height, mask_width) != (height, width)
        {
            return Err(ConfigError::shape_mismatch(
                "pixel mask",
                &[batch, 1, height, width],
                &mask.dims(),
            )
            .into());
        }

        let soft = self.feather(mask).expand(dims);
        let original = original.expand(dims);

        Ok(original.clone() + (generated - original) * soft)
    }
}
