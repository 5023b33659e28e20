//! Edit masks
//!
//! A mask is a single-channel `[1 | batch, 1, H, W]` tensor with values in
//! `[0, 1]`: 1 marks pixels to regenerate, 0 pixels to preserve.

use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use crate::debug::host_values;
use crate::error::InvalidMaskError;

/// Validated edit mask
#[derive(Debug, Clone)]
pub struct Mask<B: Backend> {
    tensor: Tensor<B, 4>,
}

impl<B: Backend> Mask<B> {
    /// Validate `tensor` as a mask
    ///
    /// Rejects more than one channel, non-finite values and values outside
    /// `[0, 1]`.
    pub fn new(tensor: Tensor<B, 4>) -> Result<Self, InvalidMaskError> {
        let [_, channels, _, _] = tensor.dims();
        if channels != 1 {
            return Err(InvalidMaskError::Channels(channels));
        }

        let values = host_values(&tensor)
            .ok_or_else(|| InvalidMaskError::Unreadable("could not read mask values".into()))?;

        let non_finite = values.iter().filter(|v| !v.is_finite()).count();
        if non_finite > 0 {
            return Err(InvalidMaskError::NonFinite(non_finite));
        }

        let out_of_range = values.iter().filter(|&&v| !(0.0..=1.0).contains(&v)).count();
        if out_of_range > 0 {
            let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            return Err(InvalidMaskError::OutOfRange {
                count: out_of_range,
                min,
                max,
            });
        }

        Ok(Self { tensor })
    }

    /// Mask that regenerates everything
    pub fn ones(batch: usize, height: usize, width: usize, device: &B::Device) -> Self {
        Self {
            tensor: Tensor::ones([batch, 1, height, width], device),
        }
    }

    /// Mask that preserves everything
    pub fn zeros(batch: usize, height: usize, width: usize, device: &B::Device) -> Self {
        Self {
            tensor: Tensor::zeros([batch, 1, height, width], device),
        }
    }

    /// `1 - mask`: swap the regenerated and preserved regions
    pub fn inverted(&self) -> Self {
        Self {
            tensor: self.tensor.clone().neg() + 1.0,
        }
    }

    /// Nearest-neighbour resize to latent resolution
    pub fn to_latent(&self, latent_height: usize, latent_width: usize) -> Tensor<B, 4> {
        interpolate(
            self.tensor.clone(),
            [latent_height, latent_width],
            InterpolateOptions::new(InterpolateMode::Nearest),
        )
    }

    pub fn dims(&self) -> [usize; 4] {
        self.tensor.dims()
    }

    pub fn tensor(&self) -> &Tensor<B, 4> {
        &self.tensor
    }

    pub fn into_tensor(self) -> Tensor<B, 4> {
        self.tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tensor(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_accepts_soft_mask() {
        let mask = Mask::new(tensor(vec![0.0, 0.25, 0.5, 1.0], [1, 1, 2, 2])).unwrap();
        assert_eq!(mask.dims(), [1, 1, 2, 2]);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = Mask::new(tensor(vec![0.0, 1.5, -0.5, 1.0], [1, 1, 2, 2])).unwrap_err();
        assert_eq!(
            err,
            InvalidMaskError::OutOfRange {
                count: 2,
                min: -0.5,
                max: 1.5
            }
        );
    }

    #[test]
    fn test_rejects_nan() {
        let err = Mask::new(tensor(vec![0.0, f32::NAN, 1.0, 1.0], [1, 1, 2, 2])).unwrap_err();
        assert_eq!(err, InvalidMaskError::NonFinite(1));
    }

    #[test]
    fn test_rejects_multiple_channels() {
        let err = Mask::new(tensor(vec![0.0; 12], [1, 3, 2, 2])).unwrap_err();
        assert_eq!(err, InvalidMaskError::Channels(3));
    }

    #[test]
    fn test_inverted() {
        let mask = Mask::new(tensor(vec![0.0, 0.25, 1.0, 1.0], [1, 1, 2, 2])).unwrap();
        let values: Vec<f32> = mask.inverted().into_tensor().into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn test_to_latent_picks_block_corners() {
        // 4x4 mask, left half set; every 2x2 block is uniform
        let values = vec![
            1.0, 1.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, 0.0,
        ];
        let mask = Mask::new(tensor(values, [1, 1, 4, 4])).unwrap();
        let latent = mask.to_latent(2, 2);
        assert_eq!(latent.dims(), [1, 1, 2, 2]);

        let values: Vec<f32> = latent.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 0.0, 1.0, 0.0]);
    }
}
