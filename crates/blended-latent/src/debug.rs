//! Tensor diagnostics for debug runs

use std::fmt;

use burn::prelude::*;

/// Summary of a tensor's values
///
/// `min`, `max`, `mean` and `std` cover the finite values only; non-finite
/// values are counted separately.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TensorStats {
    pub len: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std: f32,
    pub nan: usize,
    pub inf: usize,
}

impl TensorStats {
    fn from_values(values: &[f32]) -> Self {
        let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let nan = values.iter().filter(|v| v.is_nan()).count();
        let inf = values.len() - finite.len() - nan;

        if finite.is_empty() {
            return Self {
                len: values.len(),
                nan,
                inf,
                ..Self::default()
            };
        }

        let n = finite.len() as f32;
        let mean = finite.iter().sum::<f32>() / n;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;

        Self {
            len: values.len(),
            min: finite.iter().copied().fold(f32::INFINITY, f32::min),
            max: finite.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            mean,
            std: var.sqrt(),
            nan,
            inf,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.nan == 0 && self.inf == 0
    }
}

impl fmt::Display for TensorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            return f.write_str("empty");
        }
        write!(
            f,
            "min={:.4} max={:.4} mean={:.4} std={:.4}",
            self.min, self.max, self.mean, self.std
        )?;
        if !self.is_finite() {
            write!(f, " nan={}/{} inf={}/{}", self.nan, self.len, self.inf, self.len)?;
        }
        Ok(())
    }
}

/// Statistics of `tensor`, copied to the host
///
/// A tensor whose data cannot be read back reports as empty.
pub fn tensor_stats<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> TensorStats {
    host_values(tensor)
        .map(|values| TensorStats::from_values(&values))
        .unwrap_or_default()
}

/// Panic if `enabled` and `tensor` holds NaN or Inf values
#[inline]
pub fn check_tensor_if<B: Backend, const D: usize>(tensor: &Tensor<B, D>, name: &str, enabled: bool) {
    if !enabled {
        return;
    }
    let stats = tensor_stats(tensor);
    if !stats.is_finite() {
        panic!("[NaN check failed] {name}: {stats}");
    }
}

/// Copy a tensor to the host as f32
pub(crate) fn host_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Option<Vec<f32>> {
    tensor.clone().into_data().convert::<f32>().to_vec().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tensor(values: Vec<f32>) -> Tensor<TestBackend, 1> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [len]), &Default::default())
    }

    #[test]
    fn test_tensor_stats() {
        let stats = tensor_stats(&tensor(vec![1.0, 3.0]));
        assert_eq!(stats.to_string(), "min=1.0000 max=3.0000 mean=2.0000 std=1.0000");
        assert!(stats.is_finite());
    }

    #[test]
    fn test_tensor_stats_skip_non_finite() {
        let stats = tensor_stats(&tensor(vec![1.0, f32::NAN, 5.0, f32::NEG_INFINITY]));
        assert_eq!((stats.min, stats.max, stats.mean), (1.0, 5.0, 3.0));
        assert_eq!((stats.nan, stats.inf), (1, 1));
        assert!(stats.to_string().ends_with("nan=1/4 inf=1/4"));
    }

    #[test]
    fn test_tensor_stats_all_nan() {
        let stats = tensor_stats(&tensor(vec![f32::NAN; 3]));
        assert_eq!(stats.nan, 3);
        assert!(!stats.is_finite());
    }

    #[test]
    fn test_check_disabled_ignores_nan() {
        check_tensor_if(&tensor(vec![f32::NAN]), "nan", false);
    }

    #[test]
    #[should_panic(expected = "[NaN check failed] inf")]
    fn test_check_enabled_panics_on_inf() {
        check_tensor_if(&tensor(vec![0.0, f32::INFINITY]), "inf", true);
    }
}
