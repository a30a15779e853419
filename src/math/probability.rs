//! Standardized distributions and smoothing kernels

use statrs::distribution::{ContinuousCDF, StudentsT as StudentT};
use statrs::function::erf::erfc;

/// Student's t distribution with unit scale and fixed degrees of freedom
///
/// Degrees of freedom that do not form a valid distribution use the normal
/// limit.
#[derive(Debug, Clone, Copy)]
pub struct StandardT {
    dof: f64,
    inner: Option<StudentT>,
}

impl PartialEq for StandardT {
    fn eq(&self, other: &Self) -> bool {
        self.dof.to_bits() == other.dof.to_bits()
    }
}

// Standard normal upper tail
fn normal_tail(t: f64) -> f64 {
    0.5 * erfc(t / std::f64::consts::SQRT_2)
}

impl StandardT {
    /// Create the distribution; degrees of freedom below 1 are raised to 1
    pub fn new(dof: f64) -> Self {
        let dof = if dof.is_nan() { 1.0 } else { dof.max(1.0) };
        Self {
            dof,
            inner: StudentT::new(0.0, 1.0, dof).ok(),
        }
    }

    /// Degrees of freedom
    pub const fn dof(&self) -> f64 {
        self.dof
    }

    /// Mass below the standardized location `t`
    pub fn cdf(&self, t: f64) -> f64 {
        self.inner
            .as_ref()
            .map_or_else(|| normal_tail(-t), |distribution| distribution.cdf(t))
    }

    /// Mass above the standardized location `t`
    pub fn sf(&self, t: f64) -> f64 {
        self.inner
            .as_ref()
            .map_or_else(|| normal_tail(t), |distribution| distribution.sf(t))
    }
}

/// Normalized Gaussian smoothing kernel of `size` taps
///
/// Non-positive `sigma` selects the width from the kernel size, as image
/// filtering libraries conventionally do.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    let center = (size as f64 - 1.0) * 0.5;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        ((size as f64 - 1.0) * 0.5 - 1.0).mul_add(0.3, 0.8)
    };
    let scale = -0.5 / (sigma * sigma);

    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let offset = i as f64 - center;
            (scale * offset * offset).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    if sum > 0.0 {
        for tap in &mut kernel {
            *tap /= sum;
        }
    }
    kernel
}
