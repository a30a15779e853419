//! Continuous laws evaluated as weighted cumulative functions
//!
//! A law scaled by its weight rises from 0 to the weight. Cropping to
//! `0..=c` rescales and shifts it so the mass between `-0.5` and `c + 0.5`
//! equals the weight exactly.

use crate::io::configuration::{DistributionKind, MIN_DISTRIBUTION_VARIANCE};
use crate::math::probability::StandardT;
use statrs::function::erf::{erf, erfc};

/// Parameters shared by every law
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LawParameters {
    /// Total mass of the component
    pub weight: f64,
    /// Location
    pub mean: f64,
    /// Variance; floored at a tiny positive value
    pub variance: f64,
    /// Degrees of freedom, used by Student's t only
    pub dof: f64,
}

impl LawParameters {
    /// Parameters of a component
    pub const fn new(weight: f64, mean: f64, variance: f64, dof: f64) -> Self {
        Self {
            weight,
            mean,
            variance,
            dof,
        }
    }

    fn floored_variance(&self) -> f64 {
        if self.variance < MIN_DISTRIBUTION_VARIANCE || self.variance.is_nan() {
            MIN_DISTRIBUTION_VARIANCE
        } else {
            self.variance
        }
    }
}

/// Weighted cumulative function over sample values
pub trait CumulativeLaw {
    /// Update the parameters; `crop` confines the mass to `0..=crop`
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>);

    /// Cumulative mass up to `x`
    fn cumulative(&self, x: f64) -> f64;

    /// Mass above `x`
    fn tail(&self, x: f64) -> f64;

    /// Total mass of the law
    fn weight(&self) -> f64;

    /// Mass between `from` and `to`
    ///
    /// Intervals in the upper half are measured on the tail, where two
    /// cumulative values close to the weight would cancel.
    fn mass(&self, from: f64, to: f64) -> f64 {
        let lower = self.cumulative(from);
        if lower > 0.5 * self.weight() {
            self.tail(from) - self.tail(to)
        } else {
            self.cumulative(to) - lower
        }
    }
}

// Scale that maps the mass of `-0.5..crop + 0.5` onto `weight`
fn crop_scale(law: &impl CumulativeLaw, weight: f64, crop: u32) -> f64 {
    let mass = law.cumulative(0.5 + f64::from(crop)) - law.cumulative(-0.5);
    weight / mass
}

/// Gaussian law
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Normal {
    weight: f64,
    half: f64,
    shifted: f64,
    mean: f64,
    inverse_scale: f64,
}

impl CumulativeLaw for Normal {
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>) {
        self.weight = parameters.weight;
        self.half = 0.5 * self.weight;
        self.shifted = self.half;
        self.mean = parameters.mean;
        self.inverse_scale = 1.0 / (2.0 * parameters.floored_variance()).sqrt();
        if let Some(crop) = crop {
            self.half *= crop_scale(self, self.weight, crop);
            self.shifted = -self.half * erf(self.inverse_scale * (-0.5 - self.mean));
        }
    }

    fn cumulative(&self, x: f64) -> f64 {
        self.half.mul_add(erf(self.inverse_scale * (x - self.mean)), self.shifted)
    }

    fn tail(&self, x: f64) -> f64 {
        self.half * erfc(self.inverse_scale * (x - self.mean))
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}

/// Laplacian law
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Laplace {
    weight: f64,
    full: f64,
    half: f64,
    shift: f64,
    mean: f64,
    inverse_scale: f64,
}

impl CumulativeLaw for Laplace {
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>) {
        self.weight = parameters.weight;
        self.full = self.weight;
        self.half = 0.5 * self.full;
        self.shift = 0.0;
        self.mean = parameters.mean;
        self.inverse_scale = 1.0 / (0.5 * parameters.floored_variance()).sqrt();
        if let Some(crop) = crop {
            self.full *= crop_scale(self, self.weight, crop);
            self.half = 0.5 * self.full;
            self.shift = -self.cumulative(-0.5);
            self.full += self.shift;
        }
    }

    fn cumulative(&self, x: f64) -> f64 {
        if x < self.mean {
            self.half.mul_add((self.inverse_scale * (x - self.mean)).exp(), self.shift)
        } else {
            self.half.mul_add(-(self.inverse_scale * (self.mean - x)).exp(), self.full)
        }
    }

    fn tail(&self, x: f64) -> f64 {
        if x < self.mean {
            self.full - self.cumulative(x)
        } else {
            self.half * (self.inverse_scale * (self.mean - x)).exp()
        }
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}

/// Student's t law, location-scale transformed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentTLaw {
    weight: f64,
    scale: f64,
    shift: f64,
    mean: f64,
    inverse_deviation: f64,
    t: StandardT,
}

impl Default for StudentTLaw {
    fn default() -> Self {
        Self {
            weight: 0.0,
            scale: 0.0,
            shift: 0.0,
            mean: 0.0,
            inverse_deviation: 1.0,
            t: StandardT::new(5.0),
        }
    }
}

impl CumulativeLaw for StudentTLaw {
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>) {
        self.weight = parameters.weight;
        self.scale = self.weight;
        self.shift = 0.0;
        self.mean = parameters.mean;
        self.inverse_deviation = 1.0 / parameters.floored_variance().sqrt();
        if (self.t.dof() - parameters.dof).abs() > 0.0 {
            self.t = StandardT::new(parameters.dof);
        }
        if let Some(crop) = crop {
            self.scale *= crop_scale(self, self.weight, crop);
            self.shift = -self.cumulative(-0.5);
        }
    }

    fn cumulative(&self, x: f64) -> f64 {
        self.scale
            .mul_add(self.t.cdf(self.inverse_deviation * (x - self.mean)), self.shift)
    }

    fn tail(&self, x: f64) -> f64 {
        self.scale * self.t.sf(self.inverse_deviation * (x - self.mean))
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}

/// Uniform ramp over `0..=crop`, or over 256 values when uncropped
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Uniform {
    weight: f64,
    slope: f64,
}

impl Uniform {
    const DEFAULT_VALUES: f64 = 256.0;
}

impl CumulativeLaw for Uniform {
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>) {
        self.weight = parameters.weight;
        let values = match crop {
            Some(crop) if crop > 0 => 1.0 + f64::from(crop),
            _ => Self::DEFAULT_VALUES,
        };
        self.slope = self.weight / values;
    }

    fn cumulative(&self, x: f64) -> f64 {
        self.slope * (x + 0.5)
    }

    fn tail(&self, x: f64) -> f64 {
        self.weight - self.cumulative(x)
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}

/// Closed set of parametric laws
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Law {
    /// Gaussian
    Normal(Normal),
    /// Laplacian
    Laplace(Laplace),
    /// Student's t
    StudentT(StudentTLaw),
    /// Uniform
    Uniform(Uniform),
}

impl Law {
    /// Law of the given kind with unset parameters
    pub fn new(kind: DistributionKind) -> Self {
        match kind {
            DistributionKind::Normal => Self::Normal(Normal::default()),
            DistributionKind::Laplace => Self::Laplace(Laplace::default()),
            DistributionKind::StudentT => Self::StudentT(StudentTLaw::default()),
            DistributionKind::Uniform => Self::Uniform(Uniform::default()),
        }
    }

    /// Law of the given kind with parameters already set
    pub fn with_parameters(kind: DistributionKind, parameters: &LawParameters, crop: Option<u32>) -> Self {
        let mut law = Self::new(kind);
        law.set_parameters(parameters, crop);
        law
    }

    fn as_law(&self) -> &dyn CumulativeLaw {
        match self {
            Self::Normal(law) => law,
            Self::Laplace(law) => law,
            Self::StudentT(law) => law,
            Self::Uniform(law) => law,
        }
    }

    fn as_law_mut(&mut self) -> &mut dyn CumulativeLaw {
        match self {
            Self::Normal(law) => law,
            Self::Laplace(law) => law,
            Self::StudentT(law) => law,
            Self::Uniform(law) => law,
        }
    }
}

impl CumulativeLaw for Law {
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>) {
        self.as_law_mut().set_parameters(parameters, crop);
    }

    fn cumulative(&self, x: f64) -> f64 {
        self.as_law().cumulative(x)
    }

    fn tail(&self, x: f64) -> f64 {
        self.as_law().tail(x)
    }

    fn weight(&self) -> f64 {
        self.as_law().weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn cropped_mass(kind: DistributionKind, mean: f64, variance: f64) -> f64 {
        let law = Law::with_parameters(kind, &LawParameters::new(0.7, mean, variance, 4.0), Some(255));
        law.cumulative(255.5) - law.cumulative(-0.5)
    }

    #[test]
    fn test_cropping_folds_mass_into_range() {
        for kind in [
            DistributionKind::Normal,
            DistributionKind::Laplace,
            DistributionKind::StudentT,
            DistributionKind::Uniform,
        ] {
            for (mean, variance) in [(3.0, 100.0), (250.0, 40.0), (128.0, 1e6)] {
                let mass = cropped_mass(kind, mean, variance);
                assert!((mass - 0.7).abs() < 1e-6, "{kind} at {mean}: {mass}");
            }
        }
    }

    #[test]
    fn test_cropped_laws_start_at_zero() {
        for kind in [DistributionKind::Normal, DistributionKind::Laplace, DistributionKind::StudentT] {
            let law = Law::with_parameters(kind, &LawParameters::new(1.0, 10.0, 30.0, 3.0), Some(63));
            assert!(law.cumulative(-0.5).abs() < EPSILON, "{kind}");
        }
    }

    #[test]
    fn test_uncropped_laws_are_monotone() {
        for kind in [DistributionKind::Normal, DistributionKind::Laplace, DistributionKind::StudentT] {
            let law = Law::with_parameters(kind, &LawParameters::new(1.0, 20.0, 25.0, 6.0), None);
            let mut previous = law.cumulative(-10.0);
            for step in -9..60 {
                let value = law.cumulative(f64::from(step));
                assert!(value >= previous, "{kind} decreases at {step}");
                previous = value;
            }
            assert!(law.cumulative(1e6) <= 1.0 + EPSILON);
        }
    }

    #[test]
    fn test_laplace_is_symmetric_around_mean() {
        let law = Law::with_parameters(DistributionKind::Laplace, &LawParameters::new(1.0, 5.0, 8.0, 1.0), None);
        assert!((law.cumulative(5.0) - 0.5).abs() < EPSILON);
        assert!((law.cumulative(3.0) + law.cumulative(7.0) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_tail_resolves_saturated_intervals() {
        for kind in [DistributionKind::Normal, DistributionKind::Laplace, DistributionKind::StudentT] {
            let law = Law::with_parameters(kind, &LawParameters::new(1.0, 20.0, 400.0, 3.0), None);
            let mut previous = law.mass(150.5, 151.5);
            assert!(previous > 0.0, "{kind}");
            for value in 152..255 {
                let mass = law.mass(f64::from(value) - 0.5, f64::from(value) + 0.5);
                assert!(mass >= 0.0 && mass <= previous, "{kind} at {value}");
                previous = mass;
            }
            let below = law.mass(10.5, 11.5);
            assert!((below - (law.cumulative(11.5) - law.cumulative(10.5))).abs() < EPSILON);
        }
    }

    #[test]
    fn test_uncropped_uniform_spans_256_values() {
        let law = Law::with_parameters(DistributionKind::Uniform, &LawParameters::new(1.0, 0.0, 1.0, 1.0), None);
        assert!((law.cumulative(255.5) - 1.0).abs() < EPSILON);
    }
}
