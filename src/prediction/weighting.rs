//! Similarity weights of training vectors relative to a reference vector
//!
//! A weighting is primed once per coded position with the current
//! neighborhood vector and then scores every training vector of the region.
//! Candidates may be longer than the reference; trailing elements (the
//! training sample's own value) are ignored.

use crate::io::configuration::{CROPPED_WEIGHT_PENALTY, MIN_EXPONENTIAL_WEIGHT};
use crate::io::error::{CodecError, Result};
use crate::spatial::StructuringElement;

/// Scoring contract shared by every weighting function
pub trait Weighting {
    /// Set the sample range the weights are normalized against
    fn set_maxval(&mut self, maxval: u32);

    /// Prime the weighting with the reference vector of the coded position
    fn set_reference(&mut self, reference: &[f64]);

    /// Weight of one candidate vector
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ResolutionExhausted`] when an exponential weight
    /// underflows double precision
    fn weight(&mut self, candidate: &[f64]) -> Result<f64>;
}

/// Closed set of weighting laws
#[derive(Debug, Clone, PartialEq)]
pub enum WeightingKind {
    /// Every candidate weighs one
    Identity,
    /// `exp(-decay · Σ d²)`
    ExponentialSsd {
        /// Decay per unit of squared distance
        decay: f64,
    },
    /// `exp(-decay · Σ |d|)`
    ExponentialSad {
        /// Decay per unit of absolute distance
        decay: f64,
    },
    /// `s / (s + Σ (p·d)²)`
    InversePriorizedSsd {
        /// Per-element priorization
        priorization: Vec<f64>,
    },
    /// `s / (s + (Σ (p·d)²)²)`
    InversePriorizedSqd {
        /// Per-element priorization
        priorization: Vec<f64>,
    },
    /// Nonzero only for candidates among the closest seen so far
    CroppedPriorizedSsd {
        /// Per-element priorization
        priorization: Vec<f64>,
        /// Closest distances seen for the current reference, largest first
        best: Vec<f64>,
    },
    /// `|⟨r, c⟩| / (‖r‖·‖c‖)`
    CroppedCorrelation,
}

/// A weighting law together with its reference vector
#[derive(Debug, Clone, PartialEq)]
pub struct WeightingFunction {
    kind: WeightingKind,
    reference: Vec<f64>,
    scale: f64,
}

impl WeightingFunction {
    /// Weighting that returns one for every candidate
    pub const fn identity() -> Self {
        Self::from_kind(WeightingKind::Identity)
    }

    /// Exponential weighting of the sum of squared differences
    pub const fn exponential_ssd(decay: f64) -> Self {
        Self::from_kind(WeightingKind::ExponentialSsd { decay })
    }

    /// Exponential weighting of the sum of absolute differences
    pub const fn exponential_sad(decay: f64) -> Self {
        Self::from_kind(WeightingKind::ExponentialSad { decay })
    }

    /// Inverse priorized sum of squared differences
    pub const fn inverse_priorized_ssd(priorization: Vec<f64>) -> Self {
        Self::from_kind(WeightingKind::InversePriorizedSsd { priorization })
    }

    /// Inverse of the squared priorized sum of squared differences
    pub const fn inverse_priorized_sqd(priorization: Vec<f64>) -> Self {
        Self::from_kind(WeightingKind::InversePriorizedSqd { priorization })
    }

    /// Priorized distance weighting that keeps only the `count` closest candidates
    pub fn cropped_priorized_ssd(priorization: Vec<f64>, count: usize) -> Self {
        Self::from_kind(WeightingKind::CroppedPriorizedSsd {
            priorization,
            best: vec![f64::INFINITY; count.max(1)],
        })
    }

    /// Absolute cosine similarity between candidate and reference
    pub const fn cropped_correlation() -> Self {
        Self::from_kind(WeightingKind::CroppedCorrelation)
    }

    const fn from_kind(kind: WeightingKind) -> Self {
        Self {
            kind,
            reference: Vec::new(),
            scale: 0.0,
        }
    }

    /// Weighting law
    pub const fn kind(&self) -> &WeightingKind {
        &self.kind
    }

    /// Whether every weight is one
    pub const fn is_identity(&self) -> bool {
        matches!(self.kind, WeightingKind::Identity)
    }
}

// Priorized sum of squared differences over the reference length
fn priorized_ssd(reference: &[f64], candidate: &[f64], priorization: &[f64]) -> f64 {
    reference
        .iter()
        .zip(candidate)
        .zip(priorization)
        .map(|((r, c), p)| {
            let d = (r - c) * p;
            d * d
        })
        .sum()
}

fn euclidean_norm(vector: &[f64]) -> f64 {
    vector.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn exponential(sum: f64, decay: f64, operation: &'static str) -> Result<f64> {
    let weight = (-sum * decay).exp();
    if weight < MIN_EXPONENTIAL_WEIGHT {
        return Err(CodecError::ResolutionExhausted { operation });
    }
    Ok(weight)
}

impl Weighting for WeightingFunction {
    fn set_maxval(&mut self, maxval: u32) {
        let maxval = f64::from(maxval);
        self.scale = maxval * maxval / 4.0;
    }

    fn set_reference(&mut self, reference: &[f64]) {
        self.reference.clear();
        self.reference.extend_from_slice(reference);
        match &mut self.kind {
            WeightingKind::InversePriorizedSsd { .. } | WeightingKind::InversePriorizedSqd { .. } => {
                // The scale only ever grows with bright references
                if let Some(last) = reference.last() {
                    self.scale = self.scale.max(last * last);
                }
            }
            WeightingKind::CroppedPriorizedSsd { best, .. } => best.fill(f64::INFINITY),
            WeightingKind::CroppedCorrelation => {
                let norm = euclidean_norm(&self.reference);
                if norm > 0.0 {
                    for r in &mut self.reference {
                        *r /= norm;
                    }
                }
            }
            _ => {}
        }
    }

    fn weight(&mut self, candidate: &[f64]) -> Result<f64> {
        match &mut self.kind {
            WeightingKind::Identity => Ok(1.0),
            WeightingKind::ExponentialSsd { decay } => {
                let sum: f64 = self
                    .reference
                    .iter()
                    .zip(candidate)
                    .map(|(r, c)| (r - c) * (r - c))
                    .sum();
                exponential(sum, *decay, "exponential SSD weighting")
            }
            WeightingKind::ExponentialSad { decay } => {
                let sum: f64 = self
                    .reference
                    .iter()
                    .zip(candidate)
                    .map(|(r, c)| (r - c).abs())
                    .sum();
                exponential(sum, *decay, "exponential SAD weighting")
            }
            WeightingKind::InversePriorizedSsd { priorization } => {
                let distance = priorized_ssd(&self.reference, candidate, priorization);
                Ok(self.scale / (self.scale + distance))
            }
            WeightingKind::InversePriorizedSqd { priorization } => {
                let distance = priorized_ssd(&self.reference, candidate, priorization);
                Ok(self.scale / distance.mul_add(distance, self.scale))
            }
            WeightingKind::CroppedPriorizedSsd { priorization, best } => {
                let threshold = best.first().copied().unwrap_or(f64::INFINITY);
                let mut distance = 0.0;
                for ((r, c), p) in self.reference.iter().zip(candidate).zip(priorization.iter()) {
                    let d = r - c;
                    distance += p * d * d;
                    if distance > threshold {
                        return Ok(0.0);
                    }
                }
                if let Some(worst) = best.first_mut() {
                    *worst = distance;
                }
                best.sort_unstable_by(|a, b| b.total_cmp(a));
                Ok(1.0 / (CROPPED_WEIGHT_PENALTY * distance).mul_add(distance, 1.0))
            }
            WeightingKind::CroppedCorrelation => {
                let cropped = candidate.get(..self.reference.len()).unwrap_or(candidate);
                let norm = euclidean_norm(cropped);
                if norm == 0.0 {
                    return Ok(0.0);
                }
                let dot: f64 = self.reference.iter().zip(cropped).map(|(r, c)| r * c).sum();
                Ok((dot / norm).abs())
            }
        }
    }
}

/// Inverse Euclidean distance of every neighborhood cell to the anchor
///
/// The entries follow the neighborhood's raster order without the anchor
/// itself, are normalized to unit L1 norm and then multiplied by `scale`.
pub fn inverse_euclidean_priorization(neighborhood: &StructuringElement, scale: f64) -> Vec<f64> {
    let anchor = neighborhood.anchor().map(|a| a as f64);
    let mut priorization: Vec<f64> = neighborhood
        .offsets()
        .iter()
        .filter(|offset| **offset != neighborhood.anchor())
        .map(|offset| {
            let squared: f64 = offset
                .iter()
                .zip(anchor)
                .map(|(o, a)| (*o as f64 - a) * (*o as f64 - a))
                .sum();
            1.0 / squared.sqrt()
        })
        .collect();

    let norm: f64 = priorization.iter().map(|p| p.abs()).sum();
    if norm > 0.0 {
        for p in &mut priorization {
            *p *= scale / norm;
        }
    }
    priorization
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-12;

    #[test]
    fn test_identity_weighs_one() -> Result<()> {
        let mut weighting = WeightingFunction::identity();
        weighting.set_reference(&[1.0, 2.0]);
        assert!((weighting.weight(&[100.0, -5.0, 3.0])? - 1.0).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_exponential_sad_ignores_trailing_elements() -> Result<()> {
        let mut weighting = WeightingFunction::exponential_sad(0.5);
        weighting.set_reference(&[1.0, 2.0]);
        let weight = weighting.weight(&[2.0, 4.0, 1000.0])?;
        assert!((weight - (-1.5_f64).exp()).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_exponential_underflow_is_reported() {
        let mut weighting = WeightingFunction::exponential_ssd(10.0);
        weighting.set_reference(&[0.0]);
        assert!(matches!(
            weighting.weight(&[255.0]),
            Err(CodecError::ResolutionExhausted { .. })
        ));
    }

    #[test]
    fn test_inverse_scale_grows_with_reference() -> Result<()> {
        let mut weighting = WeightingFunction::inverse_priorized_ssd(vec![1.0]);
        weighting.set_maxval(2);
        weighting.set_reference(&[3.0]);
        // Scale is max(2² / 4, 3²) = 9
        let weight = weighting.weight(&[0.0])?;
        assert!((weight - 9.0 / 18.0).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_cropped_keeps_only_closest() -> Result<()> {
        let mut weighting = WeightingFunction::cropped_priorized_ssd(vec![1.0], 1);
        weighting.set_reference(&[0.0]);
        assert!(weighting.weight(&[2.0])? > 0.0);
        assert!(weighting.weight(&[3.0])?.abs() < EPSILON);
        assert!(weighting.weight(&[1.0])? > 0.0);
        Ok(())
    }

    #[test]
    fn test_correlation_ignores_scale_and_sign() -> Result<()> {
        let mut weighting = WeightingFunction::cropped_correlation();
        weighting.set_reference(&[3.0, 4.0]);
        // Trailing sample is cropped away
        assert!((weighting.weight(&[6.0, 8.0, 99.0])? - 1.0).abs() < EPSILON);
        assert!((weighting.weight(&[-3.0, -4.0])? - 1.0).abs() < EPSILON);
        assert!(weighting.weight(&[4.0, -3.0])?.abs() < EPSILON);
        assert!((weighting.weight(&[1.0, 0.0])? - 0.6).abs() < EPSILON);
        assert!(weighting.weight(&[0.0, 0.0, 5.0])?.abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_priorization_is_normalized() {
        let element = StructuringElement::half_ellipse(2.5, 3.0, 3.5, true);
        let priorization = inverse_euclidean_priorization(&element, 60.0);
        assert_eq!(priorization.len(), element.len() - 1);
        let sum: f64 = priorization.iter().sum();
        assert!((sum - 60.0).abs() < 1e-9);
        // The left neighbour is among the closest cells
        let left = priorization.last().copied().unwrap_or_default();
        assert!(priorization.iter().all(|p| *p <= left + EPSILON));
    }
}
