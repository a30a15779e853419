//! Predictors that need no regression: neighbor mean, median edge detector
//! and non-local means

use crate::io::error::{CodecError, Result};
use crate::prediction::weighting::{Weighting, WeightingFunction};
use crate::prediction::{Estimator, Frame, RegressionScratch};
use crate::spatial::Context;

// Mean of the known neighbors, the mid-range value when there are none
fn neighbor_mean(frame: &Frame<'_>, vector: &[f64]) -> f64 {
    let known = vector.len().saturating_sub(1);
    if known == 0 {
        return frame.mid_value();
    }
    vector.iter().take(known).sum::<f64>() / known as f64
}

/// Mean of the causal neighborhood
#[derive(Debug, Clone, Default)]
pub struct MeanPredictor {
    vector: Vec<f64>,
}

impl Estimator for MeanPredictor {
    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        _scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        context.current_vector(frame.image, frame.position, &mut self.vector);
        Ok(neighbor_mean(frame, &self.vector))
    }
}

/// LOCO-I median edge detector
///
/// Works on the neighborhood `[up-left, up, left, current]`; cropped
/// neighborhoods at the image border fall back to the first remaining
/// neighbor.
#[derive(Debug, Clone, Default)]
pub struct MedPredictor {
    vector: Vec<f64>,
}

impl Estimator for MedPredictor {
    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        _scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        context.current_vector(frame.image, frame.position, &mut self.vector);
        let prediction = match self.vector.as_slice() {
            [c, b, a, _, ..] => {
                let (c, b, a) = (*c, *b, *a);
                if c >= a.max(b) {
                    a.min(b)
                } else if c <= a.min(b) {
                    a.max(b)
                } else {
                    (a + b - c).clamp(0.0, f64::from(frame.maxval))
                }
            }
            [first, _] => *first,
            _ => frame.mid_value(),
        };
        Ok(prediction)
    }
}

/// Non-local means: weighted average of the training samples
#[derive(Debug, Clone)]
pub struct NlmPredictor {
    weighting: WeightingFunction,
    vector: Vec<f64>,
    sample: Vec<f64>,
}

impl NlmPredictor {
    /// Non-local means with the given neighborhood similarity weighting
    pub const fn new(weighting: WeightingFunction) -> Self {
        Self {
            weighting,
            vector: Vec::new(),
            sample: Vec::new(),
        }
    }
}

impl Estimator for NlmPredictor {
    fn prepare(&mut self, _context: &Context, maxval: u32) -> Result<()> {
        self.weighting.set_maxval(maxval);
        Ok(())
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        _scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        context.current_vector(frame.image, frame.position, &mut self.vector);
        if context.training_len() == 0 {
            return Ok(neighbor_mean(frame, &self.vector));
        }

        let known = self.vector.len().saturating_sub(1);
        self.weighting
            .set_reference(self.vector.get(..known).unwrap_or_default());

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        context.begin_training(frame.position);
        while context
            .next_training_vector(frame.image, &mut self.sample)
            .is_some()
        {
            let weight = self.weighting.weight(&self.sample)?;
            weighted_sum += weight * self.sample.last().copied().unwrap_or(0.0);
            weight_sum += weight;
        }

        if weight_sum <= 0.0 {
            return Err(CodecError::ResolutionExhausted {
                operation: "non-local means weighting",
            });
        }
        Ok((weighted_sum / weight_sum).clamp(0.0, f64::from(frame.maxval)))
    }
}
