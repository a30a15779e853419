//! Variance estimators driven by past prediction residuals

use crate::io::configuration::EXPONENTIAL_VARIANCE_MEMORY;
use crate::io::error::Result;
use crate::prediction::{Estimator, Frame, RegressionScratch};
use crate::spatial::{Context, Position, StructuringElement};
use ndarray::Array3;

/// Exponential moving average of the squared residual at the left neighbor
#[derive(Debug, Clone, Default)]
pub struct ExponentialVariance {
    variance: f64,
    previous_prediction: f64,
}

impl Estimator for ExponentialVariance {
    fn prepare(&mut self, _context: &Context, _maxval: u32) -> Result<()> {
        *self = Self::default();
        Ok(())
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        _scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        let [z, y, x] = frame.position;
        if context.neighborhood().left() > 0 && x > 0 {
            let residual = frame.sample([z, y, x - 1]) - self.previous_prediction;
            self.variance = EXPONENTIAL_VARIANCE_MEMORY
                .mul_add(self.variance, (1.0 - EXPONENTIAL_VARIANCE_MEMORY) * residual * residual);
        } else if self.variance == 0.0 {
            self.variance = frame.initial_variance();
        }
        self.previous_prediction = frame.prediction;
        Ok(self.variance)
    }
}

/// Mean squared residual over a causal window around the coded position
#[derive(Debug, Clone)]
pub struct ResidualVariance {
    window: StructuringElement,
    squared_residuals: Array3<f64>,
    previous_prediction: Option<f64>,
    values: Vec<f64>,
}

impl ResidualVariance {
    /// Window of the given radius, excluding the coded position
    pub fn new(radius: f64) -> Self {
        Self {
            window: StructuringElement::half_circle(radius, false),
            squared_residuals: Array3::zeros((0, 0, 0)),
            previous_prediction: None,
            values: Vec::new(),
        }
    }

    // Raster predecessor of `position`
    fn previous_position(&self, [z, y, x]: Position) -> Option<Position> {
        let [_, rows, cols] = self.squared_residuals.shape() else {
            return None;
        };
        if x > 0 {
            Some([z, y, x - 1])
        } else if y > 0 {
            Some([z, y - 1, cols - 1])
        } else if z > 0 {
            Some([z - 1, rows - 1, cols - 1])
        } else {
            None
        }
    }
}

impl Estimator for ResidualVariance {
    fn prepare(&mut self, context: &Context, _maxval: u32) -> Result<()> {
        let [slices, rows, cols] = context.shape();
        self.squared_residuals = Array3::zeros((slices, rows, cols));
        self.previous_prediction = None;
        Ok(())
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        _context: &mut Context,
        _scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        let previous = self
            .previous_prediction
            .replace(frame.prediction)
            .zip(self.previous_position(frame.position));
        let Some((prediction, position)) = previous else {
            return Ok(frame.initial_variance());
        };

        let residual = prediction - frame.sample(position);
        self.squared_residuals[position] = residual * residual;

        self.window
            .extract_border_safe(&self.squared_residuals, frame.position, &mut self.values);
        if self.values.is_empty() {
            return Ok(frame.initial_variance());
        }
        Ok(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::configuration::BorderSplit;

    const EPSILON: f64 = 1e-12;

    fn context(shape: [usize; 3]) -> Context {
        let mut context = Context::new(
            StructuringElement::half_rect(1, 1, 1, true),
            StructuringElement::half_square(2, false),
            BorderSplit::default(),
        );
        context.bind(shape, false);
        context
    }

    #[test]
    fn test_exponential_smooths_left_residual() -> Result<()> {
        let mut image = Array3::zeros((1, 1, 3));
        image[[0, 0, 0]] = 10.0;
        let mut context = context([1, 1, 3]);
        let mut scratch = RegressionScratch::new(1);
        let mut variance = ExponentialVariance::default();
        variance.prepare(&context, 255)?;

        context.check_border([0, 0, 0]);
        let first = Frame::new(&image, [0, 0, 0], 255).with_prediction(128.0);
        let initial = variance.estimate(&first, &mut context, &mut scratch)?;
        assert!((initial - 255.0 * 255.0 / 4.0).abs() < EPSILON);

        context.check_border([0, 0, 1]);
        let second = Frame::new(&image, [0, 0, 1], 255).with_prediction(10.0);
        let smoothed = variance.estimate(&second, &mut context, &mut scratch)?;
        let expected = 0.8 * initial + 0.2 * 118.0 * 118.0;
        assert!((smoothed - expected).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_residual_window_mean() -> Result<()> {
        let image = Array3::from_elem((1, 2, 2), 4.0);
        let mut context = context([1, 2, 2]);
        let mut scratch = RegressionScratch::new(1);
        let mut variance = ResidualVariance::new(1.5);
        variance.prepare(&context, 15)?;

        let mut last = 0.0;
        for (position, prediction) in [([0, 0, 0], 6.0), ([0, 0, 1], 4.0), ([0, 1, 0], 1.0)] {
            let frame = Frame::new(&image, position, 15).with_prediction(prediction);
            last = variance.estimate(&frame, &mut context, &mut scratch)?;
        }
        // Window around (1, 0) covers (0, 0) with residual 2² and (0, 1) with 0²
        assert!((last - 2.0).abs() < EPSILON);
        Ok(())
    }
}
