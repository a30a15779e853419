//! Per-sample prediction, variance and degrees-of-freedom estimation
//!
//! Prediction and variance models share one contract, [`Estimator`], and are
//! dispatched through the closed enums [`PredictionModel`] and
//! [`VarianceModel`]. The [`predictor::Predictor`] owns the context and
//! sequences the three steps for every coded position.

pub mod direct;
pub mod fast_ls;
pub mod least_squares;
pub mod predictor;
pub mod variance;
pub mod weighting;

pub use least_squares::RegressionScratch;
pub use predictor::Predictor;

use crate::io::error::Result;
use crate::spatial::{Context, Position};
use ndarray::Array3;

/// The coded position together with what is known about it so far
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Samples coded so far; later samples hold arbitrary values
    pub image: &'a Array3<f64>,
    /// Position `[slice, row, col]` being coded
    pub position: Position,
    /// Largest sample value
    pub maxval: u32,
    /// Prediction for this position once computed
    pub prediction: f64,
}

impl<'a> Frame<'a> {
    /// Frame without a prediction yet
    pub const fn new(image: &'a Array3<f64>, position: Position, maxval: u32) -> Self {
        Self {
            image,
            position,
            maxval,
            prediction: 0.0,
        }
    }

    /// Same frame carrying `prediction`
    #[must_use]
    pub const fn with_prediction(mut self, prediction: f64) -> Self {
        self.prediction = prediction;
        self
    }

    /// Sample at `position` in the frame's image
    pub fn sample(&self, position: Position) -> f64 {
        self.image[position]
    }

    /// Square of half the sample range, the fallback variance of the first sample
    pub fn initial_variance(&self) -> f64 {
        let maxval = f64::from(self.maxval);
        maxval * maxval * 0.25
    }

    /// Center of the sample range
    pub fn mid_value(&self) -> f64 {
        (f64::from(self.maxval) + 1.0) / 2.0
    }
}

/// Common contract of prediction and variance models
pub trait Estimator {
    /// Reset per-image state once the context is bound to an image
    ///
    /// # Errors
    ///
    /// Returns an error when the model cannot handle the image geometry
    fn prepare(&mut self, context: &Context, maxval: u32) -> Result<()> {
        let _ = (context, maxval);
        Ok(())
    }

    /// Estimate the quantity at the frame's position
    ///
    /// The context has already been checked against the border at
    /// `frame.position`.
    ///
    /// # Errors
    ///
    /// Returns an error when a weighting underflows or the model state is
    /// inconsistent with the image
    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<f64>;
}

/// Closed set of prediction models
#[derive(Debug, Clone)]
pub enum PredictionModel {
    /// Mean of the causal neighbors
    Mean(direct::MeanPredictor),
    /// LOCO-I median edge detector
    Med(direct::MedPredictor),
    /// Non-local means over the training region
    Nlm(direct::NlmPredictor),
    /// Ordinary or weighted least squares
    LeastSquares(least_squares::LeastSquaresPredictor),
    /// Least squares with prefix-summed normal equations
    FastLeastSquares(Box<fast_ls::FastLeastSquaresPredictor>),
}

impl PredictionModel {
    fn as_estimator(&mut self) -> &mut dyn Estimator {
        match self {
            Self::Mean(model) => model,
            Self::Med(model) => model,
            Self::Nlm(model) => model,
            Self::LeastSquares(model) => model,
            Self::FastLeastSquares(model) => model.as_mut(),
        }
    }

    /// Whether the model fits a regression whose residuals drive the variance
    pub const fn is_regression(&self) -> bool {
        matches!(self, Self::LeastSquares(_) | Self::FastLeastSquares(_))
    }
}

impl Estimator for PredictionModel {
    fn prepare(&mut self, context: &Context, maxval: u32) -> Result<()> {
        self.as_estimator().prepare(context, maxval)
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        self.as_estimator().estimate(frame, context, scratch)
    }
}

/// Closed set of variance models
#[derive(Debug, Clone)]
pub enum VarianceModel {
    /// Exponentially smoothed squared residual of the left neighbor
    Exponential(variance::ExponentialVariance),
    /// Mean squared residual over a causal window
    Residual(variance::ResidualVariance),
    /// Analytic regression residual variance
    LeastSquares(least_squares::LeastSquaresVariance),
}

impl VarianceModel {
    fn as_estimator(&mut self) -> &mut dyn Estimator {
        match self {
            Self::Exponential(model) => model,
            Self::Residual(model) => model,
            Self::LeastSquares(model) => model,
        }
    }
}

impl Estimator for VarianceModel {
    fn prepare(&mut self, context: &Context, maxval: u32) -> Result<()> {
        self.as_estimator().prepare(context, maxval)
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        self.as_estimator().estimate(frame, context, scratch)
    }
}
