//! Per-position estimation pipeline: prediction, then variance, then degrees of freedom

use crate::io::configuration::{
    CoderConfig, NlmDistance, PRIORIZATION_SCALE, PredictorKind, VarianceKind, WlsVarianceEquation,
    WlsWeighting,
};
use crate::io::error::{Result, computation_error};
use crate::prediction::direct::{MeanPredictor, MedPredictor, NlmPredictor};
use crate::prediction::fast_ls::FastLeastSquaresPredictor;
use crate::prediction::least_squares::{
    self, LeastSquaresPredictor, LeastSquaresVariance, MatchingContext, RegressionSettings,
};
use crate::prediction::variance::{ExponentialVariance, ResidualVariance};
use crate::prediction::weighting::{WeightingFunction, inverse_euclidean_priorization};
use crate::prediction::{Estimator, Frame, PredictionModel, RegressionScratch, VarianceModel};
use crate::spatial::{Context, Position, StructuringElement};
use log::{debug, warn};
use ndarray::Array3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Unbound,
    Ready,
    Predicted { position: Position, prediction: f64 },
    Estimated { position: Position },
}

/// Owns the context and the models, and enforces the per-position call order
///
/// For every position [`Self::compute_prediction`] must come first; the
/// variance and the degrees of freedom then refer to that position.
#[derive(Debug, Clone)]
pub struct Predictor {
    context: Context,
    prediction: PredictionModel,
    variance: VarianceModel,
    scratch: RegressionScratch,
    maxval: u32,
    stage: Stage,
}

/// Training region shape for a configuration
pub fn training_region(config: &CoderConfig) -> StructuringElement {
    let size = config.training_size;
    if config.training_size_3d > 0 {
        StructuringElement::half_cuboid(size, size, size, size, config.training_size_3d, false)
    } else {
        StructuringElement::half_square(size, false)
    }
}

// Weighting of the weighted least squares for a given neighborhood
fn wls_weighting(config: &CoderConfig, neighborhood: &StructuringElement) -> WeightingFunction {
    if config.wls_weighting == WlsWeighting::Correlation {
        WeightingFunction::cropped_correlation()
    } else if config.max_training_vectors > 0 {
        WeightingFunction::cropped_priorized_ssd(
            inverse_euclidean_priorization(neighborhood, PRIORIZATION_SCALE),
            config.max_training_vectors,
        )
    } else if config.wls_variance_equation == WlsVarianceEquation::SquaredWeights {
        WeightingFunction::inverse_priorized_ssd(inverse_euclidean_priorization(
            neighborhood,
            2.0 * PRIORIZATION_SCALE,
        ))
    } else {
        WeightingFunction::inverse_priorized_sqd(inverse_euclidean_priorization(
            neighborhood,
            PRIORIZATION_SCALE,
        ))
    }
}

fn matching_context(config: &CoderConfig, neighborhood: &StructuringElement, training: &StructuringElement) -> MatchingContext {
    let radius = config.matching_neighborhood;
    let matching = if neighborhood.front() > 0 {
        StructuringElement::half_ellipsoid(radius, radius, radius, radius, radius, true)
    } else {
        StructuringElement::half_ellipse(radius, radius, radius, true)
    };
    let weighting = wls_weighting(config, &matching);
    MatchingContext::new(
        Context::new(matching, training.clone(), config.border_split),
        weighting,
    )
}

fn prediction_model(
    config: &CoderConfig,
    neighborhood: &StructuringElement,
    training: &StructuringElement,
) -> PredictionModel {
    let settings = RegressionSettings {
        border_regularization: config.border_regularization,
        inner_regularization: config.inner_regularization,
        solver: config.solver,
        max_training_vectors: config.max_training_vectors,
    };
    match config.predictor {
        PredictorKind::Mean => PredictionModel::Mean(MeanPredictor::default()),
        PredictorKind::Med => PredictionModel::Med(MedPredictor::default()),
        PredictorKind::Nlm => {
            let weighting = match config.nlm_distance {
                NlmDistance::Sad => WeightingFunction::exponential_sad(config.nlm_decay),
                NlmDistance::Ssd => WeightingFunction::exponential_ssd(config.nlm_decay),
            };
            PredictionModel::Nlm(NlmPredictor::new(weighting))
        }
        PredictorKind::Ls => PredictionModel::LeastSquares(LeastSquaresPredictor::new(
            WeightingFunction::identity(),
            RegressionSettings {
                max_training_vectors: 0,
                ..settings
            },
        )),
        PredictorKind::Wls => {
            let predictor = LeastSquaresPredictor::new(wls_weighting(config, neighborhood), settings);
            if config.matching_neighborhood > 0.0 {
                PredictionModel::LeastSquares(
                    predictor.with_matching(matching_context(config, neighborhood, training)),
                )
            } else {
                PredictionModel::LeastSquares(predictor)
            }
        }
        PredictorKind::FastLs => {
            PredictionModel::FastLeastSquares(Box::new(FastLeastSquaresPredictor::new(settings)))
        }
    }
}

fn variance_model(config: &CoderConfig) -> VarianceModel {
    match config.variance {
        VarianceKind::Exponential => VarianceModel::Exponential(ExponentialVariance::default()),
        VarianceKind::Residual => VarianceModel::Residual(ResidualVariance::new(config.variance_radius)),
        VarianceKind::Ls if config.is_regression() => {
            let squared = config.predictor == PredictorKind::Wls
                && config.wls_variance_equation == WlsVarianceEquation::SquaredWeights;
            VarianceModel::LeastSquares(LeastSquaresVariance::new(squared))
        }
        VarianceKind::Ls => {
            warn!(
                "{} variance needs a regression predictor; using {} with {}",
                VarianceKind::Ls,
                VarianceKind::Exponential,
                config.predictor
            );
            VarianceModel::Exponential(ExponentialVariance::default())
        }
    }
}

impl Predictor {
    /// Build the models selected by `config` around a full neighborhood
    pub fn new(config: &CoderConfig, neighborhood: StructuringElement) -> Self {
        let training = training_region(config);
        let prediction = prediction_model(config, &neighborhood, &training);
        let variance = variance_model(config);
        debug!(
            "predictor {} with {} variance over {} neighbors",
            config.predictor,
            config.variance,
            neighborhood.len().saturating_sub(1)
        );
        let capacity = neighborhood.len();
        Self {
            context: Context::new(neighborhood, training, config.border_split),
            prediction,
            variance,
            scratch: RegressionScratch::new(capacity),
            maxval: 0,
            stage: Stage::Unbound,
        }
    }

    /// Assemble a predictor from explicit parts
    pub fn from_parts(context: Context, prediction: PredictionModel, variance: VarianceModel) -> Self {
        let capacity = context.full_neighborhood().len();
        Self {
            context,
            prediction,
            variance,
            scratch: RegressionScratch::new(capacity),
            maxval: 0,
            stage: Stage::Unbound,
        }
    }

    /// Bind to an image of `shape` with samples in `0..=maxval`
    ///
    /// # Errors
    ///
    /// Propagates model preparation failures
    pub fn set_image(&mut self, shape: [usize; 3], maxval: u32, buffered: bool) -> Result<()> {
        self.context.bind(shape, buffered);
        self.maxval = maxval;
        self.scratch = RegressionScratch::new(self.context.full_neighborhood().len());
        self.prediction.prepare(&self.context, maxval)?;
        self.variance.prepare(&self.context, maxval)?;
        self.stage = Stage::Ready;
        Ok(())
    }

    /// Predict the sample at `position` from the samples coded before it
    ///
    /// # Errors
    ///
    /// Returns an error if no image is bound, or propagates model failures
    pub fn compute_prediction(&mut self, image: &Array3<f64>, position: Position) -> Result<f64> {
        if self.stage == Stage::Unbound {
            return Err(computation_error(
                "compute_prediction",
                &"set_image must bind an image first",
            ));
        }
        self.context.check_border(position);
        let frame = Frame::new(image, position, self.maxval);
        let prediction = self
            .prediction
            .estimate(&frame, &mut self.context, &mut self.scratch)?;
        self.stage = Stage::Predicted {
            position,
            prediction,
        };
        Ok(prediction)
    }

    /// Variance of the last prediction
    ///
    /// # Errors
    ///
    /// Returns an error unless a prediction was just computed, or propagates
    /// model failures
    pub fn compute_variance(&mut self, image: &Array3<f64>) -> Result<f64> {
        let Stage::Predicted {
            position,
            prediction,
        } = self.stage
        else {
            return Err(computation_error(
                "compute_variance",
                &"compute_prediction must run first, once per variance",
            ));
        };
        let frame = Frame::new(image, position, self.maxval).with_prediction(prediction);
        let variance = self
            .variance
            .estimate(&frame, &mut self.context, &mut self.scratch)?;
        self.stage = Stage::Estimated { position };
        Ok(variance)
    }

    /// Degrees of freedom of the last prediction, one unless it came from a regression
    ///
    /// # Errors
    ///
    /// Returns an error unless a prediction was computed for the current position
    pub fn compute_degrees_of_freedom(&self) -> Result<f64> {
        match self.stage {
            Stage::Predicted { .. } | Stage::Estimated { .. } => {}
            Stage::Unbound | Stage::Ready => {
                return Err(computation_error(
                    "compute_degrees_of_freedom",
                    &"compute_prediction must run first",
                ));
            }
        }
        if self.prediction.is_regression() {
            Ok(least_squares::degrees_of_freedom(&self.context, &self.scratch))
        } else {
            Ok(1.0)
        }
    }

    /// Context bound to the current image
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Largest sample value of the bound image
    pub const fn maxval(&self) -> u32 {
        self.maxval
    }
}
