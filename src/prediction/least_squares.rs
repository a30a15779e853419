//! Ordinary and weighted least-squares prediction over the training region
//!
//! Every training position contributes the outer product of its neighborhood
//! vector, whose last element is the sample at that position and serves as
//! the dependent variable. The accumulated matrix therefore holds `X'WX`,
//! `X'Wy` and `y'Wy` in one symmetric block.

use crate::io::configuration::{NEGATIVE_LEVERAGE_FALLBACK, Solver};
use crate::io::error::Result;
use crate::math::linalg;
use crate::prediction::weighting::{Weighting, WeightingFunction};
use crate::prediction::{Estimator, Frame};
use crate::spatial::Context;
use ndarray::{Array2, s};

/// Regression buffers shared by the prediction, variance and degrees-of-freedom steps
///
/// Sized once for the full neighborhood and reused from pixel to pixel; only
/// the leading block matching the current neighborhood is active.
#[derive(Debug, Clone)]
pub struct RegressionScratch {
    gram: Array2<f64>,
    order: usize,
    current: Vec<f64>,
    coefficients: Array2<f64>,
    weights: Vec<f64>,
    neighbors: Vec<f64>,
    sample: Vec<f64>,
    matching_sample: Vec<f64>,
    kept: Vec<f64>,
    kept_weights: Vec<f64>,
}

impl RegressionScratch {
    /// Buffers for neighborhoods of up to `capacity` elements, dependent sample included
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            gram: Array2::zeros((capacity, capacity)),
            order: 0,
            current: Vec::with_capacity(capacity),
            coefficients: Array2::zeros((0, 2)),
            weights: Vec::new(),
            neighbors: Vec::with_capacity(capacity),
            sample: Vec::with_capacity(capacity),
            matching_sample: Vec::new(),
            kept: Vec::new(),
            kept_weights: Vec::new(),
        }
    }

    /// Start a new system for the current neighborhood vector
    ///
    /// The last element of `vector` is the not yet known sample and only
    /// fixes the system order.
    fn begin(&mut self, vector: &[f64]) {
        let n = vector.len();
        if n > self.gram.nrows() {
            self.gram = Array2::zeros((n, n));
        }
        self.order = n;
        self.gram.slice_mut(s![..n, ..n]).fill(0.0);
        self.current.clear();
        self.current.extend(vector.iter().take(n.saturating_sub(1)));
        self.weights.clear();
    }

    /// Size of the active system including the dependent sample
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Number of fitted regression coefficients
    pub const fn coefficient_count(&self) -> usize {
        self.order.saturating_sub(1)
    }

    /// Regression coefficients of the last solve
    pub fn coefficients(&self) -> Vec<f64> {
        self.coefficients.column(0).to_vec()
    }

    /// Training weights of the last estimate, empty when weights do not apply
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    // Adds the weighted outer product to the upper triangle
    fn accumulate(&mut self, sample: &[f64], weight: f64) {
        let n = self.order.min(sample.len());
        for (k, sk) in sample.iter().take(n).enumerate() {
            for (l, sl) in sample.iter().enumerate().take(n).skip(k) {
                self.gram[[k, l]] += sk * (sl * weight);
            }
        }
    }

    /// Add a precomputed `order × order` block, used by the prefix-sum estimate
    pub(crate) fn add_block(&mut self, block: &[f64], sign: f64) {
        let n = self.order;
        for (k, row) in block.chunks_exact(n).take(n).enumerate() {
            for (l, value) in row.iter().enumerate() {
                self.gram[[k, l]] += sign * value;
            }
        }
    }

    pub(crate) fn begin_block(&mut self, vector: &[f64]) {
        self.begin(vector);
    }

    pub(crate) fn clear_weights(&mut self) {
        self.weights.clear();
    }

    /// Mirror the upper triangle of the active block
    pub(crate) fn symmetrize(&mut self) {
        let n = self.order;
        for k in 1..n {
            for l in 0..k {
                self.gram[[k, l]] = self.gram[[l, k]];
            }
        }
    }

    // Solves (X'WX + ridge·I) β = X'Wy and (X'WX + ridge·I) v = x₀, then
    // corrects X'Wy so the residual sum of squares stays exact under the ridge
    fn solve(&mut self, ridge: f64, solver: Solver) {
        let m = self.coefficient_count();
        if ridge != 0.0 {
            for i in 0..m {
                self.gram[[i, i]] += ridge;
            }
        }

        let mut rhs = Array2::<f64>::zeros((m, 2));
        for (i, mut row) in rhs.rows_mut().into_iter().enumerate() {
            row[0] = self.gram[[i, m]];
            row[1] = self.current.get(i).copied().unwrap_or(0.0);
        }
        self.coefficients = linalg::solve(self.gram.slice(s![..m, ..m]), rhs.view(), solver);

        if ridge != 0.0 {
            for i in 0..m {
                self.gram[[i, m]] += self.coefficients[[i, 0]] * ridge;
            }
        }
    }

    fn prediction(&self) -> f64 {
        self.current
            .iter()
            .zip(self.coefficients.column(0))
            .map(|(x, b)| x * b)
            .sum()
    }

    // x₀ᵀ (X'WX)⁻¹ x₀, the coefficient estimation error relative to the noise variance
    fn leverage(&self) -> f64 {
        self.current
            .iter()
            .zip(self.coefficients.column(1))
            .map(|(x, v)| x * v)
            .sum()
    }

    fn residual_sum_of_squares(&self) -> f64 {
        let m = self.coefficient_count();
        let explained: f64 = (0..m)
            .map(|i| self.gram[[i, m]] * self.coefficients[[i, 0]])
            .sum();
        (self.gram[[m, m]] - explained).max(0.0)
    }

    fn residual(&self, sample: &[f64]) -> f64 {
        let m = self.coefficient_count();
        let fitted: f64 = sample
            .iter()
            .take(m)
            .zip(self.coefficients.column(0))
            .map(|(x, b)| x * b)
            .sum();
        fitted - sample.get(m).copied().unwrap_or(0.0)
    }
}

/// Regularization and solver settings of a regression predictor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionSettings {
    /// Ridge at border positions; zero disables regularization altogether
    pub border_regularization: f64,
    /// Ridge at interior positions
    pub inner_regularization: f64,
    /// Linear system solver
    pub solver: Solver,
    /// Keep only this many highest-weight training vectors, zero keeps all
    pub max_training_vectors: usize,
}

impl RegressionSettings {
    fn ridge(&self, border: bool) -> f64 {
        if self.border_regularization == 0.0 {
            0.0
        } else if border {
            self.border_regularization
        } else {
            self.inner_regularization
        }
    }
}

/// Separate context whose neighborhoods drive the weighting
#[derive(Debug, Clone)]
pub struct MatchingContext {
    context: Context,
    weighting: WeightingFunction,
}

impl MatchingContext {
    /// Pair a matching context with the weighting evaluated on its vectors
    pub const fn new(context: Context, weighting: WeightingFunction) -> Self {
        Self { context, weighting }
    }
}

/// Prediction from the causal neighbors while no training data exists
///
/// The first sample of an image gets the mid-range value; later samples get
/// the mean of their neighbors. The neighbors stay in the scratch for the
/// variance estimate.
pub(crate) fn bootstrap(frame: &Frame<'_>, context: &Context, scratch: &mut RegressionScratch) -> f64 {
    context.current_vector(frame.image, frame.position, &mut scratch.neighbors);
    scratch.order = 0;
    let known = scratch.neighbors.len().saturating_sub(1);
    if known == 0 {
        return (1.0 + f64::from(frame.maxval)) / 2.0;
    }
    scratch.neighbors.truncate(known);
    scratch.neighbors.iter().sum::<f64>() / known as f64
}

/// Solve the accumulated system and predict the current sample
pub(crate) fn solve_and_predict(
    frame: &Frame<'_>,
    context: &Context,
    scratch: &mut RegressionScratch,
    settings: &RegressionSettings,
) -> f64 {
    scratch.solve(settings.ridge(context.is_border()), settings.solver);
    scratch.prediction().clamp(0.0, f64::from(frame.maxval))
}

/// LS and WLS prediction
#[derive(Debug, Clone)]
pub struct LeastSquaresPredictor {
    weighting: WeightingFunction,
    matching: Option<MatchingContext>,
    settings: RegressionSettings,
}

impl LeastSquaresPredictor {
    /// Regression with the given training weighting
    pub const fn new(weighting: WeightingFunction, settings: RegressionSettings) -> Self {
        Self {
            weighting,
            matching: None,
            settings,
        }
    }

    /// Compute the weights on a separate matching context instead
    #[must_use]
    pub fn with_matching(mut self, matching: MatchingContext) -> Self {
        self.matching = Some(matching);
        self
    }

    /// Regression settings
    pub const fn settings(&self) -> &RegressionSettings {
        &self.settings
    }

    /// Accumulate the weighted normal equations over the training region
    ///
    /// # Errors
    ///
    /// Propagates weighting failures
    pub(crate) fn accumulate_training(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<()> {
        let image = frame.image;
        let position = frame.position;
        let mut sample = std::mem::take(&mut scratch.sample);
        let mut matching_sample = std::mem::take(&mut scratch.matching_sample);

        context.current_vector(image, position, &mut sample);
        scratch.begin(&sample);

        match self.matching.as_mut() {
            Some(matching) => {
                matching.context.check_border(position);
                if matching.context.is_border() {
                    context.set_training_region(matching.context.training_region().clone());
                }
                matching.context.current_vector(image, position, &mut matching_sample);
                matching_sample.pop();
                matching.weighting.set_reference(&matching_sample);
                matching.context.begin_training(position);
            }
            None => self.weighting.set_reference(&scratch.current),
        }

        context.begin_training(position);
        let result = if self.settings.max_training_vectors > 0 {
            self.accumulate_strongest(image, context, scratch, &mut sample, &mut matching_sample)
        } else {
            self.accumulate_all(image, context, scratch, &mut sample, &mut matching_sample)
        };
        scratch.symmetrize();

        scratch.sample = sample;
        scratch.matching_sample = matching_sample;
        result
    }

    fn next_weight(&mut self, image: &ndarray::Array3<f64>, sample: &[f64], matching_sample: &mut Vec<f64>) -> Result<f64> {
        match self.matching.as_mut() {
            Some(matching) => {
                if matching
                    .context
                    .next_training_vector(image, matching_sample)
                    .is_none()
                {
                    return Ok(0.0);
                }
                matching.weighting.weight(matching_sample)
            }
            None => self.weighting.weight(sample),
        }
    }

    fn accumulate_all(
        &mut self,
        image: &ndarray::Array3<f64>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
        sample: &mut Vec<f64>,
        matching_sample: &mut Vec<f64>,
    ) -> Result<()> {
        while context.next_training_vector(image, sample).is_some() {
            let weight = self.next_weight(image, sample, matching_sample)?;
            scratch.weights.push(weight);
            scratch.accumulate(sample, weight);
        }
        Ok(())
    }

    // Keeps the `max_training_vectors` vectors with nonzero weight, each new
    // one replacing the currently weakest
    fn accumulate_strongest(
        &mut self,
        image: &ndarray::Array3<f64>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
        sample: &mut Vec<f64>,
        matching_sample: &mut Vec<f64>,
    ) -> Result<()> {
        let capacity = self.settings.max_training_vectors;
        let width = scratch.order.max(1);
        let mut kept = std::mem::take(&mut scratch.kept);
        let mut kept_weights = std::mem::take(&mut scratch.kept_weights);
        kept.clear();
        kept.resize(capacity * width, 0.0);
        kept_weights.clear();
        kept_weights.resize(capacity, 0.0);

        let result = self.select_strongest(
            image,
            context,
            scratch,
            sample,
            matching_sample,
            (&mut kept, &mut kept_weights),
        );
        if result.is_ok() {
            let threshold = kept_weights.iter().copied().fold(f64::INFINITY, f64::min);
            for weight in &mut scratch.weights {
                if *weight < threshold {
                    *weight = 0.0;
                }
            }
            for (row, weight) in kept.chunks_exact(width).zip(&kept_weights) {
                scratch.accumulate(row, *weight);
            }
        }

        scratch.kept = kept;
        scratch.kept_weights = kept_weights;
        result
    }

    fn select_strongest(
        &mut self,
        image: &ndarray::Array3<f64>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
        sample: &mut Vec<f64>,
        matching_sample: &mut Vec<f64>,
        (kept, kept_weights): (&mut [f64], &mut [f64]),
    ) -> Result<()> {
        let width = scratch.order.max(1);
        while context.next_training_vector(image, sample).is_some() {
            let weight = self.next_weight(image, sample, matching_sample)?;
            scratch.weights.push(weight);
            if weight == 0.0 {
                continue;
            }
            let (weakest, _) = kept_weights
                .iter()
                .copied()
                .enumerate()
                .fold((0, f64::INFINITY), |best, (i, w)| if w < best.1 { (i, w) } else { best });
            if let Some(slot) = kept_weights.get_mut(weakest) {
                *slot = weight;
            }
            if let Some(row) = kept.chunks_exact_mut(width).nth(weakest) {
                for (slot, value) in row.iter_mut().zip(sample.iter()) {
                    *slot = *value;
                }
            }
        }
        Ok(())
    }
}

impl Estimator for LeastSquaresPredictor {
    fn prepare(&mut self, context: &Context, maxval: u32) -> Result<()> {
        self.weighting.set_maxval(maxval);
        if let Some(matching) = self.matching.as_mut() {
            matching.weighting.set_maxval(maxval);
            matching.context.bind(context.shape(), context.is_buffered());
        }
        Ok(())
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        if context.training_len() == 0 {
            return Ok(bootstrap(frame, context, scratch));
        }
        self.accumulate_training(frame, context, scratch)?;
        Ok(solve_and_predict(frame, context, scratch, &self.settings))
    }
}

/// Variance from the regression residuals
///
/// Scales the residual sum of squares by the coefficient estimation error
/// and normalizes by the degrees of freedom and, for weighted fits, by the
/// mean weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeastSquaresVariance {
    squared_weights: bool,
}

impl LeastSquaresVariance {
    /// `squared_weights` recomputes the residuals with squared training weights
    pub const fn new(squared_weights: bool) -> Self {
        Self { squared_weights }
    }

    // Variance while the regression is bootstrapping from plain neighbors
    fn bootstrap_variance(frame: &Frame<'_>, scratch: &RegressionScratch) -> f64 {
        let maxval = f64::from(frame.maxval);
        match scratch.neighbors.len() {
            0 => maxval * maxval * 0.25,
            1 => maxval * maxval * 0.0625,
            count => {
                let sum_of_squares: f64 = scratch
                    .neighbors
                    .iter()
                    .map(|v| (v - frame.prediction) * (v - frame.prediction))
                    .sum();
                sum_of_squares / (count - 1) as f64
            }
        }
    }
}

impl Estimator for LeastSquaresVariance {
    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        if context.training_len() == 0 {
            return Ok(Self::bootstrap_variance(frame, scratch));
        }

        let mut leverage = scratch.leverage();
        if leverage < 0.0 {
            // Numerically singular system
            leverage = NEGATIVE_LEVERAGE_FALLBACK;
        }

        let residual_sum = if self.squared_weights && !scratch.weights.is_empty() {
            let mut sample = std::mem::take(&mut scratch.sample);
            let mut sum = 0.0;
            let mut index = 0;
            if context.restart_training() {
                while context.next_training_vector(frame.image, &mut sample).is_some() {
                    let residual = scratch.residual(&sample);
                    if let Some(weight) = scratch.weights.get_mut(index) {
                        *weight *= *weight;
                        sum += residual * residual * *weight;
                    }
                    index += 1;
                }
            }
            scratch.sample = sample;
            sum
        } else {
            scratch.residual_sum_of_squares()
        };

        let dof = degrees_of_freedom(context, scratch);
        let weight_sum: f64 = scratch.weights.iter().sum();
        if scratch.weights.is_empty() || weight_sum <= 0.0 {
            Ok(residual_sum * (1.0 + leverage) / dof)
        } else {
            Ok(residual_sum * scratch.weights.len() as f64 * (1.0 + leverage) / (dof * weight_sum))
        }
    }
}

/// Training samples minus fitted coefficients, at least one
pub fn degrees_of_freedom(context: &Context, scratch: &RegressionScratch) -> f64 {
    let training = context.training_len();
    if training == 0 {
        return 1.0;
    }
    training.saturating_sub(scratch.coefficient_count()).max(1) as f64
}
