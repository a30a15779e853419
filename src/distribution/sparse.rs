//! Sparsification: confine probability mass to sample values seen before
//!
//! Two histograms decide which values are probable: one over a causal
//! window around the coded position, one over every sample coded so far
//! (per channel for color images). Each is turned into a smoothed score
//! array; a value that is absent from a histogram and scores below a
//! threshold derived from the rarest observed value is improbable. The base
//! law's mass inside runs of probable values is then renormalized to the full
//! weight, leaving improbable values without mass.

use crate::distribution::functions::{CumulativeLaw, Law, LawParameters};
use crate::io::configuration::MIN_SPARSE_MASS;
use crate::math::probability::gaussian_kernel;
use crate::spatial::{Position, StructuringElement};
use ndarray::Array3;

// Adds `score` at `value` blurred by `kernel` onto `smoothed`, with both
// ends mirrored without repeating the edge sample
fn scatter(smoothed: &mut [f64], kernel: &[f64], value: usize, score: f64) {
    let len = smoothed.len();
    if len <= 1 {
        if let Some(only) = smoothed.first_mut() {
            *only += score * kernel.iter().sum::<f64>();
        }
        return;
    }

    let radius = (kernel.len() / 2) as isize;
    let last = len as isize - 1;
    let period = 2 * last;
    let value = value as isize;
    let mirrored = period - value;
    let classes = if value == 0 || value == last {
        [Some(value), None]
    } else {
        [Some(value), Some(mirrored)]
    };

    for class in classes.into_iter().flatten() {
        let mut source = -radius + (class + radius).rem_euclid(period);
        while source <= last + radius {
            let first = (source - radius).max(0);
            let end = (source + radius).min(last);
            for target in first..=end {
                let tap = kernel.get((source - target + radius) as usize);
                if let (Some(cell), Some(tap)) = (smoothed.get_mut(target as usize), tap) {
                    *cell += score * tap;
                }
            }
            source += period;
        }
    }
}

// Values `[start, end)` keeping the base law's mass, `before` is the mass
// of the runs below
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32,
    end: u32,
    before: f64,
    mass: f64,
}

/// Base law sparsified by observed sample values
#[derive(Debug, Clone)]
pub struct SparseLaw {
    base: Law,
    maxval: u32,
    independent_slices: bool,
    window: StructuringElement,
    strength: f64,
    kernel: Vec<f64>,
    sample_count: usize,
    first_row: bool,
    window_histogram: Vec<u32>,
    smoothed_scores: Vec<f64>,
    probable: Vec<bool>,
    past_histogram: Vec<u32>,
    past_scores: Vec<f64>,
    past_score_mean: f64,
    rarest_past: usize,
    runs: Vec<Run>,
}

impl SparseLaw {
    /// Sparsify `base` for samples in `0..=maxval`
    ///
    /// `window` is the causal context window, `sample_count` the number of
    /// samples of the image, and `independent_slices` restarts the long-term
    /// statistics at every slice.
    pub fn new(
        base: Law,
        maxval: u32,
        independent_slices: bool,
        window: StructuringElement,
        strength: f64,
        sample_count: usize,
    ) -> Self {
        let values = maxval as usize + 1;
        let kernel_radius = maxval as usize / 10 + 1;
        Self {
            base,
            maxval,
            independent_slices,
            window,
            strength,
            kernel: gaussian_kernel(2 * kernel_radius + 1, f64::from(maxval) / 20.0),
            sample_count,
            first_row: true,
            window_histogram: vec![0; values],
            smoothed_scores: vec![0.0; values],
            probable: vec![false; values],
            past_histogram: vec![0; values],
            past_scores: vec![0.0; values],
            past_score_mean: 0.0,
            rarest_past: sample_count,
            runs: Vec::new(),
        }
    }

    /// Base law being sparsified
    pub const fn base(&self) -> &Law {
        &self.base
    }

    /// Whether the last update left the base law untouched
    pub const fn is_passthrough(&self) -> bool {
        self.first_row
    }

    /// Probable value runs `[start, end)` of the last update
    pub fn probable_runs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.runs.iter().map(|run| (run.start, run.end))
    }

    fn reset_past(&mut self) {
        self.past_histogram.fill(0);
        self.past_scores.fill(0.0);
        self.past_score_mean = 0.0;
        self.rarest_past = self.sample_count;
    }

    // Records the sample coded just before the current position
    fn observe(&mut self, value: usize) {
        let Some(count) = self.past_histogram.get_mut(value) else {
            return;
        };
        let frequency = *count;
        *count += 1;
        let increment = if frequency > 0 {
            -1.0 / (f64::from(frequency) * f64::from(frequency + 1))
        } else {
            1.0
        };
        self.past_score_mean += increment / (f64::from(self.maxval) + 1.0);

        let radius = self.kernel.len() / 2;
        let low = value.saturating_sub(radius);
        let taps = self.kernel.iter().skip(low + radius - value);
        for (score, tap) in self.past_scores.iter_mut().skip(low).zip(taps) {
            *score += increment * tap;
        }

        let frequency = frequency as usize + 1;
        if frequency == 1 {
            self.rarest_past = 1;
        } else if frequency == self.rarest_past + 1 {
            self.rarest_past += 1;
            if self
                .past_histogram
                .iter()
                .any(|count| *count as usize == frequency - 1)
            {
                self.rarest_past -= 1;
            }
        }
    }

    /// Update the base law and the value statistics for the sample at `position`
    ///
    /// Must be called once per coded position, in coding order, before the
    /// law is evaluated for that position.
    pub fn update(
        &mut self,
        parameters: &LawParameters,
        crop: Option<u32>,
        image: &Array3<f64>,
        position: Position,
    ) {
        let [slice, row, col] = position;
        let (_, rows, cols) = image.dim();
        let previous = if col > 0 {
            Some([slice, row, col - 1])
        } else if row > 0 {
            Some([slice, row - 1, cols - 1])
        } else if slice > 0 {
            Some([slice - 1, rows - 1, cols - 1])
        } else {
            None
        };
        let previous_value = previous
            .and_then(|p| image.get(p).copied())
            .map_or(self.maxval / 2, |v| (v.max(0.0) as u32).min(self.maxval));

        self.base.set_parameters(parameters, crop);
        if self.independent_slices && row == 0 && col == 0 {
            self.reset_past();
        }
        self.observe(previous_value as usize);

        if row == 0 && (self.independent_slices || slice == 0) {
            self.first_row = true;
            return;
        }
        self.first_row = false;

        self.score_window(image, position);
        self.find_probable_runs();
    }

    fn score_window(&mut self, image: &Array3<f64>, position: Position) {
        self.window
            .histogram_border_safe(image, position, &mut self.window_histogram);

        let mut rarest = self.sample_count;
        let mut mean = 0.0;
        self.smoothed_scores.fill(0.0);
        for (value, count) in self.window_histogram.iter().enumerate() {
            if *count > 0 {
                rarest = rarest.min(*count as usize);
                let score = 1.0 / f64::from(*count);
                mean += score;
                scatter(&mut self.smoothed_scores, &self.kernel, value, score);
            }
        }
        mean /= f64::from(self.maxval) + 1.0;

        let window_threshold = mean * rarest as f64 * self.strength;
        let past_threshold = self.past_score_mean * self.rarest_past as f64;
        let statistics = self
            .window_histogram
            .iter()
            .zip(&self.smoothed_scores)
            .zip(self.past_histogram.iter().zip(&self.past_scores));
        for (probable, ((window, smoothed), (past, past_score))) in
            self.probable.iter_mut().zip(statistics)
        {
            let improbable = (*window == 0 && *smoothed < window_threshold)
                || (*past == 0 && *past_score < past_threshold);
            *probable = !improbable;
        }
    }

    fn find_probable_runs(&mut self) {
        self.runs.clear();
        let mut start = None;
        let mut before = 0.0;
        let flags = self.probable.iter().copied().chain(std::iter::once(false));
        for (value, probable) in (0_u32..).zip(flags) {
            match (start, probable) {
                (None, true) => start = Some(value),
                (Some(first), false) => {
                    let mass = self
                        .base
                        .mass(f64::from(first) - 0.5, f64::from(value) - 0.5)
                        .max(0.0);
                    self.runs.push(Run {
                        start: first,
                        end: value,
                        before,
                        mass,
                    });
                    before += mass;
                    start = None;
                }
                _ => {}
            }
        }
    }

    // Cumulative mass when the base law has next to no mass on probable values
    fn spread_uniformly(&self, value: u32) -> f64 {
        let (below, probable) = self.runs.iter().fold((0, 0), |(below, probable), run| {
            let inside = value.clamp(run.start, run.end) - run.start;
            (below + inside, probable + run.end - run.start)
        });
        if probable == 0 {
            return 0.0;
        }
        self.base.weight() / f64::from(probable) * f64::from(below)
    }
}

impl CumulativeLaw for SparseLaw {
    /// Sets the base law alone; [`SparseLaw::update`] drives the sparsification
    fn set_parameters(&mut self, parameters: &LawParameters, crop: Option<u32>) {
        self.base.set_parameters(parameters, crop);
        self.first_row = true;
    }

    fn cumulative(&self, x: f64) -> f64 {
        let Some(last) = self.runs.last() else {
            return self.base.cumulative(x);
        };
        if self.first_row {
            return self.base.cumulative(x);
        }

        let weight = self.base.weight();
        let total = last.before + last.mass;
        let value = (x + 0.5).max(0.0) as u32;
        if total < MIN_SPARSE_MASS * weight {
            return self.spread_uniformly(value);
        }

        let index = self.runs.partition_point(|run| run.end <= value);
        let Some(run) = self.runs.get(index) else {
            return weight;
        };
        if value <= run.start {
            return run.before / total * weight;
        }
        let inside = self
            .base
            .mass(f64::from(run.start) - 0.5, x)
            .clamp(0.0, run.mass);
        ((run.before + inside) / total * weight).min(weight)
    }

    fn tail(&self, x: f64) -> f64 {
        self.weight() - self.cumulative(x)
    }

    fn weight(&self) -> f64 {
        self.base.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::configuration::DistributionKind;

    // Index into `0..len` mirrored at both ends without repeating the edge sample
    fn reflect_101(index: isize, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        let period = 2 * (len as isize - 1);
        let folded = index.rem_euclid(period);
        if folded >= len as isize {
            (period - folded) as usize
        } else {
            folded as usize
        }
    }

    fn convolve(scores: &[f64], kernel: &[f64]) -> Vec<f64> {
        let radius = (kernel.len() / 2) as isize;
        (0..scores.len())
            .map(|i| {
                kernel
                    .iter()
                    .enumerate()
                    .map(|(k, tap)| {
                        let source = reflect_101(i as isize + k as isize - radius, scores.len());
                        tap * scores.get(source).copied().unwrap_or(0.0)
                    })
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(3, 5), 3);
        assert_eq!(reflect_101(-3, 2), 1);
        assert_eq!(reflect_101(7, 1), 0);
    }

    #[test]
    fn test_scatter_matches_mirrored_convolution() {
        for (len, radius) in [(256, 26), (5, 7), (2, 3), (1, 2), (40, 4)] {
            let kernel = gaussian_kernel(2 * radius + 1, radius as f64 / 2.0);
            let scores: Vec<f64> = (0..len)
                .map(|v| if v % 3 == 0 || v + 1 == len { 1.0 / (1.0 + v as f64) } else { 0.0 })
                .collect();
            let mut smoothed = vec![0.0; len];
            for (value, score) in scores.iter().enumerate() {
                if *score > 0.0 {
                    scatter(&mut smoothed, &kernel, value, *score);
                }
            }
            let expected = convolve(&scores, &kernel);
            for (value, (actual, expected)) in smoothed.iter().zip(&expected).enumerate() {
                assert!((actual - expected).abs() < 1e-12, "len {len}, value {value}");
            }
        }
    }

    fn even_image() -> Array3<f64> {
        Array3::from_shape_fn((1, 12, 12), |(_, y, x)| (2 * ((x + 3 * y) % 8)) as f64)
    }

    fn sparse(kind: DistributionKind, strength: f64) -> SparseLaw {
        SparseLaw::new(
            Law::new(kind),
            255,
            false,
            StructuringElement::half_circle(6.0, false),
            strength,
            144,
        )
    }

    // Runs the law over every position before `position`, then updates it there
    fn advance(law: &mut SparseLaw, parameters: &LawParameters, image: &Array3<f64>, position: Position) {
        let (_, rows, cols) = image.dim();
        let coded = (0..rows)
            .flat_map(|y| (0..cols).map(move |x| [0, y, x]))
            .take_while(|p| *p != position);
        for previous in coded {
            law.update(parameters, None, image, previous);
        }
        law.update(parameters, None, image, position);
    }

    #[test]
    fn test_first_row_uses_base_law() {
        let image = even_image();
        let mut law = sparse(DistributionKind::Laplace, 1000.0);
        let parameters = LawParameters::new(1.0, 6.0, 9.0, 1.0);
        advance(&mut law, &parameters, &image, [0, 0, 4]);
        assert!(law.is_passthrough());
        assert!((law.cumulative(10.5) - law.base().cumulative(10.5)).abs() < 1e-12);
    }

    #[test]
    fn test_unseen_odd_values_get_no_mass() {
        let image = even_image();
        let mut law = sparse(DistributionKind::Laplace, 1000.0);
        let parameters = LawParameters::new(1.0, 7.0, 16.0, 1.0);
        advance(&mut law, &parameters, &image, [0, 6, 6]);
        assert!(!law.is_passthrough());

        for value in (1..15).step_by(2) {
            let lower = law.cumulative(f64::from(value) - 0.5);
            let upper = law.cumulative(f64::from(value) + 0.5);
            assert!((upper - lower).abs() < 1e-12, "odd value {value} has mass {}", upper - lower);
        }
        let even = law.cumulative(6.5) - law.cumulative(5.5);
        assert!(even > 0.0);
        assert!((law.cumulative(255.5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_saturated_base_law_stays_monotone() {
        // Prediction far below every probable value leaves only tail mass
        let image = Array3::from_shape_fn((1, 10, 10), |(_, y, x)| (200 + (x * x + 3 * y) % 50) as f64);
        for kind in [DistributionKind::StudentT, DistributionKind::Normal, DistributionKind::Laplace] {
            let mut law = sparse(kind, 0.5);
            let parameters = LawParameters::new(0.999, 3.0, 2.0, 2.0);
            advance(&mut law, &parameters, &image, [0, 7, 5]);
            let mut previous = 0.0;
            for boundary in 0..=256 {
                let value = law.cumulative(f64::from(boundary) - 0.5);
                assert!(value >= previous, "{kind} decreases at boundary {boundary}");
                assert!(value <= 0.999 + 1e-12, "{kind} exceeds its weight at {boundary}");
                previous = value;
            }
            assert!((previous - 0.999).abs() < 1e-9, "{kind} ends at {previous}");
        }
    }
}
