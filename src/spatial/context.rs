//! Neighborhood and training-region extraction with border cropping

use crate::io::configuration::BorderSplit;
use crate::spatial::Position;
use crate::spatial::element::StructuringElement;
use bitvec::prelude::*;
use log::debug;
use ndarray::Array3;

/// Memoized neighborhood vectors keyed by flattened image position
#[derive(Debug, Clone)]
struct NeighborhoodCache {
    values: Vec<f64>,
    filled: BitVec,
    stride: usize,
}

impl NeighborhoodCache {
    fn new(positions: usize, stride: usize) -> Self {
        Self {
            values: vec![0.0; positions * stride],
            filled: bitvec![0; positions],
            stride,
        }
    }
}

/// Couples a neighborhood and a training region to the geometry of one image
///
/// [`Context::check_border`] must run once per coded position before any
/// extraction; it crops both shapes so every extracted sample lies inside the
/// image and restores the full shapes on the next call.
#[derive(Debug, Clone)]
pub struct Context {
    neighborhood: StructuringElement,
    training_region: StructuringElement,
    full_neighborhood: StructuringElement,
    full_training_region: StructuringElement,
    split: BorderSplit,
    shape: [usize; 3],
    cache: Option<NeighborhoodCache>,
    border: bool,
    cropped_neighborhood: bool,
    use_cache: bool,
    position: Option<Position>,
    cursor: Option<Option<[usize; 3]>>,
}

impl Context {
    /// Create a context from full neighborhood and training-region shapes
    pub fn new(
        neighborhood: StructuringElement,
        training_region: StructuringElement,
        split: BorderSplit,
    ) -> Self {
        debug!("neighborhood {neighborhood}");
        debug!("training region {training_region}");
        Self {
            neighborhood: neighborhood.clone(),
            training_region: training_region.clone(),
            full_neighborhood: neighborhood,
            full_training_region: training_region,
            split,
            shape: [0; 3],
            cache: None,
            border: false,
            cropped_neighborhood: false,
            use_cache: false,
            position: None,
            cursor: None,
        }
    }

    /// Bind the context to an image shape `[slices, rows, cols]`
    ///
    /// Any memoized vectors are dropped; `buffered` allocates a fresh cache.
    pub fn bind(&mut self, shape: [usize; 3], buffered: bool) {
        self.shape = shape;
        self.position = None;
        self.cursor = None;
        self.cache = buffered.then(|| {
            NeighborhoodCache::new(shape.iter().product(), self.full_neighborhood.len())
        });
        self.reset_shapes();
    }

    fn reset_shapes(&mut self) {
        self.neighborhood = self.full_neighborhood.clone();
        self.training_region = self.full_training_region.clone();
        self.border = false;
        self.cropped_neighborhood = false;
        self.use_cache = self.cache.is_some();
    }

    /// Image shape the context is bound to
    pub const fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Whether neighborhood vectors are memoized
    pub const fn is_buffered(&self) -> bool {
        self.cache.is_some()
    }

    /// Current, possibly cropped, neighborhood
    pub const fn neighborhood(&self) -> &StructuringElement {
        &self.neighborhood
    }

    /// Current, possibly cropped, training region
    pub const fn training_region(&self) -> &StructuringElement {
        &self.training_region
    }

    /// Uncropped neighborhood
    pub const fn full_neighborhood(&self) -> &StructuringElement {
        &self.full_neighborhood
    }

    /// Uncropped training region
    pub const fn full_training_region(&self) -> &StructuringElement {
        &self.full_training_region
    }

    /// Replace the current neighborhood until the next border check
    pub fn set_neighborhood(&mut self, neighborhood: StructuringElement) {
        self.neighborhood = neighborhood;
        self.border = true;
    }

    /// Replace the current training region until the next border check
    pub fn set_training_region(&mut self, training_region: StructuringElement) {
        self.training_region = training_region;
        self.border = true;
    }

    /// Replace the full neighborhood; the cache no longer matches and is dropped
    pub fn set_full_neighborhood(&mut self, neighborhood: StructuringElement) {
        debug!("neighborhood {neighborhood}");
        self.full_neighborhood = neighborhood;
        self.cache = None;
        self.reset_shapes();
    }

    /// Replace the full training region
    pub fn set_full_training_region(&mut self, training_region: StructuringElement) {
        self.full_training_region = training_region;
        self.reset_shapes();
    }

    /// Whether the last border check cropped anything
    pub const fn is_border(&self) -> bool {
        self.border
    }

    /// Whether the last border check cropped the neighborhood itself
    pub const fn is_neighborhood_cropped(&self) -> bool {
        self.cropped_neighborhood
    }

    /// Combined extent left of the anchor
    pub const fn left(&self) -> usize {
        self.training_region.left() + self.neighborhood.left()
    }

    /// Combined extent right of the anchor
    pub fn right(&self) -> usize {
        self.training_region.right() + self.neighborhood.right()
    }

    /// Combined extent above the anchor
    pub const fn top(&self) -> usize {
        self.training_region.top() + self.neighborhood.top()
    }

    /// Combined extent below the anchor
    pub fn bottom(&self) -> usize {
        self.training_region.bottom() + self.neighborhood.bottom()
    }

    /// Combined extent into past slices
    pub const fn front(&self) -> usize {
        self.training_region.front() + self.neighborhood.front()
    }

    /// Crop neighborhood and training region so all samples stay inside the image
    ///
    /// Per side, the neighborhood keeps about `distance >> split` samples and
    /// the training region loses whatever protrusion remains. Bottom and
    /// front sides are only examined for volumetric contexts.
    pub fn check_border(&mut self, position: Position) {
        if self.border {
            self.reset_shapes();
        }

        let [_, rows, cols] = self.shape;
        let [z, y, x] = position.map(|p| p as isize);
        let (rows, cols) = (rows as isize, cols as isize);

        let protrusion = self.left() as isize - x;
        if protrusion > 0 {
            let kept = ((x - 1) >> self.split.left) + 1;
            let cut = self.split_cut(protrusion, self.neighborhood.left(), kept);
            self.crop(2, cut, true);
        }

        let protrusion = self.right() as isize - (cols - x - 1);
        if protrusion > 0 {
            let kept = ((cols - x - 2) >> self.split.right) + 1;
            let cut = self.split_cut(protrusion, self.neighborhood.right(), kept);
            self.crop(2, cut, false);
        }

        let protrusion = self.top() as isize - y;
        if protrusion > 0 {
            let kept = ((y - 1) >> self.split.top) + 1;
            let cut = self.split_cut(protrusion, self.neighborhood.top(), kept);
            self.crop(1, cut, true);
        }

        if self.front() > 0 {
            let protrusion = self.bottom() as isize - (rows - y - 1);
            if protrusion > 0 {
                let kept = ((rows - y - 2) >> self.split.bottom) + 1;
                let cut = self.split_cut(protrusion, self.neighborhood.bottom(), kept);
                self.crop(1, cut, false);
            }

            let protrusion = self.front() as isize - z;
            if protrusion > 0 {
                let kept = ((z - 1) >> self.split.front) + 1;
                let cut = self.split_cut(protrusion, self.neighborhood.front(), kept);
                self.crop(0, cut, true);
            }
        }

        self.use_cache = self.cache.is_some() && !self.cropped_neighborhood;
    }

    // Samples removed from (neighborhood, training region) on one side
    fn split_cut(&mut self, protrusion: isize, extent: usize, kept: isize) -> (usize, usize) {
        self.border = true;
        let neighborhood_cut = (extent as isize - kept).max(0);
        if neighborhood_cut > 0 {
            self.cropped_neighborhood = true;
        }
        let training_cut = (protrusion - neighborhood_cut).max(0);
        (neighborhood_cut as usize, training_cut as usize)
    }

    fn crop(&mut self, axis: usize, (neighborhood_cut, training_cut): (usize, usize), leading: bool) {
        let along = |amount: usize| -> [usize; 3] { std::array::from_fn(|a| if a == axis { amount } else { 0 }) };
        let cut = along(neighborhood_cut);
        if neighborhood_cut > 0 {
            self.neighborhood = if leading {
                self.neighborhood.cropped(cut, [0; 3])
            } else {
                self.neighborhood.cropped([0; 3], cut)
            };
        }
        let cut = along(training_cut);
        if training_cut > 0 {
            self.training_region = if leading {
                self.training_region.cropped(cut, [0; 3])
            } else {
                self.training_region.cropped([0; 3], cut)
            };
        }
    }

    /// Current neighborhood vector at `position`, never memoized
    ///
    /// The last element is the sample at `position` itself, which is not yet
    /// known while decoding.
    pub fn current_vector(&self, image: &Array3<f64>, position: Position, dest: &mut Vec<f64>) {
        self.neighborhood.extract(image, position, dest);
    }

    /// Neighborhood vector at a causal `position`, memoized when possible
    pub fn context_of(&mut self, image: &Array3<f64>, position: Position, dest: &mut Vec<f64>) {
        if !self.use_cache {
            self.neighborhood.extract(image, position, dest);
            return;
        }
        let [_, rows, cols] = self.shape;
        let index = (position[0] * rows + position[1]) * cols + position[2];
        match self.cache.as_mut() {
            Some(cache) => {
                let start = index * cache.stride;
                let filled = cache.filled.get(index).map(|bit| *bit);
                match (cache.values.get_mut(start..start + cache.stride), filled) {
                    (Some(row), Some(true)) => {
                        dest.clear();
                        dest.extend_from_slice(row);
                    }
                    (Some(row), Some(false)) => {
                        self.neighborhood.extract(image, position, dest);
                        if row.len() == dest.len() {
                            row.copy_from_slice(dest);
                            cache.filled.set(index, true);
                        }
                    }
                    _ => self.neighborhood.extract(image, position, dest),
                }
            }
            None => self.neighborhood.extract(image, position, dest),
        }
    }

    /// Start a pass over the training region around `position`
    pub fn begin_training(&mut self, position: Position) {
        self.position = Some(position);
        self.cursor = Some(None);
    }

    /// Restart the pass at the position of the last [`Self::begin_training`]
    ///
    /// Returns `false` when no pass was ever started.
    pub fn restart_training(&mut self) -> bool {
        if self.position.is_some() {
            self.cursor = Some(None);
            true
        } else {
            false
        }
    }

    /// Neighborhood vector of the next training position
    ///
    /// Returns the training position, or `None` once the region is exhausted
    /// or no pass is active.
    pub fn next_training_vector(&mut self, image: &Array3<f64>, dest: &mut Vec<f64>) -> Option<Position> {
        let origin = self.position?;
        let cursor = self.cursor?;
        let Some(next) = self.training_region.increment(cursor) else {
            self.cursor = None;
            return None;
        };
        self.cursor = Some(Some(next));

        let anchor = self.training_region.anchor();
        let position = [
            origin[0] + next[0] - anchor[0],
            origin[1] + next[1] - anchor[1],
            origin[2] + next[2] - anchor[2],
        ];
        self.context_of(image, position, dest);
        Some(position)
    }

    /// Number of samples in the current training region
    pub fn training_len(&self) -> usize {
        self.training_region.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_context(rows: usize, cols: usize) -> Context {
        let mut context = Context::new(
            StructuringElement::half_ellipse(2.5, 3.0, 3.5, true),
            StructuringElement::half_square(4, false),
            BorderSplit::default(),
        );
        context.bind([1, rows, cols], true);
        context
    }

    #[test]
    fn test_first_pixel_has_only_itself() {
        let mut context = default_context(16, 16);
        context.check_border([0, 0, 0]);
        assert_eq!(context.neighborhood().len(), 1);
        assert!(context.training_region().is_empty());
        assert!(context.is_border());
        assert!(context.is_neighborhood_cropped());
    }

    #[test]
    fn test_interior_restores_full_shapes() {
        let mut context = default_context(32, 32);
        context.check_border([0, 0, 5]);
        context.check_border([0, 20, 16]);
        assert!(!context.is_border());
        assert_eq!(context.neighborhood(), context.full_neighborhood());
        assert_eq!(context.training_region(), context.full_training_region());
    }

    #[test]
    fn test_cache_serves_identical_vectors() {
        let image = Array3::from_shape_fn((1, 12, 12), |(_, y, x)| (y * 12 + x) as f64);
        let mut context = default_context(12, 12);
        context.check_border([0, 8, 6]);
        let mut first = Vec::new();
        let mut second = Vec::new();
        context.context_of(&image, [0, 5, 6], &mut first);
        context.context_of(&image, [0, 5, 6], &mut second);
        assert_eq!(first, second);

        let mut direct = Vec::new();
        context.full_neighborhood().extract(&image, [0, 5, 6], &mut direct);
        assert_eq!(first, direct);
    }

    #[test]
    fn test_training_pass_visits_region() {
        let image = Array3::zeros((1, 12, 12));
        let mut context = default_context(12, 12);
        context.check_border([0, 8, 6]);
        context.begin_training([0, 8, 6]);
        let mut vector = Vec::new();
        let mut count = 0;
        while context.next_training_vector(&image, &mut vector).is_some() {
            count += 1;
        }
        assert_eq!(count, context.training_len());
        assert!(context.restart_training());
        assert!(context.next_training_vector(&image, &mut vector).is_some());
    }
}
