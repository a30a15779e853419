//! Least squares with normal equations assembled from running prefix sums
//!
//! Every causal position where the full neighborhood fits carries the prefix
//! sum of the outer products `s·sᵀ` of all neighborhood vectors up to it.
//! The normal equations of a rectangular training region then reduce to a
//! handful of block additions instead of one outer product per training
//! sample. Only the rows (or slices, for volumetric training regions) that
//! the current region can reach are kept in a ring.

use crate::io::error::Result;
use crate::prediction::least_squares::{self, LeastSquaresPredictor, RegressionSettings};
use crate::prediction::weighting::WeightingFunction;
use crate::prediction::{Estimator, Frame, RegressionScratch};
use crate::spatial::Context;
use bitvec::prelude::*;
use ndarray::Array3;

type Cell = [isize; 3];

/// One ring entry: a full row, or a full slice in volumetric mode
#[derive(Debug, Clone)]
struct PrefixSlot {
    tag: Option<(isize, isize)>,
    values: Vec<f64>,
    filled: BitVec,
}

/// Prefix sums of neighborhood outer products over buffer coordinates
#[derive(Debug, Clone, Default)]
struct PrefixRing {
    slots: Vec<PrefixSlot>,
    extent: [isize; 3],
    origin: [usize; 3],
    order: usize,
    volumetric: bool,
    sample: Vec<f64>,
    block: Vec<f64>,
    stack: Vec<Cell>,
}

impl PrefixRing {
    fn new(context: &Context) -> Self {
        let neighborhood = context.full_neighborhood();
        let shape = context.shape();
        let box_shape = neighborhood.shape();
        let mut extent = [0_isize; 3];
        for ((cells, size), reach) in extent.iter_mut().zip(shape).zip(box_shape) {
            *cells = size as isize - reach as isize + 1;
        }
        let training = context.full_training_region();
        let volumetric = training.front() > 0;
        let order = neighborhood.len();

        let (slot_count, slot_cells) = if volumetric {
            let slots = extent[0].min(training.front() as isize + 2);
            (slots, extent[1].max(0) * extent[2].max(0))
        } else {
            let slots = extent[1].min(training.top().max(1) as isize + 2);
            (slots, extent[2].max(0))
        };
        let slot_count = slot_count.max(0) as usize;
        let slot_cells = slot_cells as usize;

        Self {
            slots: (0..slot_count)
                .map(|_| PrefixSlot {
                    tag: None,
                    values: vec![0.0; slot_cells * order * order],
                    filled: bitvec![0; slot_cells],
                })
                .collect(),
            extent,
            origin: [neighborhood.front(), neighborhood.top(), neighborhood.left()],
            order,
            volumetric,
            sample: Vec::with_capacity(order),
            block: vec![0.0; order * order],
            stack: Vec::new(),
        }
    }

    fn in_range(&self, cell: Cell) -> bool {
        cell.iter()
            .zip(self.extent)
            .all(|(c, extent)| *c >= 0 && *c < extent)
    }

    // (slot, cell index within slot, tag), for cells in range
    fn locate(&self, [z, y, x]: Cell) -> (usize, usize, (isize, isize)) {
        let count = self.slots.len() as isize;
        if self.volumetric {
            let slot = z.rem_euclid(count) as usize;
            (slot, (y * self.extent[2] + x) as usize, (z, 0))
        } else {
            let slot = y.rem_euclid(count) as usize;
            (slot, x as usize, (z, y))
        }
    }

    fn is_filled(&self, cell: Cell) -> bool {
        let (slot, index, tag) = self.locate(cell);
        self.slots.get(slot).is_some_and(|slot| {
            slot.tag == Some(tag) && slot.filled.get(index).is_some_and(|bit| *bit)
        })
    }

    fn lookup(&self, cell: Cell) -> Option<&[f64]> {
        if !self.in_range(cell) || !self.is_filled(cell) {
            return None;
        }
        let (slot, index, _) = self.locate(cell);
        let size = self.order * self.order;
        self.slots
            .get(slot)?
            .values
            .get(index * size..(index + 1) * size)
    }

    // Inclusion-exclusion terms building the prefix sum at a cell
    fn dependencies(&self, [z, y, x]: Cell) -> Vec<(Cell, f64)> {
        let mut terms = vec![
            ([z, y, x - 1], 1.0),
            ([z, y - 1, x], 1.0),
            ([z, y - 1, x - 1], -1.0),
        ];
        if self.volumetric {
            terms.extend([
                ([z - 1, y, x], 1.0),
                ([z - 1, y, x - 1], -1.0),
                ([z - 1, y - 1, x], -1.0),
                ([z - 1, y - 1, x - 1], 1.0),
            ]);
        }
        terms
    }

    /// Make sure the prefix sum at `cell` is available
    ///
    /// Missing predecessors are filled depth first with an explicit stack.
    fn ensure(&mut self, cell: Cell, image: &Array3<f64>, context: &mut Context) {
        self.stack.clear();
        self.stack.push(cell);
        while let Some(&top) = self.stack.last() {
            if !self.in_range(top) || self.is_filled(top) {
                self.stack.pop();
                continue;
            }
            let terms = self.dependencies(top);
            if let Some((missing, _)) = terms
                .iter()
                .find(|(dependency, _)| self.in_range(*dependency) && !self.is_filled(*dependency))
            {
                self.stack.push(*missing);
                continue;
            }
            self.fill(top, &terms, image, context);
            self.stack.pop();
        }
    }

    fn fill(&mut self, cell: Cell, terms: &[(Cell, f64)], image: &Array3<f64>, context: &mut Context) {
        let position = [
            (cell[0] as usize) + self.origin[0],
            (cell[1] as usize) + self.origin[1],
            (cell[2] as usize) + self.origin[2],
        ];
        let mut sample = std::mem::take(&mut self.sample);
        let mut block = std::mem::take(&mut self.block);
        context.context_of(image, position, &mut sample);

        let n = self.order;
        for (k, row) in block.chunks_exact_mut(n.max(1)).enumerate() {
            let sk = sample.get(k).copied().unwrap_or(0.0);
            for (l, value) in row.iter_mut().enumerate() {
                *value = sk * sample.get(l).copied().unwrap_or(0.0);
            }
        }
        for (dependency, sign) in terms {
            if let Some(values) = self.lookup(*dependency) {
                for (target, value) in block.iter_mut().zip(values) {
                    *target += sign * value;
                }
            }
        }

        let (slot, index, tag) = self.locate(cell);
        let size = n * n;
        if let Some(slot) = self.slots.get_mut(slot) {
            if slot.tag != Some(tag) {
                slot.tag = Some(tag);
                slot.filled.fill(false);
            }
            let target = slot.values.get_mut(index * size..(index + 1) * size);
            if let (Some(target), Some(mut bit)) = (target, slot.filled.get_mut(index)) {
                target.copy_from_slice(&block);
                *bit = true;
            }
        }

        self.sample = sample;
        self.block = block;
    }

    fn add(&mut self, cell: Cell, sign: f64, image: &Array3<f64>, context: &mut Context, scratch: &mut RegressionScratch) {
        self.ensure(cell, image, context);
        if let Some(values) = self.lookup(cell) {
            scratch.add_block(values, sign);
        }
    }
}

/// Least squares whose normal equations come from prefix sums
///
/// Positions whose neighborhood is cropped at the border fall back to the
/// direct unweighted accumulation.
#[derive(Debug, Clone)]
pub struct FastLeastSquaresPredictor {
    fallback: LeastSquaresPredictor,
    ring: PrefixRing,
    vector: Vec<f64>,
}

impl FastLeastSquaresPredictor {
    /// Unweighted regression with the given settings
    pub fn new(settings: RegressionSettings) -> Self {
        Self {
            fallback: LeastSquaresPredictor::new(WeightingFunction::identity(), settings),
            ring: PrefixRing::default(),
            vector: Vec::new(),
        }
    }

    fn accumulate_prefix(&mut self, frame: &Frame<'_>, context: &mut Context, scratch: &mut RegressionScratch) {
        let image = frame.image;
        context.current_vector(image, frame.position, &mut self.vector);
        scratch.begin_block(&self.vector);

        let mut cell: Cell = [0; 3];
        for ((offset, position), origin) in cell.iter_mut().zip(frame.position).zip(self.ring.origin) {
            *offset = position as isize - origin as isize;
        }
        let [z, y, x] = cell;
        let training = context.training_region();
        let (l, r, t) = (
            training.left() as isize,
            training.right() as isize,
            training.top() as isize,
        );

        let mut terms = vec![
            ([z, y, x - 1], 1.0),
            ([z, y - 1, x - 1], -1.0),
            ([z, y - 1, x + r], 1.0),
            ([z, y, x - 1 - l], -1.0),
            ([z, y - 1 - t, x + r], -1.0),
            ([z, y - 1 - t, x - 1 - l], 1.0),
        ];
        if self.ring.volumetric {
            let b = training.bottom() as isize;
            let f = training.front() as isize;
            terms.extend([
                ([z - 1, y, x - 1], -1.0),
                ([z - 1, y - 1, x - 1], 1.0),
                ([z - 1, y - 1, x + r], -1.0),
                ([z - 1, y, x - 1 - l], 1.0),
                ([z - 1, y + b, x + r], 1.0),
                ([z - 1, y + b, x - 1 - l], -1.0),
                ([z - 1 - f, y + b, x + r], -1.0),
                ([z - 1 - f, y + b, x - 1 - l], 1.0),
                ([z - 1 - f, y - 1 - t, x + r], 1.0),
                ([z - 1 - f, y - 1 - t, x - 1 - l], -1.0),
            ]);
        }
        for (cell, sign) in terms.drain(..) {
            self.ring.add(cell, sign, image, context, scratch);
        }
        scratch.symmetrize();
    }
}

impl Estimator for FastLeastSquaresPredictor {
    fn prepare(&mut self, context: &Context, maxval: u32) -> Result<()> {
        self.fallback.prepare(context, maxval)?;
        self.ring = PrefixRing::new(context);
        Ok(())
    }

    fn estimate(
        &mut self,
        frame: &Frame<'_>,
        context: &mut Context,
        scratch: &mut RegressionScratch,
    ) -> Result<f64> {
        if context.training_len() == 0 {
            return Ok(least_squares::bootstrap(frame, context, scratch));
        }
        if context.neighborhood().shape() == context.full_neighborhood().shape() {
            self.accumulate_prefix(frame, context, scratch);
        } else {
            self.fallback.accumulate_training(frame, context, scratch)?;
        }
        scratch.clear_weights();
        Ok(least_squares::solve_and_predict(
            frame,
            context,
            scratch,
            self.fallback.settings(),
        ))
    }
}
