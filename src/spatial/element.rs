//! Causal neighborhood shapes over `(slice, row, col)` offsets

use crate::io::error::{Result, invalid_parameter};
use crate::spatial::Position;
use ndarray::{Array3, s};
use std::fmt;

/// Boolean mask over a 3-D box with an anchor marking the current sample
///
/// Masked cells are kept in raster order (column fastest, slice slowest),
/// which is the order every extracted feature vector follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    mask: Array3<bool>,
    anchor: [usize; 3],
    offsets: Vec<[usize; 3]>,
}

// Squared normalized distance along one axis; a zero offset never contributes
fn axis_term(offset: isize, radius: f64) -> f64 {
    if offset == 0 {
        0.0
    } else {
        let offset = offset as f64;
        (offset * offset) / (radius * radius)
    }
}

impl StructuringElement {
    /// Create an element from an explicit mask and anchor `[slice, row, col]`
    ///
    /// # Errors
    ///
    /// Returns an error if the anchor lies outside the mask box
    pub fn new(mask: Array3<bool>, anchor: [usize; 3]) -> Result<Self> {
        let shape = mask.shape();
        if anchor.iter().zip(shape).any(|(a, extent)| a >= extent) {
            return Err(invalid_parameter(
                "anchor",
                &format!("{anchor:?}"),
                &format!("must lie inside mask of shape {shape:?}"),
            ));
        }
        Ok(Self::from_parts(mask, anchor))
    }

    fn from_parts(mask: Array3<bool>, anchor: [usize; 3]) -> Self {
        let offsets = mask
            .indexed_iter()
            .filter(|(_, set)| **set)
            .map(|((z, y, x), _)| [z, y, x])
            .collect();
        Self {
            mask,
            anchor,
            offsets,
        }
    }

    // Clears the anchor row right of the anchor, and the anchor itself unless kept
    fn clear_future(mask: &mut Array3<bool>, anchor: [usize; 3], right: usize, center: bool) {
        if right != 0 || !center {
            let first = anchor[2] + usize::from(center);
            mask.slice_mut(s![anchor[0], anchor[1], first..=anchor[2] + right])
                .fill(false);
        }
    }

    /// Rectangle of past rows plus the left part of the anchor row
    pub fn half_rect(top: usize, left: usize, right: usize, center: bool) -> Self {
        let mut mask = Array3::from_elem((1, top + 1, left + right + 1), true);
        let anchor = [0, top, left];
        Self::clear_future(&mut mask, anchor, right, center);
        Self::from_parts(mask, anchor)
    }

    /// Square training window of half-extent `radius`
    pub fn half_square(radius: usize, center: bool) -> Self {
        Self::half_rect(radius, radius, radius, center)
    }

    /// Cuboid of past slices plus a half rectangle in the anchor slice
    pub fn half_cuboid(
        top: usize,
        left: usize,
        right: usize,
        bottom: usize,
        front: usize,
        center: bool,
    ) -> Self {
        let mut mask = Array3::from_elem((front + 1, top + bottom + 1, left + right + 1), true);
        let anchor = [front, top, left];
        Self::clear_future(&mut mask, anchor, right, center);
        if bottom > 0 {
            mask.slice_mut(s![front, top + 1.., ..]).fill(false);
        }
        Self::from_parts(mask, anchor)
    }

    /// Cube training window of half-extent `radius` reaching `front` slices back
    pub fn half_cube(radius: usize, front: usize, center: bool) -> Self {
        Self::half_cuboid(radius, radius, radius, radius, front, center)
    }

    /// Half ellipse with separate radii above, left and right of the anchor
    ///
    /// Integer extents truncate the radii; a cell is set when its normalized
    /// squared distance does not exceed one.
    pub fn half_ellipse(top: f64, left: f64, right: f64, center: bool) -> Self {
        let (top_int, left_int, right_int) = (top as usize, left as usize, right as usize);
        let mut mask = Array3::from_elem((1, top_int + 1, left_int + right_int + 1), false);

        for k in -(top_int as isize)..=0 {
            let row_term = axis_term(k, top);
            for l in -(left_int as isize)..=(right_int as isize) {
                let radius = if l < 0 { left } else { right };
                if row_term + axis_term(l, radius) <= 1.0 {
                    let row = (top_int as isize + k) as usize;
                    let col = (left_int as isize + l) as usize;
                    mask[[0, row, col]] = true;
                }
            }
        }

        let anchor = [0, top_int, left_int];
        Self::clear_future(&mut mask, anchor, right_int, center);
        Self::from_parts(mask, anchor)
    }

    /// Half circle of the given radius
    pub fn half_circle(radius: f64, center: bool) -> Self {
        Self::half_ellipse(radius, radius, radius, center)
    }

    /// Half ellipsoid reaching `front` slices back and `bottom` rows down in past slices
    pub fn half_ellipsoid(
        top: f64,
        left: f64,
        right: f64,
        bottom: f64,
        front: f64,
        center: bool,
    ) -> Self {
        let (top_int, left_int, right_int) = (top as usize, left as usize, right as usize);
        let (bottom_int, front_int) = (bottom as usize, front as usize);
        let mut mask = Array3::from_elem(
            (front_int + 1, top_int + bottom_int + 1, left_int + right_int + 1),
            false,
        );

        for j in -(front_int as isize)..=0 {
            let slice_term = axis_term(j, front);
            for k in -(top_int as isize)..=(bottom_int as isize) {
                let row_term = slice_term + axis_term(k, if k < 0 { top } else { bottom });
                for l in -(left_int as isize)..=(right_int as isize) {
                    let radius = if l < 0 { left } else { right };
                    if row_term + axis_term(l, radius) <= 1.0 {
                        mask[[
                            (front_int as isize + j) as usize,
                            (top_int as isize + k) as usize,
                            (left_int as isize + l) as usize,
                        ]] = true;
                    }
                }
            }
        }

        let anchor = [front_int, top_int, left_int];
        Self::clear_future(&mut mask, anchor, right_int, center);
        if bottom_int > 0 {
            mask.slice_mut(s![front_int, top_int + 1.., ..]).fill(false);
        }
        Self::from_parts(mask, anchor)
    }

    /// Half sphere of the given radius
    pub fn half_sphere(radius: f64, center: bool) -> Self {
        Self::half_ellipsoid(radius, radius, radius, radius, radius, center)
    }

    // Half ellipse in the last of `channels + 1` slices
    fn multichannel_base(
        top: f64,
        left: f64,
        right: f64,
        channels: usize,
        center: bool,
    ) -> (Array3<bool>, [usize; 3]) {
        let planar = Self::half_ellipse(top, left, right, center);
        let [_, rows, cols] = planar.shape();
        let mut mask = Array3::from_elem((channels + 1, rows, cols), false);
        mask.slice_mut(s![channels, .., ..])
            .assign(&planar.mask.slice(s![0, .., ..]));
        (mask, [channels, planar.anchor[1], planar.anchor[2]])
    }

    /// Half ellipse plus the co-located sample of each of `channels` past channels
    pub fn half_ellipse_multichannel(
        top: f64,
        left: f64,
        right: f64,
        channels: usize,
        center: bool,
    ) -> Self {
        let (mut mask, anchor) = Self::multichannel_base(top, left, right, channels, center);
        for channel in 0..channels {
            mask[[channel, anchor[1], anchor[2]]] = true;
        }
        Self::from_parts(mask, anchor)
    }

    /// Half ellipse plus a causal cross around the co-located sample of past channels
    ///
    /// Each past channel contributes the co-located sample, its horizontal
    /// neighbours and the two samples above it; the sample two rows up is
    /// dropped in the first channel.
    pub fn half_ellipse_multichannel_forward(
        top: f64,
        left: f64,
        right: f64,
        channels: usize,
        center: bool,
    ) -> Self {
        let (mut mask, anchor) = Self::multichannel_base(top, left, right, channels, center);
        let [_, row, col] = anchor;
        let (_, _, cols) = mask.dim();
        for channel in 0..channels {
            mask[[channel, row, col]] = true;
            if row >= 1 {
                mask[[channel, row - 1, col]] = true;
            }
            if row >= 2 && channel > 0 {
                mask[[channel, row - 2, col]] = true;
            }
            if col >= 1 {
                mask[[channel, row, col - 1]] = true;
            }
            if col + 1 < cols {
                mask[[channel, row, col + 1]] = true;
            }
        }
        Self::from_parts(mask, anchor)
    }

    /// Box dimensions `[slices, rows, cols]`
    pub fn shape(&self) -> [usize; 3] {
        let (slices, rows, cols) = self.mask.dim();
        [slices, rows, cols]
    }

    /// Anchor position `[slice, row, col]` inside the box
    pub const fn anchor(&self) -> [usize; 3] {
        self.anchor
    }

    /// Boolean mask
    pub const fn mask(&self) -> &Array3<bool> {
        &self.mask
    }

    /// Masked cells in raster order, relative to the box origin
    pub fn offsets(&self) -> &[[usize; 3]] {
        &self.offsets
    }

    /// Number of masked cells
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no cell is masked
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Columns left of the anchor
    pub const fn left(&self) -> usize {
        self.anchor[2]
    }

    /// Columns right of the anchor
    pub fn right(&self) -> usize {
        self.shape()[2] - self.anchor[2] - 1
    }

    /// Rows above the anchor
    pub const fn top(&self) -> usize {
        self.anchor[1]
    }

    /// Rows below the anchor
    pub fn bottom(&self) -> usize {
        self.shape()[1] - self.anchor[1] - 1
    }

    /// Slices before the anchor
    pub const fn front(&self) -> usize {
        self.anchor[0]
    }

    /// Slices after the anchor
    pub fn back(&self) -> usize {
        self.shape()[0] - self.anchor[0] - 1
    }

    /// Next masked cell after `cursor` in raster order
    ///
    /// `None` starts from the beginning; the result is `None` once the
    /// element is exhausted.
    pub fn increment(&self, cursor: Option<[usize; 3]>) -> Option<[usize; 3]> {
        let next = cursor.map_or(0, |current| self.offsets.partition_point(|o| *o <= current));
        self.offsets.get(next).copied()
    }

    /// Copy of the element with planes removed from each side of the box
    ///
    /// `leading` and `trailing` count the slices, rows and columns removed
    /// before and after the anchor; the anchor moves with the leading cut.
    #[must_use]
    pub fn cropped(&self, leading: [usize; 3], trailing: [usize; 3]) -> Self {
        let [slices, rows, cols] = self.shape();
        let mask = self
            .mask
            .slice(s![
                leading[0]..slices - trailing[0],
                leading[1]..rows - trailing[1],
                leading[2]..cols - trailing[2]
            ])
            .to_owned();
        let anchor = [
            self.anchor[0].saturating_sub(leading[0]),
            self.anchor[1].saturating_sub(leading[1]),
            self.anchor[2].saturating_sub(leading[2]),
        ];
        Self::from_parts(mask, anchor)
    }

    /// Extract the masked samples around `position` into `dest`
    ///
    /// # Panics
    ///
    /// Panics if a masked offset leaves the image; callers crop the element
    /// at borders or use [`Self::extract_border_safe`].
    pub fn extract(&self, image: &Array3<f64>, position: Position, dest: &mut Vec<f64>) {
        dest.clear();
        for offset in &self.offsets {
            dest.push(
                image[[
                    position[0] + offset[0] - self.anchor[0],
                    position[1] + offset[1] - self.anchor[1],
                    position[2] + offset[2] - self.anchor[2],
                ]],
            );
        }
    }

    // Image coordinates of the masked offsets that fall inside `shape`
    fn in_bounds(&self, image: &Array3<f64>, position: Position) -> impl Iterator<Item = [usize; 3]> + '_ {
        let (slices, rows, cols) = image.dim();
        let shape = [slices, rows, cols];
        self.offsets.iter().filter_map(move |offset| {
            let mut coordinate = [0_usize; 3];
            let axes = coordinate.iter_mut().zip(position).zip(offset).zip(self.anchor).zip(shape);
            for ((((slot, base), step), anchor), extent) in axes {
                let value = (base + step).checked_sub(anchor)?;
                if value >= extent {
                    return None;
                }
                *slot = value;
            }
            Some(coordinate)
        })
    }

    /// Extract only the masked samples that fall inside the image
    ///
    /// Equivalent to cropping the mask box to the image and extracting, so the
    /// raster order of the surviving samples is preserved.
    pub fn extract_border_safe(&self, image: &Array3<f64>, position: Position, dest: &mut Vec<f64>) {
        dest.clear();
        dest.extend(
            self.in_bounds(image, position)
                .filter_map(|index| image.get(index).copied()),
        );
    }

    /// Count integer sample values over the in-image masked positions
    ///
    /// Values outside `histogram` are ignored; the histogram is cleared first.
    pub fn histogram_border_safe(&self, image: &Array3<f64>, position: Position, histogram: &mut [u32]) {
        histogram.fill(0);
        for index in self.in_bounds(image, position) {
            if let Some(value) = image.get(index) {
                if let Some(bin) = histogram.get_mut(*value as usize) {
                    *bin += 1;
                }
            }
        }
    }
}

impl fmt::Display for StructuringElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [slices, rows, cols] = self.shape();
        writeln!(
            f,
            "StructuringElement({} cells, anchor {:?})",
            self.len(),
            self.anchor
        )?;
        for z in 0..slices {
            for y in 0..rows {
                for x in 0..cols {
                    let symbol = if [z, y, x] == self.anchor {
                        if self.mask[[z, y, x]] { '@' } else { 'o' }
                    } else if self.mask[[z, y, x]] {
                        '#'
                    } else {
                        '.'
                    };
                    write!(f, "{symbol}")?;
                }
                writeln!(f)?;
            }
            if z + 1 < slices {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_med_neighborhood_order() {
        let element = StructuringElement::half_ellipse(1.5, 1.5, 0.5, true);
        assert_eq!(element.shape(), [1, 2, 2]);
        assert_eq!(element.offsets(), &[[0, 0, 0], [0, 0, 1], [0, 1, 0], [0, 1, 1]]);
        assert_eq!(element.anchor(), [0, 1, 1]);
    }

    #[test]
    fn test_half_square_excludes_anchor_and_future() {
        let element = StructuringElement::half_square(2, false);
        assert_eq!(element.shape(), [1, 3, 5]);
        // Two full rows plus two samples left of the anchor
        assert_eq!(element.len(), 12);
        assert!(!element.mask()[[0, 2, 2]]);
        assert!(!element.mask()[[0, 2, 4]]);
    }

    #[test]
    fn test_zero_square_is_empty() {
        assert!(StructuringElement::half_square(0, false).is_empty());
    }

    #[test]
    fn test_increment_walks_raster_order() {
        let element = StructuringElement::half_rect(1, 1, 1, false);
        let mut cursor = None;
        let mut visited = Vec::new();
        while let Some(next) = element.increment(cursor) {
            visited.push(next);
            cursor = Some(next);
        }
        assert_eq!(visited, vec![[0, 0, 0], [0, 0, 1], [0, 0, 2], [0, 1, 0]]);
    }

    #[test]
    fn test_crop_moves_anchor() {
        let element = StructuringElement::half_rect(2, 3, 3, true);
        let cropped = element.cropped([0, 1, 2], [0, 0, 1]);
        assert_eq!(cropped.anchor(), [0, 1, 1]);
        assert_eq!(cropped.left(), 1);
        assert_eq!(cropped.right(), 2);
        assert_eq!(cropped.top(), 1);
    }

    #[test]
    fn test_forward_multichannel_cross() {
        let element = StructuringElement::half_ellipse_multichannel_forward(2.5, 3.0, 3.5, 2, true);
        let [slices, _, _] = element.shape();
        assert_eq!(slices, 3);
        let anchor = element.anchor();
        assert!(element.mask()[[0, anchor[1], anchor[2]]]);
        assert!(!element.mask()[[0, anchor[1] - 2, anchor[2]]]);
        assert!(element.mask()[[1, anchor[1] - 2, anchor[2]]]);
        assert!(element.mask()[[1, anchor[1], anchor[2] + 1]]);
    }

    #[test]
    fn test_border_safe_extraction_skips_outside() {
        let image = Array3::from_shape_fn((1, 3, 3), |(_, y, x)| (y * 3 + x) as f64);
        let element = StructuringElement::half_square(1, false);
        let mut values = Vec::new();
        element.extract_border_safe(&image, [0, 0, 1], &mut values);
        assert_eq!(values, vec![0.0]);
        element.extract_border_safe(&image, [0, 1, 0], &mut values);
        assert_eq!(values, vec![0.0, 1.0]);
    }
}
