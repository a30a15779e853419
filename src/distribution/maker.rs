//! Discrete cumulative distribution over symbol boundaries
//!
//! Boundaries are evaluated on demand: the entropy coders only ever query a
//! handful of them per symbol.

use crate::distribution::functions::{CumulativeLaw, Law};
use crate::distribution::sparse::SparseLaw;

/// One additive component of a distribution
#[derive(Debug, Clone)]
pub enum Component {
    /// Parametric law
    Law(Law),
    /// Parametric law confined to observed values
    Sparse(Box<SparseLaw>),
}

impl Component {
    fn law(&self) -> &dyn CumulativeLaw {
        match self {
            Self::Law(law) => law,
            Self::Sparse(law) => law.as_ref(),
        }
    }

    /// Cumulative mass up to `x`
    pub fn cumulative(&self, x: f64) -> f64 {
        self.law().cumulative(x)
    }

    /// Total mass
    pub fn weight(&self) -> f64 {
        self.law().weight()
    }
}

/// Sum of weighted laws sampled at `points` symbol boundaries
///
/// Boundary `0` is pinned to 0 and boundary `points - 1` to 1; symbol `s`
/// owns the interval between boundaries `s` and `s + 1`.
#[derive(Debug, Clone)]
pub struct DistributionMaker {
    points: u32,
    components: Vec<Component>,
    offset: u32,
    multiplier: u32,
}

impl DistributionMaker {
    /// Distribution over `points - 1` symbols without components
    pub const fn new(points: u32) -> Self {
        Self {
            points,
            components: Vec::new(),
            offset: 0,
            multiplier: 1,
        }
    }

    /// Add a component
    #[must_use]
    pub fn with(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// Add a component in place
    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Mutable access to a component for parameter updates
    pub fn component_mut(&mut self, index: usize) -> Option<&mut Component> {
        self.components.get_mut(index)
    }

    /// Number of boundaries
    pub const fn points(&self) -> u32 {
        self.points
    }

    /// Number of codable symbols
    pub const fn symbols(&self) -> u32 {
        self.points.saturating_sub(1)
    }

    /// Cumulative probability at boundary `position`
    pub fn value(&self, position: u32) -> f64 {
        if position >= self.points.saturating_sub(1) {
            return 1.0;
        }
        if position == 0 {
            return 0.0;
        }
        let x = f64::from(position) - 0.5;
        let sum: f64 = self.components.iter().map(|c| c.cumulative(x)).sum();
        sum.clamp(0.0, 1.0)
    }

    /// Map boundaries onto `offset..=offset + multiplier`
    pub const fn set_range(&mut self, offset: u32, multiplier: u32) {
        self.offset = offset;
        self.multiplier = multiplier;
    }

    /// Boundary `position` in coder range units
    pub fn range_value(&self, position: u32) -> u32 {
        let scaled = self.value(position).mul_add(f64::from(self.multiplier), 0.5);
        self.offset.saturating_add(scaled.max(0.0) as u32)
    }

    /// Lazily evaluated boundary
    pub const fn element(&self, position: u32) -> LazyElement<'_> {
        LazyElement {
            maker: self,
            position,
        }
    }

    /// Probability of `symbol`
    pub fn probability(&self, symbol: u32) -> f64 {
        self.value(symbol + 1) - self.value(symbol)
    }
}

/// A boundary of a [`DistributionMaker`] computed only when read
#[derive(Debug, Clone, Copy)]
pub struct LazyElement<'a> {
    maker: &'a DistributionMaker,
    position: u32,
}

impl LazyElement<'_> {
    /// Boundary index
    pub const fn position(&self) -> u32 {
        self.position
    }

    /// Cumulative probability
    pub fn value(&self) -> f64 {
        self.maker.value(self.position)
    }

    /// Boundary in coder range units
    pub fn range_value(&self) -> u32 {
        self.maker.range_value(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::functions::LawParameters;
    use crate::io::configuration::DistributionKind;

    const EPSILON: f64 = 1e-12;

    fn mixture() -> DistributionMaker {
        DistributionMaker::new(257)
            .with(Component::Law(Law::with_parameters(
                DistributionKind::Normal,
                &LawParameters::new(0.99, 100.0, 50.0, 1.0),
                None,
            )))
            .with(Component::Law(Law::with_parameters(
                DistributionKind::Uniform,
                &LawParameters::new(0.01, 0.0, 1.0, 1.0),
                Some(255),
            )))
    }

    #[test]
    fn test_boundaries_are_pinned() {
        let maker = mixture();
        assert!(maker.value(0).abs() < EPSILON);
        assert!((maker.value(256) - 1.0).abs() < EPSILON);
        assert!((maker.value(1000) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_every_symbol_has_positive_probability() {
        let maker = mixture();
        let total: f64 = (0..256).map(|s| maker.probability(s)).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((0..256).all(|s| maker.probability(s) > 0.0));
    }

    #[test]
    fn test_range_values_are_monotone() {
        let mut maker = mixture();
        maker.set_range(1000, 1 << 20);
        let values: Vec<u32> = (0..257).map(|p| maker.element(p).range_value()).collect();
        assert_eq!(values.first(), Some(&1000));
        assert_eq!(values.last(), Some(&(1000 + (1 << 20))));
        assert!(values.windows(2).all(|w| w.first() < w.last()));
    }
}
