//! Valid ranges of parameter values
//!
//! A [`ValidRange`] bounds a parameter from below, above or both, or wraps
//! it cyclically. Besides flagging out-of-range values it defines a smooth
//! bijection between the range and the whole real line, so optimizers can
//! work on unconstrained numbers while the graph sees values in range.
//!
//! Bounds are given per element and repeat over values with more elements
//! than bounds; a single bound applies to every element.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{GraphError, GraphResult};

/// Lower and upper limits on a parameter's elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lower: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    upper: Option<Vec<f64>>,
    #[serde(default)]
    cyclic: bool,
}

impl ValidRange {
    /// Range with per-element bounds
    ///
    /// A cyclic range needs both bounds, and every lower bound must lie
    /// below its upper bound.
    pub fn new(lower: Option<Vec<f64>>, upper: Option<Vec<f64>>, cyclic: bool) -> GraphResult<Self> {
        if cyclic && (lower.is_none() || upper.is_none()) {
            return Err(GraphError::Configuration(
                "a cyclic valid range needs both a lower and an upper bound".to_string(),
            ));
        }
        for bound in lower.iter().chain(upper.iter()) {
            if bound.is_empty() {
                return Err(GraphError::Configuration(
                    "valid range bounds cannot be empty".to_string(),
                ));
            }
        }
        if let (Some(lo), Some(hi)) = (&lower, &upper) {
            let n = lo.len().max(hi.len());
            if (0..n).any(|i| lo[i % lo.len()] >= hi[i % hi.len()]) {
                return Err(GraphError::Configuration(format!(
                    "valid range lower bound {:?} must be below upper bound {:?}",
                    lo, hi
                )));
            }
        }
        Ok(Self { lower, upper, cyclic })
    }

    /// Range between `lower` and `upper`
    pub fn bounded(lower: f64, upper: f64) -> GraphResult<Self> {
        Self::new(Some(vec![lower]), Some(vec![upper]), false)
    }

    /// Range wrapping around between `lower` and `upper`
    pub fn cyclic(lower: f64, upper: f64) -> GraphResult<Self> {
        Self::new(Some(vec![lower]), Some(vec![upper]), true)
    }

    /// Range bounded from below only
    pub fn at_least(lower: f64) -> Self {
        Self {
            lower: Some(vec![lower]),
            upper: None,
            cyclic: false,
        }
    }

    /// Range bounded from above only
    pub fn at_most(upper: f64) -> Self {
        Self {
            lower: None,
            upper: Some(vec![upper]),
            cyclic: false,
        }
    }

    /// Lower bounds, if any
    pub fn lower(&self) -> Option<&[f64]> {
        self.lower.as_deref()
    }

    /// Upper bounds, if any
    pub fn upper(&self) -> Option<&[f64]> {
        self.upper.as_deref()
    }

    /// Whether values wrap around the range
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Whether every element lies inside the range
    pub fn contains(&self, elements: &[f64]) -> bool {
        elements.iter().enumerate().all(|(i, x)| {
            self.lo(i).map_or(true, |lo| *x >= lo) && self.hi(i).map_or(true, |hi| *x <= hi)
        })
    }

    /// Map in-range elements onto the real line
    pub fn to_valid(&self, elements: &[f64]) -> Vec<f64> {
        elements
            .iter()
            .enumerate()
            .map(|(i, x)| match (self.lo(i), self.hi(i)) {
                (Some(lo), Some(hi)) if self.cyclic => (x - lo).rem_euclid(hi - lo) + lo,
                (Some(lo), Some(hi)) => ((x - (lo + hi) / 2.0) * PI / (hi - lo)).tan(),
                (Some(lo), None) => x - 1.0 / (x - lo),
                (None, Some(hi)) => x + 1.0 / (hi - x),
                (None, None) => *x,
            })
            .collect()
    }

    /// Map elements from the real line back into the range
    pub fn from_valid(&self, elements: &[f64]) -> Vec<f64> {
        elements
            .iter()
            .enumerate()
            .map(|(i, y)| match (self.lo(i), self.hi(i)) {
                (Some(lo), Some(hi)) if self.cyclic => (y - lo).rem_euclid(hi - lo) + lo,
                (Some(lo), Some(hi)) => y.atan() * (hi - lo) / PI + (lo + hi) / 2.0,
                (Some(lo), None) => (y + lo + ((y - lo).powi(2) + 4.0).sqrt()) / 2.0,
                (None, Some(hi)) => (y + hi - ((y - hi).powi(2) + 4.0).sqrt()) / 2.0,
                (None, None) => *y,
            })
            .collect()
    }

    fn lo(&self, i: usize) -> Option<f64> {
        self.lower.as_ref().map(|b| b[i % b.len()])
    }

    fn hi(&self, i: usize) -> Option<f64> {
        self.upper.as_ref().map(|b| b[i % b.len()])
    }
}
