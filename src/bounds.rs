//! Axis-aligned simulation domain extents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DumpError, DumpResult};

/// Cartesian axis of the simulation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn label(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
        }
    }

    /// The two in-plane axes of a projection along `self`, in (horizontal, vertical) order.
    pub fn plane(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Domain box; `lo <= hi` holds on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct BoxBounds {
    xlo: f64,
    xhi: f64,
    ylo: f64,
    yhi: f64,
    zlo: f64,
    zhi: f64,
}

impl BoxBounds {
    pub fn new(x: (f64, f64), y: (f64, f64), z: (f64, f64)) -> DumpResult<Self> {
        for (axis, (lo, hi)) in [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)] {
            // Also rejects NaN on either side.
            if !(lo <= hi) {
                return Err(DumpError::InvalidBounds {
                    axis: axis.label(),
                    lo,
                    hi,
                });
            }
        }
        Ok(Self {
            xlo: x.0,
            xhi: x.1,
            ylo: y.0,
            yhi: y.1,
            zlo: z.0,
            zhi: z.1,
        })
    }

    /// Symmetric cube `[-half, half]^3`.
    pub fn cube(half: f64) -> DumpResult<Self> {
        Self::new((-half, half), (-half, half), (-half, half))
    }

    pub fn lo(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.xlo,
            Axis::Y => self.ylo,
            Axis::Z => self.zlo,
        }
    }

    pub fn hi(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.xhi,
            Axis::Y => self.yhi,
            Axis::Z => self.zhi,
        }
    }

    pub fn extent(&self, axis: Axis) -> f64 {
        self.hi(axis) - self.lo(axis)
    }

    /// Coordinate at `fraction` of the way from `lo` to `hi` along `axis`.
    pub fn at_fraction(&self, axis: Axis, fraction: f64) -> f64 {
        self.lo(axis) + fraction * self.extent(axis)
    }
}

/// Unchecked on-disk form; every deserialized box goes through [`BoxBounds::new`].
#[derive(Deserialize)]
struct RawBounds {
    xlo: f64,
    xhi: f64,
    ylo: f64,
    yhi: f64,
    zlo: f64,
    zhi: f64,
}

impl TryFrom<RawBounds> for BoxBounds {
    type Error = DumpError;

    fn try_from(raw: RawBounds) -> DumpResult<Self> {
        BoxBounds::new((raw.xlo, raw.xhi), (raw.ylo, raw.yhi), (raw.zlo, raw.zhi))
    }
}
