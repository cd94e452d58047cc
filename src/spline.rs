//! Two dimensional thin plate spline fitting.
//!
//! A [`SplineBuilder`] collects control points mapping a 2D domain coordinate to
//! `V` range variables. [`SplineBuilder::solve`] classifies the point set and
//! produces an immutable [`GeorefSpline2D`]:
//!
//! - no points: every query evaluates to zeros,
//! - one point: every query evaluates to that point's values,
//! - two points: linear blend along the line through both points,
//! - three or more nearly colinear points: piecewise linear interpolation along
//!   the principal axis,
//! - otherwise: a full thin plate spline with basis `r² ln(r²)`, exact at every
//!   control point.

use std::time::Instant;

use tracing::{debug, error};

use crate::error::{Result, TpsError};
use crate::linalg;

/// Thin plate spline kernel `r² ln(r²)` for the squared distance between two
/// domain points, defined as `0` when they coincide.
pub fn basis_function(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dist = (x2 - x1) * (x2 - x1) + (y2 - y1) * (y2 - y1);
    if dist != 0.0 {
        dist * dist.ln()
    } else {
        0.0
    }
}

/// Number of cells in the `(n + 3)²` system matrix for `n` control points.
fn system_len(nof_points: usize) -> Result<usize> {
    nof_points
        .checked_add(3)
        .and_then(|eqs| eqs.checked_mul(eqs))
        // The inversion works on a buffer twice that size.
        .filter(|len| len.checked_mul(2).is_some())
        .ok_or(TpsError::TooManyPoints { points: nof_points })
}

/// Collects control points before solving.
#[derive(Debug, Clone)]
pub struct SplineBuilder<const V: usize> {
    x: Vec<f64>,
    y: Vec<f64>,
    vars: Vec<[f64; V]>,
    tolerance: (f64, f64),
}

impl<const V: usize> Default for SplineBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const V: usize> SplineBuilder<V> {
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            vars: Vec::new(),
            tolerance: (0.0, 0.0),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut builder = Self::new();
        builder.reserve(capacity)?;
        Ok(builder)
    }

    /// Sets the per-axis distance within which [`delete_point`](Self::delete_point)
    /// considers a stored point a match.
    pub fn with_tolerance(mut self, tx: f64, ty: f64) -> Self {
        self.tolerance = (tx, ty);
        self
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        self.x.try_reserve(additional)?;
        self.y.try_reserve(additional)?;
        self.vars.try_reserve(additional)?;
        Ok(())
    }

    /// Appends a control point. Duplicate domain coordinates are accepted.
    pub fn add_point(&mut self, x: f64, y: f64, vars: [f64; V]) -> Result<()> {
        self.reserve(1)?;
        self.x.push(x);
        self.y.push(y);
        self.vars.push(vars);
        Ok(())
    }

    /// Removes the first point within tolerance of `(x, y)`.
    pub fn delete_point(&mut self, x: f64, y: f64) -> bool {
        let (tx, ty) = self.tolerance;
        let found = self
            .x
            .iter()
            .zip(&self.y)
            .position(|(&px, &py)| (x - px).abs() <= tx && (y - py).abs() <= ty);

        match found {
            Some(index) => {
                self.x.remove(index);
                self.y.remove(index);
                self.vars.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replaces the point stored at `index`.
    pub fn change_point(&mut self, index: usize, x: f64, y: f64, vars: [f64; V]) -> bool {
        if index >= self.len() {
            return false;
        }
        self.x[index] = x;
        self.y[index] = y;
        self.vars[index] = vars;
        true
    }

    pub fn get_xy(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.x.get(index)?, *self.y.get(index)?))
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Classifies the point set and fits the model.
    ///
    /// Only the full 2D case can fail: on a singular system matrix, on an
    /// oversized system or when its buffers cannot be allocated.
    pub fn solve(self) -> Result<GeorefSpline2D<V>> {
        let start = Instant::now();
        let kind = match self.len() {
            0 => SplineKind::Empty,
            1 => SplineKind::Single,
            2 => self.solve_pair(),
            _ => match self.solve_colinear() {
                Some(kind) => kind,
                None => self.solve_full()?,
            },
        };

        debug!(
            "solved {} point spline as {} in {:?}",
            self.len(),
            kind.name(),
            start.elapsed()
        );

        Ok(GeorefSpline2D {
            x: self.x,
            y: self.y,
            vars: self.vars,
            kind,
        })
    }

    fn solve_pair(&self) -> SplineKind<V> {
        let dx = self.x[1] - self.x[0];
        let dy = self.y[1] - self.y[0];
        let fact = 1.0 / (dx * dx + dy * dy);
        SplineKind::Pair {
            dx: dx * fact,
            dy: dy * fact,
        }
    }

    /// Returns the 1D model when the points are statistically colinear.
    fn solve_colinear(&self) -> Option<SplineKind<V>> {
        let n = self.len() as f64;
        let (mut xmin, mut xmax) = (self.x[0], self.x[0]);
        let (mut ymin, mut ymax) = (self.y[0], self.y[0]);
        let (mut sumx, mut sumy, mut sumx2, mut sumy2, mut sumxy) = (0.0, 0.0, 0.0, 0.0, 0.0);

        for (&xx, &yy) in self.x.iter().zip(&self.y) {
            xmin = xmin.min(xx);
            xmax = xmax.max(xx);
            ymin = ymin.min(yy);
            ymax = ymax.max(yy);
            sumx += xx;
            sumx2 += xx * xx;
            sumy += yy;
            sumy2 += yy * yy;
            sumxy += xx * yy;
        }

        let delx = xmax - xmin;
        let dely = ymax - ymin;
        let ss_xx = sumx2 - sumx * sumx / n;
        let ss_yy = sumy2 - sumy * sumy / n;
        let ss_xy = sumxy - sumx * sumy / n;

        let colinear = delx < 0.001 * dely
            || dely < 0.001 * delx
            || (ss_xy * ss_xy / (ss_xx * ss_yy)).abs() > 0.99;
        if !colinear {
            return None;
        }

        let mut dx = n * sumx2 - sumx * sumx;
        // Orient the axis along falling lines too.
        let mut dy = (n * sumy2 - sumy * sumy).copysign(ss_xy);
        let fact = 1.0 / (dx * dx + dy * dy).sqrt();
        dx *= fact;
        dy *= fact;

        let u: Vec<f64> = self
            .x
            .iter()
            .zip(&self.y)
            .map(|(&px, &py)| dx * (px - self.x[0]) + dy * (py - self.y[0]))
            .collect();
        let mut order: Vec<usize> = (0..u.len()).collect();
        order.sort_by(|&a, &b| u[a].total_cmp(&u[b]));

        Some(SplineKind::Colinear { dx, dy, order, u })
    }

    fn solve_full(&self) -> Result<SplineKind<V>> {
        let nof_points = self.len();
        let nof_eqs = nof_points + 3;
        let len = system_len(nof_points).inspect_err(|e| error!("{}", e))?;

        // Coordinates and values are centered for conditioning; the constant
        // term absorbs the shift, so the fitted surface is unchanged.
        let x_mean = self.x.iter().sum::<f64>() / nof_points as f64;
        let y_mean = self.y.iter().sum::<f64>() / nof_points as f64;
        let mut var_mean = [0.0; V];
        for vars in &self.vars {
            for v in 0..V {
                var_mean[v] += vars[v] / nof_points as f64;
            }
        }

        let mut a = Vec::new();
        a.try_reserve_exact(len)?;
        a.resize(len, 0.0);

        for c in 0..nof_points {
            let (x, y) = (self.x[c] - x_mean, self.y[c] - y_mean);
            a[c + 3] = 1.0;
            a[nof_eqs + c + 3] = x;
            a[2 * nof_eqs + c + 3] = y;
            a[(c + 3) * nof_eqs] = 1.0;
            a[(c + 3) * nof_eqs + 1] = x;
            a[(c + 3) * nof_eqs + 2] = y;
        }

        for r in 0..nof_points {
            for c in r..nof_points {
                let value = basis_function(self.x[r], self.y[r], self.x[c], self.y[c]);
                a[(r + 3) * nof_eqs + c + 3] = value;
                a[(c + 3) * nof_eqs + r + 3] = value;
            }
        }

        let a_inv = linalg::invert(nof_eqs, &a).inspect_err(|e| error!("{}", e))?;
        drop(a);

        let mut coef = Vec::new();
        coef.try_reserve_exact(nof_eqs)?;
        for row in a_inv.chunks_exact(nof_eqs) {
            let mut values = [0.0; V];
            // The first three right hand side entries are zero.
            for (inv, rhs) in row[3..].iter().zip(&self.vars) {
                for v in 0..V {
                    values[v] += inv * (rhs[v] - var_mean[v]);
                }
            }
            coef.push(values);
        }

        Ok(SplineKind::Full {
            coef,
            x_mean,
            y_mean,
            var_mean,
        })
    }
}

/// Evaluation strategy selected by [`SplineBuilder::solve`].
#[derive(Debug, Clone, PartialEq)]
pub enum SplineKind<const V: usize> {
    Empty,
    Single,
    /// Unit direction scaled by the inverse distance between the two points.
    Pair { dx: f64, dy: f64 },
    /// Principal axis, point indices sorted by projection, and the projections.
    Colinear {
        dx: f64,
        dy: f64,
        order: Vec<usize>,
        u: Vec<f64>,
    },
    /// `n + 3` coefficient rows: constant, x and y terms then one per point.
    /// The x and y terms apply to coordinates relative to the point centroid,
    /// and values are relative to `var_mean`.
    Full {
        coef: Vec<[f64; V]>,
        x_mean: f64,
        y_mean: f64,
        var_mean: [f64; V],
    },
}

impl<const V: usize> SplineKind<V> {
    /// Numeric classification code: 0 for no points, 1 for one point, 2 for
    /// two points, 3 for the colinear case and 4 for the full fit.
    pub fn code(&self) -> u8 {
        match self {
            SplineKind::Empty => 0,
            SplineKind::Single => 1,
            SplineKind::Pair { .. } => 2,
            SplineKind::Colinear { .. } => 3,
            SplineKind::Full { .. } => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SplineKind::Empty => "empty",
            SplineKind::Single => "single",
            SplineKind::Pair { .. } => "pair",
            SplineKind::Colinear { .. } => "colinear",
            SplineKind::Full { .. } => "full",
        }
    }
}

/// A solved spline. Immutable, so it can be shared across threads freely.
#[derive(Debug, Clone)]
pub struct GeorefSpline2D<const V: usize> {
    x: Vec<f64>,
    y: Vec<f64>,
    vars: Vec<[f64; V]>,
    kind: SplineKind<V>,
}

impl<const V: usize> GeorefSpline2D<V> {
    pub fn kind(&self) -> &SplineKind<V> {
        &self.kind
    }

    pub fn classification(&self) -> u8 {
        self.kind.code()
    }

    pub fn point_count(&self) -> usize {
        self.x.len()
    }

    /// Writes the model value at `(px, py)` into `out`.
    ///
    /// Returns `false` only for a spline without control points, in which case
    /// `out` is zeroed.
    pub fn get_point(&self, px: f64, py: f64, out: &mut [f64; V]) -> bool {
        match &self.kind {
            SplineKind::Empty => {
                *out = [0.0; V];
                return false;
            }
            SplineKind::Single => *out = self.vars[0],
            SplineKind::Pair { dx, dy } => {
                let fact = dx * (px - self.x[0]) + dy * (py - self.y[0]);
                self.blend(0, 1, fact, out);
            }
            SplineKind::Colinear { dx, dy, order, u } => {
                let pu = dx * (px - self.x[0]) + dy * (py - self.y[0]);
                let last = order.len() - 1;
                let (left, right) = if pu <= u[order[0]] {
                    (order[0], order[1])
                } else if pu >= u[order[last]] {
                    (order[last - 1], order[last])
                } else {
                    order
                        .windows(2)
                        .map(|w| (w[0], w[1]))
                        .find(|&(l, r)| pu >= u[l] && pu <= u[r])
                        .unwrap_or((order[last - 1], order[last]))
                };
                let span = u[right] - u[left];
                let fact = if span != 0.0 { (pu - u[left]) / span } else { 0.0 };
                self.blend(left, right, fact, out);
            }
            SplineKind::Full {
                coef,
                x_mean,
                y_mean,
                var_mean,
            } => {
                let (cx, cy) = (px - x_mean, py - y_mean);
                for v in 0..V {
                    out[v] = var_mean[v] + coef[0][v] + coef[1][v] * cx + coef[2][v] * cy;
                }
                for (r, (&x, &y)) in self.x.iter().zip(&self.y).enumerate() {
                    let tmp = basis_function(px, py, x, y);
                    for v in 0..V {
                        out[v] += coef[r + 3][v] * tmp;
                    }
                }
            }
        }
        true
    }

    pub fn evaluate(&self, px: f64, py: f64) -> [f64; V] {
        let mut out = [0.0; V];
        self.get_point(px, py, &mut out);
        out
    }

    fn blend(&self, left: usize, right: usize, fact: f64, out: &mut [f64; V]) {
        for v in 0..V {
            out[v] = (1.0 - fact) * self.vars[left][v] + fact * self.vars[right][v];
        }
    }
}
