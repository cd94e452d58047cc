//! Thin plate spline transformer between raster (pixel, line) space and
//! georeferenced (X, Y) space, built from a list of ground control points.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, warn};

use crate::config::TpsOptions;
use crate::error::{Result, TpsError};
use crate::model::Gcp;
use crate::spline::{GeorefSpline2D, SplineBuilder};

/// Above this many GCPs the two splines may be solved on separate threads.
pub const PARALLEL_SOLVE_THRESHOLD: usize = 100;

/// A coordinate transformation applied to batches of points in place.
pub trait Transformer {
    /// Transforms every point of `x`/`y` in place and records per-point success.
    /// `z` is carried along untouched. Returns `true` when all points succeeded.
    fn transform(
        &self,
        dst_to_src: bool,
        x: &mut [f64],
        y: &mut [f64],
        z: &mut [f64],
        success: &mut [bool],
    ) -> bool;
}

#[derive(Debug)]
struct TpsInner {
    forward: GeorefSpline2D<2>,
    reverse: GeorefSpline2D<2>,
    gcps: Vec<Gcp>,
    reversed: bool,
    options: TpsOptions,
}

/// Paired forward and reverse splines fitted to a GCP list.
///
/// Cloning is cheap: clones share the solved splines. Dropping the last handle
/// releases them.
#[derive(Debug, Clone)]
pub struct TpsTransformer {
    inner: Arc<TpsInner>,
}

/// Exact-equality lookup key; `-0.0` and `0.0` map to the same key.
fn coord_key(a: f64, b: f64) -> (u64, u64) {
    ((a + 0.0).to_bits(), (b + 0.0).to_bits())
}

impl TpsTransformer {
    /// Fits the splines for `gcps`.
    ///
    /// Without `reversed` the forward spline maps (pixel, line) to (X, Y) and
    /// the reverse spline maps back; `reversed` swaps the two roles.
    pub fn new(gcps: &[Gcp], reversed: bool, options: &TpsOptions) -> Result<Self> {
        let mut forward = SplineBuilder::<2>::with_capacity(gcps.len())?;
        let mut reverse = SplineBuilder::<2>::with_capacity(gcps.len())?;
        let mut kept: Vec<Gcp> = Vec::with_capacity(gcps.len());
        let mut by_pixel_line: HashMap<(u64, u64), usize> = HashMap::new();
        let mut by_xy: HashMap<(u64, u64), usize> = HashMap::new();
        let mut seen: HashSet<((u64, u64), (u64, u64))> = HashSet::new();

        for (i, gcp) in gcps.iter().enumerate() {
            let pixel_line_key = coord_key(gcp.pixel, gcp.line);
            let xy_key = coord_key(gcp.x, gcp.y);

            // Any earlier GCP matching in both spaces makes this one redundant.
            if !seen.insert((pixel_line_key, xy_key)) {
                debug!("skipping GCP {}, duplicate of an earlier GCP", i);
                continue;
            }

            let pixel_line_known = match by_pixel_line.get(&pixel_line_key) {
                Some(&j) => {
                    warn!(
                        "GCP {} and {} have same (pixel,line)=({},{}) but different (X,Y): ({},{}) vs ({},{})",
                        j, i, gcp.pixel, gcp.line, gcps[j].x, gcps[j].y, gcp.x, gcp.y
                    );
                    true
                }
                None => {
                    by_pixel_line.insert(pixel_line_key, i);
                    false
                }
            };
            let xy_known = match by_xy.get(&xy_key) {
                Some(&j) => {
                    warn!(
                        "GCP {} and {} have same (x,y)=({},{}) but different (pixel,line): ({},{}) vs ({},{})",
                        j, i, gcp.x, gcp.y, gcps[j].pixel, gcps[j].line, gcp.pixel, gcp.line
                    );
                    true
                }
                None => {
                    by_xy.insert(xy_key, i);
                    false
                }
            };

            let to_xy = [gcp.x, gcp.y];
            let to_pixel_line = [gcp.pixel, gcp.line];
            if reversed {
                if !xy_known {
                    forward.add_point(gcp.x, gcp.y, to_pixel_line)?;
                }
                if !pixel_line_known {
                    reverse.add_point(gcp.pixel, gcp.line, to_xy)?;
                }
            } else {
                if !pixel_line_known {
                    forward.add_point(gcp.pixel, gcp.line, to_xy)?;
                }
                if !xy_known {
                    reverse.add_point(gcp.x, gcp.y, to_pixel_line)?;
                }
            }
            kept.push(gcp.clone());
        }

        let start = Instant::now();
        let threads = options.num_threads.resolve();
        let (forward, reverse) = if threads > 1 && kept.len() > PARALLEL_SOLVE_THRESHOLD {
            solve_pair_parallel(forward, reverse)
        } else {
            (forward.solve(), reverse.solve())
        };
        let (forward, reverse) = (forward?, reverse?);

        if forward.classification() == 0 || reverse.classification() == 0 {
            return Err(TpsError::NotSolvable);
        }

        debug!(
            "built TPS transformer from {} GCPs ({} forward, {} reverse points) in {:?}",
            kept.len(),
            forward.point_count(),
            reverse.point_count(),
            start.elapsed()
        );

        Ok(Self {
            inner: Arc::new(TpsInner {
                forward,
                reverse,
                gcps: kept,
                reversed,
                options: options.clone(),
            }),
        })
    }

    /// Returns a transformer for a raster resampled by `scale_x`/`scale_y`.
    ///
    /// With both ratios at 1 the solved splines are shared, otherwise the
    /// splines are refitted on GCPs whose pixel and line are divided by the
    /// ratios.
    pub fn similar(&self, scale_x: f64, scale_y: f64) -> Result<Self> {
        if scale_x == 1.0 && scale_y == 1.0 {
            return Ok(self.clone());
        }
        let gcps: Vec<Gcp> = self
            .inner
            .gcps
            .iter()
            .map(|gcp| gcp.scaled(scale_x, scale_y))
            .collect();
        Self::new(&gcps, self.inner.reversed, &self.inner.options)
    }

    pub fn gcps(&self) -> &[Gcp] {
        &self.inner.gcps
    }

    pub fn is_reversed(&self) -> bool {
        self.inner.reversed
    }

    pub fn options(&self) -> &TpsOptions {
        &self.inner.options
    }

    pub fn forward(&self) -> &GeorefSpline2D<2> {
        &self.inner.forward
    }

    pub fn reverse(&self) -> &GeorefSpline2D<2> {
        &self.inner.reverse
    }

    /// Number of live handles sharing these splines.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn transform_point(&self, dst_to_src: bool, x: f64, y: f64) -> (f64, f64) {
        let [tx, ty] = self.spline(dst_to_src).evaluate(x, y);
        (tx, ty)
    }

    /// Transforms `points` in place on the rayon thread pool.
    pub fn transform_points_par(&self, dst_to_src: bool, points: &mut [(f64, f64)]) {
        let spline = self.spline(dst_to_src);
        points.par_iter_mut().for_each(|point| {
            let [tx, ty] = spline.evaluate(point.0, point.1);
            *point = (tx, ty);
        });
    }

    fn spline(&self, dst_to_src: bool) -> &GeorefSpline2D<2> {
        if dst_to_src {
            &self.inner.reverse
        } else {
            &self.inner.forward
        }
    }
}

impl Transformer for TpsTransformer {
    fn transform(
        &self,
        dst_to_src: bool,
        x: &mut [f64],
        y: &mut [f64],
        _z: &mut [f64],
        success: &mut [bool],
    ) -> bool {
        let spline = self.spline(dst_to_src);
        let mut all_ok = true;
        for ((px, py), ok) in x.iter_mut().zip(y.iter_mut()).zip(success.iter_mut()) {
            let mut out = [0.0; 2];
            *ok = spline.get_point(*px, *py, &mut out);
            all_ok &= *ok;
            *px = out[0];
            *py = out[1];
        }
        all_ok
    }
}

/// Solves both splines on a two thread pool, or sequentially when the pool
/// cannot be started.
fn solve_pair_parallel(
    forward: SplineBuilder<2>,
    reverse: SplineBuilder<2>,
) -> (Result<GeorefSpline2D<2>>, Result<GeorefSpline2D<2>>) {
    match ThreadPoolBuilder::new()
        .num_threads(2)
        .thread_name(|i| format!("tps-solve-{}", i))
        .build()
    {
        Ok(pool) => {
            info!(
                "solving forward and reverse splines in parallel ({} points)",
                forward.len()
            );
            pool.join(move || forward.solve(), move || reverse.solve())
        }
        Err(e) => {
            warn!("could not start solver thread ({}), solving sequentially", e);
            (forward.solve(), reverse.solve())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NumThreads;
    use std::num::NonZeroUsize;

    fn grid_gcps() -> Vec<Gcp> {
        let mut gcps = Vec::new();
        for (i, &(pixel, line)) in [
            (0.0, 0.0),
            (100.0, 0.0),
            (0.0, 100.0),
            (100.0, 100.0),
            (50.0, 50.0),
            (25.0, 75.0),
        ]
        .iter()
        .enumerate()
        {
            // Mildly non-affine mapping.
            let x = 400000.0 + 30.0 * pixel + 0.001 * pixel * line;
            let y = 3700000.0 - 30.0 * line + 0.0005 * pixel * pixel;
            gcps.push(Gcp::new(i.to_string(), pixel, line, x, y));
        }
        gcps
    }

    fn assert_close(got: (f64, f64), want: (f64, f64), tol: f64) {
        assert!(
            (got.0 - want.0).abs() < tol && (got.1 - want.1).abs() < tol,
            "{:?} differs from {:?} (tolerance {})",
            got,
            want,
            tol
        );
    }

    #[test]
    fn test_exact_at_control_points_both_directions() {
        let gcps = grid_gcps();
        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.forward().classification(), 4);
        assert_eq!(tps.reverse().classification(), 4);

        for gcp in &gcps {
            assert_close(tps.transform_point(false, gcp.pixel, gcp.line), gcp.xy(), 1e-4);
            assert_close(tps.transform_point(true, gcp.x, gcp.y), gcp.pixel_line(), 1e-6);
        }
    }

    #[test]
    fn test_reversed_swaps_directions() {
        let gcps = grid_gcps();
        let tps = TpsTransformer::new(&gcps, true, &TpsOptions::default()).unwrap();
        assert!(tps.is_reversed());

        let gcp = &gcps[4];
        assert_close(tps.transform_point(false, gcp.x, gcp.y), gcp.pixel_line(), 1e-6);
        assert_close(tps.transform_point(true, gcp.pixel, gcp.line), gcp.xy(), 1e-4);
    }

    #[test]
    fn test_round_trip_near_control_points() {
        let tps = TpsTransformer::new(&grid_gcps(), false, &TpsOptions::default()).unwrap();

        let (x, y) = tps.transform_point(false, 60.0, 40.0);
        let back = tps.transform_point(true, x, y);
        assert_close(back, (60.0, 40.0), 0.5);
    }

    #[test]
    fn test_transform_batch() {
        let gcps = grid_gcps();
        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();

        let mut x = vec![gcps[0].pixel, gcps[3].pixel];
        let mut y = vec![gcps[0].line, gcps[3].line];
        let mut z = vec![7.0, 8.0];
        let mut success = vec![false; 2];

        assert!(tps.transform(false, &mut x, &mut y, &mut z, &mut success));
        assert_eq!(success, vec![true, true]);
        assert_eq!(z, vec![7.0, 8.0]);
        assert_close((x[1], y[1]), gcps[3].xy(), 1e-4);

        let mut points = vec![(gcps[0].pixel, gcps[0].line), (gcps[3].pixel, gcps[3].line)];
        tps.transform_points_par(false, &mut points);
        assert_close(points[0], (x[0], y[0]), 1e-12);
        assert_close(points[1], (x[1], y[1]), 1e-12);
    }

    #[test]
    fn test_true_duplicates_are_skipped() {
        let mut gcps = grid_gcps();
        gcps.push(gcps[2].clone());
        gcps.push(Gcp::new("neg-zero", -0.0, 0.0, gcps[0].x, gcps[0].y));

        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.gcps().len(), 6);
        assert_eq!(tps.forward().point_count(), 6);
        assert_eq!(tps.reverse().point_count(), 6);
    }

    #[test]
    fn test_inconsistent_gcps_keep_first_per_spline() {
        let mut gcps = grid_gcps();
        // Same raster location as GCP 4, different ground location.
        gcps.push(Gcp::new("conflict", 50.0, 50.0, 401000.0, 3699000.0));

        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.gcps().len(), 7);
        assert_eq!(tps.forward().point_count(), 6);
        assert_eq!(tps.reverse().point_count(), 7);

        // The forward spline still honours the first GCP.
        assert_close(tps.transform_point(false, 50.0, 50.0), gcps[4].xy(), 1e-4);
    }

    #[test]
    fn test_repeat_of_conflicting_gcp_is_skipped() {
        let mut gcps = grid_gcps();
        gcps.push(Gcp::new("conflict", 50.0, 50.0, 401000.0, 3699000.0));
        // Matches the conflicting GCP exactly, not the first one at (50, 50).
        gcps.push(Gcp::new("repeat", 50.0, 50.0, 401000.0, 3699000.0));

        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.gcps().len(), 7);
        assert!(tps.gcps().iter().all(|gcp| gcp.id != "repeat"));
        assert_eq!(tps.forward().point_count(), 6);
        assert_eq!(tps.reverse().point_count(), 7);

        let restored =
            TpsTransformer::from_xml_str(&tps.to_xml_string().unwrap(), &TpsOptions::default())
                .unwrap();
        assert_eq!(restored.gcps().len(), 7);
    }

    #[test]
    fn test_shared_ground_location_keeps_first_in_reverse_spline() {
        let mut gcps = grid_gcps();
        // Same ground location as GCP 4, different raster location.
        gcps.push(Gcp::new("conflict", 70.0, 20.0, gcps[4].x, gcps[4].y));

        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.gcps().len(), 7);
        assert_eq!(tps.forward().point_count(), 7);
        assert_eq!(tps.reverse().point_count(), 6);

        assert_close(tps.transform_point(true, gcps[4].x, gcps[4].y), gcps[4].pixel_line(), 1e-6);
    }

    #[test]
    fn test_reversed_conflicts_follow_spline_domains() {
        let mut gcps = grid_gcps();
        gcps.push(Gcp::new("conflict", 50.0, 50.0, 401000.0, 3699000.0));

        // Reversed: the forward spline's domain is (X, Y), where both points
        // are distinct; the reverse spline's domain is (pixel, line).
        let tps = TpsTransformer::new(&gcps, true, &TpsOptions::default()).unwrap();
        assert_eq!(tps.gcps().len(), 7);
        assert_eq!(tps.forward().point_count(), 7);
        assert_eq!(tps.reverse().point_count(), 6);

        assert_close(tps.transform_point(true, 50.0, 50.0), gcps[4].xy(), 1e-4);
        assert_close(tps.transform_point(false, 401000.0, 3699000.0), (50.0, 50.0), 1e-6);

        let mut gcps = grid_gcps();
        gcps.push(Gcp::new("conflict", 70.0, 20.0, gcps[4].x, gcps[4].y));
        let tps = TpsTransformer::new(&gcps, true, &TpsOptions::default()).unwrap();
        assert_eq!(tps.forward().point_count(), 6);
        assert_eq!(tps.reverse().point_count(), 7);
    }

    #[test]
    fn test_degenerate_gcp_sets() {
        let options = TpsOptions::default();
        assert!(matches!(
            TpsTransformer::new(&[], false, &options),
            Err(TpsError::NotSolvable)
        ));

        let one = [Gcp::new("1", 5.0, 5.0, 10.0, 20.0)];
        let tps = TpsTransformer::new(&one, false, &options).unwrap();
        assert_eq!(tps.transform_point(false, 99.0, -4.0), (10.0, 20.0));

        let line: Vec<Gcp> = (0..4)
            .map(|i| {
                let t = i as f64;
                Gcp::new(i.to_string(), t * 10.0, t * 10.0, 100.0 + t, 200.0 - t)
            })
            .collect();
        let tps = TpsTransformer::new(&line, false, &options).unwrap();
        assert_eq!(tps.forward().classification(), 3);
        assert_close(tps.transform_point(false, 15.0, 15.0), (101.5, 198.5), 1e-9);
    }

    #[test]
    fn test_shared_raster_location_collapses_forward_spline() {
        let gcps: Vec<Gcp> = (0..3)
            .map(|i| Gcp::new(i.to_string(), 1.0, 1.0, i as f64, (i * i) as f64 + 0.5))
            .collect();
        // Three different ground points at one raster location: the reverse
        // spline is fine, the forward spline keeps a single point.
        let tps = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.forward().classification(), 1);
    }

    #[test]
    fn test_similar_shares_or_rescales() {
        let tps = TpsTransformer::new(&grid_gcps(), false, &TpsOptions::default()).unwrap();
        assert_eq!(tps.handle_count(), 1);

        let shared = tps.similar(1.0, 1.0).unwrap();
        assert_eq!(tps.handle_count(), 2);
        drop(shared);
        assert_eq!(tps.handle_count(), 1);

        let half = tps.similar(2.0, 2.0).unwrap();
        assert_eq!(half.handle_count(), 1);
        assert_close(
            half.transform_point(false, 50.0, 50.0),
            tps.transform_point(false, 100.0, 100.0),
            1e-4,
        );
    }

    #[test]
    fn test_parallel_solve_matches_sequential() {
        let mut gcps = Vec::new();
        for i in 0..11 {
            for j in 0..11 {
                let (pixel, line) = (i as f64 * 10.0 + (j % 3) as f64, j as f64 * 10.0);
                gcps.push(Gcp::new(
                    format!("{}-{}", i, j),
                    pixel,
                    line,
                    1000.0 + pixel * 2.0 + (line * 0.05).sin(),
                    2000.0 - line * 2.0 + (pixel * 0.03).cos(),
                ));
            }
        }
        assert!(gcps.len() > PARALLEL_SOLVE_THRESHOLD);

        let sequential = TpsTransformer::new(&gcps, false, &TpsOptions::default()).unwrap();
        let parallel = TpsTransformer::new(
            &gcps,
            false,
            &TpsOptions::with_num_threads(NumThreads::Count(NonZeroUsize::new(4).unwrap())),
        )
        .unwrap();

        assert_eq!(sequential.forward().kind(), parallel.forward().kind());
        assert_eq!(sequential.reverse().kind(), parallel.reverse().kind());
    }
}
