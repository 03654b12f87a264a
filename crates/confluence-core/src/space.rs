//! Spatial dimension of components: the rectilinear latitude-longitude
//! grid, flow-direction routing, and the sparse remapping weights used by
//! the exchanger to move transfers between grids of different resolutions.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfluenceError, ConfluenceResult};

/// Radius of the sphere used to compute cell areas, in metres.
const EARTH_RADIUS_M: f64 = 6_371_229.0;

/// Tolerance for coordinate comparisons, in degrees.
const COORD_EPS: f64 = 1e-9;

/// A rectilinear 2-D latitude-longitude domain.
///
/// Cells are described by their centre coordinates and bounds, ordered
/// increasingly northwards (Y) and eastwards (X). The grid optionally
/// carries a land/sea mask (`true` on land), a flow-direction field for
/// lateral routing, and a user-supplied cell-area field overriding the
/// spherical areas computed from the bounds.
///
/// Grids are immutable once built and shared read-only across consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LatLonGrid {
    y: Vec<f64>,
    x: Vec<f64>,
    y_bounds: Array2<f64>,
    x_bounds: Array2<f64>,
    land_sea_mask: Option<Array2<bool>>,
    flow_direction: Option<Array3<i8>>,
    cell_area: Array2<f64>,
}

impl LatLonGrid {
    /// Build a grid from explicit cell bounds, shaped `(n, 2)` per axis.
    pub fn new(y_bounds: Array2<f64>, x_bounds: Array2<f64>) -> ConfluenceResult<Self> {
        check_bounds(&y_bounds, "latitude")?;
        check_bounds(&x_bounds, "longitude")?;

        let y = y_bounds
            .rows()
            .into_iter()
            .map(|b| (b[0] + b[1]) / 2.0)
            .collect();
        let x = x_bounds
            .rows()
            .into_iter()
            .map(|b| (b[0] + b[1]) / 2.0)
            .collect();

        let cell_area = compute_cell_area(&y_bounds, &x_bounds);
        Ok(Self {
            y,
            x,
            y_bounds,
            x_bounds,
            land_sea_mask: None,
            flow_direction: None,
            cell_area,
        })
    }

    /// Build a regular grid from an extent and a resolution per axis.
    ///
    /// The extent must be a whole number of cells at the given resolution.
    pub fn from_extent_and_resolution(
        latitude_extent: (f64, f64),
        latitude_resolution: f64,
        longitude_extent: (f64, f64),
        longitude_resolution: f64,
    ) -> ConfluenceResult<Self> {
        let y_bounds = regular_bounds(latitude_extent, latitude_resolution, "latitude")?;
        let x_bounds = regular_bounds(longitude_extent, longitude_resolution, "longitude")?;
        Self::new(y_bounds, x_bounds)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    pub fn len(&self) -> usize {
        self.y.len() * self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y_bounds(&self) -> &Array2<f64> {
        &self.y_bounds
    }

    pub fn x_bounds(&self) -> &Array2<f64> {
        &self.x_bounds
    }

    /// Horizontal cell areas in square metres.
    pub fn cell_area(&self) -> &Array2<f64> {
        &self.cell_area
    }

    pub fn land_sea_mask(&self) -> Option<&Array2<bool>> {
        self.land_sea_mask.as_ref()
    }

    /// Relative flow direction as (Y, X) offset pairs, shaped `(ny, nx, 2)`.
    pub fn flow_direction(&self) -> Option<&Array3<i8>> {
        self.flow_direction.as_ref()
    }

    /// Attach a land/sea mask, `true` on land.
    pub fn with_land_sea_mask(mut self, mask: Array2<bool>) -> ConfluenceResult<Self> {
        if mask.dim() != self.shape() {
            return Err(ConfluenceError::Shape {
                name: "land_sea_mask".to_string(),
                expected: vec![self.shape().0, self.shape().1],
                actual: mask.shape().to_vec(),
            });
        }
        self.land_sea_mask = Some(mask);
        Ok(self)
    }

    /// Attach a flow-direction field of relative (Y, X) offsets in
    /// {-1, 0, 1}, shaped `(ny, nx, 2)`.
    pub fn with_flow_direction(mut self, directions: Array3<i8>) -> ConfluenceResult<Self> {
        let (ny, nx) = self.shape();
        if directions.dim() != (ny, nx, 2) {
            return Err(ConfluenceError::Shape {
                name: "flow_direction".to_string(),
                expected: vec![ny, nx, 2],
                actual: directions.shape().to_vec(),
            });
        }
        if directions.iter().any(|&d| !(-1..=1).contains(&d)) {
            return Err(ConfluenceError::Config(
                "flow direction contains offsets outside {-1, 0, 1}".to_string(),
            ));
        }
        self.flow_direction = Some(directions);
        Ok(self)
    }

    /// Override the computed cell areas with a user-supplied field, in
    /// square metres.
    pub fn with_cell_area(mut self, areas: Array2<f64>) -> ConfluenceResult<Self> {
        if areas.dim() != self.shape() {
            return Err(ConfluenceError::Shape {
                name: "cell_area".to_string(),
                expected: vec![self.shape().0, self.shape().1],
                actual: areas.shape().to_vec(),
            });
        }
        if areas.iter().any(|&a| a <= 0.0) {
            return Err(ConfluenceError::Config(
                "cell_area contains non-positive values".to_string(),
            ));
        }
        self.cell_area = areas;
        Ok(self)
    }

    /// Whether a cell takes part in the simulation (land, or no mask).
    pub fn is_valid_cell(&self, j: usize, i: usize) -> bool {
        self.land_sea_mask.as_ref().map_or(true, |m| m[[j, i]])
    }

    /// Whether the two grids have identical centres and bounds.
    pub fn same_layout_as(&self, other: &LatLonGrid) -> bool {
        self.shape() == other.shape()
            && close_all(&self.y, &other.y)
            && close_all(&self.x, &other.x)
    }

    /// Whether the two grids cover the same region (outer bounds equal).
    pub fn spans_same_region_as(&self, other: &LatLonGrid) -> bool {
        let outer = |b: &Array2<f64>| (b[[0, 0]], b[[b.nrows() - 1, 1]]);
        let (y0, y1) = outer(&self.y_bounds);
        let (oy0, oy1) = outer(&other.y_bounds);
        let (x0, x1) = outer(&self.x_bounds);
        let (ox0, ox1) = outer(&other.x_bounds);
        (y0 - oy0).abs() < COORD_EPS
            && (y1 - oy1).abs() < COORD_EPS
            && (x0 - ox0).abs() < COORD_EPS
            && (x1 - ox1).abs() < COORD_EPS
    }

    /// Whether every cell edge of `self` coincides with an edge of `finer`,
    /// i.e. `finer` is a whole-cell refinement of `self`.
    pub fn is_matched_in(&self, finer: &LatLonGrid) -> bool {
        self.spans_same_region_as(finer)
            && edges_subset(&self.y_bounds, &finer.y_bounds)
            && edges_subset(&self.x_bounds, &finer.x_bounds)
    }

    /// Move values one cell downstream along the flow-direction field.
    ///
    /// Returns `(routed_in, leaving)`: `routed_in[c]` is the total arriving
    /// in cell `c` from its upstream neighbours; `leaving[c]` the amount
    /// that cell `c` emitted towards the outside of the grid, towards a
    /// masked cell, or onto itself. Nothing is lost silently:
    /// `sum(values) == sum(routed_in) + sum(leaving)` over valid cells.
    pub fn route(
        &self,
        values: &Array2<f64>,
    ) -> ConfluenceResult<(Array2<f64>, Array2<f64>)> {
        let directions = self.flow_direction.as_ref().ok_or_else(|| {
            ConfluenceError::Config(
                "routing requires the grid flow_direction to be set".to_string(),
            )
        })?;
        let (ny, nx) = self.shape();
        if values.dim() != (ny, nx) {
            return Err(ConfluenceError::Shape {
                name: "values_to_route".to_string(),
                expected: vec![ny, nx],
                actual: values.shape().to_vec(),
            });
        }

        let wraps_x = self.x_wraps_around();
        let mut routed = Array2::zeros((ny, nx));
        let mut leaving = Array2::zeros((ny, nx));

        for j in 0..ny {
            for i in 0..nx {
                if !self.is_valid_cell(j, i) {
                    continue;
                }
                let v = values[[j, i]];
                let dj = i64::from(directions[[j, i, 0]]);
                let di = i64::from(directions[[j, i, 1]]);
                if dj == 0 && di == 0 {
                    leaving[[j, i]] += v;
                    continue;
                }
                let tj = j as i64 + dj;
                let ti = i as i64 + di;
                let ti = if wraps_x {
                    ti.rem_euclid(nx as i64)
                } else {
                    ti
                };
                let in_grid =
                    (0..ny as i64).contains(&tj) && (0..nx as i64).contains(&ti);
                if !in_grid || !self.is_valid_cell(tj as usize, ti as usize) {
                    leaving[[j, i]] += v;
                } else {
                    routed[[tj as usize, ti as usize]] += v;
                }
            }
        }
        Ok((routed, leaving))
    }

    /// Route a flux density: `flux_per_area · cell_area · Δt` of mass is
    /// moved one cell downstream. Returns `(routed_in, leaving)` as masses.
    pub fn route_flux(
        &self,
        flux_per_area: &Array2<f64>,
        step_seconds: f64,
    ) -> ConfluenceResult<(Array2<f64>, Array2<f64>)> {
        let mass = flux_per_area * &self.cell_area * step_seconds;
        self.route(&mass)
    }

    /// Whether the X axis covers the full circle, allowing wrap-around
    /// routing across the dateline.
    fn x_wraps_around(&self) -> bool {
        let span = self.x_bounds[[self.x_bounds.nrows() - 1, 1]] - self.x_bounds[[0, 0]];
        (span - 360.0).abs() < COORD_EPS
    }
}

fn check_bounds(bounds: &Array2<f64>, name: &str) -> ConfluenceResult<()> {
    if bounds.ncols() != 2 || bounds.nrows() == 0 {
        return Err(ConfluenceError::Config(format!(
            "{name} bounds must be a non-empty (n, 2) array"
        )));
    }
    for row in bounds.rows() {
        if row[1] <= row[0] {
            return Err(ConfluenceError::Config(format!(
                "{name} bounds are not monotonically increasing"
            )));
        }
    }
    for w in 0..bounds.nrows().saturating_sub(1) {
        if bounds[[w + 1, 0]] < bounds[[w, 1]] - COORD_EPS {
            return Err(ConfluenceError::Config(format!(
                "{name} bounds overlap between consecutive cells"
            )));
        }
    }
    Ok(())
}

fn regular_bounds(
    extent: (f64, f64),
    resolution: f64,
    name: &str,
) -> ConfluenceResult<Array2<f64>> {
    let (lo, hi) = extent;
    if resolution <= 0.0 || hi <= lo {
        return Err(ConfluenceError::Config(format!(
            "invalid {name} extent/resolution: [{lo}, {hi}] at {resolution}"
        )));
    }
    let n = (hi - lo) / resolution;
    if (n - n.round()).abs() > 1e-6 {
        return Err(ConfluenceError::Config(format!(
            "{name} extent [{lo}, {hi}] is not a whole number of {resolution} cells"
        )));
    }
    let n = n.round() as usize;
    let mut bounds = Array2::zeros((n, 2));
    for k in 0..n {
        bounds[[k, 0]] = lo + resolution * k as f64;
        bounds[[k, 1]] = lo + resolution * (k + 1) as f64;
    }
    Ok(bounds)
}

fn compute_cell_area(y_bounds: &Array2<f64>, x_bounds: &Array2<f64>) -> Array2<f64> {
    let (ny, nx) = (y_bounds.nrows(), x_bounds.nrows());
    let mut area = Array2::zeros((ny, nx));
    for j in 0..ny {
        let band = y_bounds[[j, 1]].to_radians().sin() - y_bounds[[j, 0]].to_radians().sin();
        for i in 0..nx {
            let width = (x_bounds[[i, 1]] - x_bounds[[i, 0]]).to_radians();
            area[[j, i]] = EARTH_RADIUS_M * EARTH_RADIUS_M * band * width;
        }
    }
    area
}

fn close_all(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(u, v)| (u - v).abs() < COORD_EPS)
}

fn edges_subset(coarse: &Array2<f64>, fine: &Array2<f64>) -> bool {
    let fine_edges: Vec<f64> = fine
        .rows()
        .into_iter()
        .map(|r| r[0])
        .chain(std::iter::once(fine[[fine.nrows() - 1, 1]]))
        .collect();
    coarse
        .rows()
        .into_iter()
        .flat_map(|r| [r[0], r[1]])
        .all(|e| fine_edges.iter().any(|f| (f - e).abs() < COORD_EPS))
}

/// The two weight regimes for remapping between grids.
///
/// The choice is fixed per transfer by its aggregation method: `sum`
/// transfers remap conservatively, everything else by area-weighted
/// average.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WeightRegime {
    /// `W[d, s] = area(s ∩ d) / area(s)`: splits a source value over the
    /// destination cells it overlaps, preserving the total.
    Conservative,
    /// `W[d, s] = area(s ∩ d) / area(d)`: weights sum to one per
    /// destination row, yielding an area-weighted mean.
    AreaWeighted,
}

/// Precomputed sparse remapping weights from a source grid to a
/// destination grid, in compressed-row form (one row per destination
/// cell, in row-major order).
///
/// Computed once at model construction and cached by the exchanger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemapWeights {
    src_shape: (usize, usize),
    dst_shape: (usize, usize),
    indptr: Vec<usize>,
    indices: Vec<usize>,
    weights: Vec<f64>,
    /// Value used for destination rows left without any contributing
    /// source cell after masking: NaN for means, zero for sums.
    fill: f64,
    /// Flags the degenerate rows filled with `fill`.
    degenerate: Vec<bool>,
}

impl RemapWeights {
    /// Conservative regrid weights, for `sum`-method transfers.
    pub fn conservative(src: &LatLonGrid, dst: &LatLonGrid) -> ConfluenceResult<Self> {
        Self::build(src, dst, WeightRegime::Conservative)
    }

    /// Area-weighted average weights, for `mean`, `min` and `max`
    /// transfers.
    pub fn area_weighted(src: &LatLonGrid, dst: &LatLonGrid) -> ConfluenceResult<Self> {
        Self::build(src, dst, WeightRegime::AreaWeighted)
    }

    fn build(
        src: &LatLonGrid,
        dst: &LatLonGrid,
        regime: WeightRegime,
    ) -> ConfluenceResult<Self> {
        if !src.spans_same_region_as(dst) {
            return Err(ConfluenceError::Config(
                "cannot derive remapping weights between grids covering different regions"
                    .to_string(),
            ));
        }

        // 1-D overlaps along each axis; the grid being rectilinear, a cell
        // intersection area is the product of its Y and X overlaps.
        let y_overlaps = axis_overlaps(dst.y_bounds(), src.y_bounds(), sin_metric);
        let x_overlaps = axis_overlaps(dst.x_bounds(), src.x_bounds(), linear_metric);

        let (sny, snx) = src.shape();
        let (dny, dnx) = dst.shape();
        let src_area = compute_cell_area(src.y_bounds(), src.x_bounds());
        let dst_area = compute_cell_area(dst.y_bounds(), dst.x_bounds());
        let scale = EARTH_RADIUS_M * EARTH_RADIUS_M;

        let mut indptr = Vec::with_capacity(dny * dnx + 1);
        let mut indices = Vec::new();
        let mut weights = Vec::new();
        let mut degenerate = Vec::with_capacity(dny * dnx);
        indptr.push(0);

        for dj in 0..dny {
            for di in 0..dnx {
                let mut row_sum = 0.0;
                let row_start = weights.len();
                for &(sj, ov_y) in &y_overlaps[dj] {
                    for &(si, ov_x) in &x_overlaps[di] {
                        if !src.is_valid_cell(sj, si) {
                            continue;
                        }
                        let overlap = scale * ov_y * ov_x;
                        let w = match regime {
                            WeightRegime::Conservative => overlap / src_area[[sj, si]],
                            WeightRegime::AreaWeighted => overlap / dst_area[[dj, di]],
                        };
                        indices.push(sj * snx + si);
                        weights.push(w);
                        row_sum += w;
                    }
                }
                // masked-out rows are filled to a neutral value instead
                if regime == WeightRegime::AreaWeighted && row_sum > 0.0 {
                    for w in &mut weights[row_start..] {
                        *w /= row_sum;
                    }
                }
                degenerate.push(weights.len() == row_start);
                indptr.push(weights.len());
            }
        }

        Ok(Self {
            src_shape: (sny, snx),
            dst_shape: (dny, dnx),
            indptr,
            indices,
            weights,
            fill: match regime {
                WeightRegime::Conservative => 0.0,
                WeightRegime::AreaWeighted => f64::NAN,
            },
            degenerate,
        })
    }

    pub fn src_shape(&self) -> (usize, usize) {
        self.src_shape
    }

    pub fn dst_shape(&self) -> (usize, usize) {
        self.dst_shape
    }

    /// Destination rows without any contributing source cell.
    pub fn degenerate_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.degenerate
            .iter()
            .enumerate()
            .filter_map(|(r, &d)| d.then_some(r))
    }

    /// Apply the weight matrix: `value_D[d] = Σ_s W[d, s] · value_S[s]`.
    pub fn apply(&self, values: &Array2<f64>) -> ConfluenceResult<Array2<f64>> {
        self.reduce(values, |entries| {
            entries.iter().map(|&(w, v)| w * v).sum()
        })
    }

    /// Elementwise minimum over the contributing source cells of each
    /// destination cell; the weights only identify contributors.
    pub fn apply_min(&self, values: &Array2<f64>) -> ConfluenceResult<Array2<f64>> {
        self.reduce(values, |entries| {
            entries.iter().map(|&(_, v)| v).fold(f64::INFINITY, f64::min)
        })
    }

    /// Elementwise maximum over the contributing source cells.
    pub fn apply_max(&self, values: &Array2<f64>) -> ConfluenceResult<Array2<f64>> {
        self.reduce(values, |entries| {
            entries
                .iter()
                .map(|&(_, v)| v)
                .fold(f64::NEG_INFINITY, f64::max)
        })
    }

    fn reduce(
        &self,
        values: &Array2<f64>,
        reduction: impl Fn(&[(f64, f64)]) -> f64,
    ) -> ConfluenceResult<Array2<f64>> {
        if values.dim() != self.src_shape {
            return Err(ConfluenceError::Shape {
                name: "remap input".to_string(),
                expected: vec![self.src_shape.0, self.src_shape.1],
                actual: values.shape().to_vec(),
            });
        }
        let flat: Vec<f64> = values.iter().copied().collect();
        let (dny, dnx) = self.dst_shape;
        let mut out = Array2::from_elem((dny, dnx), self.fill);
        let mut entries = Vec::new();
        for row in 0..dny * dnx {
            if self.degenerate[row] {
                continue;
            }
            entries.clear();
            for k in self.indptr[row]..self.indptr[row + 1] {
                entries.push((self.weights[k], flat[self.indices[k]]));
            }
            out[[row / dnx, row % dnx]] = reduction(&entries);
        }
        Ok(out)
    }
}

fn sin_metric(lo: f64, hi: f64) -> f64 {
    hi.to_radians().sin() - lo.to_radians().sin()
}

fn linear_metric(lo: f64, hi: f64) -> f64 {
    (hi - lo).to_radians()
}

/// For each destination interval, the overlapping source intervals and the
/// size of each overlap in the axis metric (sine of latitude for Y so that
/// Y·X products are spherical areas, radians for X).
fn axis_overlaps(
    dst_bounds: &Array2<f64>,
    src_bounds: &Array2<f64>,
    metric: impl Fn(f64, f64) -> f64,
) -> Vec<Vec<(usize, f64)>> {
    let mut overlaps = Vec::with_capacity(dst_bounds.nrows());
    for d in dst_bounds.rows() {
        let mut row = Vec::new();
        for (s_idx, s) in src_bounds.rows().into_iter().enumerate() {
            let lo = d[0].max(s[0]);
            let hi = d[1].min(s[1]);
            if hi - lo > COORD_EPS {
                row.push((s_idx, metric(lo, hi)));
            }
        }
        overlaps.push(row);
    }
    overlaps
}
