//! The concentric-arc planner: start-point selection on supported ground,
//! the radius-ladder generator, and the greedy frontier-expansion loop that
//! grows the filled region until the overhang polygon is covered.

use geo::{
    Area, BooleanOps, Intersects, LineString, MultiLineString, MultiPolygon, Point, Polygon,
};
use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::errors::PostError;
use crate::float_types::{EPSILON, Real};
use crate::geom::{
    buffer_multi_polygon, densify, distance, farthest_points, midpoint, move_toward,
    multi_polygon_boundary, polygon_boundary, polyline_length, stitch_lines, to_multi,
};
use crate::layer::Layer;
use crate::settings::Settings;

/// One concentric arc: a full sampled circle and the piece of it that
/// survived clipping against the remaining-to-fill region.
pub struct Arc {
    pub center: Point<Real>,
    pub r: Real,
    /// Closed ring of the full circle.
    pub circle: LineString<Real>,
    /// Clipped subarcs, stitched back into maximal polylines.
    pub arcline: MultiLineString<Real>,
}

impl Arc {
    /// Sample the circle and clip it to the remaining space. An empty clip
    /// is a normal stop condition; a clip that returns fragments which join
    /// into no printable polyline is not.
    pub fn generate(
        center: Point<Real>,
        r: Real,
        remaining_space: &MultiPolygon<Real>,
        points_per_mm: Real,
    ) -> Result<Arc, PostError> {
        let circle = crate::geom::circle(center, r, points_per_mm);
        let ring = MultiLineString::new(vec![circle.clone()]);
        let clipped = remaining_space.clip(&ring, false);
        let arcline = MultiLineString::new(stitch_lines(&clipped));
        if arcline.0.iter().all(|ls| ls.0.len() < 2)
            && clipped.0.iter().any(|ls| !ls.0.is_empty())
        {
            return Err(PostError::ArcMerge);
        }
        Ok(Arc {
            center,
            r,
            circle,
            arcline,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.arcline.0.iter().all(|ls| ls.0.len() < 2)
    }

    /// The full disk bounded by this arc's circle.
    pub fn disk(&self) -> Polygon<Real> {
        Polygon::new(self.circle.clone(), vec![])
    }

    /// The printable polylines of this arc.
    pub fn boundaries(&self) -> Vec<LineString<Real>> {
        self.arcline
            .0
            .iter()
            .filter(|ls| ls.0.len() >= 2)
            .cloned()
            .collect()
    }
}

/// Emit nested arcs at radii `r_min, r_min + w, …` up to `r_max`. Stops when
/// a circle clips to nothing, or (unless running to the least amount of
/// center points) when the circle first reaches the outer boundary.
pub fn generate_concentric_arcs(
    start_pt: Point<Real>,
    r_min: Real,
    r_max: Real,
    base_boundary: &MultiLineString<Real>,
    remaining_space: &MultiPolygon<Real>,
    settings: &Settings,
) -> Result<Vec<Arc>, PostError> {
    let params = &settings.params;
    let mut arcs: Vec<Arc> = Vec::new();
    let mut r = r_min;
    while r <= r_max + EPSILON {
        let arc = Arc::generate(start_pt, r, remaining_space, params.arc_points_per_mm)?;
        if arc.is_empty() {
            break;
        }
        let reached_boundary = base_boundary.intersects(&arc.arcline);
        arcs.push(arc);
        if reached_boundary && !params.use_least_amount_of_center_points {
            break;
        }
        r += params.arc_width;
    }
    Ok(arcs)
}

// ====================
// Start-point scoring
// ====================

/// Pick the start point on the supported boundary segment. Vertices score by
/// a hat function peaking mid-line plus a corner bonus; endpoints never win.
/// A two-point line yields its midpoint; fewer points is fatal.
pub fn start_point_on_line(
    start_line: &MultiLineString<Real>,
    layer_index: usize,
    settings: &Settings,
    choose_random: bool,
    rng: &mut impl rand::Rng,
) -> Result<Point<Real>, PostError> {
    // Multi-component start geometry: the longest component wins.
    let ls = start_line
        .0
        .iter()
        .max_by(|a, b| {
            polyline_length(a)
                .partial_cmp(&polyline_length(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or(PostError::DegenerateStartLine(layer_index))?;

    if ls.0.len() < 2 {
        return Err(PostError::DegenerateStartLine(layer_index));
    }
    let pts: Vec<Point<Real>> = ls.0.iter().map(|&c| Point::from(c)).collect();
    if pts.len() == 2 {
        return Ok(midpoint(pts[0], pts[1]));
    }
    if choose_random {
        return Ok(*pts.choose(rng).expect("nonempty"));
    }

    let total_length = polyline_length(ls).max(EPSILON);
    let corner_weight = settings.params.corner_importance_multiplier;
    let mut current_length = 0.0;
    let mut best: (Real, usize) = (-1.0, 1);
    for idp in 1..pts.len() - 1 {
        current_length += distance(pts[idp], pts[idp - 1]);
        let relative = current_length / total_length;
        let length_score = 1.0 - (relative - 0.5).abs();

        let v1 = (pts[idp].x() - pts[idp - 1].x(), pts[idp].y() - pts[idp - 1].y());
        let v2 = (pts[idp + 1].x() - pts[idp].x(), pts[idp + 1].y() - pts[idp].y());
        let n1 = v1.0.hypot(v1.1);
        let n2 = v2.0.hypot(v2.1);
        let score = if n1 > 0.0 && n2 > 0.0 {
            // |sin| of the corner angle, from the cross product.
            let angle_score = ((v1.0 * v2.1 - v1.1 * v2.0) / (n1 * n2)).abs();
            length_score + angle_score * corner_weight
        } else {
            length_score
        };
        if score > best.0 {
            best = (score, idp);
        }
    }
    Ok(pts[best.1])
}

// ====================
// Frontier expansion
// ====================

/// Greedy fill of the space the initial bundle left open: repeatedly pick
/// the farthest point of the filled frontier from the polygon boundary, hide
/// the next bundle's origin a little inside printed territory, and grow.
/// Coverage is monotone; the loop ends when the frontier is everywhere
/// within `min_distance_from_perimeter` of the boundary, when retries are
/// exhausted, or at the safety break.
pub fn fill_remaining_space(
    mut last_center: Point<Real>,
    r_min: Real,
    r_max: Real,
    min_distance_from_perimeter: Real,
    mut filled_space: MultiPolygon<Real>,
    poly: &Polygon<Real>,
    settings: &Settings,
) -> Result<(Vec<Arc>, MultiPolygon<Real>), PostError> {
    let params = &settings.params;
    let poly_mp = to_multi(poly);
    let poly_boundary = polygon_boundary(poly);
    let mut arcs: Vec<Arc> = Vec::new();
    let allowed_retries = params.allowed_arc_retries;
    let mut failure_count = 0usize;

    for iteration in 0..params.safety_break_max_arc_number {
        let remaining_space =
            poly_mp.difference(&buffer_multi_polygon(&filled_space, params.arc_width / 2.0));
        let frontier = multi_polygon_boundary(&filled_space);
        let candidates = farthest_points(&frontier, poly, allowed_retries + 1);

        let Some(&(candidate, dist)) = candidates.get(failure_count) else {
            break;
        };
        if dist < min_distance_from_perimeter {
            break;
        }

        let start_pt = move_toward(candidate, last_center, params.arc_center_offset, 0.0);
        let bundle = generate_concentric_arcs(
            start_pt,
            r_min,
            r_max,
            &poly_boundary,
            &remaining_space,
            settings,
        )?;

        if bundle.is_empty() {
            failure_count += 1;
            if failure_count >= allowed_retries {
                break;
            }
            continue;
        }

        failure_count = 0;
        let newest = bundle.last().expect("nonempty bundle");
        last_center = newest.center;
        let grown = filled_space.union(&MultiPolygon::new(vec![newest.disk()]));
        filled_space = poly_mp.intersection(&grown);
        debug!(
            "filling remaining space: iteration {iteration}, {} arcs this round",
            bundle.len()
        );
        arcs.extend(bundle);
    }

    let final_filled = buffer_multi_polygon(&filled_space, params.arc_width / 2.0);
    Ok((arcs, final_filled))
}

/// Result of filling one overhang polygon.
pub struct PolyFill {
    /// Printable arc polylines, innermost first.
    pub arcs: Vec<LineString<Real>>,
    /// Percentage of the polygon covered by the placed arcs.
    pub fill_percent: Real,
}

/// Fill one overhang polygon: start geometry from the layer below, the
/// initial concentric bundle (with the densified/random retry ladder), then
/// frontier expansion. `Ok(None)` means the polygon is abandoned and its
/// original infill must be kept.
pub fn fill_polygon(
    poly: &Polygon<Real>,
    prev_layer: &mut Layer,
    layer_index: usize,
    settings: &Settings,
) -> Result<Option<PolyFill>, PostError> {
    let params = &settings.params;
    let r_max = params.r_max;
    let r_min = params.arc_center_offset + params.arc_width / 1.5;
    let r_min_start = settings.slicer.nozzle_diameter;
    let min_start_arcs = params.min_start_arcs;

    let Some((start_line, boundary_without_start)) =
        prev_layer.make_start_line_string(poly, settings)
    else {
        warn!("layer {layer_index}: skipping polygon, no start line found");
        return Ok(None);
    };

    let whole_poly = to_multi(poly);
    let mut rng = rand::thread_rng();

    let mut start_pt = start_point_on_line(&start_line, layer_index, settings, false, &mut rng)?;
    let mut bundle = generate_concentric_arcs(
        start_pt,
        r_min_start,
        r_max,
        &boundary_without_start,
        &whole_poly,
        settings,
    )?;

    if bundle.len() < min_start_arcs {
        // Badly chosen start point; redistribute vertices and try again.
        let dense_line = MultiLineString::new(
            start_line
                .0
                .iter()
                .map(|ls| densify(ls, params.start_line_point_spacing))
                .collect(),
        );
        start_pt = start_point_on_line(&dense_line, layer_index, settings, false, &mut rng)?;
        bundle = generate_concentric_arcs(
            start_pt,
            r_min_start,
            r_max,
            &boundary_without_start,
            &whole_poly,
            settings,
        )?;

        if bundle.len() < min_start_arcs {
            info!("layer {layer_index}: using random start points");
            for line in [&start_line, &dense_line] {
                for _ in 0..10 {
                    start_pt = start_point_on_line(line, layer_index, settings, true, &mut rng)?;
                    bundle = generate_concentric_arcs(
                        start_pt,
                        r_min_start,
                        r_max,
                        &boundary_without_start,
                        &whole_poly,
                        settings,
                    )?;
                    if bundle.len() >= min_start_arcs {
                        break;
                    }
                }
                if bundle.len() >= min_start_arcs {
                    break;
                }
            }
        }
        if bundle.len() < min_start_arcs {
            warn!(
                "layer {layer_index}: no concentric arcs possible at any start point, moving on"
            );
            return Ok(None);
        }
    }

    let outermost = bundle.last().expect("bundle has MinStartArcs members");
    let filled_space = whole_poly.intersection(&MultiPolygon::new(vec![outermost.disk()]));
    let last_center = outermost.center;

    let mut arc_lines: Vec<LineString<Real>> =
        bundle.iter().flat_map(Arc::boundaries).collect();

    let (grown_arcs, final_filled) = fill_remaining_space(
        last_center,
        r_min,
        r_max,
        params.min_distance_from_perimeter,
        filled_space,
        poly,
        settings,
    )?;
    arc_lines.extend(grown_arcs.iter().flat_map(Arc::boundaries));

    let fill_percent =
        (final_filled.unsigned_area() / poly.unsigned_area().max(EPSILON) * 100.0).min(100.0);
    if fill_percent < params.warn_below_this_filling_percentage {
        warn!(
            "layer {layer_index}: overhang only {fill_percent:.0}% filled with arcs; raise \
             ExtendArcsIntoPerimeter to enlarge small areas, lower MinDistanceFromPerimeter to \
             follow the outline closer, or set ArcCenterOffset to 0 for delicate spots. Keeping \
             the original bridge infill."
        );
        return Ok(None);
    }

    Ok(Some(PolyFill {
        arcs: arc_lines,
        fill_percent,
    }))
}
