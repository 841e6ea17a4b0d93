//! 2D geometry helpers shared by the arc planner and the layer machinery.
//!
//! Everything here works on plain `geo` primitives. Boolean ops come from
//! `geo`'s `BooleanOps`; buffering of areas goes through `geo-buf`, and
//! polyline regions are built as capsule unions since `geo-buf` only offsets
//! areas and points.

use geo::{
    BooleanOps, Coord, EuclideanDistance, LineString, MultiLineString, MultiPolygon, Point,
    Polygon,
};
use geo_buf::{buffer_multi_polygon_rounded, buffer_point, buffer_polygon_rounded};

use crate::float_types::{EPSILON, Real, TAU};

pub mod index;

/// Union all of `geoms` together. `geo::unary_union` isn't available in the
/// pinned `geo` release, so fold with `BooleanOps::union` instead.
fn unary_union<'a, T>(geoms: impl Iterator<Item = &'a T>) -> MultiPolygon<Real>
where
    T: BooleanOps<Scalar = Real> + 'a,
{
    geoms.fold(MultiPolygon::new(vec![]), |acc, g| acc.union(g))
}

/// Resolution used for the round caps of capsule buffers.
const CAP_SEGMENTS: usize = 16;
/// Endpoint snapping tolerance when stitching clipped circle pieces.
const STITCH_TOLERANCE: Real = 1e-6;

// ==========================
// Points and small utilities
// ==========================

pub fn distance(a: Point<Real>, b: Point<Real>) -> Real {
    (a.x() - b.x()).hypot(a.y() - b.y())
}

pub fn midpoint(a: Point<Real>, b: Point<Real>) -> Point<Real> {
    Point::new((a.x() + b.x()) / 2.0, (a.y() + b.y()) / 2.0)
}

/// Move `start` by `dist` toward `target`, with an optional angular
/// correction in degrees (±90 yields the tangential directions).
pub fn move_toward(
    start: Point<Real>,
    target: Point<Real>,
    dist: Real,
    angle_correction_deg: Real,
) -> Point<Real> {
    let dx = target.x() - start.x();
    let dy = target.y() - start.y();
    let magnitude = dx.hypot(dy);
    if magnitude == 0.0 {
        return start;
    }
    let angle = dy.atan2(dx) + angle_correction_deg.to_radians();
    Point::new(
        start.x() + angle.cos() * dist,
        start.y() + angle.sin() * dist,
    )
}

pub fn polyline_length(ls: &LineString<Real>) -> Real {
    ls.0.windows(2)
        .map(|w| (w[1].x - w[0].x).hypot(w[1].y - w[0].y))
        .sum()
}

/// Insert evenly spaced intermediate vertices so no segment exceeds
/// `max_dist`. Existing vertices are preserved.
pub fn densify(ls: &LineString<Real>, max_dist: Real) -> LineString<Real> {
    let mut coords: Vec<Coord<Real>> = Vec::with_capacity(ls.0.len());
    for w in ls.0.windows(2) {
        let (a, b) = (w[0], w[1]);
        coords.push(a);
        let len = (b.x - a.x).hypot(b.y - a.y);
        let pieces = (len / max_dist).ceil() as usize;
        for k in 1..pieces {
            let t = k as Real / pieces as Real;
            coords.push(Coord {
                x: a.x + (b.x - a.x) * t,
                y: a.y + (b.y - a.y) * t,
            });
        }
    }
    if let Some(&last) = ls.0.last() {
        coords.push(last);
    }
    LineString::new(coords)
}

// =================
// Circles and rings
// =================

/// Sample a full circle as a closed ring, `points_per_mm` points per mm of
/// circumference. Starts at the top of the circle and runs clockwise.
pub fn circle(center: Point<Real>, radius: Real, points_per_mm: Real) -> LineString<Real> {
    let n = ((TAU * radius * points_per_mm).ceil() as usize).max(8);
    let mut coords = Vec::with_capacity(n + 1);
    for i in 0..n {
        let theta = TAU * i as Real / n as Real;
        coords.push(Coord {
            x: radius * theta.sin() + center.x(),
            y: radius * theta.cos() + center.y(),
        });
    }
    coords.push(coords[0]);
    LineString::new(coords)
}

/// Sample the sub-arc of a circle between two angles (standard convention,
/// radians), clockwise when requested. Used to expand `G2`/`G3` moves into
/// chords.
pub fn arc_between_angles(
    center: Point<Real>,
    radius: Real,
    start_angle: Real,
    end_angle: Real,
    points_per_mm: Real,
    clockwise: bool,
) -> LineString<Real> {
    let mut sweep = end_angle - start_angle;
    if clockwise && sweep > 0.0 {
        sweep -= TAU;
    } else if !clockwise && sweep < 0.0 {
        sweep += TAU;
    }
    let n = ((sweep.abs() * radius * points_per_mm).ceil() as usize).max(2);
    let mut coords = Vec::with_capacity(n);
    for i in 0..n {
        let theta = start_angle + sweep * i as Real / (n - 1) as Real;
        coords.push(Coord {
            x: radius * theta.cos() + center.x(),
            y: radius * theta.sin() + center.y(),
        });
    }
    LineString::new(coords)
}

// ==================
// Regions and rings
// ==================

/// All rings of a polygon (exterior first, then holes) as lines.
pub fn polygon_boundary(poly: &Polygon<Real>) -> MultiLineString<Real> {
    let mut rings = vec![poly.exterior().clone()];
    rings.extend(poly.interiors().iter().cloned());
    MultiLineString::new(rings)
}

/// Boundary of every member polygon.
pub fn multi_polygon_boundary(mp: &MultiPolygon<Real>) -> MultiLineString<Real> {
    let mut rings = Vec::new();
    for poly in &mp.0 {
        rings.push(poly.exterior().clone());
        rings.extend(poly.interiors().iter().cloned());
    }
    MultiLineString::new(rings)
}

/// Lift a polygon into the multipolygon form the boolean ops work on.
pub fn to_multi(poly: &Polygon<Real>) -> MultiPolygon<Real> {
    MultiPolygon::new(vec![poly.clone()])
}

/// Split a multipolygon into its member polygons, dropping empties.
pub fn polygons_of(mp: MultiPolygon<Real>) -> Vec<Polygon<Real>> {
    mp.0.into_iter()
        .filter(|p| p.exterior().0.len() >= 4)
        .collect()
}

/// Merge overlapping polygons into disjoint ones.
pub fn merge_polygons(polys: &[Polygon<Real>]) -> Vec<Polygon<Real>> {
    if polys.is_empty() {
        return Vec::new();
    }
    polygons_of(unary_union(polys.iter()))
}

/// Grow a polygon, rounded corners.
pub fn buffer_polygon(poly: &Polygon<Real>, dist: Real) -> MultiPolygon<Real> {
    buffer_polygon_rounded(poly, dist)
}

/// Grow a multipolygon, rounded corners.
pub fn buffer_multi_polygon(mp: &MultiPolygon<Real>, dist: Real) -> MultiPolygon<Real> {
    if mp.0.is_empty() {
        return MultiPolygon::new(vec![]);
    }
    buffer_multi_polygon_rounded(mp, dist)
}

/// The region within `dist` of a polyline: one capsule per segment, round
/// caps at every vertex, all unioned.
pub fn buffer_line_string(ls: &LineString<Real>, dist: Real) -> MultiPolygon<Real> {
    let mut pieces: Vec<Polygon<Real>> = Vec::new();
    for &c in &ls.0 {
        pieces.push(buffer_point(&Point::new(c.x, c.y), dist, CAP_SEGMENTS));
    }
    for w in ls.0.windows(2) {
        let (a, b) = (w[0], w[1]);
        let len = (b.x - a.x).hypot(b.y - a.y);
        if len < EPSILON {
            continue;
        }
        // unit normal of the segment
        let nx = -(b.y - a.y) / len;
        let ny = (b.x - a.x) / len;
        pieces.push(Polygon::new(
            LineString::new(vec![
                Coord { x: a.x + nx * dist, y: a.y + ny * dist },
                Coord { x: b.x + nx * dist, y: b.y + ny * dist },
                Coord { x: b.x - nx * dist, y: b.y - ny * dist },
                Coord { x: a.x - nx * dist, y: a.y - ny * dist },
                Coord { x: a.x + nx * dist, y: a.y + ny * dist },
            ]),
            vec![],
        ));
    }
    unary_union(pieces.iter())
}

/// Same capsule region around every ring of a multi-line.
pub fn buffer_multi_line_string(mls: &MultiLineString<Real>, dist: Real) -> MultiPolygon<Real> {
    let pieces: Vec<MultiPolygon<Real>> =
        mls.iter().map(|ls| buffer_line_string(ls, dist)).collect();
    unary_union(pieces.iter())
}

/// Clip lines to the part inside (`invert = false`) or outside a region.
pub fn clip_lines(
    region: &MultiPolygon<Real>,
    lines: &MultiLineString<Real>,
    invert: bool,
) -> MultiLineString<Real> {
    region.clip(lines, invert)
}

// ===========
// Line merge
// ===========

/// Stitch line pieces that share endpoints back into maximal polylines,
/// like a post-clip merge. Pieces are joined in either orientation.
pub fn stitch_lines(mls: &MultiLineString<Real>) -> Vec<LineString<Real>> {
    let close = |a: Coord<Real>, b: Coord<Real>| -> bool {
        (a.x - b.x).abs() <= STITCH_TOLERANCE && (a.y - b.y).abs() <= STITCH_TOLERANCE
    };

    let mut parts: Vec<Vec<Coord<Real>>> = mls
        .iter()
        .filter(|ls| ls.0.len() >= 2)
        .map(|ls| ls.0.clone())
        .collect();
    let mut merged: Vec<LineString<Real>> = Vec::new();

    while let Some(mut cur) = parts.pop() {
        let mut extended = true;
        while extended {
            extended = false;
            let mut i = 0;
            while i < parts.len() {
                let head = *cur.first().expect("nonempty");
                let tail = *cur.last().expect("nonempty");
                let p_head = *parts[i].first().expect("nonempty");
                let p_tail = *parts[i].last().expect("nonempty");

                if close(tail, p_head) {
                    let piece = parts.swap_remove(i);
                    cur.extend(piece.into_iter().skip(1));
                    extended = true;
                } else if close(tail, p_tail) {
                    let mut piece = parts.swap_remove(i);
                    piece.reverse();
                    cur.extend(piece.into_iter().skip(1));
                    extended = true;
                } else if close(head, p_tail) {
                    let mut piece = parts.swap_remove(i);
                    piece.pop();
                    piece.extend(cur);
                    cur = piece;
                    extended = true;
                } else if close(head, p_head) {
                    let mut piece = parts.swap_remove(i);
                    piece.reverse();
                    piece.pop();
                    piece.extend(cur);
                    cur = piece;
                    extended = true;
                } else {
                    i += 1;
                }
            }
        }
        merged.push(LineString::new(cur));
    }

    merged
}

// ================
// Distance queries
// ================

/// Distance from a point to the nearest ring of a polygon.
pub fn distance_to_boundary(p: Point<Real>, poly: &Polygon<Real>) -> Real {
    let mut best = p.euclidean_distance(poly.exterior());
    for hole in poly.interiors() {
        best = best.min(p.euclidean_distance(hole));
    }
    best
}

/// The `count` vertices of `from` farthest from the boundary of `to`, sorted
/// by descending distance.
pub fn farthest_points(
    from: &MultiLineString<Real>,
    to: &Polygon<Real>,
    count: usize,
) -> Vec<(Point<Real>, Real)> {
    let mut scored: Vec<(Point<Real>, Real)> = Vec::new();
    for ls in from {
        for &c in &ls.0 {
            let p = Point::new(c.x, c.y);
            scored.push((p, distance_to_boundary(p, to)));
        }
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(count);
    scored
}
