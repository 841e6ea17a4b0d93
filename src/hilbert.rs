//! Hilbert planner: tile a solid-infill polygon with points of a Hilbert
//! curve, keep the runs that fall inside the polygon, chunk them to bound
//! continuous extrusion time, and shuffle the chunks to spread heat input.
//!
//! The index→coordinate mapping comes from `fast_hilbert`; this module only
//! decides order, scale, placement and chunking.

use geo::{BoundingRect, Contains, Point, Polygon};
use rand::seq::SliceRandom;

use crate::float_types::Real;
use crate::settings::Settings;

/// Orders beyond this would overflow the coordinate grid long before any
/// realistic print bed does.
const MAX_ITERATIONS: u32 = 15;

/// Build the chunked point runs covering `poly`. Odd layers shift the grid
/// by one cell so seams between consecutive layers never align.
pub fn hilbert_chunks(
    poly: &Polygon<Real>,
    layer_index: usize,
    settings: &Settings,
) -> Vec<Vec<Point<Real>>> {
    let params = &settings.params;
    let w = settings.slicer.solid_infill_extrusion_width;
    let a = params.hilbert_filling_percentage / 100.0;
    let mm_between_travels =
        params.above_arcs_infill_print_speed / 60.0 * params.hilbert_travel_every_n_seconds;

    let Some(rect) = poly.bounding_rect() else {
        return Vec::new();
    };
    let extent = rect.width().max(rect.height());
    let segments_needed = a * extent / w;
    let iterations = (segments_needed + 1.0).log2().ceil().max(1.0) as u32;
    let iterations = iterations.min(MAX_ITERATIONS);
    let scale = w / a;
    let max_index: u64 = (1u64 << (2 * iterations)) - 1;

    let shift = if layer_index % 2 == 1 { scale } else { 0.0 };
    let origin_x = rect.min().x - shift;
    let origin_y = rect.min().y - shift;

    let points_per_chunk = ((mm_between_travels / scale).ceil() as usize).max(1);
    let mut chunks: Vec<Vec<Point<Real>>> = Vec::new();
    let mut run: Vec<Point<Real>> = Vec::new();

    for h in 0..max_index {
        let (hx, hy) = fast_hilbert::h2xy::<u32>(h, iterations as u8);
        let p = Point::new(
            hx as Real * scale + origin_x,
            hy as Real * scale + origin_y,
        );
        if poly.contains(&p) {
            run.push(p);
        } else {
            flush_run(&mut chunks, &mut run, points_per_chunk);
        }
    }
    flush_run(&mut chunks, &mut run, points_per_chunk);

    chunks.shuffle(&mut rand::thread_rng());
    chunks
}

/// Split an in-polygon run into extrusion-time-bounded chunks.
fn flush_run(
    chunks: &mut Vec<Vec<Point<Real>>>,
    run: &mut Vec<Point<Real>>,
    points_per_chunk: usize,
) {
    if run.len() > 1 {
        for chunk in run.chunks(points_per_chunk) {
            if chunk.len() > 1 {
                chunks.push(chunk.to_vec());
            }
        }
    }
    run.clear();
}
