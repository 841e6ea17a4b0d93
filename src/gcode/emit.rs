//! Motion-command generation: arcs and Hilbert chunks become `G1` walks
//! with retraction handling, tangential extensions and feedrate clamping.

use geo::{LineString, Point};

use crate::float_types::{PI, Real};
use crate::geom::{distance, move_toward, polyline_length};
use crate::settings::{Settings, SlicerConfig};

/// A single `G1` move. Zero extrusion emits a literal `E0` so travels stay
/// recognizable downstream.
pub fn point_cmd(p: Point<Real>, e: Real, f: Option<Real>) -> String {
    let mut line = format!("G1 X{:.4} Y{:.4} ", p.x(), p.y());
    if e == 0.0 {
        line.push_str("E0");
    } else {
        line.push_str(&format!("E{:.5}", e));
    }
    if let Some(f) = f {
        line.push_str(&format!(" F{:.0}", f));
    }
    line
}

/// Reverse (or re-advance) the filament drive.
pub fn retract_cmd(retract: bool, cfg: &SlicerConfig) -> String {
    let e = if retract {
        -cfg.retract_length
    } else {
        cfg.retract_length
    };
    format!("G1 E{} F{:.0}", e, cfg.retract_speed * 60.0)
}

pub fn set_feedrate_cmd(f: Real) -> String {
    format!("G1 F{:.0}", f)
}

pub fn fan_cmd(s: u32) -> String {
    format!("M106 S{s}")
}

/// Extruded cross-section per mm of travel, converted to linear filament
/// advance unless the slicer drives volumetric E. `layer_height` selects the
/// surface formula (Hilbert infill); bridging (arcs) hangs in air and uses
/// the round-strand model.
pub fn calc_e_steps(settings: &Settings, layer_height: Option<Real>) -> Real {
    let s = &settings.slicer;
    let p = &settings.params;
    let surface_area = match layer_height {
        Some(h) => {
            let w = s.infill_extrusion_width;
            (w - h) * h + PI * (h / 2.0).powi(2) * p.hilbert_infill_extrusion_multiplier
        },
        None => (s.nozzle_diameter / 2.0).powi(2) * PI * p.arc_extrusion_multiplier,
    };
    if s.use_volumetric_e {
        surface_area
    } else {
        surface_area / ((s.filament_diameter / 2.0).powi(2) * PI)
    }
}

/// Emit one arc: retract, travel to a tangential lead-in, extrude along the
/// arc (points closer than `GCodeArcPtMinDist` are dropped), and run a
/// tangential lead-out for bonding with the next arc.
pub fn arc_cmds(
    arcline: &LineString<Real>,
    e_steps: Real,
    arc_idx: usize,
    settings: &Settings,
) -> Vec<String> {
    let p = &settings.params;
    let pts: Vec<Point<Real>> = arcline.0.iter().map(|&c| Point::from(c)).collect();
    if pts.len() < 2 {
        return Vec::new();
    }

    let ext_dist = p.extend_arc_dist;
    let extend_begin = move_toward(pts[0], pts[1], ext_dist, -90.0);
    let extend_end = move_toward(pts[pts.len() - 1], pts[pts.len() - 2], ext_dist, 90.0);
    let length = polyline_length(arcline);
    let print_speed = (length / p.arc_slow_down_below_this_duration * 60.0)
        .clamp(p.arc_min_print_speed, p.arc_print_speed);

    let mut out: Vec<String> = Vec::new();
    out.push(retract_cmd(true, &settings.slicer));
    out.push(format!(";Arc {arc_idx} Length:{length:.4}"));
    out.push(point_cmd(extend_begin, 0.0, Some(p.arc_travel_feed_rate)));
    out.push(point_cmd(pts[0], distance(extend_begin, pts[0]) * e_steps, None));
    out.push(retract_cmd(false, &settings.slicer));
    out.push(set_feedrate_cmd(print_speed));

    let mut last = pts[0];
    for &pt in &pts[1..] {
        let dist = distance(pt, last);
        if dist > p.gcode_arc_pt_min_dist {
            out.push(point_cmd(pt, dist * e_steps, None));
            last = pt;
        }
    }
    out.push(point_cmd(extend_end, ext_dist * e_steps, None));
    out
}

/// Emit the Hilbert chunks: one unretract after the very first travel, one
/// retract at the very end; pure travels between chunks. The first extruding
/// move of each chunk carries its feedrate on the move itself.
pub fn hilbert_cmds(
    chunks: &[Vec<Point<Real>>],
    settings: &Settings,
    layer_height: Real,
) -> Vec<String> {
    if chunks.is_empty() {
        return Vec::new();
    }
    let p = &settings.params;
    let e_steps = calc_e_steps(settings, Some(layer_height));
    let mut out: Vec<String> = Vec::new();
    let mut last = Point::new(0.0, 0.0);

    for (idc, chunk) in chunks.iter().enumerate() {
        for (idp, &pt) in chunk.iter().enumerate() {
            match idp {
                0 => {
                    out.push(point_cmd(pt, 0.0, Some(p.arc_travel_feed_rate)));
                    if idc == 0 {
                        out.push(retract_cmd(false, &settings.slicer));
                    }
                },
                1 => out.push(point_cmd(
                    pt,
                    e_steps * distance(pt, last),
                    Some(p.above_arcs_infill_print_speed),
                )),
                _ => out.push(point_cmd(pt, e_steps * distance(pt, last), None)),
            }
            last = pt;
        }
    }

    out.push(retract_cmd(true, &settings.slicer));
    out
}
