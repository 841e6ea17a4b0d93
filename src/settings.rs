//! Settings extraction and the typed configuration record.
//!
//! Slicers append a config block to the toolpath; we scan for the dialect
//! marker, translate every recognized key to its canonical name, and build a
//! [`SlicerConfig`] plus the arc-generation parameter set [`ArcParams`]
//! derived from it. All downstream code reads fields, never a string map.

use geo::{Coord, LineString, Polygon};
use hashbrown::HashMap;
use log::warn;

use crate::dialect::{Dialect, FeatureTag};
use crate::errors::PostError;
use crate::float_types::Real;

/// Fallback values applied when a key arrives as a multi-extruder tuple.
const FALLBACK_NOZZLE_DIAMETER: Real = 0.4;
const FALLBACK_FILAMENT_DIAMETER: Real = 1.75;

/// Canonical key/value pairs read from the dialect's settings block.
pub struct RawSettings {
    pub dialect: Dialect,
    values: HashMap<&'static str, String>,
}

/// Scan the whole file for a settings block and collect recognized keys.
pub fn read_settings(lines: &[String]) -> Result<RawSettings, PostError> {
    let mut dialect = None;
    let mut values: HashMap<&'static str, String> = HashMap::new();

    for line in lines {
        let Some(d) = dialect else {
            dialect = Dialect::from_marker(line);
            continue;
        };
        let body = line.trim_start_matches(';').trim();
        let Some((key, value)) = body.split_once('=') else {
            continue;
        };
        if let Some(canonical) = d.canonical_key(key.trim()) {
            values.insert(canonical, value.trim().to_string());
        }
    }

    let dialect = dialect.ok_or(PostError::NoDialect)?;
    Ok(RawSettings { dialect, values })
}

impl RawSettings {
    fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// A scalar value. Tuple/list values (multi-extruder) collapse to their
    /// first element, or to the caller-provided fallback when one exists.
    fn scalar(&self, key: &str, fallback: Option<Real>) -> Option<String> {
        let raw = self.raw(key)?;
        if let Some((first, _)) = raw.split_once(',') {
            if let Some(fb) = fallback {
                warn!("{key} given per-extruder ({raw}); using fallback {fb}");
                return Some(fb.to_string());
            }
            warn!("{key} given per-extruder ({raw}); using the first value");
            return Some(first.trim().to_string());
        }
        Some(raw.to_string())
    }

    fn number(&self, key: &str, fallback: Option<Real>) -> Result<Real, PostError> {
        let Some(s) = self.scalar(key, fallback) else {
            return fallback.ok_or_else(|| {
                PostError::IncompatibleSettings(format!("setting `{key}` not found"))
            });
        };
        s.trim().parse::<Real>().map_err(|_| {
            PostError::IncompatibleSettings(format!("setting `{key}` is not a number: {s}"))
        })
    }

    fn flag(&self, key: &str) -> bool {
        match self.scalar(key, None).as_deref() {
            Some("1") | Some("true") | Some("True") => true,
            Some(other) => other.parse::<Real>().map(|v| v != 0.0).unwrap_or(false),
            None => false,
        }
    }
}

/// The slicer settings arc generation depends on, already translated to
/// canonical names and literal values.
#[derive(Clone, Debug)]
pub struct SlicerConfig {
    pub avoid_crossing_perimeters: bool,
    pub bridge_speed: Real,
    pub external_perimeters_first: bool,
    /// OrcaSlicer's perimeter-ordering string; `None` on PrusaSlicer.
    pub wall_sequence: Option<String>,
    pub extrusion_width: Real,
    pub filament_diameter: Real,
    pub infill_extrusion_width: Real,
    pub infill_first: bool,
    pub layer_height: Real,
    pub nozzle_diameter: Real,
    pub overhangs: bool,
    pub perimeter_extrusion_width: Real,
    pub retract_length: Real,
    pub retract_speed: Real,
    pub solid_infill_extrusion_width: Real,
    pub travel_speed: Real,
    pub use_relative_e_distances: bool,
    pub use_volumetric_e: bool,
}

impl SlicerConfig {
    pub fn from_raw(raw: &RawSettings) -> Result<SlicerConfig, PostError> {
        let nozzle_diameter = raw.number("nozzle_diameter", Some(FALLBACK_NOZZLE_DIAMETER))?;

        // Perimeter width may be given as a percentage of the nozzle
        // diameter (credit: 5axes).
        let perimeter_extrusion_width = match raw.scalar("perimeter_extrusion_width", None) {
            Some(s) if s.ends_with('%') => {
                let pct = s.trim_end_matches('%').trim().parse::<Real>().map_err(|_| {
                    PostError::IncompatibleSettings(format!(
                        "perimeter_extrusion_width is not a percentage: {s}"
                    ))
                })?;
                nozzle_diameter * pct / 100.0
            },
            _ => raw.number("perimeter_extrusion_width", None)?,
        };

        Ok(SlicerConfig {
            avoid_crossing_perimeters: raw.flag("avoid_crossing_perimeters"),
            bridge_speed: raw.number("bridge_speed", Some(0.0))?,
            external_perimeters_first: raw.flag("external_perimeters_first"),
            wall_sequence: raw.scalar("wall_sequence", None),
            extrusion_width: raw.number("extrusion_width", None)?,
            filament_diameter: raw
                .number("filament_diameter", Some(FALLBACK_FILAMENT_DIAMETER))?,
            infill_extrusion_width: raw.number("infill_extrusion_width", None)?,
            infill_first: raw.flag("infill_first"),
            layer_height: raw.number("layer_height", None)?,
            nozzle_diameter,
            overhangs: raw.flag("overhangs"),
            perimeter_extrusion_width,
            retract_length: raw.number("retract_length", Some(1.0))?,
            retract_speed: raw.number("retract_speed", Some(35.0))?,
            solid_infill_extrusion_width: raw.number("solid_infill_extrusion_width", None)?,
            travel_speed: raw.number("travel_speed", Some(150.0))?,
            use_relative_e_distances: raw.flag("use_relative_e_distances"),
            use_volumetric_e: raw.flag("use_volumetric_e"),
        })
    }

    /// Gate on the settings the generator cannot work without; warn about
    /// the ones that merely degrade results.
    pub fn check_required(&self) -> Result<(), PostError> {
        if !self.use_relative_e_distances {
            return Err(PostError::IncompatibleSettings(
                "relative extrusion distances must be enabled".into(),
            ));
        }
        if self.extrusion_width < 0.001
            || self.perimeter_extrusion_width < 0.001
            || self.solid_infill_extrusion_width < 0.001
        {
            return Err(PostError::IncompatibleSettings(
                "extrusion widths for perimeter, solid infill and general must be > 0".into(),
            ));
        }
        if !self.overhangs {
            return Err(PostError::IncompatibleSettings(
                "overhang detection must be enabled in the slicer".into(),
            ));
        }
        if self.bridge_speed > 5.0 {
            warn!(
                "bridging speed is {:.0} mm/s; <=5 mm/s is recommended to avoid warping",
                self.bridge_speed
            );
        }
        if self.infill_first {
            warn!("infill is printed before perimeters; this can disturb arc anchoring");
        }
        if self.external_perimeters_first
            || self.wall_sequence.as_deref() == Some("outer wall/inner wall")
        {
            warn!("external perimeter printed first; inner-first gives better overhangs");
        }
        if !self.avoid_crossing_perimeters {
            warn!("travel moves may cross the outline and smear freshly printed arcs");
        }
        Ok(())
    }
}

/// Arc-generation and special-cooling knobs. Defaults mirror field-proven
/// values; the width/offset entries derive from the slicer's nozzle and
/// extrusion widths.
#[derive(Clone, Debug)]
pub struct ArcParams {
    /// Retries at slightly different points when arc generation fails.
    pub allowed_arc_retries: usize,
    /// Constrain generation to `allowed_space` when set.
    pub check_for_allowed_space: bool,
    pub allowed_space: Polygon<Real>,
    /// Hides the next bundle's origin inside printed territory so the first
    /// real arc keeps a viable radius. Zero reaches into tricky spots.
    pub arc_center_offset: Real,
    pub arc_extrusion_multiplier: Real,
    pub arc_fan_speed: u32,
    /// mm/min
    pub arc_min_print_speed: Real,
    /// mm/min
    pub arc_print_speed: Real,
    /// Arcs printing faster than this duration (s) are slowed down.
    pub arc_slow_down_below_this_duration: Real,
    pub arc_points_per_mm: Real,
    /// mm/min
    pub arc_travel_feed_rate: Real,
    /// Spacing between consecutive arcs; nominally one nozzle diameter.
    pub arc_width: Real,
    pub corner_importance_multiplier: Real,
    /// Vertex spacing used when the start line is densified for retries.
    pub start_line_point_spacing: Real,
    /// Tangential extension past both arc ends for inter-arc bonding.
    pub extend_arc_dist: Real,
    /// Grows the overhang region into the perimeter; raise to fill through
    /// narrow passages. Minimum half an extrusion width.
    pub extend_arcs_into_perimeter: Real,
    pub extend_hilbert_into_perimeter: Real,
    /// Minimum distance between consecutive emitted arc points.
    pub gcode_arc_pt_min_dist: Real,
    pub hilbert_filling_percentage: Real,
    pub hilbert_infill_extrusion_multiplier: Real,
    /// Continuous-extrusion budget before hopping elsewhere (rough).
    pub hilbert_travel_every_n_seconds: Real,
    /// mm²
    pub min_area: Real,
    /// mm
    pub min_bridge_length: Real,
    /// Bumpiness allowed between arcs and perimeter; lower follows the
    /// outline closer but spawns many small arcs.
    pub min_distance_from_perimeter: Real,
    pub min_start_arcs: usize,
    /// Write here instead of overwriting the input when set.
    pub output_path: Option<String>,
    pub r_max: Real,
    /// Also replace bridging over external perimeters that has no overhang
    /// perimeter nearby (internal bridging).
    pub replace_internal_bridging: bool,
    pub safety_break_max_arc_number: usize,
    /// Insert M240 after every Nth arc; 0 disables.
    pub time_lapse_every_n_arcs: usize,
    /// Run every bundle to RMax instead of stopping at the boundary.
    pub use_least_amount_of_center_points: bool,
    pub warn_below_this_filling_percentage: Real,

    // Special cooling above the arcs, to suppress warping.
    pub above_arcs_fan_speed: u32,
    /// mm/min
    pub above_arcs_infill_print_speed: Real,
    pub above_arcs_perimeter_fan_speed: u32,
    /// mm/min
    pub above_arcs_perimeter_print_speed: Real,
    pub apply_above_fan_speed_to_whole_layer: bool,
    /// Lines closer than this (mm) to an annotated polygon get the cooling
    /// overrides.
    pub cooling_setting_detection_distance: Real,
    pub do_special_cooling: bool,
    /// Apply the special cooling this many mm above the arcs.
    pub special_cooling_z_dist: Real,
}

impl ArcParams {
    pub fn for_slicer(cfg: &SlicerConfig) -> ArcParams {
        ArcParams {
            allowed_arc_retries: 2,
            check_for_allowed_space: false,
            allowed_space: default_allowed_space(),
            arc_center_offset: 1.5 * cfg.nozzle_diameter,
            arc_extrusion_multiplier: 1.35,
            arc_fan_speed: 255,
            arc_min_print_speed: 0.5 * 60.0,
            arc_print_speed: 1.5 * 60.0,
            arc_slow_down_below_this_duration: 3.0,
            arc_points_per_mm: 10.0,
            arc_travel_feed_rate: 30.0 * 60.0,
            arc_width: cfg.nozzle_diameter * 0.95,
            corner_importance_multiplier: 0.2,
            start_line_point_spacing: 0.1,
            extend_arc_dist: cfg.nozzle_diameter,
            extend_arcs_into_perimeter: 0.5 * cfg.extrusion_width,
            extend_hilbert_into_perimeter: cfg.extrusion_width,
            gcode_arc_pt_min_dist: 0.1,
            hilbert_filling_percentage: 100.0,
            hilbert_infill_extrusion_multiplier: 1.05,
            hilbert_travel_every_n_seconds: 6.0,
            min_area: 0.0,
            min_bridge_length: 0.0,
            min_distance_from_perimeter: cfg.extrusion_width,
            min_start_arcs: 2,
            output_path: None,
            r_max: 30.0,
            replace_internal_bridging: true,
            safety_break_max_arc_number: 2000,
            time_lapse_every_n_arcs: 0,
            use_least_amount_of_center_points: false,
            warn_below_this_filling_percentage: 90.0,

            above_arcs_fan_speed: 25,
            above_arcs_infill_print_speed: 10.0 * 60.0,
            above_arcs_perimeter_fan_speed: 25,
            above_arcs_perimeter_print_speed: 3.0 * 60.0,
            apply_above_fan_speed_to_whole_layer: true,
            cooling_setting_detection_distance: 3.0,
            do_special_cooling: true,
            special_cooling_z_dist: 3.0,
        }
    }
}

fn default_allowed_space() -> Polygon<Real> {
    Polygon::new(
        LineString::from(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 500.0, y: 0.0 },
            Coord { x: 500.0, y: 500.0 },
            Coord { x: 0.0, y: 500.0 },
            Coord { x: 0.0, y: 0.0 },
        ]),
        vec![],
    )
}

/// Everything the pipeline needs: the dialect, the slicer's own settings and
/// the arc parameters derived from them.
#[derive(Clone, Debug)]
pub struct Settings {
    pub dialect: Dialect,
    pub slicer: SlicerConfig,
    pub params: ArcParams,
}

impl Settings {
    pub fn from_lines(lines: &[String]) -> Result<Settings, PostError> {
        let raw = read_settings(lines)?;
        let slicer = SlicerConfig::from_raw(&raw)?;
        let params = ArcParams::for_slicer(&slicer);
        Ok(Settings {
            dialect: raw.dialect,
            slicer,
            params,
        })
    }

    /// Dialect literal for a canonical feature tag.
    pub fn tag(&self, tag: FeatureTag) -> &'static str {
        self.dialect.literal(tag)
    }
}
