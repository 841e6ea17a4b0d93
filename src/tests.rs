use geo::{
    Area, BooleanOps, Contains, Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon,
};

use crate::arcs::{fill_remaining_space, generate_concentric_arcs, start_point_on_line};
use crate::dialect::{Dialect, FeatureTag};
use crate::float_types::Real;
use crate::gcode::emit::{arc_cmds, calc_e_steps, hilbert_cmds, point_cmd, retract_cmd};
use crate::gcode::parse::{
    MotionGeom, extract_point, fan_value, is_travel_move, parse_motion, split_into_layers,
    to_travel_move, z_value,
};
use crate::geom::{
    buffer_line_string, densify, farthest_points, midpoint, move_toward, polygon_boundary,
    polyline_length, stitch_lines,
};
use crate::hilbert::hilbert_chunks;
use crate::layer::Layer;
use crate::process::process;
use crate::rewrite::rewrite_layer;
use crate::settings::{ArcParams, Settings, SlicerConfig};

// --------------------------------------------------------
//   Helpers
// --------------------------------------------------------

/// Quick helper to compare floating-point results with an acceptable tolerance.
fn approx_eq(a: Real, b: Real, eps: Real) -> bool {
    (a - b).abs() < eps
}

fn test_slicer_config() -> SlicerConfig {
    SlicerConfig {
        avoid_crossing_perimeters: true,
        bridge_speed: 5.0,
        external_perimeters_first: false,
        wall_sequence: None,
        extrusion_width: 0.45,
        filament_diameter: 1.75,
        infill_extrusion_width: 0.45,
        infill_first: false,
        layer_height: 0.2,
        nozzle_diameter: 0.4,
        overhangs: true,
        perimeter_extrusion_width: 0.45,
        retract_length: 0.8,
        retract_speed: 35.0,
        solid_infill_extrusion_width: 0.45,
        travel_speed: 150.0,
        use_relative_e_distances: true,
        use_volumetric_e: false,
    }
}

fn test_settings() -> Settings {
    let slicer = test_slicer_config();
    let params = ArcParams::for_slicer(&slicer);
    Settings {
        dialect: Dialect::PrusaSlicer,
        slicer,
        params,
    }
}

fn square(size: Real) -> Polygon<Real> {
    Polygon::new(
        LineString::from(vec![
            (0.0, 0.0),
            (size, 0.0),
            (size, size),
            (0.0, size),
            (0.0, 0.0),
        ]),
        vec![],
    )
}

fn settings_block() -> Vec<String> {
    [
        "; prusaslicer_config = begin",
        "; avoid_crossing_perimeters = 1",
        "; bridge_speed = 5",
        "; extrusion_width = 0.45",
        "; filament_diameter = 1.75,1.75",
        "; infill_extrusion_width = 0.45",
        "; infill_first = 0",
        "; layer_height = 0.2",
        "; nozzle_diameter = 0.4",
        "; overhangs = 1",
        "; perimeter_extrusion_width = 112.5%",
        "; retract_length = 0.8",
        "; retract_speed = 35",
        "; solid_infill_extrusion_width = 0.45",
        "; travel_speed = 150",
        "; use_relative_e_distances = 1",
        "; prusaslicer_config = end",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn perimeter_square_layer(z: Real) -> Vec<String> {
    vec![
        ";LAYER_CHANGE".to_string(),
        format!("G1 Z{z} F9000"),
        ";HEIGHT:0.2".to_string(),
        "G1 X0 Y0 F9000".to_string(),
        ";TYPE:External perimeter".to_string(),
        "G1 X10 Y0 E4.5".to_string(),
        "G1 X10 Y10 E4.5".to_string(),
        "G1 X0 Y10 E4.5".to_string(),
        "G1 X0 Y0 E4.5".to_string(),
    ]
}

/// A three-layer part whose third layer bridges a steep overhang off the top
/// edge of the square below, split across two overlapping bridge features.
fn overhang_fixture() -> Vec<String> {
    let mut g: Vec<String> = vec![
        "; generated by PrusaSlicer 2.8.0".to_string(),
        "M83".to_string(),
        "M106 S255".to_string(),
    ];
    g.extend(perimeter_square_layer(0.2));
    g.extend(perimeter_square_layer(0.4));
    g.extend(perimeter_square_layer(0.6));
    g.extend(
        [
            ";TYPE:Overhang perimeter",
            "G1 X2 Y10 E0.2",
            "G1 X2 Y13 E0.7",
            "G1 X8 Y13 E1.4",
            "G1 X8 Y10 E0.7",
            "G1 X2 Y10.2 E0.1",
            ";TYPE:Bridge infill",
            "G1 X8 Y10.2 E0.5",
            "G1 X8 Y10.65 E0.1",
            "G1 X2 Y10.65 E0.5",
            "G1 X2 Y11.1 E0.1",
            "G1 X8 Y11.1 E0.5",
            "G1 X8 Y11.55 E0.1",
            "G1 X2 Y11.55 E0.5",
            ";TYPE:Bridge infill",
            "G1 X2 Y12.0 E0.2",
            "G1 X8 Y12.0 E0.5",
            "G1 X8 Y12.45 E0.1",
            "G1 X2 Y12.45 E0.5",
            "G1 X2 Y12.9 E0.1",
            "G1 X8 Y12.9 E0.5",
            ";TYPE:Custom",
            "M107",
            "M104 S0",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    g.extend(settings_block());
    g
}

// --------------------------------------------------------
//   Settings & dialect tests
// --------------------------------------------------------

#[test]
fn test_settings_parse_prusa() {
    let settings = Settings::from_lines(&settings_block()).unwrap();
    assert_eq!(settings.dialect, Dialect::PrusaSlicer);
    assert!(settings.slicer.use_relative_e_distances);
    assert!(approx_eq(settings.slicer.extrusion_width, 0.45, 1e-9));
    // Tuple value collapses to the built-in fallback.
    assert!(approx_eq(settings.slicer.filament_diameter, 1.75, 1e-9));
    // Percentage resolves against the nozzle diameter.
    assert!(approx_eq(settings.slicer.perimeter_extrusion_width, 0.45, 1e-9));
    // Derived parameters follow the nozzle.
    assert!(approx_eq(settings.params.arc_width, 0.38, 1e-9));
    assert!(approx_eq(settings.params.arc_center_offset, 0.6, 1e-9));
}

#[test]
fn test_settings_unknown_dialect() {
    let lines = vec!["; some gcode".to_string(), "G1 X0 Y0".to_string()];
    assert!(Settings::from_lines(&lines).is_err());
}

#[test]
fn test_settings_required_gate_rejects_absolute_e() {
    let mut lines = settings_block();
    for line in &mut lines {
        if line.contains("use_relative_e_distances") {
            *line = "; use_relative_e_distances = 0".to_string();
        }
    }
    let settings = Settings::from_lines(&lines).unwrap();
    assert!(settings.slicer.check_required().is_err());
    // The whole pipeline refuses as well.
    assert!(process(&lines).is_err());
}

#[test]
fn test_dialect_orca_maps() {
    let d = Dialect::OrcaSlicer;
    assert_eq!(d.canonical_key("line_width"), Some("extrusion_width"));
    assert_eq!(
        d.canonical_key("reduce_crossing_wall"),
        Some("avoid_crossing_perimeters")
    );
    assert_eq!(d.canonical_key("no_such_key"), None);
    assert_eq!(d.literal(FeatureTag::BridgeInfill), ";TYPE:Bridge");
    assert_eq!(
        Dialect::PrusaSlicer.literal(FeatureTag::BridgeInfill),
        ";TYPE:Bridge infill"
    );
    assert_eq!(
        Dialect::from_marker("; CONFIG_BLOCK_START"),
        Some(Dialect::OrcaSlicer)
    );
}

// --------------------------------------------------------
//   Tokenizer & parser tests
// --------------------------------------------------------

#[test]
fn test_split_into_layers() {
    let lines: Vec<String> = [
        "preamble",
        ";LAYER_CHANGE",
        "G1 Z0.2",
        ";LAYER_CHANGE",
        "G1 Z0.4",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let layers = split_into_layers(&lines);
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[0], vec!["preamble".to_string()]);
    assert_eq!(layers[1][0], ";LAYER_CHANGE");
    assert_eq!(layers[2], vec![";LAYER_CHANGE".to_string(), "G1 Z0.4".to_string()]);
}

#[test]
fn test_point_and_word_extraction() {
    assert_eq!(
        extract_point("G1 X1.5 Y-2.25 E0.4"),
        Some(Point::new(1.5, -2.25))
    );
    assert_eq!(extract_point("G1 E-0.8 F2100"), None);
    assert_eq!(extract_point("M106 S255"), None);
    assert_eq!(z_value("G1 Z0.6 F9000"), Some(0.6));
    assert_eq!(z_value("G1 X1 Y2 E0.5"), None);
    assert_eq!(fan_value("M106 S128"), Some(128.0));
    assert_eq!(fan_value("G1 X0 Y0"), None);
}

#[test]
fn test_travel_move_detection() {
    assert!(is_travel_move("G1 E-0.8 F2100"));
    assert!(is_travel_move("G1 X5 Y5 F9000"));
    assert!(!is_travel_move("G1 X5 Y5 E0.2"));
    assert!(!is_travel_move(";TYPE:Bridge infill"));
}

#[test]
fn test_to_travel_move_strips_z_and_extrusion() {
    let travel = to_travel_move("G1 X3.5 Y4.5 Z0.8 E0.25 F1200", 150.0);
    assert!(travel.contains("X3.5"));
    assert!(travel.contains("Y4.5"));
    assert!(!travel.contains('Z'));
    assert!(travel.contains("E0"));
    assert!(travel.ends_with("F9000"));
    assert!(!travel.contains("E0.25"));
    assert!(!travel.contains("F1200"));
}

#[test]
fn test_arc_command_expansion() {
    // Clockwise half circle from (0,0) to (10,0) over the top.
    let prev = Some(Point::new(0.0, 0.0));
    let Some(MotionGeom::Arc(pts)) = parse_motion("G2 X10 Y0 I5 J0 E1.0", prev, 10.0) else {
        panic!("expected an arc expansion");
    };
    assert!(pts.len() > 10);
    let first = pts.first().unwrap();
    let last = pts.last().unwrap();
    assert!(approx_eq(first.x(), 0.0, 1e-6) && approx_eq(first.y(), 0.0, 1e-6));
    assert!(approx_eq(last.x(), 10.0, 1e-6) && approx_eq(last.y(), 0.0, 1e-6));
    // Every chord endpoint stays on the circle around (5, 0).
    for p in &pts {
        let r = (p.x() - 5.0).hypot(p.y());
        assert!(approx_eq(r, 5.0, 1e-6));
    }
    // Clockwise means passing over the top.
    assert!(pts.iter().any(|p| p.y() > 4.9));

    // Without a known previous position the move degrades to its endpoint.
    assert_eq!(
        extract_point("G2 X10 Y0 I5 J0 E1.0"),
        Some(Point::new(10.0, 0.0))
    );
}

// --------------------------------------------------------
//   Geometry tests
// --------------------------------------------------------

#[test]
fn test_densify_spacing() {
    let ls = LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]);
    let dense = densify(&ls, 0.1);
    assert_eq!(dense.0.len(), 11);
    for w in dense.0.windows(2) {
        assert!(approx_eq(w[1].x - w[0].x, 0.1, 1e-9));
    }
}

#[test]
fn test_stitch_lines_rejoins_pieces() {
    let pieces = MultiLineString::new(vec![
        LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]),
        LineString::from(vec![(2.0, 0.0), (1.0, 0.0)]),
        LineString::from(vec![(2.0, 0.0), (3.0, 0.0)]),
    ]);
    let merged = stitch_lines(&pieces);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].0.len(), 4);
    assert!(approx_eq(polyline_length(&merged[0]), 3.0, 1e-9));
}

#[test]
fn test_buffer_line_string_capsule_area() {
    let ls = LineString::from(vec![(0.0, 0.0), (20.0, 0.0)]);
    let capsule = buffer_line_string(&ls, 0.225);
    let expected = 20.0 * 2.0 * 0.225 + std::f64::consts::PI * 0.225 * 0.225;
    // The round caps are polygonal, so stay a little generous.
    assert!(approx_eq(capsule.unsigned_area(), expected, 0.05));
    assert!(capsule.contains(&Point::new(10.0, 0.2)));
    assert!(!capsule.contains(&Point::new(10.0, 0.3)));
}

#[test]
fn test_move_toward_and_midpoint() {
    let a = Point::new(0.0, 0.0);
    let b = Point::new(10.0, 0.0);
    let m = midpoint(a, b);
    assert!(approx_eq(m.x(), 5.0, 1e-9));
    let toward = move_toward(a, b, 2.0, 0.0);
    assert!(approx_eq(toward.x(), 2.0, 1e-9) && approx_eq(toward.y(), 0.0, 1e-9));
    // A 90° correction turns the step into the tangent direction.
    let tangent = move_toward(a, b, 2.0, 90.0);
    assert!(approx_eq(tangent.x(), 0.0, 1e-9) && approx_eq(tangent.y(), 2.0, 1e-9));
    // Coincident points stay put.
    let stuck = move_toward(a, a, 2.0, 0.0);
    assert!(approx_eq(stuck.x(), 0.0, 1e-9));
}

#[test]
fn test_farthest_points_sorted_descending() {
    let poly = square(10.0);
    let frontier = MultiLineString::new(vec![LineString::from(vec![
        (5.0, 5.0),
        (5.0, 9.0),
        (5.0, 2.0),
    ])]);
    let found = farthest_points(&frontier, &poly, 3);
    assert_eq!(found.len(), 3);
    assert!(approx_eq(found[0].1, 5.0, 1e-9));
    assert!(found[0].1 >= found[1].1 && found[1].1 >= found[2].1);
}

// --------------------------------------------------------
//   Start-point scoring tests
// --------------------------------------------------------

#[test]
fn test_start_point_midpoint_for_two_vertices() {
    let line = MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (4.0, 0.0)])]);
    let settings = test_settings();
    let mut rng = rand::thread_rng();
    let p = start_point_on_line(&line, 0, &settings, false, &mut rng).unwrap();
    assert!(approx_eq(p.x(), 2.0, 1e-9) && approx_eq(p.y(), 0.0, 1e-9));
}

#[test]
fn test_start_point_never_an_endpoint() {
    let line = MultiLineString::new(vec![LineString::from(vec![
        (0.0, 0.0),
        (1.0, 0.0),
        (2.0, 0.0),
        (3.0, 0.0),
    ])]);
    let settings = test_settings();
    let mut rng = rand::thread_rng();
    let p = start_point_on_line(&line, 0, &settings, false, &mut rng).unwrap();
    assert!(p.x() > 0.0 && p.x() < 3.0);
}

#[test]
fn test_start_point_prefers_corner_near_middle() {
    // A right-angle corner sits mid-line; the corner bonus must pick it over
    // the straight vertices around it.
    let line = MultiLineString::new(vec![LineString::from(vec![
        (0.0, 0.0),
        (1.0, 0.0),
        (2.0, 0.0),
        (2.0, 1.0),
        (2.0, 2.0),
    ])]);
    let settings = test_settings();
    let mut rng = rand::thread_rng();
    let p = start_point_on_line(&line, 0, &settings, false, &mut rng).unwrap();
    assert!(approx_eq(p.x(), 2.0, 1e-9) && approx_eq(p.y(), 0.0, 1e-9));
}

#[test]
fn test_start_point_degenerate_is_fatal() {
    let line = MultiLineString::new(vec![LineString::from(Vec::<Coord<Real>>::new())]);
    let settings = test_settings();
    let mut rng = rand::thread_rng();
    assert!(start_point_on_line(&line, 7, &settings, false, &mut rng).is_err());
}

// --------------------------------------------------------
//   Concentric-arc generator & filler tests
// --------------------------------------------------------

/// The unit-square scenario: bundle radii step by exactly ArcWidth, stop at
/// the boundary, stay under RMax, and the final fill covers ≥ 90%.
#[test]
fn test_unit_square_concentric_fill() {
    let mut settings = test_settings();
    settings.params.arc_width = 0.4;
    settings.params.r_max = 30.0;

    let poly = square(1.0);
    let start = Point::new(0.5, 0.0);
    // Everything except the supported bottom edge.
    let boundary_without_start = MultiLineString::new(vec![LineString::from(vec![
        (1.0, 0.0),
        (1.0, 1.0),
        (0.0, 1.0),
        (0.0, 0.0),
    ])]);
    let whole = MultiPolygon::new(vec![poly.clone()]);

    let bundle = generate_concentric_arcs(
        start,
        settings.slicer.nozzle_diameter,
        settings.params.r_max,
        &boundary_without_start,
        &whole,
        &settings,
    )
    .unwrap();
    assert!(bundle.len() >= settings.params.min_start_arcs);
    for pair in bundle.windows(2) {
        assert!(approx_eq(pair[1].r - pair[0].r, settings.params.arc_width, 1e-9));
    }
    for arc in &bundle {
        assert!(arc.r <= settings.params.r_max);
        // Clipped arcs never leave the polygon (small tolerance).
        for ls in &arc.arcline {
            for c in &ls.0 {
                assert!(c.x >= -0.02 && c.x <= 1.02 && c.y >= -0.02 && c.y <= 1.02);
            }
        }
    }

    let outermost = bundle.last().unwrap();
    let filled =
        crate::geom::to_multi(&poly).intersection(&MultiPolygon::new(vec![outermost.disk()]));
    let initial_area = filled.unsigned_area();
    let (_, final_filled) = fill_remaining_space(
        outermost.center,
        settings.params.arc_center_offset + settings.params.arc_width / 1.5,
        settings.params.r_max,
        settings.params.min_distance_from_perimeter,
        filled,
        &poly,
        &settings,
    )
    .unwrap();
    // Coverage is monotone and ends above the warning threshold.
    assert!(final_filled.unsigned_area() >= initial_area);
    assert!(final_filled.unsigned_area() / poly.unsigned_area() >= 0.9);
}

// --------------------------------------------------------
//   Layer & validator tests
// --------------------------------------------------------

fn layer_from(lines: &[&str], index: usize) -> Layer {
    let mut layer = Layer::new(lines.iter().map(|s| s.to_string()).collect(), index);
    layer.extract_features();
    layer
}

#[test]
fn test_feature_extraction_ranges() {
    let layer = layer_from(
        &[
            ";LAYER_CHANGE",
            "G1 Z0.6",
            ";TYPE:External perimeter",
            "G1 X1 Y1 E0.1",
            "G1 X2 Y1 E0.1",
            ";TYPE:Bridge infill",
            "G1 X3 Y1 E0.1",
        ],
        2,
    );
    assert_eq!(layer.features.len(), 3);
    assert!(layer.features[0].tag.is_none());
    assert_eq!(layer.features[0].start, 0);
    assert_eq!(layer.features[0].end, 2);
    assert_eq!(layer.features[1].start, 2);
    assert_eq!(layer.features[1].motion_start(), 3);
    assert_eq!(layer.features[1].end, 5);
    assert_eq!(layer.features[2].start, 5);
    assert_eq!(layer.features[2].end, 7);
}

#[test]
fn test_layer_header_extraction() {
    let mut layer = layer_from(
        &[";LAYER_CHANGE", "G1 Z0.6 F9000", ";HEIGHT:0.25", "M106 S64"],
        3,
    );
    layer.read_z();
    layer.read_height(0.2);
    let fan = layer.spot_fan_setting(0.0);
    assert_eq!(layer.z, Some(0.6));
    assert!(approx_eq(layer.height, 0.25, 1e-9));
    assert!(approx_eq(fan, 64.0, 1e-9));

    // Fan setting propagates from below when the layer has no M106.
    let mut silent = layer_from(&[";LAYER_CHANGE", "G1 Z0.8"], 4);
    silent.read_height(0.2);
    assert!(approx_eq(silent.spot_fan_setting(64.0), 64.0, 1e-9));
    assert!(approx_eq(silent.height, 0.2, 1e-9));
}

#[test]
fn test_wipe_sections_are_skipped() {
    let settings = test_settings();
    let layer = layer_from(
        &[
            ";TYPE:Bridge infill",
            "G1 X0 Y0 E0.1",
            "G1 X1 Y0 E0.1",
            ";WIPE_START",
            "G1 X90 Y90 E-0.5",
            ";WIPE_END",
            "G1 X2 Y0 E0.1",
        ],
        2,
    );
    let found = layer.spot_feature_points(";TYPE:Bridge infill", false, false, true, &settings);
    assert_eq!(found.parts.len(), 1);
    let xs: Vec<Real> = found.parts[0].iter().map(|p| p.x()).collect();
    assert_eq!(xs, vec![0.0, 1.0, 2.0]);
}

#[test]
fn test_travel_split_keeps_resume_point() {
    let settings = test_settings();
    let layer = layer_from(
        &[
            ";TYPE:Bridge infill",
            "G1 X0 Y0 E0.1",
            "G1 X1 Y0 E0.1",
            "G1 X5 Y5 F9000",
            "G1 X6 Y5 E0.1",
            "G1 X7 Y5 E0.1",
        ],
        2,
    );
    let found = layer.spot_feature_points(";TYPE:Bridge infill", false, false, true, &settings);
    assert_eq!(found.parts.len(), 2);
    // The second part starts where printing resumes after the travel.
    let second: Vec<(Real, Real)> =
        found.parts[1].iter().map(|p| (p.x(), p.y())).collect();
    assert_eq!(second, vec![(5.0, 5.0), (6.0, 5.0), (7.0, 5.0)]);
}

#[test]
fn test_validator_accepts_overlap_rejects_contained() {
    let settings = test_settings();
    // Previous layer: a 10×10 external perimeter.
    let mut prev = layer_from(
        &[
            "G1 X0 Y0 F9000",
            ";TYPE:External perimeter",
            "G1 X10 Y0 E4.5",
            "G1 X10 Y10 E4.5",
            "G1 X0 Y10 E4.5",
            "G1 X0 Y0 E4.5",
        ],
        1,
    );

    // A bridge hanging over the edge overlaps the square: accepted.
    let mut layer = layer_from(
        &[
            ";TYPE:Bridge infill",
            "G1 X2 Y9.8 E0.1",
            "G1 X8 Y9.8 E0.5",
            "G1 X8 Y10.2 E0.1",
            "G1 X2 Y10.2 E0.5",
        ],
        2,
    );
    layer.spot_bridge_infill(&settings);
    layer.make_polys_from_bridge_infill(settings.params.extend_arcs_into_perimeter);
    layer.polys = crate::geom::merge_polygons(&layer.polys);
    layer.verify_infill_polys(&mut prev, 2.0 * settings.slicer.perimeter_extrusion_width, &settings);
    assert_eq!(layer.valid_polys.len(), 1);

    // A bridge fully inside the square is contained, not overlapping, and
    // there is no overhang perimeter nearby: rejected.
    let mut prev2 = layer_from(
        &[
            "G1 X0 Y0 F9000",
            ";TYPE:External perimeter",
            "G1 X10 Y0 E4.5",
            "G1 X10 Y10 E4.5",
            "G1 X0 Y10 E4.5",
            "G1 X0 Y0 E4.5",
        ],
        1,
    );
    let mut inside = layer_from(
        &[
            ";TYPE:Bridge infill",
            "G1 X2 Y5 E0.1",
            "G1 X8 Y5 E0.5",
        ],
        2,
    );
    inside.spot_bridge_infill(&settings);
    inside.make_polys_from_bridge_infill(settings.params.extend_arcs_into_perimeter);
    inside.polys = crate::geom::merge_polygons(&inside.polys);
    inside.verify_infill_polys(&mut prev2, 2.0 * settings.slicer.perimeter_extrusion_width, &settings);
    assert!(inside.valid_polys.is_empty());
}

#[test]
fn test_min_area_filter() {
    let mut settings = test_settings();
    settings.params.min_area = 50.0;
    let mut prev = layer_from(
        &[
            "G1 X0 Y0 F9000",
            ";TYPE:External perimeter",
            "G1 X10 Y0 E4.5",
            "G1 X10 Y10 E4.5",
            "G1 X0 Y10 E4.5",
            "G1 X0 Y0 E4.5",
        ],
        1,
    );
    let mut layer = layer_from(
        &[
            ";TYPE:Bridge infill",
            "G1 X2 Y9.8 E0.1",
            "G1 X8 Y9.8 E0.5",
            "G1 X8 Y10.2 E0.1",
            "G1 X2 Y10.2 E0.5",
        ],
        2,
    );
    layer.spot_bridge_infill(&settings);
    layer.make_polys_from_bridge_infill(settings.params.extend_arcs_into_perimeter);
    layer.polys = crate::geom::merge_polygons(&layer.polys);
    layer.verify_infill_polys(&mut prev, 0.9, &settings);
    assert!(layer.valid_polys.is_empty());
}

#[test]
fn test_deletion_set_uses_streaming_line_numbers() {
    let settings = test_settings();
    let mut layer = layer_from(
        &[
            ";LAYER_CHANGE",          // 0
            "G1 Z0.6",                // 1
            ";TYPE:Bridge infill",    // 2
            "G1 X1 Y1 E0.1",          // 3
            "G1 X2 Y1 E0.1",          // 4
            "G1 X9 Y9 F9000",         // 5 trailing travel, must survive
            ";TYPE:Solid infill",     // 6
            "G1 X3 Y3 E0.1",          // 7
        ],
        2,
    );
    let region = square(5.0);
    layer.prepare_deletion(settings.tag(FeatureTag::BridgeInfill), &[region]);

    let mut expected: Vec<usize> = layer.delete_lines.iter().copied().collect();
    expected.sort_unstable();
    assert_eq!(expected, vec![2, 3, 4]);

    // The rewriter drops exactly those indices.
    let out = rewrite_layer(&layer, &[], &[], &settings);
    assert!(!out.iter().any(|l| l.contains(";TYPE:Bridge infill")));
    assert!(!out.iter().any(|l| l.contains("G1 X1 Y1")));
    assert!(out.iter().any(|l| l.contains("G1 X9 Y9")));
    assert!(out.iter().any(|l| l.contains(";TYPE:Solid infill")));
}

#[test]
fn test_failed_polygons_keep_their_infill() {
    let settings = test_settings();
    let mut layer = layer_from(
        &[
            ";TYPE:Bridge infill",
            "G1 X1 Y1 E0.1",
            "G1 X2 Y1 E0.1",
        ],
        2,
    );
    let region = square(5.0);
    layer.failed_arc_gen_polys.push(region.clone());
    layer.prepare_deletion(settings.tag(FeatureTag::BridgeInfill), &[region]);
    assert!(layer.delete_lines.is_empty());
}

// --------------------------------------------------------
//   Hilbert planner tests
// --------------------------------------------------------

#[test]
fn test_hilbert_chunks_inside_polygon() {
    let settings = test_settings();
    let poly = square(10.0);
    let chunks = hilbert_chunks(&poly, 4, &settings);
    assert!(!chunks.is_empty());

    let scale =
        settings.slicer.solid_infill_extrusion_width / (settings.params.hilbert_filling_percentage / 100.0);
    let mm_between_travels = settings.params.above_arcs_infill_print_speed / 60.0
        * settings.params.hilbert_travel_every_n_seconds;
    let max_chunk = (mm_between_travels / scale).ceil() as usize;

    for chunk in &chunks {
        assert!(chunk.len() >= 2);
        assert!(chunk.len() <= max_chunk);
        for p in chunk {
            assert!(poly.contains(p));
        }
        // Consecutive Hilbert points are grid neighbors, one cell apart.
        for w in chunk.windows(2) {
            let d = (w[1].x() - w[0].x()).hypot(w[1].y() - w[0].y());
            assert!(approx_eq(d, scale, 1e-6));
        }
    }
}

#[test]
fn test_hilbert_density_follows_filling_percentage() {
    let mut settings = test_settings();
    settings.params.hilbert_filling_percentage = 50.0;
    let poly = square(10.0);
    let chunks = hilbert_chunks(&poly, 4, &settings);
    assert!(!chunks.is_empty());
    // Half density doubles the cell size.
    let scale = settings.slicer.solid_infill_extrusion_width / 0.5;
    for chunk in &chunks {
        for w in chunk.windows(2) {
            let d = (w[1].x() - w[0].x()).hypot(w[1].y() - w[0].y());
            assert!(approx_eq(d, scale, 1e-6));
        }
    }
}

// --------------------------------------------------------
//   Motion emitter tests
// --------------------------------------------------------

#[test]
fn test_e_steps_bridge_and_surface() {
    let settings = test_settings();
    let s = &settings.slicer;
    let bridge = calc_e_steps(&settings, None);
    let expected_area = (s.nozzle_diameter / 2.0).powi(2)
        * std::f64::consts::PI
        * settings.params.arc_extrusion_multiplier;
    let filament_area = (s.filament_diameter / 2.0).powi(2) * std::f64::consts::PI;
    assert!(approx_eq(bridge, expected_area / filament_area, 1e-12));

    let h = 0.2;
    let surface = calc_e_steps(&settings, Some(h));
    let w = s.infill_extrusion_width;
    let surface_area = (w - h) * h
        + std::f64::consts::PI * (h / 2.0).powi(2)
            * settings.params.hilbert_infill_extrusion_multiplier;
    assert!(approx_eq(surface, surface_area / filament_area, 1e-12));
}

#[test]
fn test_arc_cmds_structure() {
    let settings = test_settings();
    let arc = LineString::from(vec![(0.0, 0.0), (1.0, 0.5), (2.0, 0.0)]);
    let cmds = arc_cmds(&arc, 0.03, 0, &settings);

    // Retract first, unretract after reaching the arc start.
    assert_eq!(cmds[0], retract_cmd(true, &settings.slicer));
    assert!(cmds.contains(&retract_cmd(false, &settings.slicer)));
    // The travel to the lead-in runs at the arc travel feed rate.
    assert!(cmds[2].contains("E0") && cmds[2].ends_with("F1800"));
    // The feedrate command is clamped into the configured band.
    let feed_line = cmds
        .iter()
        .find(|l| l.starts_with("G1 F"))
        .expect("feedrate command");
    let f: Real = feed_line.trim_start_matches("G1 F").parse().unwrap();
    assert!(f >= settings.params.arc_min_print_speed);
    assert!(f <= settings.params.arc_print_speed);

    // Too-short arcs emit nothing.
    let degenerate = LineString::from(vec![(0.0, 0.0)]);
    assert!(arc_cmds(&degenerate, 0.03, 0, &settings).is_empty());
}

#[test]
fn test_arc_cmds_drop_close_points() {
    let settings = test_settings();
    let arc = LineString::from(vec![
        (0.0, 0.0),
        (0.05, 0.0), // closer than GCodeArcPtMinDist
        (1.0, 0.0),
    ]);
    let cmds = arc_cmds(&arc, 0.03, 1, &settings);
    assert!(!cmds.iter().any(|l| l.contains("X0.0500")));
}

#[test]
fn test_hilbert_cmds_retraction_pairing() {
    let settings = test_settings();
    let chunks = vec![
        vec![Point::new(0.0, 0.0), Point::new(0.45, 0.0)],
        vec![Point::new(5.0, 5.0), Point::new(5.45, 5.0)],
    ];
    let cmds = hilbert_cmds(&chunks, &settings, 0.2);

    // Travel to the first point, then a single unretract.
    assert!(cmds[0].contains("E0"));
    assert_eq!(cmds[1], retract_cmd(false, &settings.slicer));
    // One retract at the very end.
    assert_eq!(cmds.last().unwrap(), &retract_cmd(true, &settings.slicer));
    let unretracts = cmds
        .iter()
        .filter(|l| **l == retract_cmd(false, &settings.slicer))
        .count();
    assert_eq!(unretracts, 1);
    // The first extruding move carries its feedrate inline.
    assert!(cmds[2].contains("E") && cmds[2].ends_with("F600"));

    assert!(hilbert_cmds(&[], &settings, 0.2).is_empty());
}

#[test]
fn test_point_cmd_formatting() {
    assert_eq!(point_cmd(Point::new(1.0, 2.0), 0.0, None), "G1 X1.0000 Y2.0000 E0");
    assert_eq!(
        point_cmd(Point::new(1.0, 2.0), 0.123456, Some(1800.0)),
        "G1 X1.0000 Y2.0000 E0.12346 F1800"
    );
}

// --------------------------------------------------------
//   Rewriter tests
// --------------------------------------------------------

#[test]
fn test_rewriter_fan_toggles_balance() {
    let mut settings = test_settings();
    settings.params.apply_above_fan_speed_to_whole_layer = false;

    let mut layer = layer_from(
        &[
            "G1 X1 Y1 E0.1",
            "G1 X2 Y1 E0.1",
            "G1 X50 Y50 E0.1",
            "G1 X2.5 Y1 E0.1",
            "G1 X51 Y50 E0.1",
        ],
        5,
    );
    layer.fan_setting = 255.0;
    layer.old_polys.push(square(5.0));
    layer.index_old_polys();

    let out = rewrite_layer(&layer, &[], &[], &settings);
    let overrides = out.iter().filter(|l| **l == "M106 S25").count();
    let restores = out.iter().filter(|l| **l == "M106 S255").count();
    assert_eq!(overrides, restores);
    assert!(overrides >= 2);
    // Slowed lines carry the perimeter override feed.
    assert!(out.iter().any(|l| l.contains("G1 X1 Y1 E0.1 F180")));
}

#[test]
fn test_rewriter_injects_arcs_and_restores_position() {
    let settings = test_settings();
    let layer = layer_from(
        &[
            "G1 X4 Y4 E0.2",
            ";TYPE:External perimeter",
            "G1 X5 Y5 E0.2",
        ],
        5,
    );
    let arc_block = vec!["G1 X0.5 Y0.5 E0.01".to_string()];
    let out = rewrite_layer(&layer, &arc_block, &[], &settings);

    let header = out.iter().position(|l| l == ";TYPE:Arc infill").unwrap();
    // Header, fan, block, then retract/travel-back/unretract.
    assert_eq!(out[header + 1], "M106 S255");
    assert_eq!(out[header + 2], "G1 X0.5 Y0.5 E0.01");
    assert_eq!(out[header + 3], retract_cmd(true, &settings.slicer));
    assert!(out[header + 4].contains("X4") && out[header + 4].contains("E0"));
    assert_eq!(out[header + 5], retract_cmd(false, &settings.slicer));
    // The original perimeter tag follows.
    assert!(out[header + 6..].iter().any(|l| l == ";TYPE:External perimeter"));
}

// --------------------------------------------------------
//   Pipeline tests
// --------------------------------------------------------

#[test]
fn test_pipeline_no_layer_change_leaves_input() {
    let mut lines = vec!["G90".to_string(), "G1 X0 Y0 E0.1".to_string()];
    lines.extend(settings_block());
    let outcome = process(&lines).unwrap();
    assert!(outcome.output.is_none());
    assert_eq!(outcome.overhangs, 0);
}

#[test]
fn test_pipeline_first_two_layers_untouched() {
    // A bridge on the first printed layer is ignored by design.
    let mut lines = vec!["; preamble".to_string()];
    lines.extend(perimeter_square_layer(0.2));
    lines.extend(
        [
            ";TYPE:Bridge infill",
            "G1 X2 Y5 E0.1",
            "G1 X8 Y5 E0.5",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    lines.extend(settings_block());
    let outcome = process(&lines).unwrap();
    assert!(outcome.output.is_none());
}

#[test]
fn test_pipeline_overhang_end_to_end() {
    let lines = overhang_fixture();
    let outcome = process(&lines).unwrap();
    let output = outcome.output.expect("the overhang must be converted");
    assert_eq!(outcome.overhangs, 1);

    // Exactly one arc block: the two overlapping bridge features merged.
    let headers = output.iter().filter(|l| *l == ";TYPE:Arc infill").count();
    assert_eq!(headers, 1);

    // Bridge infill is gone, tag included.
    assert!(!output.iter().any(|l| l.contains(";TYPE:Bridge infill")));
    assert!(!output.iter().any(|l| l.contains("G1 X8 Y10.65")));

    // Everything before the modified layer is byte-identical.
    let third_layer_start = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains(";LAYER_CHANGE"))
        .map(|(i, _)| i)
        .nth(2)
        .unwrap();
    assert_eq!(&output[..third_layer_start], &lines[..third_layer_start]);

    // Arc fan speed is set ahead of the block.
    let header_at = output.iter().position(|l| l == ";TYPE:Arc infill").unwrap();
    assert_eq!(output[header_at + 1], "M106 S255");

    // Arc moves extrude and stay near the overhang region.
    assert!(output.iter().any(|l| l.starts_with("G1 X") && l.contains("E0.")));
}

#[test]
fn test_pipeline_second_run_is_a_no_op() {
    let lines = overhang_fixture();
    let first = process(&lines).unwrap().output.unwrap();
    // The bridge infill was deleted, so a second pass finds nothing to do.
    let second = process(&first).unwrap();
    assert!(second.output.is_none());
    assert_eq!(second.overhangs, 0);
}

// --------------------------------------------------------
//   Invariant spot checks
// --------------------------------------------------------

#[test]
fn test_polygon_boundary_rings() {
    let outer = LineString::from(vec![
        (0.0, 0.0),
        (10.0, 0.0),
        (10.0, 10.0),
        (0.0, 10.0),
        (0.0, 0.0),
    ]);
    let hole = LineString::from(vec![
        (4.0, 4.0),
        (6.0, 4.0),
        (6.0, 6.0),
        (4.0, 6.0),
        (4.0, 4.0),
    ]);
    let poly = Polygon::new(outer, vec![hole]);
    let boundary = polygon_boundary(&poly);
    assert_eq!(boundary.0.len(), 2);
}

#[test]
fn test_circle_is_closed_and_sampled() {
    let ring = crate::geom::circle(Point::new(1.0, 1.0), 2.0, 10.0);
    assert!(ring.0.len() > 100);
    assert_eq!(ring.0.first(), ring.0.last());
    for c in &ring.0 {
        let r = (c.x - 1.0).hypot(c.y - 1.0);
        assert!(approx_eq(r, 2.0, 1e-9));
    }
}


