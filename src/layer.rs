//! A layer of the toolpath: its raw lines, the typed features inside it, and
//! the polygon sets derived from them (bridge regions, previous-layer
//! support outlines, solid infill above arcs).

use geo::{
    Area, BooleanOps, BoundingRect, Contains, EuclideanDistance, Intersects, LineString,
    MultiLineString, Point, Polygon, Rect, Relate,
};
use hashbrown::HashSet;
use log::{debug, warn};

use crate::dialect::FeatureTag;
use crate::float_types::{BOUNDARY_TOLERANCE, Real};
use crate::gcode::parse::{
    MotionGeom, extract_point, fan_value, has_motion_word, is_travel_move, parse_motion, z_value,
};
use crate::geom::index::GeomIndex;
use crate::geom::{
    buffer_line_string, buffer_multi_line_string, buffer_polygon, clip_lines,
    multi_polygon_boundary, polygon_boundary, polygons_of, to_multi,
};
use crate::settings::Settings;

/// A typed run of lines inside a layer. `tag` is the raw `;TYPE:` line
/// (`None` for the untyped chunk before the first tag); `start` is the index
/// of the tag line and `end` the start of the next feature.
#[derive(Clone, Debug)]
pub struct Feature {
    pub tag: Option<String>,
    pub start: usize,
    pub end: usize,
}

impl Feature {
    /// Index of the first motion line (the tag line itself carries none).
    pub fn motion_start(&self) -> usize {
        self.start + usize::from(self.tag.is_some())
    }
}

/// Point sequences reconstructed from one feature type, with the line span
/// `(begin, end)` each part came from.
#[derive(Default)]
pub struct FeatureParts {
    pub parts: Vec<Vec<Point<Real>>>,
    pub locations: Vec<(usize, usize)>,
}

pub struct Layer {
    pub index: usize,
    pub lines: Vec<String>,
    pub z: Option<Real>,
    pub height: Real,
    pub fan_setting: Real,
    pub features: Vec<Feature>,

    /// Bridge-infill polygons (merged), candidates for arc fill.
    pub polys: Vec<Polygon<Real>>,
    /// The candidates that passed validation.
    pub valid_polys: Vec<Polygon<Real>>,
    /// Outer boundary traced by this layer's external perimeters, used by
    /// the layer above to find supported ground.
    pub ext_perimeter_polys: Vec<Polygon<Real>>,
    ext_perimeters_built: bool,
    /// Valid polygons whose arc generation failed; their original infill
    /// must survive.
    pub failed_arc_gen_polys: Vec<Polygon<Real>>,
    /// Line spans of solid-infill parts that must not be deleted.
    pub failed_solid_infill_locations: Vec<(usize, usize)>,
    /// Bridge-infill point runs before buffering.
    pub bridge_infills: Vec<Vec<Point<Real>>>,
    /// Overhang polygons inherited from layers below, for special cooling.
    pub old_polys: Vec<Polygon<Real>>,
    pub indexed_old_polys: GeomIndex<Polygon<Real>>,
    /// Solid-infill polygons above arcs, targets for the Hilbert pattern.
    pub solid_polys: Vec<Polygon<Real>>,
    pub solid_infills: Vec<LineString<Real>>,
    /// Line indices scheduled for removal by the rewriter.
    pub delete_lines: HashSet<usize>,
}

impl Layer {
    pub fn new(lines: Vec<String>, index: usize) -> Layer {
        Layer {
            index,
            lines,
            z: None,
            height: 0.0,
            fan_setting: 0.0,
            features: Vec::new(),
            polys: Vec::new(),
            valid_polys: Vec::new(),
            ext_perimeter_polys: Vec::new(),
            ext_perimeters_built: false,
            failed_arc_gen_polys: Vec::new(),
            failed_solid_infill_locations: Vec::new(),
            bridge_infills: Vec::new(),
            old_polys: Vec::new(),
            indexed_old_polys: GeomIndex::default(),
            solid_polys: Vec::new(),
            solid_infills: Vec::new(),
            delete_lines: HashSet::new(),
        }
    }

    // ==================
    // Header extraction
    // ==================

    /// Z height from the first `G1 … Z…` command.
    pub fn read_z(&mut self) {
        self.z = self.lines.iter().find_map(|l| z_value(l));
    }

    /// Slice thickness from the `;HEIGHT:` comment, else the slicer default.
    pub fn read_height(&mut self, default_height: Real) {
        for line in &self.lines {
            if line.contains(";HEIGHT") {
                if let Some(h) = line.rsplit(':').next().and_then(|s| s.trim().parse().ok()) {
                    self.height = h;
                    return;
                }
            }
        }
        warn!(
            "layer {}: no height comment found, using layer-height default",
            self.index
        );
        self.height = default_height;
    }

    /// The fan setting at layer entry: the layer's first `M106 S…`, else the
    /// value propagated from below.
    pub fn spot_fan_setting(&mut self, last_fan_setting: Real) -> Real {
        self.fan_setting = self
            .lines
            .iter()
            .find_map(|l| fan_value(l))
            .unwrap_or(last_fan_setting);
        self.fan_setting
    }

    // ===================
    // Feature extraction
    // ===================

    /// Split the layer at `;TYPE:` comments. Each feature owns everything up
    /// to the next tag or end of layer.
    pub fn extract_features(&mut self) {
        self.features.clear();
        let mut current: Option<(String, usize)> = None;
        for (i, line) in self.lines.iter().enumerate() {
            if line.contains(";TYPE:") {
                match current.take() {
                    Some((tag, start)) => self.features.push(Feature {
                        tag: Some(tag),
                        start,
                        end: i,
                    }),
                    None if i > 0 => self.features.push(Feature {
                        tag: None,
                        start: 0,
                        end: i,
                    }),
                    None => {},
                }
                current = Some((line.clone(), i));
            }
        }
        match current {
            Some((tag, start)) => self.features.push(Feature {
                tag: Some(tag),
                start,
                end: self.lines.len(),
            }),
            None if !self.lines.is_empty() => self.features.push(Feature {
                tag: None,
                start: 0,
                end: self.lines.len(),
            }),
            None => {},
        }
    }

    /// Where the tool actually sits when a feature begins: the last `G1 X`
    /// of the preceding feature.
    fn real_feature_start_point(&self, idf: usize) -> Option<Point<Real>> {
        if idf < 1 {
            return None;
        }
        let prev = &self.features[idf - 1];
        self.lines[prev.motion_start()..prev.end]
            .iter()
            .rev()
            .find(|l| l.contains("G1 X"))
            .and_then(|l| extract_point(l))
    }

    /// Reconstruct the point runs of every feature matching `tag_literal`.
    /// Wipe sections are skipped; travel moves optionally split runs and the
    /// resumption point after a travel is kept; `G2`/`G3` expand to chords.
    pub fn spot_feature_points(
        &self,
        tag_literal: &str,
        split_at_wipe: bool,
        include_real_start: bool,
        split_at_travel: bool,
        settings: &Settings,
    ) -> FeatureParts {
        let wipe_start = settings.tag(FeatureTag::WipeStart);
        let wipe_end = settings.tag(FeatureTag::WipeEnd);
        let ppm = settings.params.arc_points_per_mm;
        let mut found = FeatureParts::default();

        for (idf, fe) in self.features.iter().enumerate() {
            let Some(tag) = &fe.tag else { continue };
            if !tag.contains(tag_literal) {
                continue;
            }
            let motion_start = fe.motion_start();

            let mut pts: Vec<Point<Real>> = Vec::new();
            let mut travel_points: Vec<Point<Real>> = Vec::new();
            let mut begin = motion_start;
            let mut end = motion_start;
            let mut travel_begin = motion_start;
            let mut wiping = false;
            let mut travelling = false;
            let mut prev_pt: Option<Point<Real>> = None;

            if include_real_start && idf > 0 {
                if let Some(sp) = self.real_feature_start_point(idf) {
                    pts.push(sp);
                    prev_pt = Some(sp);
                }
            }

            for (i, line) in self.lines[motion_start..fe.end].iter().enumerate() {
                let abs = motion_start + i;
                if !wiping && has_motion_word(line) {
                    if travelling {
                        if is_travel_move(line) || !line.contains('X') {
                            if let Some(p) = extract_point(line) {
                                travel_points.push(p);
                                travel_begin = abs;
                            }
                        } else {
                            travelling = false;
                            if let Some(&resume) = travel_points.last() {
                                pts.push(resume);
                                begin = travel_begin;
                                end = travel_begin + 1;
                                travel_points.clear();
                            }
                            if let Some(geom) = parse_motion(line, prev_pt, ppm) {
                                if pts.is_empty() {
                                    begin = abs;
                                }
                                match geom {
                                    MotionGeom::Point(p) => pts.push(p),
                                    MotionGeom::Arc(chords) => pts.extend(chords),
                                }
                                end = abs + 1;
                            }
                        }
                    } else if split_at_travel && is_travel_move(line) {
                        if pts.len() >= 2 {
                            found.parts.push(std::mem::take(&mut pts));
                            found.locations.push((begin, end));
                        }
                        if !found.parts.is_empty() {
                            pts.clear();
                        }
                        if let Some(p) = extract_point(line) {
                            travel_points.push(p);
                            travel_begin = abs;
                        }
                        travelling = true;
                    } else if crate::gcode::parse::command_part(line).contains('E') {
                        if let Some(geom) = parse_motion(line, prev_pt, ppm) {
                            if pts.is_empty() {
                                begin = abs;
                            }
                            match geom {
                                MotionGeom::Point(p) => pts.push(p),
                                MotionGeom::Arc(chords) => pts.extend(chords),
                            }
                            end = abs + 1;
                        }
                    }
                }

                if line.contains(wipe_start) {
                    wiping = true;
                    if split_at_wipe {
                        if pts.len() >= 2 {
                            found.parts.push(std::mem::take(&mut pts));
                            found.locations.push((begin, end));
                        }
                        pts.clear();
                    }
                }
                if line.contains(wipe_end) {
                    wiping = false;
                }
                if let Some(p) = extract_point(line) {
                    prev_pt = Some(p);
                }
            }

            if pts.len() >= 2 {
                found.locations.push((begin, end));
                found.parts.push(pts);
            }
        }

        found
    }

    // ==========================
    // Polygons from feature runs
    // ==========================

    /// Close a run of `G1 X` points into a polygon; wipes skipped, stops at
    /// the first travel move. Needs at least three points.
    fn polygon_from_lines(lines: &[&str], settings: &Settings) -> Option<Polygon<Real>> {
        let wipe_start = settings.tag(FeatureTag::WipeStart);
        let wipe_end = settings.tag(FeatureTag::WipeEnd);
        let mut pts: Vec<Point<Real>> = Vec::new();
        let mut wiping = false;
        for line in lines {
            if is_travel_move(line) {
                break;
            }
            if line.contains(wipe_end) {
                wiping = false;
            } else if wiping {
                continue;
            } else if line.contains(wipe_start) {
                wiping = true;
            }
            if line.contains("G1 X") {
                if let Some(p) = extract_point(line) {
                    pts.push(p);
                }
            }
        }
        if pts.len() > 2 {
            Some(Polygon::new(LineString::from(pts), vec![]))
        } else {
            None
        }
    }

    /// Trace the outer boundary: consecutive external-perimeter features
    /// (overhang perimeters included once one has started) merge into one
    /// closed outline each.
    pub fn make_external_perimeter_polys(&mut self, settings: &Settings) {
        if self.ext_perimeters_built {
            return;
        }
        self.ext_perimeters_built = true;
        let ext_tag = settings.tag(FeatureTag::ExternalPerimeter);
        let overhang_tag = settings.tag(FeatureTag::OverhangPerimeter);

        let mut started = false;
        let mut collected: Vec<String> = Vec::new();
        for idf in 0..self.features.len() {
            let fe = &self.features[idf];
            let ftype = fe.tag.clone().unwrap_or_default();
            let is_ext = ftype.contains(ext_tag);
            let is_overhang = ftype.contains(overhang_tag);

            if is_ext || (is_overhang && started) {
                if !started {
                    collected.clear();
                    if idf >= 1 {
                        if let Some(p) = self.real_feature_start_point(idf) {
                            collected.push(crate::gcode::emit::point_cmd(p, 0.0, None));
                        } else {
                            warn!("layer {}: could not fetch real start point", self.index);
                        }
                    }
                    started = true;
                }
                collected.extend(
                    self.lines[fe.motion_start()..fe.end].iter().cloned(),
                );
            }

            if started && (idf == self.features.len() - 1 || !(is_ext || is_overhang)) {
                let refs: Vec<&str> = collected.iter().map(String::as_str).collect();
                if let Some(poly) = Self::polygon_from_lines(&refs, settings) {
                    self.ext_perimeter_polys.push(poly);
                }
                started = false;
            }
        }
    }

    /// Collect the bridge-infill point runs.
    pub fn spot_bridge_infill(&mut self, settings: &Settings) {
        let tag = settings.tag(FeatureTag::BridgeInfill);
        self.bridge_infills = self
            .spot_feature_points(tag, false, true, true, settings)
            .parts;
    }

    /// Buffer each bridge run into a region polygon.
    pub fn make_polys_from_bridge_infill(&mut self, extend: Real) {
        for run in &self.bridge_infills {
            let ls = LineString::from(run.clone());
            self.polys
                .extend(polygons_of(buffer_line_string(&ls, extend + 5e-2)));
        }
    }

    /// Overhang-perimeter runs as polylines.
    pub fn overhang_perimeter_line_strings(&self, settings: &Settings) -> Vec<LineString<Real>> {
        let tag = settings.tag(FeatureTag::OverhangPerimeter);
        self.spot_feature_points(tag, false, true, false, settings)
            .parts
            .into_iter()
            .map(LineString::from)
            .collect()
    }

    // ===================
    // Overhang validation
    // ===================

    /// Keep the bridge polygons that are either close to an overhang
    /// perimeter on this layer or (for internal bridging) overlap the
    /// previous layer's external perimeter.
    pub fn verify_infill_polys(
        &mut self,
        prev_layer: &mut Layer,
        max_dist_for_validation: Real,
        settings: &Settings,
    ) {
        let overhangs = self.overhang_perimeter_line_strings(settings);
        if overhangs.is_empty() && !settings.params.replace_internal_bridging {
            return;
        }
        debug!(
            "layer {}: {} overhang perimeters found",
            self.index,
            overhangs.len()
        );

        prev_layer.make_external_perimeter_polys(settings);
        let overhang_index = GeomIndex::bulk_load(overhangs, |ls| ls.bounding_rect());
        let ext_index =
            GeomIndex::bulk_load(prev_layer.ext_perimeter_polys.clone(), |p| p.bounding_rect());

        for (idp, poly) in self.polys.iter().enumerate() {
            if poly.unsigned_area() <= 0.0 {
                debug!("layer {}: poly {} is degenerate", self.index, idp);
                continue;
            }
            if settings.params.check_for_allowed_space
                && !settings.params.allowed_space.contains(poly)
            {
                debug!("layer {}: poly {} outside allowed space", self.index, idp);
                continue;
            }
            if poly.unsigned_area() < settings.params.min_area {
                debug!(
                    "layer {}: poly {} below minimum area ({:.2})",
                    self.index,
                    idp,
                    poly.unsigned_area()
                );
                continue;
            }

            let Some(rect) = poly.bounding_rect() else { continue };
            let mut verified = overhang_index
                .candidates_in_rect(rect, max_dist_for_validation)
                .into_iter()
                .any(|i| poly.euclidean_distance(&overhang_index.geoms()[i]) < max_dist_for_validation);
            if !verified && settings.params.replace_internal_bridging {
                verified = ext_index
                    .candidates_in_rect(rect, 0.0)
                    .into_iter()
                    .any(|i| poly.relate(&ext_index.geoms()[i]).is_overlaps());
            }

            if verified {
                self.valid_polys.push(poly.clone());
            } else {
                debug!(
                    "layer {}: poly {} not close to an overhang perimeter",
                    self.index, idp
                );
            }
        }
    }

    // ==============
    // Start geometry
    // ==============

    /// For an overhang polygon on the layer above: the part of its boundary
    /// resting on this layer's perimeter (the start line) and the remaining
    /// boundary the arcs must not cross. Both operands get a small inflation
    /// first so shared boundary segments cannot produce degenerate output.
    pub fn make_start_line_string(
        &mut self,
        poly: &Polygon<Real>,
        settings: &Settings,
    ) -> Option<(MultiLineString<Real>, MultiLineString<Real>)> {
        self.make_external_perimeter_polys(settings);
        if self.ext_perimeter_polys.is_empty() {
            warn!(
                "layer {}: no external perimeter found in previous layer",
                self.index
            );
            return None;
        }

        let poly_boundary = polygon_boundary(poly);
        for ep in &self.ext_perimeter_polys {
            let ep_buf = buffer_polygon(ep, BOUNDARY_TOLERANCE);
            if !ep_buf.intersects(poly) {
                continue;
            }
            let start_area = ep_buf.intersection(&to_multi(poly));
            let start_boundary = multi_polygon_boundary(&start_area);

            let boundary_sleeve = buffer_multi_line_string(&poly_boundary, BOUNDARY_TOLERANCE);
            let mut start_line = clip_lines(&boundary_sleeve, &start_boundary, false);

            let boundary_without_start;
            if is_degenerate(&start_line) {
                let contained = start_area.0.iter().all(|p| poly.contains(p));
                if !contained {
                    warn!(
                        "layer {}: no shared boundary between overhang and support",
                        self.index
                    );
                    return None;
                }
                start_line = start_boundary;
                boundary_without_start = poly_boundary.clone();
                if is_degenerate(&start_line) {
                    warn!(
                        "layer {}: support area has an empty boundary",
                        self.index
                    );
                    return None;
                }
            } else {
                let start_sleeve = buffer_multi_line_string(&start_boundary, BOUNDARY_TOLERANCE);
                boundary_without_start = clip_lines(&start_sleeve, &poly_boundary, true);
            }
            return Some((start_line, boundary_without_start));
        }

        warn!(
            "layer {}: overhang does not touch the previous layer's external perimeter",
            self.index
        );
        None
    }

    // =========================
    // Solid infill (above arcs)
    // =========================

    pub fn index_old_polys(&mut self) {
        self.indexed_old_polys =
            GeomIndex::bulk_load(self.old_polys.clone(), |p| p.bounding_rect());
    }

    /// True when any of the points lies inside an inherited overhang region.
    fn solid_infill_pts_qualify(&self, pts: &[Point<Real>]) -> bool {
        for p in pts {
            let probe = Rect::new(p.0, p.0);
            for i in self.indexed_old_polys.candidates_in_rect(probe, 0.0) {
                if self.indexed_old_polys.geoms()[i].contains(p) {
                    return true;
                }
            }
        }
        false
    }

    /// Collect solid-infill runs above arcs; runs touching no inherited
    /// region keep their original lines (their spans are recorded so the
    /// deletion pass can spare them).
    pub fn spot_solid_infill(&mut self, settings: &Settings) {
        let tag = settings.tag(FeatureTag::SolidInfill);
        let found = self.spot_feature_points(tag, false, true, true, settings);
        for (part, location) in found.parts.into_iter().zip(found.locations) {
            if self.solid_infill_pts_qualify(&part) {
                self.solid_infills.push(LineString::from(part));
            } else {
                self.failed_solid_infill_locations.push(location);
            }
        }
    }

    pub fn make_polys_from_solid_infill(&mut self, extend: Real) {
        for ls in &self.solid_infills {
            self.solid_polys
                .extend(polygons_of(buffer_line_string(ls, extend + 5e-2)));
        }
    }

    /// Whether a motion line sits within cooling distance of an inherited
    /// overhang region.
    pub fn is_close_to_bridging(&self, line: &str, max_detection_distance: Real) -> bool {
        if !line.contains("G1") {
            return false;
        }
        let Some(p) = extract_point(line) else {
            return false;
        };
        self.indexed_old_polys
            .candidates_near_point([p.x(), p.y()], max_detection_distance)
            .into_iter()
            .any(|i| {
                p.euclidean_distance(&self.indexed_old_polys.geoms()[i])
                    <= max_detection_distance
            })
    }

    // =========
    // Deletion
    // =========

    /// Mark the lines of every feature matching `tag_literal` whose motion
    /// enters one of `polys` for removal. The range runs from the feature's
    /// tag line up to the next feature, excluding trailing travel moves;
    /// spans recorded as must-keep are subtracted back out.
    pub fn prepare_deletion(&mut self, tag_literal: &str, polys: &[Polygon<Real>]) {
        let index = GeomIndex::bulk_load(polys.to_vec(), |p| p.bounding_rect());
        let mut marked: HashSet<usize> = HashSet::new();

        for idf in 0..self.features.len() {
            let fe = &self.features[idf];
            let Some(tag) = &fe.tag else { continue };
            if !tag.contains(tag_literal) {
                continue;
            }

            let mut delete_this = false;
            for line in &self.lines[fe.motion_start()..fe.end] {
                let Some(p) = extract_point(line) else { continue };
                let probe = Rect::new(p.0, p.0);
                for i in index.candidates_in_rect(probe, 0.0) {
                    if self.failed_arc_gen_polys.contains(&index.geoms()[i]) {
                        continue;
                    }
                    if index.geoms()[i].contains(&p) {
                        delete_this = true;
                        break;
                    }
                }
                if delete_this {
                    break;
                }
            }
            if !delete_this {
                continue;
            }

            let mut end = if idf < self.features.len() - 1 {
                self.features[idf + 1].start
            } else {
                self.lines.len()
            };
            while end > fe.start + 1 && is_travel_move(&self.lines[end - 1]) {
                end -= 1;
            }

            let mut range: HashSet<usize> = (fe.start..end).collect();
            let mut remaining: Vec<(usize, usize)> = Vec::new();
            for &(keep_begin, keep_end) in &self.failed_solid_infill_locations {
                if (keep_begin..keep_end).any(|i| range.contains(&i)) {
                    for i in keep_begin..keep_end {
                        range.remove(&i);
                    }
                } else {
                    remaining.push((keep_begin, keep_end));
                }
            }
            self.failed_solid_infill_locations = remaining;
            marked.extend(range);
        }

        self.delete_lines.extend(marked);
    }
}

fn is_degenerate(mls: &MultiLineString<Real>) -> bool {
    mls.0.iter().all(|ls| ls.0.len() < 2)
}
