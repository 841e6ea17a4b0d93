//! Slicer dialects. Each supported slicer contributes two small tables: a
//! settings-key map onto canonical names and a feature-tag map onto the
//! comment literals it writes into the toolpath. The core only ever sees
//! canonical names; adding a slicer means extending the two `match`es here.

/// The slicer that produced the file, detected from its settings-block
/// marker. Established once after settings parse and passed around
/// explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    PrusaSlicer,
    OrcaSlicer,
}

/// Canonical feature tags. `literal()` yields the dialect's spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureTag {
    BridgeInfill,
    ExternalPerimeter,
    OverhangPerimeter,
    SolidInfill,
    WipeStart,
    WipeEnd,
}

impl Dialect {
    /// Detect a dialect from a begin-of-settings marker line.
    pub fn from_marker(line: &str) -> Option<Dialect> {
        if line.contains("; prusaslicer_config = begin") {
            Some(Dialect::PrusaSlicer)
        } else if line.contains("; CONFIG_BLOCK_START") {
            Some(Dialect::OrcaSlicer)
        } else {
            None
        }
    }

    /// Translate a dialect-specific settings key to its canonical name.
    /// Keys outside the table are irrelevant to arc generation and dropped.
    pub fn canonical_key(&self, key: &str) -> Option<&'static str> {
        match self {
            Dialect::PrusaSlicer => match key {
                "avoid_crossing_perimeters" => Some("avoid_crossing_perimeters"),
                "bridge_speed" => Some("bridge_speed"),
                "external_perimeters_first" => Some("external_perimeters_first"),
                "extrusion_width" => Some("extrusion_width"),
                "filament_diameter" => Some("filament_diameter"),
                "infill_extrusion_width" => Some("infill_extrusion_width"),
                "infill_first" => Some("infill_first"),
                "layer_height" => Some("layer_height"),
                "nozzle_diameter" => Some("nozzle_diameter"),
                "overhangs" => Some("overhangs"),
                "perimeter_extrusion_width" => Some("perimeter_extrusion_width"),
                "retract_length" => Some("retract_length"),
                "retract_speed" => Some("retract_speed"),
                "solid_infill_extrusion_width" => Some("solid_infill_extrusion_width"),
                "travel_speed" => Some("travel_speed"),
                "use_relative_e_distances" => Some("use_relative_e_distances"),
                "use_volumetric_e" => Some("use_volumetric_e"),
                _ => None,
            },
            Dialect::OrcaSlicer => match key {
                "reduce_crossing_wall" => Some("avoid_crossing_perimeters"),
                "bridge_speed" => Some("bridge_speed"),
                // Orca expresses perimeter ordering as a sequence string,
                // kept under its own canonical name.
                "wall_sequence" => Some("wall_sequence"),
                "line_width" => Some("extrusion_width"),
                "filament_diameter" => Some("filament_diameter"),
                "sparse_infill_line_width" => Some("infill_extrusion_width"),
                "is_infill_first" => Some("infill_first"),
                "layer_height" => Some("layer_height"),
                "nozzle_diameter" => Some("nozzle_diameter"),
                "detect_overhang_wall" => Some("overhangs"),
                "inner_wall_line_width" => Some("perimeter_extrusion_width"),
                "retraction_length" => Some("retract_length"),
                "retraction_speed" => Some("retract_speed"),
                "internal_solid_infill_line_width" => Some("solid_infill_extrusion_width"),
                "travel_speed" => Some("travel_speed"),
                "use_relative_e_distances" => Some("use_relative_e_distances"),
                _ => None,
            },
        }
    }

    /// The literal comment this dialect writes for a canonical feature tag.
    pub fn literal(&self, tag: FeatureTag) -> &'static str {
        match self {
            Dialect::PrusaSlicer => match tag {
                FeatureTag::BridgeInfill => ";TYPE:Bridge infill",
                FeatureTag::ExternalPerimeter => ";TYPE:External perimeter",
                FeatureTag::OverhangPerimeter => ";TYPE:Overhang perimeter",
                FeatureTag::SolidInfill => ";TYPE:Solid infill",
                FeatureTag::WipeStart => ";WIPE_START",
                FeatureTag::WipeEnd => ";WIPE_END",
            },
            Dialect::OrcaSlicer => match tag {
                FeatureTag::BridgeInfill => ";TYPE:Bridge",
                FeatureTag::ExternalPerimeter => ";TYPE:Outer wall",
                FeatureTag::OverhangPerimeter => ";TYPE:Overhang wall",
                FeatureTag::SolidInfill => ";TYPE:Internal solid infill",
                FeatureTag::WipeStart => ";WIPE_START",
                FeatureTag::WipeEnd => ";WIPE_END",
            },
        }
    }
}
