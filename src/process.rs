//! The processing pipeline: tokenize into layers, find and validate
//! overhang bridge regions per layer, fill them with arcs, plan the Hilbert
//! rewrite of the solid infill above, and splice everything back into the
//! line stream. Strictly single-threaded and in layer order; the only
//! forward state is the append-only `old_polys` annotation.

use log::info;

use crate::arcs::fill_polygon;
use crate::dialect::FeatureTag;
use crate::errors::PostError;
use crate::gcode::emit::{arc_cmds, calc_e_steps, hilbert_cmds};
use crate::gcode::parse::split_into_layers;
use crate::geom::merge_polygons;
use crate::hilbert::hilbert_chunks;
use crate::layer::Layer;
use crate::rewrite::rewrite_layer;
use crate::settings::Settings;

/// What a run produced. `output` is `None` when nothing was converted; the
/// input file must then stay untouched.
pub struct Outcome {
    pub output: Option<Vec<String>>,
    pub layers: usize,
    pub overhangs: usize,
    pub settings: Settings,
}

pub fn process(lines: &[String]) -> Result<Outcome, PostError> {
    let settings = Settings::from_lines(lines)?;
    settings.slicer.check_required()?;

    let chunks = split_into_layers(lines);
    info!("layers: {}", chunks.len());

    let mut layers: Vec<Layer> = Vec::with_capacity(chunks.len());
    let mut last_fan = 0.0;
    for (idl, chunk) in chunks.into_iter().enumerate() {
        let mut layer = Layer::new(chunk, idl);
        layer.read_z();
        layer.read_height(settings.slicer.layer_height);
        last_fan = layer.spot_fan_setting(last_fan);
        layers.push(layer);
    }

    let mut gcode_modified = false;
    let mut num_overhangs = 0usize;

    // Layer 0 is the preamble and layer 1 sits on the bed; neither is
    // touched.
    for idl in 2..layers.len() {
        let (below, rest) = layers.split_at_mut(idl);
        let prev_layer = &mut below[idl - 1];
        let (current, above) = rest.split_at_mut(1);
        let layer = &mut current[0];

        // The first previous layer in the walk never was "current" itself.
        if prev_layer.features.is_empty() {
            prev_layer.extract_features();
        }

        layer.extract_features();
        layer.spot_bridge_infill(&settings);
        layer.make_polys_from_bridge_infill(settings.params.extend_arcs_into_perimeter);
        layer.polys = merge_polygons(&layer.polys);
        layer.verify_infill_polys(
            prev_layer,
            2.0 * settings.slicer.perimeter_extrusion_width,
            &settings,
        );

        let mut arc_block: Vec<String> = Vec::new();
        if !layer.valid_polys.is_empty() {
            num_overhangs += 1;
            info!(
                "overhang found on layer {idl}: {} regions, z {:.2}",
                layer.valid_polys.len(),
                layer.z.unwrap_or_default()
            );

            // Annotate the layers above for special cooling, up to the
            // configured Z distance.
            if let Some(z) = layer.z {
                let max_z = z + settings.params.special_cooling_z_dist;
                let valid = layer.valid_polys.clone();
                let mut current_z = z;
                for upper in above.iter_mut() {
                    if current_z >= max_z {
                        break;
                    }
                    current_z = upper.z.unwrap_or(current_z);
                    upper.old_polys.extend(valid.iter().cloned());
                    upper.index_old_polys();
                }
            }

            let e_steps = calc_e_steps(&settings, None);
            let valid = layer.valid_polys.clone();
            for poly in &valid {
                match fill_polygon(poly, prev_layer, idl, &settings)? {
                    Some(fill) => {
                        for (ida, arc) in fill.arcs.iter().enumerate() {
                            arc_block.extend(arc_cmds(arc, e_steps, ida, &settings));
                            let n = settings.params.time_lapse_every_n_arcs;
                            if n > 0 && (ida + 1) % n == 0 {
                                arc_block.push("M240".to_string());
                            }
                        }
                    },
                    None => layer.failed_arc_gen_polys.push(poly.clone()),
                }
            }
            if !arc_block.is_empty() {
                gcode_modified = true;
            }
        }

        // Hilbert rewrite of the solid infill above earlier arcs.
        let mut hilbert_block: Vec<String> = Vec::new();
        let cooling_active = settings.params.do_special_cooling
            && !layer.old_polys.is_empty()
            && gcode_modified;
        if cooling_active {
            layer.spot_solid_infill(&settings);
            layer.make_polys_from_solid_infill(settings.params.extend_hilbert_into_perimeter);
            layer.solid_polys = merge_polygons(&layer.solid_polys);
            let mut all_chunks = Vec::new();
            for poly in &layer.solid_polys {
                all_chunks.extend(hilbert_chunks(poly, idl, &settings));
            }
            if !all_chunks.is_empty() {
                hilbert_block = hilbert_cmds(&all_chunks, &settings, layer.height);
            }
        }

        if arc_block.is_empty() && !cooling_active {
            continue;
        }

        info!("modifying layer {idl}");
        let bridge_tag = settings.tag(FeatureTag::BridgeInfill);
        let valid = layer.valid_polys.clone();
        layer.prepare_deletion(bridge_tag, &valid);
        if cooling_active {
            let solid_tag = settings.tag(FeatureTag::SolidInfill);
            let old = layer.old_polys.clone();
            layer.prepare_deletion(solid_tag, &old);
        }

        let rewritten = rewrite_layer(layer, &arc_block, &hilbert_block, &settings);
        layer.lines = rewritten;
        layer.extract_features();
        // The deletion set referred to the old numbering.
        layer.delete_lines.clear();
    }

    let layer_count = layers.len();
    if !gcode_modified {
        if num_overhangs > 0 {
            info!(
                "found {num_overhangs} overhangs, but no arcs could be generated due to \
                 unusual geometry"
            );
        } else {
            info!(
                "analysed {layer_count} layers, no matching overhangs found; if unexpected, \
                 check restricting settings such as MinArea or MinBridgeLength"
            );
        }
        return Ok(Outcome {
            output: None,
            layers: layer_count,
            overhangs: num_overhangs,
            settings,
        });
    }

    let mut output: Vec<String> = Vec::new();
    for layer in &layers {
        output.extend(layer.lines.iter().cloned());
    }
    Ok(Outcome {
        output: Some(output),
        layers: layer_count,
        overhangs: num_overhangs,
        settings,
    })
}
