//! The layer rewriter: stream a layer's lines out again, dropping the lines
//! marked for deletion, splicing in the generated arc and Hilbert blocks at
//! their injection points, and applying the special cooling overrides near
//! inherited overhang regions. Tool position is restored after every
//! injected block; fan and feedrate state is tracked and rebalanced.

use crate::dialect::FeatureTag;
use crate::gcode::emit::{fan_cmd, retract_cmd};
use crate::gcode::parse::{command_part, to_travel_move};
use crate::layer::Layer;
use crate::settings::Settings;

/// Produce the modified line stream of one layer.
pub fn rewrite_layer(
    layer: &Layer,
    arc_block: &[String],
    hilbert_block: &[String],
    settings: &Settings,
) -> Vec<String> {
    let params = &settings.params;
    let solid_tag = settings.tag(FeatureTag::SolidInfill);

    let mut out: Vec<String> = Vec::new();
    let mut arcs_injected = false;
    let mut hilbert_injected = false;
    let mut current_print_speed = String::from("G1 F600");
    let mut messed_with_speed = false;
    let mut messed_with_fan = false;

    for (idline, line) in layer.lines.iter().enumerate() {
        // Arcs go in at the very start of the layer's first feature.
        if !arc_block.is_empty() && !arcs_injected && line.contains(";TYPE") {
            arcs_injected = true;
            out.push(";TYPE:Arc infill".to_string());
            out.push(fan_cmd(params.arc_fan_speed));
            out.extend(arc_block.iter().cloned());
            restore_position(&mut out, layer, idline, settings);
        }

        // Hilbert block at the start of the first solid infill.
        if !hilbert_block.is_empty() && !hilbert_injected && line.contains(solid_tag) {
            hilbert_injected = true;
            out.push(solid_tag.to_string());
            out.push(fan_cmd(params.above_arcs_fan_speed));
            out.extend(hilbert_block.iter().cloned());
            restore_position(&mut out, layer, idline, settings);
        }

        if command_part(line).contains("G1 F") {
            current_print_speed = line.clone();
        }

        if layer.delete_lines.contains(&idline) {
            continue;
        }

        if layer.is_close_to_bridging(line, params.cooling_setting_detection_distance) {
            if !messed_with_fan {
                out.push(fan_cmd(params.above_arcs_fan_speed));
                messed_with_fan = true;
            }
            out.push(format!(
                "{} F{:.0}",
                line, params.above_arcs_perimeter_print_speed
            ));
            messed_with_speed = true;
        } else {
            if messed_with_fan && !params.apply_above_fan_speed_to_whole_layer {
                out.push(format!("M106 S{:.0}", layer.fan_setting));
                messed_with_fan = false;
            }
            if messed_with_speed {
                out.push(current_print_speed.clone());
                messed_with_speed = false;
            }
            out.push(line.clone());
        }
    }

    if messed_with_fan {
        out.push(format!("M106 S{:.0}", layer.fan_setting));
    }

    out
}

/// After an injected block the tool sits at the block's end; retract, travel
/// back to the last position the original stream had reached before the
/// injection point (Z ignored), and unretract.
fn restore_position(out: &mut Vec<String>, layer: &Layer, injection_start: usize, settings: &Settings) {
    for id in (0..injection_start).rev() {
        let line = &layer.lines[id];
        if line.contains("G1 X") {
            out.push(retract_cmd(true, &settings.slicer));
            out.push(to_travel_move(line, settings.slicer.travel_speed));
            out.push(retract_cmd(false, &settings.slicer));
            break;
        }
    }
}
