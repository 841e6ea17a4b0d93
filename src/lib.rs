//! Post-processor for FDM toolpath files that replaces slicer-generated
//! bridge infill over overhangs with a **concentric-arc fill**, enabling
//! steep (up to 90°) unsupported overhangs, and optionally rewrites the
//! solid infill above those regions with a **Hilbert space-filling pattern**
//! plus adjusted cooling to suppress warping.
//!
//! The pipeline (see [`process::process`]):
//! 1. detect the slicer dialect and read its settings block,
//! 2. split the stream into layers and typed features,
//! 3. reconstruct bridge-infill polygons and validate them as overhangs
//!    against the previous layer's external perimeter,
//! 4. grow concentric arc bundles from supported ground outward
//!    (breadth-first frontier expansion),
//! 5. plan Hilbert infill for the solid layers above,
//! 6. splice the generated motion back into the stream, preserving
//!    retraction and tool-position state.
//!
//! All output is polyline `G1` segments; native arc commands are consumed
//! but never emitted.

#![forbid(unsafe_code)]
#![warn(clippy::approx_constant, clippy::all)]

pub mod arcs;
pub mod dialect;
pub mod errors;
pub mod float_types;
pub mod gcode;
pub mod geom;
pub mod hilbert;
pub mod layer;
pub mod process;
pub mod rewrite;
pub mod settings;

#[cfg(test)]
mod tests;
