// Our Real scalar type. Toolpath files carry ~6 significant digits, so f64
// leaves plenty of headroom for the boolean-op tolerances below.
pub type Real = f64;

/// A small epsilon for geometric comparisons.
pub const EPSILON: Real = 1e-6;

/// Inflation applied before boolean ops whose operands may share boundary
/// segments exactly. Boundary-equality ambiguities are resolved by growing
/// one operand by this amount first.
pub const BOUNDARY_TOLERANCE: Real = 1e-2;

// Pi
/// Archimedes' constant (π)
pub const PI: Real = core::f64::consts::PI;

/// The full circle constant (τ)
pub const TAU: Real = core::f64::consts::TAU;
