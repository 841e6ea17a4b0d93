use thiserror::Error;

/// All the ways processing can fail outright. Anything not listed here is
/// either recoverable per polygon (the polygon is skipped and its original
/// infill preserved) or merely advisory.
#[derive(Debug, Error)]
pub enum PostError {
    /// (Io) The toolpath file could not be read or written
    #[error("toolpath i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// (NoDialect) No settings-block marker of any known slicer was found
    #[error("no known slicer config block detected in the file")]
    NoDialect,

    /// (IncompatibleSettings) A required slicer setting is missing or off
    #[error("incompatible slicer settings: {0}")]
    IncompatibleSettings(String),

    /// (DegenerateStartLine) A start polyline collapsed below two points
    #[error("start line with fewer than 2 points, layer {0}")]
    DegenerateStartLine(usize),

    /// (ArcMerge) Clipping a circle produced fragments that join into no
    /// printable polyline
    #[error("arc boundary merging failed: clipped circle produced no line segments")]
    ArcMerge,
}
