//! Motion-command parsing: coordinate extraction, travel detection, layer
//! splitting, and expansion of `G2`/`G3` arc moves into chords.

use geo::Point;

use crate::float_types::Real;
use crate::geom::arc_between_angles;

/// The geometry a single motion command contributes.
pub enum MotionGeom {
    /// A linear move's endpoint.
    Point(Point<Real>),
    /// An arc move expanded into chord points.
    Arc(Vec<Point<Real>>),
}

/// The command portion of a line, with any comment stripped.
pub fn command_part(line: &str) -> &str {
    line.split(';').next().unwrap_or("")
}

/// True when the line starts with a `G<digit>` motion word.
pub fn has_motion_word(line: &str) -> bool {
    command_part(line)
        .split_whitespace()
        .next()
        .is_some_and(|t| {
            let b = t.as_bytes();
            b.len() >= 2 && b[0] == b'G' && b[1].is_ascii_digit()
        })
}

/// A travel move is a bare extruder move (`G1 E…`, retraction) or a
/// coordinate move without extrusion.
pub fn is_travel_move(line: &str) -> bool {
    let cmd = command_part(line);
    cmd.contains("G1 E") || (cmd.contains("G1 X") && !cmd.contains('E'))
}

/// Parse a `G0`–`G3` command. Linear moves yield their endpoint; arc moves
/// with a known previous position and I/J offsets expand into chords sampled
/// at `points_per_mm` (clockwise for `G2`). An arc without a previous
/// position degrades to its endpoint.
pub fn parse_motion(
    line: &str,
    prev: Option<Point<Real>>,
    points_per_mm: Real,
) -> Option<MotionGeom> {
    let cmd = command_part(line);
    let mut tokens = cmd.split_whitespace();
    let kind: u8 = match tokens.next()? {
        "G0" => 0,
        "G1" => 1,
        "G2" => 2,
        "G3" => 3,
        _ => return None,
    };

    let mut x: Option<Real> = None;
    let mut y: Option<Real> = None;
    let mut i_off: Option<Real> = None;
    let mut j_off: Option<Real> = None;
    for tok in tokens {
        let (letter, rest) = tok.split_at(1);
        match letter {
            "X" if x.is_none() => match rest.parse() {
                Ok(v) => x = Some(v),
                Err(_) => break,
            },
            "Y" if y.is_none() => {
                match rest.parse() {
                    Ok(v) => y = Some(v),
                    Err(_) => break,
                }
                // Linear moves carry nothing else we need.
                if prev.is_none() || kind <= 1 {
                    break;
                }
            },
            "I" if i_off.is_none() => match rest.parse() {
                Ok(v) => i_off = Some(v),
                Err(_) => break,
            },
            "J" if j_off.is_none() => {
                match rest.parse() {
                    Ok(v) => j_off = Some(v),
                    Err(_) => break,
                }
                break;
            },
            _ => {},
        }
    }

    let (x, y) = (x?, y?);
    match (prev, i_off, j_off) {
        (Some(p), Some(i), Some(j)) if kind >= 2 => {
            let radius = i.hypot(j);
            let center = Point::new(p.x() + i, p.y() + j);
            let start_angle = (p.y() - center.y()).atan2(p.x() - center.x());
            let end_angle = (y - center.y()).atan2(x - center.x());
            let chords =
                arc_between_angles(center, radius, start_angle, end_angle, points_per_mm, kind == 2);
            Some(MotionGeom::Arc(
                chords.0.into_iter().map(Point::from).collect(),
            ))
        },
        _ => Some(MotionGeom::Point(Point::new(x, y))),
    }
}

/// The endpoint of a motion command, if it has coordinates.
pub fn extract_point(line: &str) -> Option<Point<Real>> {
    match parse_motion(line, None, 1.0)? {
        MotionGeom::Point(p) => Some(p),
        MotionGeom::Arc(pts) => pts.last().copied(),
    }
}

/// The Z word of a `G1` command, if any.
pub fn z_value(line: &str) -> Option<Real> {
    let cmd = command_part(line);
    if !cmd.contains("G1") || !cmd.contains('Z') {
        return None;
    }
    cmd.split_whitespace()
        .find_map(|t| t.strip_prefix('Z')?.parse().ok())
}

/// The S word of an `M106` fan command, if the line is one.
pub fn fan_value(line: &str) -> Option<Real> {
    let cmd = command_part(line);
    if !cmd.contains("M106") {
        return None;
    }
    cmd.split_whitespace()
        .find_map(|t| t.strip_prefix('S')?.parse().ok())
}

/// Split the stream into layers at `;LAYER_CHANGE`. The first chunk is the
/// preamble before any layer change; the marker line opens each new chunk.
pub fn split_into_layers(lines: &[String]) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = Vec::new();
    let mut buf: Vec<String> = Vec::new();
    for line in lines {
        if line.contains(";LAYER_CHANGE") {
            out.push(std::mem::take(&mut buf));
        }
        buf.push(line.clone());
    }
    out.push(buf);
    out
}

/// Rewrite a motion line into a pure travel move: Z and feed words dropped,
/// extrusion zeroed, travel feed appended.
pub fn to_travel_move(line: &str, travel_speed: Real) -> String {
    let cmd = command_part(line);
    if cmd.split_whitespace().any(|t| t == "E0") {
        return line.to_string();
    }
    let mut words: Vec<&str> = cmd
        .split_whitespace()
        .filter(|t| {
            !t.starts_with('Z') && !t.starts_with('F') && !t.starts_with('E')
        })
        .collect();
    let feed = format!("F{:.0}", travel_speed * 60.0);
    words.push("E0");
    words.push(&feed);
    words.join(" ")
}
