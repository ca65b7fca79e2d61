//! Grid code codec.
//!
//! A grid code names a cell of the EPSG:5179 plane with 12 characters:
//! a column letter, a row letter, then the 5-digit x and y offsets inside
//! the 100 km block the letters select. The letters index fixed alphabets
//! anchored at block (7, 14), the south-west corner of the covered region.
//!
//! ```text
//! "CD" + "54321" + "09876"  ->  x = (2 + 7) * 100000 + 54321
//!                               y = (2 + 14) * 100000 + 9876
//! ```

use rayon::prelude::*;

use super::projection::ProjectedPoint;

pub const CELL_SIZE: i64 = 100_000;
pub const GRID_CODE_LEN: usize = 12;

const X_ORIGIN_CELLS: i64 = 7;
const Y_ORIGIN_CELLS: i64 = 14;

const X_ALPHABET: [char; 7] = ['A', 'B', 'C', 'D', 'E', 'F', 'G'];
const Y_ALPHABET: [char; 7] = ['B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// National-standard Hangul letters for the Latin grid letters A..H.
const KOREAN_LETTERS: [(char, char); 8] = [
    ('A', '가'),
    ('B', '나'),
    ('C', '다'),
    ('D', '라'),
    ('E', '마'),
    ('F', '바'),
    ('G', '사'),
    ('H', '아'),
];

/// Encodes a projected coordinate into its grid code.
///
/// Block indices outside the alphabets are clamped to the nearest edge
/// block rather than rejected. Returns `None` only for non-finite input.
pub fn encode(x: f64, y: f64) -> Option<String> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let block_index = |v: f64, origin: i64| {
        let max_idx = (X_ALPHABET.len() - 1) as f64;
        ((v / CELL_SIZE as f64).floor() - origin as f64).clamp(0.0, max_idx) as usize
    };
    let xi = block_index(x, X_ORIGIN_CELLS);
    let yi = block_index(y, Y_ORIGIN_CELLS);

    let x_suffix = (x.abs().floor() as i64) % CELL_SIZE;
    let y_suffix = (y.abs().floor() as i64) % CELL_SIZE;

    Some(format!(
        "{}{}{:05}{:05}",
        X_ALPHABET[xi], Y_ALPHABET[yi], x_suffix, y_suffix
    ))
}

fn parse_offset(digits: &str) -> Option<i64> {
    if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Decodes a grid code into the south-west corner of its cell.
///
/// Malformed codes (shorter than 12 characters, letters outside the
/// alphabets, non-numeric offsets) decode to `None`; they are never an
/// error. Characters after the twelfth are ignored.
pub fn decode(code: &str) -> Option<ProjectedPoint> {
    if code.len() < GRID_CODE_LEN || !code.is_ascii() {
        return None;
    }
    let mut chars = code.chars();
    let x_char = chars.next()?;
    let y_char = chars.next()?;

    let x_index = X_ALPHABET.iter().position(|c| *c == x_char)? as i64;
    let y_index = Y_ALPHABET.iter().position(|c| *c == y_char)? as i64;

    let x_tail = parse_offset(&code[2..7])?;
    let y_tail = parse_offset(&code[7..12])?;

    Some(ProjectedPoint::new(
        ((x_index + X_ORIGIN_CELLS) * CELL_SIZE + x_tail) as f64,
        ((y_index + Y_ORIGIN_CELLS) * CELL_SIZE + y_tail) as f64,
    ))
}

/// Decodes a grid code into a WKT point string for geometry columns.
pub fn decode_wkt(code: &str) -> Option<String> {
    decode(code).map(|p| format!("POINT ({} {})", p.x as i64, p.y as i64))
}

/// Replaces the two leading Latin letters with their Hangul counterparts.
pub fn to_korean(code: &str) -> Option<String> {
    if code.chars().count() < GRID_CODE_LEN {
        return None;
    }
    let lookup = |c: char| {
        KOREAN_LETTERS
            .iter()
            .find(|(latin, _)| *latin == c)
            .map(|(_, hangul)| *hangul)
    };
    let mut chars = code.chars();
    let first = lookup(chars.next()?)?;
    let second = lookup(chars.next()?)?;

    let mut korean = String::with_capacity(code.len() + 4);
    korean.push(first);
    korean.push(second);
    korean.extend(chars);
    Some(korean)
}

pub fn encode_many(xs: &[f64], ys: &[f64]) -> Vec<Option<String>> {
    assert_eq!(xs.len(), ys.len(), "coordinate arrays must have equal length");
    xs.par_iter()
        .zip(ys.par_iter())
        .map(|(x, y)| encode(*x, *y))
        .collect()
}

pub fn decode_many<S: AsRef<str> + Sync>(codes: &[S]) -> Vec<Option<ProjectedPoint>> {
    codes.par_iter().map(|c| decode(c.as_ref())).collect()
}

pub fn decode_wkt_many<S: AsRef<str> + Sync>(codes: &[S]) -> Vec<Option<String>> {
    codes.par_iter().map(|c| decode_wkt(c.as_ref())).collect()
}
