//! Dual-encoded legacy arrays
//!
//! A legacy array field is a string. When the archive carries a binary
//! payload the elements are read from it in document order and the string
//! content is irrelevant; otherwise the string itself holds the numbers,
//! for example `"{ 1.0 2.0 3.0 }"`.

use bytemuck::Pod;
use glam::{IVec4, Mat4, Vec2, Vec3, Vec4};

use super::cursor::BinaryCursor;

/// Element that can be built from a run of parsed numbers.
pub trait TextElement: Pod {
    const COMPONENTS: usize;

    /// Whether one parsed number fits a component exactly.
    fn accepts(_value: f64) -> bool {
        true
    }

    fn from_components(values: &[f64]) -> Self;
}

fn is_integral_in(value: f64, min: f64, max: f64) -> bool {
    value.fract() == 0.0 && (min..=max).contains(&value)
}

impl TextElement for f32 {
    const COMPONENTS: usize = 1;

    fn from_components(values: &[f64]) -> Self {
        values[0] as f32
    }
}

impl TextElement for u16 {
    const COMPONENTS: usize = 1;

    fn accepts(value: f64) -> bool {
        is_integral_in(value, 0.0, f64::from(u16::MAX))
    }

    fn from_components(values: &[f64]) -> Self {
        values[0] as u16
    }
}

impl TextElement for i32 {
    const COMPONENTS: usize = 1;

    fn accepts(value: f64) -> bool {
        is_integral_in(value, f64::from(i32::MIN), f64::from(i32::MAX))
    }

    fn from_components(values: &[f64]) -> Self {
        values[0] as i32
    }
}

impl TextElement for Vec2 {
    const COMPONENTS: usize = 2;

    fn from_components(values: &[f64]) -> Self {
        Vec2::new(values[0] as f32, values[1] as f32)
    }
}

impl TextElement for Vec3 {
    const COMPONENTS: usize = 3;

    fn from_components(values: &[f64]) -> Self {
        Vec3::new(values[0] as f32, values[1] as f32, values[2] as f32)
    }
}

impl TextElement for Vec4 {
    const COMPONENTS: usize = 4;

    fn from_components(values: &[f64]) -> Self {
        Vec4::new(
            values[0] as f32,
            values[1] as f32,
            values[2] as f32,
            values[3] as f32,
        )
    }
}

impl TextElement for IVec4 {
    const COMPONENTS: usize = 4;

    fn accepts(value: f64) -> bool {
        i32::accepts(value)
    }

    fn from_components(values: &[f64]) -> Self {
        IVec4::new(
            values[0] as i32,
            values[1] as i32,
            values[2] as i32,
            values[3] as i32,
        )
    }
}

/// Sixteen numbers in row-major order.
impl TextElement for Mat4 {
    const COMPONENTS: usize = 16;

    fn from_components(values: &[f64]) -> Self {
        let mut cols = [0.0f32; 16];
        for (slot, v) in cols.iter_mut().zip(values) {
            *slot = *v as f32;
        }
        Mat4::from_cols_array(&cols).transpose()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TextArrayError {
    #[error("'{0}' is not a number")]
    BadToken(String),

    #[error("'{0}' is out of range for the element type")]
    OutOfRange(String),

    #[error("expected {expected} numbers, found {found}")]
    TooFew { expected: usize, found: usize },
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '{' | '}' | ',')
}

fn parse_number<T: TextElement>(token: &str) -> Result<f64, TextArrayError> {
    let value = token
        .parse::<f64>()
        .map_err(|_| TextArrayError::BadToken(token.to_string()))?;
    if !T::accepts(value) {
        return Err(TextArrayError::OutOfRange(token.to_string()));
    }
    Ok(value)
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(is_delimiter).filter(|t| !t.is_empty())
}

fn build<T: TextElement>(numbers: &[f64]) -> Vec<T> {
    numbers
        .chunks_exact(T::COMPONENTS)
        .map(T::from_components)
        .collect()
}

/// Parse `count` elements out of a whitespace, brace or comma delimited list.
///
/// Numbers beyond `count` elements are ignored. Integer elements reject
/// fractional and out-of-range numbers instead of truncating them.
pub fn parse_text_array<T: TextElement>(text: &str, count: usize) -> Result<Vec<T>, TextArrayError> {
    let expected = count.saturating_mul(T::COMPONENTS);
    // Every number takes at least one character.
    let mut numbers = Vec::with_capacity(expected.min(text.len()));
    for token in tokens(text) {
        if numbers.len() == expected {
            break;
        }
        numbers.push(parse_number::<T>(token)?);
    }
    if numbers.len() < expected {
        return Err(TextArrayError::TooFew {
            expected,
            found: numbers.len(),
        });
    }
    Ok(build(&numbers))
}

/// Parse every element in a list whose length is not declared anywhere.
pub fn parse_text_list<T: TextElement>(text: &str) -> Result<Vec<T>, TextArrayError> {
    let numbers = tokens(text)
        .map(parse_number::<T>)
        .collect::<Result<Vec<_>, _>>()?;
    let partial = numbers.len() % T::COMPONENTS;
    if partial != 0 {
        return Err(TextArrayError::TooFew {
            expected: numbers.len() - partial + T::COMPONENTS,
            found: numbers.len(),
        });
    }
    Ok(build(&numbers))
}

/// Where a dual-encoded array was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySource {
    Binary,
    Text,
}

/// Whether a dual-encoded field is present at all.
///
/// Empty strings and non-positive counts mean "no data".
pub fn is_declared(text: &str, count: i64) -> bool {
    !text.is_empty() && count > 0
}

/// Read one dual-encoded array: the binary cursor first, then the string.
///
/// Returns `Ok(None)` when the field is not declared. The cursor is only
/// advanced when the binary read succeeds.
pub fn read_dual_array<T: TextElement>(
    text: &str,
    count: i64,
    cursor: &mut BinaryCursor<'_>,
) -> Result<Option<(Vec<T>, ArraySource)>, TextArrayError> {
    if !is_declared(text, count) {
        return Ok(None);
    }
    let count = count as usize;
    if let Some(values) = cursor.read_array::<T>(count) {
        return Ok(Some((values, ArraySource::Binary)));
    }
    parse_text_array(text, count).map(|values| Some((values, ArraySource::Text)))
}
