//! Small scanning helpers shared by the three grammars.

use crate::{Error, Result};

/// Splits a string on commas that are not enclosed in `{}`.
///
/// An empty input produces no parts.
pub(crate) fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_u32;
    let mut start = 0;

    for (position, character) in input.char_indices() {
        match character {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..position]);
                start = position + 1;
            }
            _ => {}
        }
    }

    if start < input.len() || !parts.is_empty() {
        parts.push(&input[start..]);
    }

    parts
}

pub(crate) fn parse_u32(part: &str, what: &str) -> Result<u32> {
    part.parse::<u32>().map_err(|inner| {
        Error::caused_by(
            part.to_string(),
            format!("{what} could not be parsed as an integer"),
            inner,
        )
    })
}

/// Parses the `signed` production: an integer preceded by any number of
/// `+` and `-` signs, each `-` flipping the overall sign.
pub(crate) fn parse_signed(part: &str) -> Result<i32> {
    let mut sign = 1_i32;
    let mut rest = part.trim();

    loop {
        if let Some(tail) = rest.strip_prefix('+') {
            rest = tail.trim_start();
        } else if let Some(tail) = rest.strip_prefix('-') {
            sign = -sign;
            rest = tail.trim_start();
        } else {
            break;
        }
    }

    let magnitude = rest.parse::<u32>().map_err(|inner| {
        Error::caused_by(
            part.to_string(),
            "stride could not be parsed as an integer".to_string(),
            inner,
        )
    })?;

    let magnitude = i32::try_from(magnitude).map_err(|inner| {
        Error::caused_by(part.to_string(), "stride is out of range".to_string(), inner)
    })?;

    Ok(sign * magnitude)
}
