//! Parsing of keyboard firmware debug output.
//!
//! The keyboard logs one line per key transition over its serial console, e.g.
//!
//! ```text
//! [00:00:12.345,678] <dbg> zmk: position_state_changed_listener: Row: 2, col: 5, position: 17, pressed: true
//! ```
//!
//! Everything except the four labelled fields is ignored.

use thiserror::Error;

use crate::types::{KeyEvent, KeyPosition, ValidationError};

/// Terminal reset sequence some firmware builds append to the last field.
const ANSI_RESET: &str = "\x1b[0m";

/// Errors from [`parse_line`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is not a key event. Most console output falls in this bucket.
    #[error("line does not contain a key event")]
    EmptyLine,
    /// A labelled field had a value that could not be parsed.
    #[error("could not parse {field} value {value:?} in line {line:?}")]
    InvalidField {
        field: &'static str,
        value: String,
        line: String,
    },
    /// The position does not fit the tracked key range.
    #[error("invalid position in line {line:?}: {source}")]
    Position {
        line: String,
        #[source]
        source: ValidationError,
    },
}

/// Parses one console line into a key event.
pub fn parse_line(line: &str) -> Result<KeyEvent, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let mut row = None;
    let mut col = None;
    let mut position = None;
    let mut pressed = None;

    let mut i = 0;
    while i + 1 < tokens.len() {
        let value = tokens[i + 1].trim_end_matches(',');
        let consumed = match tokens[i] {
            "Row:" => {
                row = Some(parse_number("row", value, line)?);
                true
            }
            "col:" => {
                col = Some(parse_number("col", value, line)?);
                true
            }
            "position:" => {
                position = Some(parse_number("position", value, line)?);
                true
            }
            "pressed:" => {
                pressed = Some(parse_pressed(value, line)?);
                true
            }
            _ => false,
        };
        i += if consumed { 2 } else { 1 };
    }

    let (Some(row), Some(col), Some(position), Some(pressed)) = (row, col, position, pressed)
    else {
        return Err(ParseError::EmptyLine);
    };

    let position = KeyPosition::new(position).map_err(|source| ParseError::Position {
        line: line.to_string(),
        source,
    })?;

    Ok(KeyEvent {
        row,
        col,
        position,
        pressed,
    })
}

fn parse_number(field: &'static str, value: &str, line: &str) -> Result<i64, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidField {
        field,
        value: value.to_string(),
        line: line.to_string(),
    })
}

fn parse_pressed(value: &str, line: &str) -> Result<bool, ParseError> {
    match value.trim_end_matches(ANSI_RESET) {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ParseError::InvalidField {
            field: "pressed",
            value: other.to_string(),
            line: line.to_string(),
        }),
    }
}
