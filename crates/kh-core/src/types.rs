//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound (exclusive) on key positions a tracker can index.
///
/// Two 64-bit words back every [`ComboBitmask`](crate::ComboBitmask), one bit per position.
pub const MAX_KEYS: usize = 128;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The key position does not fit in the tracked key range.
    #[error("key position {value} is out of range (must be below {MAX_KEYS})")]
    PositionOutOfRange { value: i64 },
}

/// One physical key location on the keyboard matrix.
///
/// Always below [`MAX_KEYS`], so it can be used directly as a bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct KeyPosition(u8);

impl KeyPosition {
    /// Creates a position after checking it against [`MAX_KEYS`].
    pub fn new(value: impl Into<i64>) -> Result<Self, ValidationError> {
        let value = value.into();
        match u8::try_from(value) {
            Ok(v) if usize::from(v) < MAX_KEYS => Ok(Self(v)),
            _ => Err(ValidationError::PositionOutOfRange { value }),
        }
    }

    /// Returns the position as an index into per-key tables.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for KeyPosition {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyPosition> for i64 {
    fn from(position: KeyPosition) -> Self {
        Self::from(position.0)
    }
}

impl fmt::Display for KeyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key event as reported by the keyboard firmware, before it is timestamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub row: i64,
    pub col: i64,
    pub position: KeyPosition,
    pub pressed: bool,
}

/// A single press or release of one key at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTransition {
    pub position: KeyPosition,
    pub pressed: bool,
    pub timestamp: DateTime<Utc>,
}

impl KeyTransition {
    pub const fn new(position: KeyPosition, pressed: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            pressed,
            timestamp,
        }
    }
}

/// A set of keys observed together, with the number of times it was observed.
///
/// Combos from [`ComboTracker`](crate::ComboTracker) list `keys` in ascending
/// order. Neighbor combos list the following key first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combo {
    pub keys: Vec<KeyPosition>,
    pub pressed: u64,
}

impl Combo {
    /// Sorts by press count (descending), then key count, then keys.
    pub fn sort_for_display(combos: &mut [Self]) {
        combos.sort_by(|a, b| {
            b.pressed
                .cmp(&a.pressed)
                .then_with(|| a.keys.len().cmp(&b.keys.len()))
                .then_with(|| a.keys.cmp(&b.keys))
        });
    }
}
