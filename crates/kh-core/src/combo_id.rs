//! Order-independent identity for sets of keys.

use crate::types::KeyPosition;

/// Two-word bitmask identifying a set of key positions.
///
/// Bit `k` of `low` is set for position `k < 64`, bit `k - 64` of `high` for the
/// rest. Positions are validated below [`MAX_KEYS`](crate::MAX_KEYS), so distinct
/// sets never share a mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ComboBitmask {
    pub low: u64,
    pub high: u64,
}

impl ComboBitmask {
    /// Encodes a set of keys. Order and duplicates do not matter.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a KeyPosition>) -> Self {
        keys.into_iter().fold(Self::default(), |mut mask, key| {
            mask.insert(*key);
            mask
        })
    }

    pub const fn insert(&mut self, key: KeyPosition) {
        let (high, bit) = Self::slot(key);
        if high {
            self.high |= bit;
        } else {
            self.low |= bit;
        }
    }

    /// Returns true if `key` is a member of the set.
    pub const fn contains(&self, key: KeyPosition) -> bool {
        let (high, bit) = Self::slot(key);
        let value = if high { self.high } else { self.low };
        value & bit != 0
    }

    /// Number of keys in the set.
    pub const fn len(&self) -> u32 {
        self.low.count_ones() + self.high.count_ones()
    }

    pub const fn is_empty(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    const fn slot(key: KeyPosition) -> (bool, u64) {
        let position = key.get();
        (position >= 64, 1 << (position % 64))
    }
}
