//! Counting sets of keys held down at the same time.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, TimeDelta, Utc};

use crate::combo_id::ComboBitmask;
use crate::tracker::{self, Tracker};
use crate::types::{Combo, KeyPosition, KeyTransition, MAX_KEYS};

/// Default minimum number of simultaneously held keys that make a combo.
pub const DEFAULT_MIN_COMBO_LEN: usize = 2;

/// Default time after which a key without a release is assumed released.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 10;

/// Tuning for [`ComboTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboTrackerConfig {
    /// Smallest held set that gets counted.
    pub min_combo_len: usize,
    /// A key held longer than this is released when any later event arrives.
    /// Heals presses whose release was lost on the serial link.
    pub stale_after: TimeDelta,
}

impl Default for ComboTrackerConfig {
    fn default() -> Self {
        Self {
            min_combo_len: DEFAULT_MIN_COMBO_LEN,
            stale_after: TimeDelta::seconds(DEFAULT_STALE_AFTER_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyHoldState {
    pressed: bool,
    since: DateTime<Utc>,
}

#[derive(Debug)]
struct ComboState {
    /// Indexed by position; `None` until the key is first seen.
    holds: Vec<Option<KeyHoldState>>,
    /// Positions seen so far, ascending.
    known: Vec<KeyPosition>,
    combos: HashMap<ComboBitmask, Combo>,
}

impl ComboState {
    fn new() -> Self {
        Self {
            holds: vec![None; MAX_KEYS],
            known: Vec::new(),
            combos: HashMap::new(),
        }
    }

    fn record(&mut self, transition: &KeyTransition, config: &ComboTrackerConfig, verbose: bool) {
        let KeyTransition {
            position,
            pressed,
            timestamp,
        } = *transition;

        if let Err(at) = self.known.binary_search(&position) {
            self.known.insert(at, position);
        }
        self.holds[position.index()] = Some(KeyHoldState {
            pressed,
            since: timestamp,
        });

        let mut held = Vec::new();
        for &key in &self.known {
            let Some(hold) = self.holds[key.index()].as_mut() else {
                continue;
            };
            if hold.pressed && timestamp - hold.since > config.stale_after {
                tracing::debug!(
                    position = %key,
                    held_ms = (timestamp - hold.since).num_milliseconds(),
                    "ignoring stale key press"
                );
                hold.pressed = false;
            }
            if hold.pressed {
                held.push(key);
            }
        }

        if held.is_empty() || held.len() < config.min_combo_len {
            return;
        }

        let id = ComboBitmask::from_keys(&held);
        let combo = self
            .combos
            .entry(id)
            .and_modify(|combo| combo.pressed += 1)
            .or_insert_with(|| Combo {
                keys: held,
                pressed: 1,
            });

        if verbose {
            tracing::info!(
                keys = ?combo.keys,
                pressed = combo.pressed,
                "combo counted"
            );
        }
    }
}

/// Tracks every distinct set of at least `min_combo_len` keys held together.
///
/// A combo is counted on each transition after which the held set is large
/// enough, so pressing `1, 2, 3` then releasing `3` counts `{1,2}` twice and
/// `{1,2,3}` once.
#[derive(Debug)]
pub struct ComboTracker {
    config: ComboTrackerConfig,
    state: RwLock<ComboState>,
}

impl Default for ComboTracker {
    fn default() -> Self {
        Self::new(ComboTrackerConfig::default())
    }
}

impl ComboTracker {
    pub fn new(config: ComboTrackerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ComboState::new()),
        }
    }

    pub const fn config(&self) -> &ComboTrackerConfig {
        &self.config
    }

    /// Applies a transition that happened at `timestamp`.
    ///
    /// Timestamps are expected to be non-decreasing; staleness is measured
    /// against the newest transition.
    pub fn handle_key(
        &self,
        position: KeyPosition,
        pressed: bool,
        timestamp: DateTime<Utc>,
        verbose: bool,
    ) {
        let transition = KeyTransition::new(position, pressed, timestamp);
        tracker::write(&self.state).record(&transition, &self.config, verbose);
    }

    /// Number of distinct combos recorded so far.
    pub fn combo_count(&self) -> usize {
        tracker::read(&self.state).combos.len()
    }

    /// Snapshot of every combo recorded so far.
    pub fn all_combos(&self) -> Vec<Combo> {
        tracker::read(&self.state).combos.values().cloned().collect()
    }
}

impl Tracker for ComboTracker {
    fn name(&self) -> &'static str {
        "combo"
    }

    fn handle_transition(&self, transition: &KeyTransition, verbose: bool) {
        tracker::write(&self.state).record(transition, &self.config, verbose);
    }

    fn gather_combos(&self, position: KeyPosition) -> Vec<Combo> {
        tracker::read(&self.state)
            .combos
            .iter()
            .filter(|(id, _)| id.contains(position))
            .map(|(_, combo)| combo.clone())
            .collect()
    }
}
