//! Counting keys pressed directly one after another.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::tracker::{self, Tracker};
use crate::types::{Combo, KeyPosition, KeyTransition};

#[derive(Debug, Default)]
struct NeighborState {
    last_key: Option<KeyPosition>,
    /// `counts[from][to]`: times `to` was pressed right after `from`.
    counts: HashMap<KeyPosition, HashMap<KeyPosition, u64>>,
}

impl NeighborState {
    fn record(&mut self, position: KeyPosition, verbose: bool) {
        if let Some(last) = self.last_key {
            let count = self
                .counts
                .entry(last)
                .or_default()
                .entry(position)
                .or_insert(0);
            *count += 1;

            if verbose {
                tracing::info!(from = %last, to = %position, count = *count, "neighbor counted");
            }
        }
        self.last_key = Some(position);
    }
}

/// Counts directed pairs of consecutive key presses.
///
/// Releases are ignored, so holding one key while tapping others still counts
/// each press as following the previous one.
#[derive(Debug, Default)]
pub struct NeighborTracker {
    state: RwLock<NeighborState>,
}

impl NeighborTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a transition. Releases are a no-op.
    pub fn handle_key(&self, position: KeyPosition, pressed: bool, verbose: bool) {
        if !pressed {
            return;
        }
        tracker::write(&self.state).record(position, verbose);
    }

    /// Times `to` was pressed directly after `from`.
    pub fn edge_count(&self, from: KeyPosition, to: KeyPosition) -> u64 {
        tracker::read(&self.state)
            .counts
            .get(&from)
            .and_then(|next| next.get(&to))
            .copied()
            .unwrap_or(0)
    }
}

impl Tracker for NeighborTracker {
    fn name(&self) -> &'static str {
        "neighbor"
    }

    fn handle_transition(&self, transition: &KeyTransition, verbose: bool) {
        self.handle_key(transition.position, transition.pressed, verbose);
    }

    /// One two-key combo `[next, position]` per key pressed right after `position`.
    fn gather_combos(&self, position: KeyPosition) -> Vec<Combo> {
        let state = tracker::read(&self.state);
        let Some(next) = state.counts.get(&position) else {
            return Vec::new();
        };
        next.iter()
            .map(|(&other, &pressed)| Combo {
                keys: vec![other, position],
                pressed,
            })
            .collect()
    }
}
