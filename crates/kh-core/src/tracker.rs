//! Common interface for aggregates fed by key transitions.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::types::{Combo, KeyPosition, KeyTransition};

/// An aggregate built from the key transition stream.
///
/// Implementations guard their state with a single reader/writer lock, so
/// transitions and queries may arrive from any thread.
pub trait Tracker: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Applies one transition with its original timestamp.
    fn handle_transition(&self, transition: &KeyTransition, verbose: bool);

    /// Applies a transition that happened just now.
    fn handle_key_now(&self, position: KeyPosition, pressed: bool, verbose: bool) {
        self.handle_transition(&KeyTransition::new(position, pressed, Utc::now()), verbose);
    }

    /// Returns every aggregate entry involving `position`, in no particular order.
    ///
    /// Unknown positions yield an empty list.
    fn gather_combos(&self, position: KeyPosition) -> Vec<Combo>;
}

/// Feeds one transition to every tracker in turn.
pub fn feed_all(trackers: &[Arc<dyn Tracker>], transition: &KeyTransition, verbose: bool) {
    for tracker in trackers {
        tracker.handle_transition(transition, verbose);
    }
}

// Trackers never leave their state half-updated across a panic point, so a
// poisoned lock still holds consistent data.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
