//! Key event tracking engine.
//!
//! This crate turns a stream of key presses and releases into the aggregates
//! behind the usage heatmaps:
//! - Combos: sets of keys held down at the same time
//! - Neighbors: keys pressed directly one after another
//!
//! Both trackers implement [`Tracker`] and are rebuilt from the stored event
//! log on startup via [`spawn_bootstrap`].

pub mod bootstrap;
mod combo;
mod combo_id;
mod neighbor;
pub mod parser;
mod tracker;
mod types;

pub use bootstrap::{
    BootstrapError, BootstrapHandle, HistorySource, ReplayStats, TrackerStatus, replay,
    spawn_bootstrap,
};
pub use combo::{
    ComboTracker, ComboTrackerConfig, DEFAULT_MIN_COMBO_LEN, DEFAULT_STALE_AFTER_SECS,
};
pub use combo_id::ComboBitmask;
pub use neighbor::NeighborTracker;
pub use parser::{ParseError, parse_line};
pub use tracker::{Tracker, feed_all};
pub use types::{Combo, KeyEvent, KeyPosition, KeyTransition, MAX_KEYS, ValidationError};
