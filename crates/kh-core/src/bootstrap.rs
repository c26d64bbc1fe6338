//! Rebuilding tracker state from the stored event log.
//!
//! Trackers keep no state of their own on disk. On startup each one replays
//! the full history through the same path used for live events. Replay runs
//! on a blocking task so the caller is free to start ingesting right away;
//! [`BootstrapHandle::wait`] is the readiness gate for callers that want the
//! history applied before any live event.
//!
//! # Races
//!
//! Live events fed while a replay is still running interleave with the
//! replayed ones. Each call is atomic but there is no global order between
//! the two streams, so combos spanning the boundary may be miscounted.

use std::convert::Infallible;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::tracker::Tracker;
use crate::types::KeyTransition;

/// A stored history of key transitions.
pub trait HistorySource: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Delivers every stored transition in ascending timestamp order.
    ///
    /// Stops early when `sink` returns [`ControlFlow::Break`].
    fn replay(
        self,
        sink: &mut dyn FnMut(KeyTransition) -> ControlFlow<()>,
    ) -> Result<(), Self::Error>;
}

impl HistorySource for Vec<KeyTransition> {
    type Error = Infallible;

    fn replay(
        self,
        sink: &mut dyn FnMut(KeyTransition) -> ControlFlow<()>,
    ) -> Result<(), Self::Error> {
        for transition in self {
            if sink(transition).is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Bootstrap failures.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The history source failed part way through.
    #[error("failed to replay history into {tracker} tracker: {source}")]
    Source {
        tracker: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The replay task panicked.
    #[error("history replay for {tracker} tracker panicked")]
    Panicked { tracker: &'static str },
}

/// Lifecycle of a tracker's history replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    /// Replay is still running; queries see partial history.
    Bootstrapping,
    /// Full history applied.
    Ready,
    /// Replay failed. The tracker keeps accepting live events but its history is incomplete.
    Degraded,
    /// Replay stopped on request before the history ended.
    Cancelled,
}

impl TrackerStatus {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Bootstrapping => 0,
            Self::Ready => 1,
            Self::Degraded => 2,
            Self::Cancelled => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Bootstrapping,
            1 => Self::Ready,
            2 => Self::Degraded,
            _ => Self::Cancelled,
        }
    }
}

#[derive(Debug)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn get(&self) -> TrackerStatus {
        TrackerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: TrackerStatus) {
        self.0.store(status.to_u8(), Ordering::Release);
    }
}

/// Summary of a finished replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Transitions applied to the tracker.
    pub events: u64,
    /// True if the replay stopped because of a cancellation request.
    pub cancelled: bool,
}

/// Replays `source` into `tracker` on the current thread.
///
/// Checks `cancel` before every transition.
pub fn replay<S: HistorySource>(
    tracker: &dyn Tracker,
    source: S,
    cancel: &AtomicBool,
) -> Result<ReplayStats, S::Error> {
    let mut stats = ReplayStats::default();
    source.replay(&mut |transition| {
        if cancel.load(Ordering::Relaxed) {
            stats.cancelled = true;
            return ControlFlow::Break(());
        }
        tracker.handle_transition(&transition, false);
        stats.events += 1;
        ControlFlow::Continue(())
    })?;
    Ok(stats)
}

/// A running history replay.
#[derive(Debug)]
pub struct BootstrapHandle {
    tracker: &'static str,
    status: Arc<StatusCell>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<Result<ReplayStats, BootstrapError>>,
}

impl BootstrapHandle {
    /// Name of the tracker being bootstrapped.
    pub const fn tracker(&self) -> &'static str {
        self.tracker
    }

    pub fn status(&self) -> TrackerStatus {
        self.status.get()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the replay to stop before the next transition.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Waits for the replay to finish.
    pub async fn wait(self) -> Result<ReplayStats, BootstrapError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                self.status.set(TrackerStatus::Degraded);
                tracing::error!(tracker = self.tracker, error = %err, "history replay task failed");
                Err(BootstrapError::Panicked {
                    tracker: self.tracker,
                })
            }
        }
    }
}

/// Starts replaying `source` into `tracker` on a blocking task.
///
/// Must be called from within a Tokio runtime. The tracker is usable
/// immediately; see the [module docs](self) for the race this allows.
pub fn spawn_bootstrap<S: HistorySource>(tracker: Arc<dyn Tracker>, source: S) -> BootstrapHandle {
    let name = tracker.name();
    let status = Arc::new(StatusCell(AtomicU8::new(
        TrackerStatus::Bootstrapping.to_u8(),
    )));
    let cancel = Arc::new(AtomicBool::new(false));

    let task = {
        let status = Arc::clone(&status);
        let cancel = Arc::clone(&cancel);
        tokio::task::spawn_blocking(move || {
            tracing::debug!(tracker = name, "replaying history");
            match replay(tracker.as_ref(), source, &cancel) {
                Ok(stats) => {
                    status.set(if stats.cancelled {
                        TrackerStatus::Cancelled
                    } else {
                        TrackerStatus::Ready
                    });
                    tracing::info!(
                        tracker = name,
                        events = stats.events,
                        cancelled = stats.cancelled,
                        "history replayed"
                    );
                    Ok(stats)
                }
                Err(err) => {
                    status.set(TrackerStatus::Degraded);
                    tracing::error!(
                        tracker = name,
                        error = %err,
                        "history replay failed, tracker continues with partial history"
                    );
                    Err(BootstrapError::Source {
                        tracker: name,
                        source: Box::new(err),
                    })
                }
            }
        })
    };

    BootstrapHandle {
        tracker: name,
        status,
        cancel,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::mpsc;

    use chrono::{DateTime, TimeDelta, Utc};

    use crate::combo::ComboTracker;
    use crate::neighbor::NeighborTracker;
    use crate::types::{Combo, KeyPosition};

    fn pos(value: i64) -> KeyPosition {
        KeyPosition::new(value).unwrap()
    }

    fn history() -> Vec<KeyTransition> {
        let start = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        [
            (1, true),
            (2, true),
            (1, false),
            (2, false),
            (3, true),
            (1, true),
            (4, true),
            (3, false),
            (4, false),
            (1, false),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (p, pressed))| {
            let offset = TimeDelta::milliseconds(i64::try_from(i).unwrap() * 50);
            KeyTransition::new(pos(p), pressed, start + offset)
        })
        .collect()
    }

    fn sorted(mut combos: Vec<Combo>) -> Vec<Combo> {
        Combo::sort_for_display(&mut combos);
        combos
    }

    /// Fails after delivering a fixed number of transitions.
    struct FailingSource {
        events: Vec<KeyTransition>,
    }

    #[derive(Debug, Error)]
    #[error("disk went away")]
    struct DiskGone;

    impl HistorySource for FailingSource {
        type Error = DiskGone;

        fn replay(
            self,
            sink: &mut dyn FnMut(KeyTransition) -> ControlFlow<()>,
        ) -> Result<(), Self::Error> {
            for transition in self.events {
                if sink(transition).is_break() {
                    return Ok(());
                }
            }
            Err(DiskGone)
        }
    }

    /// Blocks on a channel until the sender is dropped.
    struct ChannelSource(mpsc::Receiver<KeyTransition>);

    impl HistorySource for ChannelSource {
        type Error = Infallible;

        fn replay(
            self,
            sink: &mut dyn FnMut(KeyTransition) -> ControlFlow<()>,
        ) -> Result<(), Self::Error> {
            for transition in self.0 {
                if sink(transition).is_break() {
                    break;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn replay_matches_live_feed() {
        let live = ComboTracker::default();
        for transition in history() {
            live.handle_key(
                transition.position,
                transition.pressed,
                transition.timestamp,
                false,
            );
        }

        let replayed = ComboTracker::default();
        let stats = replay(&replayed, history(), &AtomicBool::new(false)).unwrap();
        assert_eq!(
            stats,
            ReplayStats {
                events: 10,
                cancelled: false
            }
        );

        for p in 1..=4 {
            assert_eq!(
                sorted(live.gather_combos(pos(p))),
                sorted(replayed.gather_combos(pos(p)))
            );
        }
    }

    #[test]
    fn replay_respects_cancel_flag() {
        let tracker = NeighborTracker::new();
        let stats = replay(&tracker, history(), &AtomicBool::new(true)).unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.events, 0);
        assert!(tracker.gather_combos(pos(1)).is_empty());
    }

    #[tokio::test]
    async fn spawned_bootstrap_becomes_ready() {
        let combos = Arc::new(ComboTracker::default());
        let neighbors = Arc::new(NeighborTracker::new());

        let combo_handle = spawn_bootstrap(combos.clone(), history());
        let neighbor_handle = spawn_bootstrap(neighbors.clone(), history());
        assert_eq!(combo_handle.tracker(), "combo");

        let combo_stats = combo_handle.wait().await.unwrap();
        let neighbor_stats = neighbor_handle.wait().await.unwrap();
        assert_eq!(combo_stats.events, 10);
        assert_eq!(neighbor_stats.events, 10);

        assert_eq!(combos.gather_combos(pos(1)).len(), 4);
        // Presses: 1 2 3 1 4
        assert_eq!(neighbors.edge_count(pos(1), pos(2)), 1);
        assert_eq!(neighbors.edge_count(pos(2), pos(3)), 1);
        assert_eq!(neighbors.edge_count(pos(3), pos(1)), 1);
        assert_eq!(neighbors.edge_count(pos(1), pos(4)), 1);
    }

    #[tokio::test]
    async fn failed_source_marks_tracker_degraded() {
        let tracker = Arc::new(ComboTracker::default());
        let mut events = history();
        events.truncate(2);

        let handle = spawn_bootstrap(tracker.clone(), FailingSource { events });
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.status(), TrackerStatus::Degraded);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, BootstrapError::Source { tracker: "combo", .. }));
        assert_eq!(
            err.to_string(),
            "failed to replay history into combo tracker: disk went away"
        );

        // Events delivered before the failure stay applied, and live events still work.
        assert_eq!(tracker.gather_combos(pos(1)).len(), 1);
        tracker.handle_key_now(pos(5), true, false);
        tracker.handle_key_now(pos(6), true, false);
        assert_eq!(tracker.gather_combos(pos(6)).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_bootstrap_stops_early() {
        let tracker = Arc::new(ComboTracker::default());
        let (tx, rx) = mpsc::channel();

        let handle = spawn_bootstrap(tracker.clone(), ChannelSource(rx));
        assert_eq!(handle.status(), TrackerStatus::Bootstrapping);
        handle.cancel();
        for transition in history() {
            // The replay may already have hung up after seeing the flag.
            let _ = tx.send(transition);
        }
        drop(tx);

        let stats = handle.wait().await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.events, 0);
        assert_eq!(tracker.combo_count(), 0);
    }
}
