//! Track command: record key events from the keyboard console.
//!
//! Each input is read on its own task and lines are merged into one channel.
//! The ingestion loop parses every line, appends it to the log and feeds it
//! to every tracker. When input closes the combo tracker, which now holds the
//! stored history plus this session, is summarized.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use kh_core::{
    BootstrapHandle, Combo, ComboTracker, KeyTransition, NeighborTracker, ParseError, Tracker,
    feed_all, parse_line, spawn_bootstrap,
};
use kh_db::Database;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Config;

/// Lines buffered between the readers and the ingestion loop.
const LINE_BUFFER: usize = 1024;

/// Combos listed in the closing summary.
const SUMMARY_COMBOS: usize = 5;

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Key events parsed and fed to the trackers.
    pub events: u64,
    /// Lines that looked like key events but failed to parse.
    pub rejected: u64,
    /// Key events that could not be written to the log.
    pub store_failures: u64,
}

/// Outcome of a tracking session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReport {
    pub ingest: IngestStats,
    /// Distinct combos known after the session, history included.
    pub distinct_combos: usize,
    /// Most frequent combos, best first.
    pub top_combos: Vec<Combo>,
}

impl TrackReport {
    fn from_tracker(ingest: IngestStats, combos: &ComboTracker) -> Self {
        let mut top_combos = combos.all_combos();
        let distinct_combos = top_combos.len();
        Combo::sort_for_display(&mut top_combos);
        top_combos.truncate(SUMMARY_COMBOS);
        Self {
            ingest,
            distinct_combos,
            top_combos,
        }
    }
}

pub async fn run(
    config: &Config,
    files: &[PathBuf],
    wait_history: bool,
    verbose: bool,
) -> Result<TrackReport> {
    if !files.is_empty() && files.len() != 2 {
        bail!("expected exactly 0 or 2 input files, got {}", files.len());
    }

    let mut db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    let combos = Arc::new(ComboTracker::new(config.combo_config()?));
    let trackers: Vec<Arc<dyn Tracker>> = vec![combos.clone(), Arc::new(NeighborTracker::new())];
    let handles = bootstrap_all(&trackers, &config.database_path)?;
    if wait_history {
        for handle in handles {
            await_bootstrap(handle).await;
        }
    } else {
        for handle in handles {
            tokio::spawn(await_bootstrap(handle));
        }
    }

    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    if files.is_empty() {
        tracing::info!("reading key events from stdin");
        spawn_line_reader("stdin".to_string(), tokio::io::stdin(), tx);
    } else {
        for path in files {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            spawn_line_reader(path.display().to_string(), file, tx.clone());
        }
        drop(tx);
    }

    let stats = ingest_lines(rx, &mut db, &trackers, verbose).await;
    tracing::info!(
        events = stats.events,
        rejected = stats.rejected,
        store_failures = stats.store_failures,
        "input closed"
    );
    Ok(TrackReport::from_tracker(stats, &combos))
}

/// Prints the session counters and the most frequent combos.
pub fn print_summary<W: Write>(writer: &mut W, report: &TrackReport) -> Result<()> {
    let ingest = &report.ingest;
    writeln!(
        writer,
        "Recorded {} key events ({} rejected, {} not stored)",
        ingest.events, ingest.rejected, ingest.store_failures
    )?;
    if report.top_combos.is_empty() {
        writeln!(writer, "No combos recorded yet.")?;
        return Ok(());
    }

    writeln!(writer, "Distinct combos: {}", report.distinct_combos)?;
    writeln!(writer, "Top combos:")?;
    for combo in &report.top_combos {
        let keys = combo
            .keys
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" + ");
        writeln!(writer, "  {keys}: {}", combo.pressed)?;
    }
    Ok(())
}

/// Starts replaying the stored log into every tracker, one connection each.
fn bootstrap_all(trackers: &[Arc<dyn Tracker>], path: &Path) -> Result<Vec<BootstrapHandle>> {
    trackers
        .iter()
        .map(|tracker| {
            let history = Database::open(path)
                .with_context(|| format!("failed to open {} for replay", path.display()))?;
            Ok(spawn_bootstrap(Arc::clone(tracker), history))
        })
        .collect()
}

/// Waits for a replay and logs the outcome. Failures leave the tracker degraded
/// but do not stop ingestion.
async fn await_bootstrap(handle: BootstrapHandle) {
    let tracker = handle.tracker();
    match handle.wait().await {
        Ok(stats) => {
            tracing::debug!(tracker, events = stats.events, "tracker ready");
        }
        Err(err) => {
            tracing::warn!(tracker, error = %err, "tracker history unavailable");
        }
    }
}

fn spawn_line_reader<R>(name: String, reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(input = %name, error = %err, "failed to read input");
                    break;
                }
            }
        }
        tracing::debug!(input = %name, "input finished");
    })
}

/// Consumes console lines until every sender is gone.
///
/// Lines that are not key events are skipped silently. Events are stamped on
/// arrival, stored, then fed to all trackers; a storage failure is logged and
/// the trackers are still updated.
pub async fn ingest_lines(
    mut rx: mpsc::Receiver<String>,
    db: &mut Database,
    trackers: &[Arc<dyn Tracker>],
    verbose: bool,
) -> IngestStats {
    let mut stats = IngestStats::default();

    while let Some(line) = rx.recv().await {
        let event = match parse_line(&line) {
            Ok(event) => event,
            Err(ParseError::EmptyLine) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed key event");
                stats.rejected += 1;
                continue;
            }
        };

        if verbose {
            tracing::info!(?event, "got key event");
        }

        let timestamp = Utc::now();
        if let Err(err) = db.insert_keypress_at(&event, timestamp) {
            tracing::warn!(error = %err, "could not store key event");
            stats.store_failures += 1;
        }

        let transition = KeyTransition::new(event.position, event.pressed, timestamp);
        feed_all(trackers, &transition, verbose);
        stats.events += 1;
    }

    stats
}
