//! Combo and neighbor queries over the replayed keypress log.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use kh_core::{Combo, ComboTracker, KeyPosition, NeighborTracker, Tracker, spawn_bootstrap};
use kh_db::Database;

use crate::Config;

/// Which aggregate to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Combos,
    Neighbors,
}

impl QueryKind {
    fn tracker(self, config: &Config) -> Result<Arc<dyn Tracker>> {
        let tracker: Arc<dyn Tracker> = match self {
            Self::Combos => Arc::new(ComboTracker::new(config.combo_config()?)),
            Self::Neighbors => Arc::new(NeighborTracker::new()),
        };
        Ok(tracker)
    }
}

pub async fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    kind: QueryKind,
    position: KeyPosition,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let history = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let tracker = kind.tracker(config)?;
    spawn_bootstrap(Arc::clone(&tracker), history)
        .wait()
        .await
        .context("failed to replay keypress log")?;

    let combos = top_combos(tracker.as_ref(), position, limit);
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&combos)?)?;
    } else {
        render(writer, kind, position, &combos)?;
    }
    Ok(())
}

/// Gathers combos for `position`, most frequent first.
pub fn top_combos(tracker: &dyn Tracker, position: KeyPosition, limit: Option<usize>) -> Vec<Combo> {
    let mut combos = tracker.gather_combos(position);
    Combo::sort_for_display(&mut combos);
    if let Some(limit) = limit {
        combos.truncate(limit);
    }
    combos
}

fn render<W: Write>(
    writer: &mut W,
    kind: QueryKind,
    position: KeyPosition,
    combos: &[Combo],
) -> Result<()> {
    if combos.is_empty() {
        writeln!(writer, "No data recorded for key {position}.")?;
        return Ok(());
    }

    match kind {
        QueryKind::Combos => writeln!(writer, "Combos with key {position}:")?,
        QueryKind::Neighbors => writeln!(writer, "Keys pressed after key {position}:")?,
    }
    for combo in combos {
        let keys = match kind {
            QueryKind::Combos => combo
                .keys
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" + "),
            QueryKind::Neighbors => combo
                .keys
                .iter()
                .rev()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> "),
        };
        writeln!(writer, "  {keys}: {}", combo.pressed)?;
    }
    Ok(())
}
