//! Stats command for showing press counts per key.

use std::io::Write;

use anyhow::{Context, Result};

use kh_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let counts = db.key_counts()?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&counts)?)?;
        return Ok(());
    }

    writeln!(writer, "Database: {}", config.database_path.display())?;
    if counts.is_empty() {
        writeln!(writer, "No key presses recorded.")?;
        return Ok(());
    }

    let total: i64 = counts.iter().map(|c| c.count).sum();
    writeln!(writer, "Key presses: {total}")?;
    writeln!(writer, "{:>8} {:>4} {:>4} {:>8}", "position", "row", "col", "presses")?;
    for count in counts {
        writeln!(
            writer,
            "{:>8} {:>4} {:>4} {:>8}",
            count.position, count.row, count.col, count.count
        )?;
    }

    Ok(())
}
