//! Merge command: union several keypress logs into a fresh database.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use kh_db::Database;

pub fn run<W: Write>(writer: &mut W, inputs: &[PathBuf], out: &Path) -> Result<()> {
    if out.exists() {
        bail!("output file {} already exists", out.display());
    }
    for input in inputs {
        if !input.exists() {
            bail!("input file {} does not exist", input.display());
        }
    }

    let mut merged =
        Database::open(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut total = 0;
    for input in inputs {
        let source = Database::open(input)
            .with_context(|| format!("failed to open {}", input.display()))?;
        let copied = merged
            .merge_from(&source)
            .with_context(|| format!("failed to merge {}", input.display()))?;
        tracing::debug!(input = %input.display(), copied, "merged input");
        total += copied;
    }

    writeln!(
        writer,
        "Merged {total} key events from {} files into {}",
        inputs.len(),
        out.display()
    )?;
    Ok(())
}
