//! CLI subcommand implementations.

pub mod merge;
pub mod query;
pub mod stats;
pub mod track;
