//! PrivacyGate Filter List Compiler
//!
//! This crate compiles adblock-syntax filter lists into `pg_core`
//! [`FilterList`]s and loads them into a [`pg_core::FilterListRegistry`]
//! off the request path.

pub mod builder;
pub mod loader;
pub mod optimizer;
pub mod parser;

use log::info;
use pg_core::filter_list::{FilterList, ListHealth};

pub use builder::build_filter_list;
pub use loader::{
    load_lists, spawn_initial_load, DirectorySource, ListSource, LoadSummary, LoaderError,
    MemorySource,
};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_filter_list, parse_rule, ParsedList, RuleError, SkippedLine};

/// Failure to compile a whole list. Individual bad lines never cause this.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("list name is empty")]
    EmptyListName,
    #[error("line {line} contains binary data")]
    BinaryContent { line: usize },
}

/// Compile raw filter list text into a matchable list.
pub fn compile(list_name: &str, raw_text: &str) -> Result<FilterList, CompileError> {
    if list_name.trim().is_empty() {
        return Err(CompileError::EmptyListName);
    }
    if let Some(idx) = raw_text.lines().position(|line| line.contains('\0')) {
        return Err(CompileError::BinaryContent { line: idx + 1 });
    }

    let mut parsed = parse_filter_list(raw_text);
    let stats = optimize_rules(&mut parsed.rules);

    let health = ListHealth {
        lines: parsed.lines,
        skipped_lines: parsed.skipped.len(),
        duplicates_removed: stats.deduped,
        badfiltered: stats.badfilter_rules + stats.badfiltered_rules,
        ..ListHealth::default()
    };
    let list = build_filter_list(list_name, parsed.rules, health);

    let health = list.health();
    info!(
        "Compiled {list_name}: {} lines, {} block, {} allow, {} inert, {} skipped",
        health.lines, health.block_rules, health.allow_rules, health.inert_rules, health.skipped_lines
    );
    Ok(list)
}
