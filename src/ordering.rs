//! Reordering of the packed file list from an ordering hint file.
//!
//! A hint file lists one relative path per line, optionally prefixed with a
//! `label:`. Hinted paths (and all of their ancestors) move to the front in hint
//! order; everything else keeps its walk order behind them. Stable ordering keeps
//! successive archives diff-friendly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::common::Entry;

/// How much of the file list the hint file covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub matched: usize,
    pub total: usize,
}

impl Coverage {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.matched as f64 / self.total as f64 * 100.0
    }
}

/// Parses the hint file text into relative paths.
pub fn parse_hints(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| {
            let line = line.rsplit(':').next().unwrap_or(line).trim();
            line.strip_prefix('/').unwrap_or(line).to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Expands every hint into the chain of its ancestor paths under `root`.
///
/// `a/b/c` yields `root/a`, `root/a/b`, `root/a/b/c`.
pub fn expand_hints(hints: &[String], root: &Path) -> Vec<PathBuf> {
    let mut expanded = Vec::new();
    for hint in hints {
        let mut current = root.to_path_buf();
        for component in hint.split(['/', '\\']).filter(|c| !c.is_empty() && *c != ".") {
            current.push(component);
            expanded.push(current.clone());
        }
    }
    expanded
}

/// Reorders `entries` so hinted paths come first.
pub fn order_entries(entries: Vec<Entry>, ordering: &[PathBuf]) -> (Vec<Entry>, Coverage) {
    let total = entries.len();
    let mut slots: Vec<Option<Entry>> = entries.into_iter().map(Some).collect();
    let index_of: std::collections::HashMap<PathBuf, usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.as_ref().map(|e| (e.path.clone(), i)))
        .collect();

    let mut sorted = Vec::with_capacity(total);
    let mut seen: HashSet<&Path> = HashSet::new();
    for path in ordering {
        if !seen.insert(path.as_path()) {
            continue;
        }
        if let Some(&i) = index_of.get(path) {
            if let Some(entry) = slots[i].take() {
                sorted.push(entry);
            }
        }
    }
    let matched = sorted.len();
    sorted.extend(slots.into_iter().flatten());

    (sorted, Coverage { matched, total })
}

/// Reads the hint file at `hint_file` and reorders `entries` below `root`.
pub fn order_from_file(entries: Vec<Entry>, hint_file: &Path, root: &Path) -> std::io::Result<(Vec<Entry>, Coverage)> {
    let text = std::fs::read_to_string(hint_file)?;
    let ordering = expand_hints(&parse_hints(&text), root);
    let (sorted, coverage) = order_entries(entries, &ordering);
    tracing::info!("Ordering file has {:.2}% coverage.", coverage.percent());
    Ok((sorted, coverage))
}
