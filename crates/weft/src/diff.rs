//! Page content diffing
//!
//! Scopes expensive extraction work to material that actually changed
//! between two revisions of a page.

use std::collections::HashSet;

/// Lines present in `current` but absent from `previous`, compared
/// case/whitespace-insensitively and concatenated in original order.
///
/// With no previous content the full current content is returned unchanged.
/// An empty result means the edit is a no-op for extraction purposes. Blank
/// lines never count as new material.
pub fn diff_new_lines(previous: Option<&str>, current: &str) -> String {
    let Some(previous) = previous else {
        return current.to_string();
    };
    let seen: HashSet<String> = previous.lines().map(normalize_line).collect();
    let new_lines: Vec<&str> = current
        .lines()
        .filter(|line| {
            let normalized = normalize_line(line);
            !normalized.is_empty() && !seen.contains(&normalized)
        })
        .collect();
    new_lines.join("\n")
}

/// Whether `name` did NOT appear in the previous revision
/// (case-insensitive substring test).
///
/// Used to skip per-entity valid-time extraction for entities that were
/// already present; contradiction detection still runs over the full diff
/// because a recurring name does not imply its asserted fact is unchanged.
pub fn is_new_entity(name: &str, previous: Option<&str>) -> bool {
    match previous {
        Some(previous) => !previous.to_lowercase().contains(&name.to_lowercase()),
        None => true,
    }
}

fn normalize_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
