use std::collections::HashSet;
use tracing::{debug, warn};

use crate::selection::SelectionSnapshot;
use crate::types::{FileStatus, RawStatusEntry, StatusFacets};

/// Log line emitted when a refresh finds no pending changes.
pub const NOTHING_CHANGED: &str = "Nothing changed";

/// Lists an entry is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    pub modified: bool,
    pub staged: bool,
}

const MODIFIED_ONLY: Routing = Routing {
    modified: true,
    staged: false,
};
const STAGED_ONLY: Routing = Routing {
    modified: false,
    staged: true,
};
const BOTH: Routing = Routing {
    modified: true,
    staged: true,
};

/// Exact facet combinations and where they go. Anything absent is unclassifiable.
const ROUTING_TABLE: &[(StatusFacets, Routing)] = &[
    (StatusFacets::STAGED, STAGED_ONLY),
    (StatusFacets::ADDED, STAGED_ONLY),
    (StatusFacets::STAGED.union(StatusFacets::ADDED), STAGED_ONLY),
    (StatusFacets::UNTRACKED, MODIFIED_ONLY),
    (StatusFacets::MODIFIED, MODIFIED_ONLY),
    (StatusFacets::STAGED.union(StatusFacets::MODIFIED), BOTH),
    (StatusFacets::ADDED.union(StatusFacets::MODIFIED), BOTH),
    (StatusFacets::RENAMED_IN_INDEX, STAGED_ONLY),
    (
        StatusFacets::RENAMED_IN_INDEX.union(StatusFacets::STAGED),
        STAGED_ONLY,
    ),
    (
        StatusFacets::RENAMED_IN_INDEX.union(StatusFacets::MODIFIED),
        BOTH,
    ),
    (
        StatusFacets::RENAMED_IN_INDEX
            .union(StatusFacets::STAGED)
            .union(StatusFacets::MODIFIED),
        BOTH,
    ),
    (StatusFacets::MISSING, MODIFIED_ONLY),
    (StatusFacets::REMOVED, STAGED_ONLY),
];

/// Looks up where a facet combination belongs. `None` means no rule matches.
#[must_use]
pub fn route(facets: StatusFacets) -> Option<Routing> {
    ROUTING_TABLE
        .iter()
        .find(|(known, _)| *known == facets)
        .map(|(_, routing)| *routing)
}

/// Rebuilt lists produced by one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub modified: Vec<FileStatus>,
    pub staged: Vec<FileStatus>,
    /// Informational lines: one `[state] path` per classified entry, or a single "Nothing changed".
    pub log: Vec<String>,
    /// Entries whose facet combination matched no rule. They appear in neither list.
    pub unclassified: Vec<RawStatusEntry>,
}

impl Classification {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.staged.is_empty()
    }
}

/// Builds the modified and staged lists from raw status entries, restoring
/// each list's selection from its own snapshot.
#[must_use]
pub fn classify(
    entries: &[RawStatusEntry],
    modified_snapshot: &SelectionSnapshot,
    staged_snapshot: &SelectionSnapshot,
) -> Classification {
    let mut result = Classification::default();
    let mut modified_seen = HashSet::new();
    let mut staged_seen = HashSet::new();

    for entry in entries {
        if entry.facets.contains(StatusFacets::IGNORED) {
            continue;
        }
        let Some(routing) = route(entry.facets) else {
            warn!(path = %entry.path, state = %entry.facets, "Unclassifiable status");
            result.unclassified.push(entry.clone());
            continue;
        };

        let mut added = false;
        if routing.modified && modified_seen.insert(entry.path.as_str()) {
            result
                .modified
                .push(file_status(entry, entry.path.clone(), modified_snapshot));
            added = true;
        }
        if routing.staged && staged_seen.insert(entry.path.as_str()) {
            result
                .staged
                .push(file_status(entry, staged_display(entry), staged_snapshot));
            added = true;
        }
        if added {
            result
                .log
                .push(format!("[{}] {}", entry.state_text(), entry.path));
        }
    }

    if result.is_empty() {
        result.log = vec![NOTHING_CHANGED.to_string()];
    }

    debug!(
        modified = result.modified.len(),
        staged = result.staged.len(),
        unclassified = result.unclassified.len(),
        "Classified status entries"
    );
    result
}

fn file_status(entry: &RawStatusEntry, display: String, snapshot: &SelectionSnapshot) -> FileStatus {
    FileStatus {
        path: entry.path.clone(),
        status: entry.state_text(),
        display,
        selected: snapshot.was_selected(&entry.path),
    }
}

fn staged_display(entry: &RawStatusEntry) -> String {
    match &entry.rename {
        Some(rename) if entry.facets.contains(StatusFacets::RENAMED_IN_INDEX) => format!(
            " {} -> {} [{}%]",
            rename.old_path, rename.new_path, rename.similarity
        ),
        _ => entry.path.clone(),
    }
}
