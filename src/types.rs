use bitflags::bitflags;
use serde::Serialize;
use std::fmt;

bitflags! {
    /// Independent facets of a path's working-tree and index state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFacets: u16 {
        const STAGED = 1 << 0;
        const ADDED = 1 << 1;
        const MODIFIED = 1 << 2;
        const UNTRACKED = 1 << 3;
        const IGNORED = 1 << 4;
        const MISSING = 1 << 5;
        const REMOVED = 1 << 6;
        const RENAMED_IN_INDEX = 1 << 7;
        const CONFLICTED = 1 << 8;
        /// A status code this client does not know. Never routed to a list.
        const UNKNOWN = 1 << 9;
    }
}

const FACET_LABELS: [(StatusFacets, &str); 10] = [
    (StatusFacets::STAGED, "Staged"),
    (StatusFacets::ADDED, "Added"),
    (StatusFacets::MODIFIED, "Modified"),
    (StatusFacets::UNTRACKED, "Untracked"),
    (StatusFacets::IGNORED, "Ignored"),
    (StatusFacets::MISSING, "Missing"),
    (StatusFacets::REMOVED, "Removed"),
    (StatusFacets::RENAMED_IN_INDEX, "RenamedInIndex"),
    (StatusFacets::CONFLICTED, "Conflicted"),
    (StatusFacets::UNKNOWN, "Unknown"),
];

impl fmt::Display for StatusFacets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Unaltered");
        }
        let mut first = true;
        for (facet, label) in FACET_LABELS {
            if self.contains(facet) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(label)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Head-to-index rename detected by git.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameDetails {
    pub old_path: String,
    pub new_path: String,
    /// Similarity percentage, 0-100.
    pub similarity: u8,
}

/// One path as reported by the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatusEntry {
    pub path: String,
    pub facets: StatusFacets,
    pub rename: Option<RenameDetails>,
}

impl RawStatusEntry {
    #[must_use]
    pub fn new(path: impl Into<String>, facets: StatusFacets) -> Self {
        Self {
            path: path.into(),
            facets,
            rename: None,
        }
    }

    #[must_use]
    pub fn with_rename(mut self, old_path: &str, similarity: u8) -> Self {
        self.rename = Some(RenameDetails {
            old_path: old_path.to_string(),
            new_path: self.path.clone(),
            similarity,
        });
        self
    }

    /// Text used in log lines and as the status label of list entries.
    #[must_use]
    pub fn state_text(&self) -> String {
        self.facets.to_string()
    }
}

/// Entry shown in the modified or staged list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub status: String,
    pub display: String,
    pub selected: bool,
}

/// Which of the two pending lists an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Modified,
    Staged,
}

/// Current branch and its tracking state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub head: String,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
}

impl BranchInfo {
    /// Ahead/behind summary, empty when the branch is in sync or untracked.
    #[must_use]
    pub fn tracking_status(&self) -> String {
        match (self.ahead, self.behind) {
            (0, 0) => String::new(),
            (ahead, 0) => format!("ahead {ahead}"),
            (0, behind) => format!("behind {behind}"),
            (ahead, behind) => format!("ahead {ahead}, behind {behind}"),
        }
    }
}

impl fmt::Display for BranchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = self.tracking_status();
        if tracking.is_empty() {
            write!(f, "{}", self.head)
        } else {
            write!(f, "{} - ({tracking})", self.head)
        }
    }
}
