use std::collections::HashSet;

use crate::types::FileStatus;

/// Paths that were selected in one list right before it is rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSnapshot {
    selected: HashSet<String>,
}

impl SelectionSnapshot {
    #[must_use]
    pub fn capture(list: &[FileStatus]) -> Self {
        list.iter()
            .filter(|status| status.selected)
            .map(|status| status.path.as_str())
            .collect()
    }

    #[must_use]
    pub fn was_selected(&self, path: &str) -> bool {
        self.selected.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SelectionSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            selected: iter.into_iter().map(Into::into).collect(),
        }
    }
}
