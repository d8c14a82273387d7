use crate::document::body_lines;
use crate::key::Key;
use crate::store::Snippets;

/// Differences between the persisted mapping and the in-memory one.
///
/// Each list is sorted by key order, so two diffs of logically equal
/// mappings are always equal regardless of how the maps were filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnippetDiff {
    /// Keys only present in memory.
    pub added: Vec<Key>,
    /// Keys only present in the persisted document.
    pub removed: Vec<Key>,
    /// Keys present in both whose snippets render differently.
    pub modified: Vec<Key>,
}

impl SnippetDiff {
    /// Compares `persisted` against `current`.
    pub fn between(persisted: &Snippets, current: &Snippets) -> Self {
        let mut diff = Self::default();
        for (key, snippet) in current {
            match persisted.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if !body_lines(old).eq(body_lines(snippet)) => {
                    diff.modified.push(key.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = persisted
            .keys()
            .filter(|key| !current.contains_key(key))
            .cloned()
            .collect();

        diff.added.sort();
        diff.removed.sort();
        diff.modified.sort();
        diff
    }

    /// True when both mappings would render to the same document.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}
