//! Executables skipped during working-set trimming

use std::collections::HashSet;
use std::path::Path;

/// Case-insensitive set of executable paths.
///
/// Entries are lower-cased on insertion so lookups only normalize the
/// candidate path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExceptionList {
    paths: HashSet<String>,
}

impl ProcessExceptionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str) {
        let normalized = normalize(path);
        if !normalized.is_empty() {
            self.paths.insert(normalized);
        }
    }

    /// Check if an executable path is excluded
    pub fn contains(&self, path: &Path) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        self.paths.contains(&normalize(&path.to_string_lossy()))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Normalized entries, sorted
    pub fn to_vec(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.iter().cloned().collect();
        paths.sort();
        paths
    }
}

impl<S: AsRef<str>> FromIterator<S> for ProcessExceptionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        for path in iter {
            list.insert(path.as_ref());
        }
        list
    }
}

fn normalize(path: &str) -> String {
    path.trim().to_lowercase()
}
