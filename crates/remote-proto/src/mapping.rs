use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered table of server temp paths to the user's local paths.
///
/// Order is the order the keys appeared on the wire; substitution walks the
/// table in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMapping {
    entries: IndexMap<String, String>,
}

impl FileMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry. A replaced key keeps its position.
    pub fn insert(&mut self, server_path: impl Into<String>, local_path: impl Into<String>) {
        self.entries.insert(server_path.into(), local_path.into());
    }

    /// Replaces the first occurrence of every server path in `line`.
    pub fn apply(&self, line: &str) -> String {
        let mut out = line.to_owned();
        for (server_path, local_path) in &self.entries {
            if out.contains(server_path.as_str()) {
                out = out.replacen(server_path.as_str(), local_path, 1);
            }
        }
        out
    }
}

impl<K, V> FromIterator<(K, V)> for FileMapping
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = FileMapping::new();
        for (key, value) in iter {
            mapping.insert(key, value);
        }
        mapping
    }
}
