//! Thread inclusion policy
//!
//! Decides which threads are sampled at all. `Regex` matches are cached per
//! thread id since the same threads come back on every sampling pass.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::ThreadId;

#[derive(Debug)]
enum Policy {
    All,
    Specific {
        ids: HashSet<ThreadId>,
        /// Lowercased
        names: HashSet<String>,
    },
    Regex {
        patterns: Vec<Regex>,
        cache: Mutex<HashMap<ThreadId, bool>>,
    },
}

/// Serializable summary for report metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumperDescription {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

#[derive(Debug)]
pub struct ThreadDumper {
    policy: Policy,
}

impl ThreadDumper {
    /// Sample every thread.
    #[must_use]
    pub fn all() -> Self {
        Self { policy: Policy::All }
    }

    /// Sample threads matching an id or a name (case-insensitive).
    pub fn specific(
        ids: impl IntoIterator<Item = ThreadId>,
        names: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            policy: Policy::Specific {
                ids: ids.into_iter().collect(),
                names: names.into_iter().map(|n| n.to_lowercase()).collect(),
            },
        }
    }

    /// Sample threads whose name matches any pattern (case-insensitive).
    ///
    /// # Errors
    /// Returns an error if a pattern does not compile
    pub fn regex<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            policy: Policy::Regex {
                patterns,
                cache: Mutex::new(HashMap::new()),
            },
        })
    }

    #[must_use]
    pub fn includes(&self, thread_id: ThreadId, name: &str) -> bool {
        match &self.policy {
            Policy::All => true,
            Policy::Specific { ids, names } => {
                ids.contains(&thread_id) || names.contains(&name.to_lowercase())
            }
            Policy::Regex { patterns, cache } => {
                if let Some(hit) = cache.lock().ok().and_then(|c| c.get(&thread_id).copied()) {
                    return hit;
                }
                let hit = patterns.iter().any(|p| p.is_match(name));
                if let Ok(mut cache) = cache.lock() {
                    cache.insert(thread_id, hit);
                }
                hit
            }
        }
    }

    /// Thread ids named explicitly, for engines that can target them.
    #[must_use]
    pub fn explicit_ids(&self) -> Option<Vec<ThreadId>> {
        match &self.policy {
            Policy::Specific { ids, .. } if !ids.is_empty() => {
                let mut ids: Vec<ThreadId> = ids.iter().copied().collect();
                ids.sort();
                Some(ids)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn describe(&self) -> DumperDescription {
        match &self.policy {
            Policy::All => DumperDescription {
                kind: "all".to_string(),
                ids: Vec::new(),
                patterns: Vec::new(),
            },
            Policy::Specific { ids, names } => {
                let mut ids: Vec<u64> = ids.iter().map(|t| t.0).collect();
                ids.sort_unstable();
                let mut names: Vec<String> = names.iter().cloned().collect();
                names.sort();
                DumperDescription {
                    kind: "specific".to_string(),
                    ids,
                    patterns: names,
                }
            }
            Policy::Regex { patterns, .. } => DumperDescription {
                kind: "regex".to_string(),
                ids: Vec::new(),
                patterns: patterns.iter().map(|p| p.as_str().to_string()).collect(),
            },
        }
    }
}

impl Default for ThreadDumper {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_includes_everything() {
        let dumper = ThreadDumper::all();
        assert!(dumper.includes(ThreadId(1), "anything"));
        assert_eq!(dumper.describe().kind, "all");
    }

    #[test]
    fn test_specific_matches_ids_and_names_case_insensitively() {
        let dumper = ThreadDumper::specific([ThreadId(5)], ["Server Thread".to_string()]);
        assert!(dumper.includes(ThreadId(5), "unrelated"));
        assert!(dumper.includes(ThreadId(9), "server thread"));
        assert!(!dumper.includes(ThreadId(9), "Netty-1"));
        assert_eq!(dumper.explicit_ids(), Some(vec![ThreadId(5)]));

        let desc = dumper.describe();
        assert_eq!(desc.ids, vec![5]);
        assert_eq!(desc.patterns, vec!["server thread".to_string()]);
    }

    #[test]
    fn test_regex_matches_and_caches() {
        let dumper = ThreadDumper::regex(&["^worker-\\d+$", "async"]).unwrap();
        assert!(dumper.includes(ThreadId(1), "Worker-12"));
        assert!(dumper.includes(ThreadId(2), "my-async-io"));
        assert!(!dumper.includes(ThreadId(3), "main"));
        // Cached by id: the name is not looked at again
        assert!(dumper.includes(ThreadId(1), "main"));
        assert_eq!(dumper.describe().patterns.len(), 2);
        assert!(dumper.explicit_ids().is_none());
    }

    #[test]
    fn test_bad_regex_is_an_error() {
        assert!(ThreadDumper::regex(&["("]).is_err());
    }
}
