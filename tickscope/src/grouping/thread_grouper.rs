//! Thread grouping
//!
//! Every sample is filed under a group key before it reaches the call tree.
//! The grouper decides how coarse that is:
//!
//! | Kind     | Key                             | Label                 |
//! |----------|---------------------------------|-----------------------|
//! | `ByName` | thread name                     | key                   |
//! | `ByPool` | name minus trailing `-N`/`#N`   | `"<pool> (xN)"`       |
//! | `AsOne`  | `"root"`                        | `"All (xN threads)"`  |

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ThreadId;

/// Key used by [`GrouperKind::AsOne`].
pub const ROOT_GROUP: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrouperKind {
    ByName,
    #[default]
    ByPool,
    AsOne,
}

impl fmt::Display for GrouperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrouperKind::ByName => "by-name",
            GrouperKind::ByPool => "by-pool",
            GrouperKind::AsOne => "as-one",
        };
        f.write_str(name)
    }
}

fn pool_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(.*?)[-# ]+\d+$").ok())
        .as_ref()
}

#[derive(Debug, Default)]
struct GroupState {
    key_by_thread: HashMap<ThreadId, String>,
    threads_by_key: HashMap<String, HashSet<ThreadId>>,
}

/// Maps threads to group keys. Safe to share between sampling threads.
#[derive(Debug)]
pub struct ThreadGrouper {
    kind: GrouperKind,
    state: Mutex<GroupState>,
}

impl ThreadGrouper {
    #[must_use]
    pub fn new(kind: GrouperKind) -> Self {
        Self {
            kind,
            state: Mutex::new(GroupState::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> GrouperKind {
        self.kind
    }

    /// Group key for a thread.
    pub fn group(&self, thread_id: ThreadId, name: &str) -> String {
        match self.kind {
            GrouperKind::ByName => name.to_string(),
            GrouperKind::ByPool => {
                if let Some(key) = self.cached(thread_id) {
                    return key;
                }
                let Some(pool) = pool_pattern()
                    .and_then(|re| re.captures(name))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
                else {
                    return name.to_string();
                };
                self.remember(thread_id, &pool);
                pool
            }
            GrouperKind::AsOne => {
                self.remember(thread_id, ROOT_GROUP);
                ROOT_GROUP.to_string()
            }
        }
    }

    /// Display label for a group key.
    pub fn label(&self, key: &str) -> String {
        let count = self.thread_count(key);
        match self.kind {
            GrouperKind::ByName => key.to_string(),
            GrouperKind::ByPool if count == 0 => key.to_string(),
            GrouperKind::ByPool => format!("{key} (x{count})"),
            GrouperKind::AsOne => format!("All (x{count} threads)"),
        }
    }

    /// Distinct threads seen under a key.
    pub fn thread_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.threads_by_key.get(key).map_or(0, HashSet::len))
            .unwrap_or(0)
    }

    fn cached(&self, thread_id: ThreadId) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.key_by_thread.get(&thread_id).cloned())
    }

    fn remember(&self, thread_id: ThreadId, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .key_by_thread
                .entry(thread_id)
                .or_insert_with(|| key.to_string());
            state
                .threads_by_key
                .entry(key.to_string())
                .or_default()
                .insert(thread_id);
        }
    }
}
