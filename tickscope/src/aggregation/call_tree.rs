//! Windowed call tree
//!
//! One tree per thread group. Each sample walks its stack from the root
//! frame to the leaf, creating nodes on first sight and adding the sample's
//! value to every node on the path, bucketed by time window.
//!
//! ```text
//!  "Worker-Pool"            times {W1: 30, W2: 10}
//!   └─ Thread.run           times {W1: 30, W2: 10}
//!       ├─ Task.execute     times {W1: 20}
//!       │   └─ Codec.encode times {W1: 20}
//!       └─ Queue.poll       times {W1: 10, W2: 10}
//! ```
//!
//! # Concurrency
//!
//! The group map sits behind an `RwLock`; each group's tree has its own
//! `Mutex`, so samples for different groups never contend. Inserting is
//! O(stack depth) with one hash lookup per frame.
//!
//! Aggregation is plain `u64` addition, so the final tree does not depend
//! on insertion order (only the order children are listed in does).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::domain::WindowIndex;
use crate::trace_data::StackFrame;

/// How frames are told apart when merging stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Calls from different lines of the same parent are separate nodes
    #[default]
    SeparateParentCalls,
    /// All calls to a method under one parent merge into one node
    SameMethod,
}

/// What distinguishes two frames of the same method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeDetail {
    None,
    Descriptor(String),
    Line(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub class_name: String,
    pub method_name: String,
    pub detail: NodeDetail,
}

impl NodeKey {
    #[must_use]
    pub fn from_frame(frame: &StackFrame, mode: MergeMode) -> Self {
        let detail = match (mode, frame.line_number, &frame.descriptor) {
            (MergeMode::SeparateParentCalls, Some(line), _) => NodeDetail::Line(line),
            (_, _, Some(descriptor)) => NodeDetail::Descriptor(descriptor.clone()),
            _ => NodeDetail::None,
        };
        Self {
            class_name: frame.export_class_name().to_string(),
            method_name: frame.method_name.clone(),
            detail,
        }
    }
}

// =============================================================================
// NODES
// =============================================================================

#[derive(Debug, Default)]
struct Node {
    times: BTreeMap<WindowIndex, u64>,
    children: IndexMap<NodeKey, Node>,
}

impl Node {
    fn add(&mut self, window: WindowIndex, value: u64) {
        *self.times.entry(window).or_insert(0) += value;
    }

    fn total(&self) -> u64 {
        self.times.values().sum()
    }

    fn prune(&mut self, oldest_kept: WindowIndex) {
        self.times.retain(|w, _| *w >= oldest_kept);
        for child in self.children.values_mut() {
            child.prune(oldest_kept);
        }
    }

    fn collect_windows(&self, out: &mut BTreeSet<WindowIndex>) {
        out.extend(self.times.keys().copied());
        for child in self.children.values() {
            child.collect_windows(out);
        }
    }

    fn count(&self) -> usize {
        1 + self.children.values().map(Node::count).sum::<usize>()
    }

    fn snapshot(&self, key: &NodeKey) -> NodeSnapshot {
        NodeSnapshot {
            key: key.clone(),
            times: self.times.clone(),
            children: self
                .children
                .iter()
                .filter(|(_, child)| child.total() > 0)
                .map(|(k, child)| child.snapshot(k))
                .collect(),
        }
    }
}

/// Immutable copy of one node and its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub key: NodeKey,
    pub times: BTreeMap<WindowIndex, u64>,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.times.values().sum()
    }
}

/// Immutable copy of one thread group's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    /// Group key as produced by the grouper
    pub group: String,
    pub times: BTreeMap<WindowIndex, u64>,
    pub children: Vec<NodeSnapshot>,
}

impl ThreadSnapshot {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.times.values().sum()
    }
}

// =============================================================================
// CALL TREE
// =============================================================================

#[derive(Debug, Default)]
pub struct CallTree {
    merge_mode: MergeMode,
    threads: RwLock<HashMap<String, Arc<Mutex<Node>>>>,
}

impl CallTree {
    #[must_use]
    pub fn new(merge_mode: MergeMode) -> Self {
        Self {
            merge_mode,
            threads: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }

    fn thread_node(&self, group: &str) -> Option<Arc<Mutex<Node>>> {
        if let Some(node) = self.threads.read().ok()?.get(group) {
            return Some(Arc::clone(node));
        }
        let mut threads = self.threads.write().ok()?;
        Some(Arc::clone(threads.entry(group.to_string()).or_default()))
    }

    /// Add `value` along a stack, leaf frame first.
    ///
    /// The group's own node accumulates `value` too, so its total is the
    /// sum of everything inserted under it.
    pub fn insert(&self, group: &str, frames: &[StackFrame], value: u64, window: WindowIndex) {
        let Some(root) = self.thread_node(group) else {
            return;
        };
        let Ok(mut node) = root.lock() else {
            return;
        };
        node.add(window, value);

        let mut current: &mut Node = &mut node;
        for frame in frames.iter().rev() {
            let key = NodeKey::from_frame(frame, self.merge_mode);
            let child = current.children.entry(key).or_default();
            child.add(window, value);
            current = child;
        }
    }

    /// Drop every window older than `oldest_kept`. Nodes stay in place.
    pub fn prune_windows(&self, oldest_kept: WindowIndex) {
        for root in self.roots() {
            if let Ok(mut node) = root.lock() {
                node.prune(oldest_kept);
            }
        }
    }

    /// Every window that holds weight, sorted.
    #[must_use]
    pub fn windows(&self) -> Vec<WindowIndex> {
        let mut out = BTreeSet::new();
        for root in self.roots() {
            if let Ok(node) = root.lock() {
                node.collect_windows(&mut out);
            }
        }
        out.into_iter().collect()
    }

    /// Sum of all inserted values for a group.
    #[must_use]
    pub fn total(&self, group: &str) -> u64 {
        self.threads
            .read()
            .ok()
            .and_then(|t| t.get(group).cloned())
            .and_then(|n| n.lock().ok().map(|n| n.total()))
            .unwrap_or(0)
    }

    /// Nodes below the group roots, across all groups.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.roots()
            .iter()
            .filter_map(|r| r.lock().ok().map(|n| n.count() - 1))
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.read().map_or(true, |t| t.is_empty())
    }

    /// Copy out every group tree, groups sorted by key. Subtrees with no
    /// remaining weight are left out.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ThreadSnapshot> {
        let Ok(threads) = self.threads.read() else {
            return Vec::new();
        };
        let mut groups: Vec<(&String, &Arc<Mutex<Node>>)> = threads.iter().collect();
        groups.sort_by(|a, b| a.0.cmp(b.0));
        groups
            .into_iter()
            .filter_map(|(group, root)| {
                let node = root.lock().ok()?;
                let placeholder = NodeKey {
                    class_name: String::new(),
                    method_name: String::new(),
                    detail: NodeDetail::None,
                };
                let snap = node.snapshot(&placeholder);
                Some(ThreadSnapshot {
                    group: group.clone(),
                    times: snap.times,
                    children: snap.children,
                })
            })
            .collect()
    }

    fn roots(&self) -> Vec<Arc<Mutex<Node>>> {
        self.threads
            .read()
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::thread;

    fn frames(names: &[&str]) -> Vec<StackFrame> {
        // Given root first for readability; stored leaf first
        names
            .iter()
            .rev()
            .map(|n| StackFrame::new("app.C", *n))
            .collect()
    }

    /// Path (root first) -> total, independent of child order.
    fn flatten(snapshot: &[ThreadSnapshot]) -> BTreeMap<Vec<String>, u64> {
        fn walk(
            node: &NodeSnapshot,
            path: &mut Vec<String>,
            out: &mut BTreeMap<Vec<String>, u64>,
        ) {
            path.push(format!("{}.{}", node.key.class_name, node.key.method_name));
            out.insert(path.clone(), node.total());
            for child in &node.children {
                walk(child, path, out);
            }
            path.pop();
        }
        let mut out = BTreeMap::new();
        for thread in snapshot {
            let mut path = vec![thread.group.clone()];
            out.insert(path.clone(), thread.total());
            for child in &thread.children {
                walk(child, &mut path, &mut out);
            }
        }
        out
    }

    #[test]
    fn test_insert_builds_shared_prefix() {
        let tree = CallTree::new(MergeMode::SameMethod);
        let w = WindowIndex(1);
        tree.insert("main", &frames(&["run", "tick", "physics"]), 10, w);
        tree.insert("main", &frames(&["run", "tick", "render"]), 5, w);
        tree.insert("main", &frames(&["run", "idle"]), 1, w);

        let snap = tree.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].total(), 16);
        let run = &snap[0].children[0];
        assert_eq!(run.key.method_name, "run");
        assert_eq!(run.total(), 16);
        // First-seen order
        let names: Vec<&str> = run.children.iter().map(|c| c.key.method_name.as_str()).collect();
        assert_eq!(names, vec!["tick", "idle"]);
        assert_eq!(run.children[0].total(), 15);
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn test_merge_modes() {
        let a = vec![StackFrame::new("app.C", "call").with_line(10), StackFrame::new("app.C", "root")];
        let b = vec![StackFrame::new("app.C", "call").with_line(20), StackFrame::new("app.C", "root")];

        let separate = CallTree::new(MergeMode::SeparateParentCalls);
        separate.insert("g", &a, 1, WindowIndex(0));
        separate.insert("g", &b, 1, WindowIndex(0));
        assert_eq!(separate.snapshot()[0].children[0].children.len(), 2);

        let same = CallTree::new(MergeMode::SameMethod);
        same.insert("g", &a, 1, WindowIndex(0));
        same.insert("g", &b, 1, WindowIndex(0));
        let merged = &same.snapshot()[0].children[0].children;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].total(), 2);
    }

    #[test]
    fn test_descriptor_distinguishes_overloads() {
        let tree = CallTree::new(MergeMode::SameMethod);
        let a = vec![StackFrame::new("app.C", "put").with_descriptor("(I)V")];
        let b = vec![StackFrame::new("app.C", "put").with_descriptor("(J)V")];
        tree.insert("g", &a, 1, WindowIndex(0));
        tree.insert("g", &b, 1, WindowIndex(0));
        assert_eq!(tree.snapshot()[0].children.len(), 2);
    }

    #[test]
    fn test_native_frames_export_native_class() {
        let tree = CallTree::new(MergeMode::default());
        tree.insert("g", &[StackFrame::native("epoll_wait")], 1, WindowIndex(0));
        assert_eq!(tree.snapshot()[0].children[0].key.class_name, "native");
    }

    #[test]
    fn test_windows_and_prune() {
        let tree = CallTree::new(MergeMode::default());
        tree.insert("g", &frames(&["a"]), 3, WindowIndex(5));
        tree.insert("g", &frames(&["a", "b"]), 4, WindowIndex(7));
        tree.insert("h", &frames(&["c"]), 1, WindowIndex(6));
        assert_eq!(tree.windows(), vec![WindowIndex(5), WindowIndex(6), WindowIndex(7)]);

        tree.prune_windows(WindowIndex(7));
        assert_eq!(tree.windows(), vec![WindowIndex(7)]);
        assert_eq!(tree.total("g"), 4);
        assert_eq!(tree.total("h"), 0);
        // Empty subtrees are left out of snapshots but the nodes remain
        let snap = tree.snapshot();
        let h = snap.iter().find(|t| t.group == "h").unwrap();
        assert!(h.children.is_empty());
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_insertion_order_does_not_change_totals() {
        let stacks: Vec<(&str, Vec<StackFrame>, u64, WindowIndex)> = (0..60u64)
            .map(|i| {
                let group = if i % 3 == 0 { "a" } else { "b" };
                let depth = (i % 4) as usize + 1;
                let names = ["run", "tick", "work", "leaf"];
                (group, frames(&names[..depth]), i + 1, WindowIndex((i % 2) as u32))
            })
            .collect();

        let reference = CallTree::new(MergeMode::default());
        for (g, f, v, w) in &stacks {
            reference.insert(g, f, *v, *w);
        }
        let expected = flatten(&reference.snapshot());

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let mut shuffled = stacks.clone();
            shuffled.shuffle(&mut rng);
            let tree = CallTree::new(MergeMode::default());
            for (g, f, v, w) in &shuffled {
                tree.insert(g, f, *v, *w);
            }
            assert_eq!(flatten(&tree.snapshot()), expected);
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        let tree = Arc::new(CallTree::new(MergeMode::default()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for _ in 0..250 {
                        let group = if t % 2 == 0 { "even" } else { "odd" };
                        tree.insert(group, &frames(&["run", "work"]), 1, WindowIndex(0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tree.total("even"), 500);
        assert_eq!(tree.total("odd"), 500);
    }
}
