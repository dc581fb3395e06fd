//! Process-wide content-addressed intern arena.
//!
//! The arena maps canonical fingerprints to shared node handles. It is
//! append-only: once inserted an entry's identity never changes, so readers
//! holding a handle never observe mutation; writers serialize insertion
//! behind a mutex. Entries live until process teardown.

use crate::fingerprint::Fingerprint;
use crate::node::{Node, NodeData};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

struct Arena {
    entries: Mutex<HashMap<Fingerprint, Arc<NodeData>>>,
}

fn arena() -> &'static Arena {
    static ARENA: OnceLock<Arena> = OnceLock::new();
    ARENA.get_or_init(|| Arena {
        entries: Mutex::new(HashMap::new()),
    })
}

/// Intern canonical node data, returning the shared handle.
///
/// If structurally equal data was interned before, the existing handle is
/// returned and the new data is dropped.
pub(crate) fn intern(data: NodeData) -> Node {
    let fingerprint = data.fingerprint();
    let mut entries = arena()
        .entries
        .lock()
        .expect("intern arena lock poisoned");
    let arc = entries
        .entry(fingerprint)
        .or_insert_with(|| Arc::new(data))
        .clone();
    drop(entries);
    Node::from_arc(arc)
}

/// Number of distinct canonical nodes interned so far.
#[must_use]
pub fn interned_count() -> usize {
    arena()
        .entries
        .lock()
        .expect("intern arena lock poisoned")
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{entity, relation};

    #[test]
    fn equal_constructions_share_one_entry() {
        let before = interned_count();
        let a = relation("HAS", [entity("car"), entity("wheel")]);
        let mid = interned_count();
        let b = relation("HAS", [entity("car"), entity("wheel")]);
        let after = interned_count();
        assert_eq!(a, b);
        assert!(mid > before);
        assert_eq!(mid, after, "re-interning must not grow the arena");
    }

    #[test]
    fn interning_is_safe_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| entity("shared-entity")))
            .collect();
        let nodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for window in nodes.windows(2) {
            assert_eq!(window[0], window[1]);
        }
    }
}
