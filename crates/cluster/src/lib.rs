//! Cluster metadata: node table and key-range assignments.
//!
//! The node list lives in memory under one mutex and is persisted through
//! the metadata store, so a restart reloads the same assignments. Two
//! SERVING nodes never hold overlapping ranges.

mod node;
mod store;

pub use node::{KeyRange, Node, NodeStatus};
pub use store::ClusterStore;

use parking_lot::Mutex;
use tracing::{debug, error};

use kite_core::{Error, Result};

struct ClusterInner {
    next_id: u32,
    nodes: Vec<Node>,
}

/// In-memory node table backed by the metadata store.
pub struct Cluster {
    store: ClusterStore,
    inner: Mutex<ClusterInner>,
}

impl Cluster {
    /// Load the node table from the metadata store.
    pub fn open(store: ClusterStore) -> Result<Cluster> {
        let nodes = store.load_node_list()?;
        let next_id = nodes.iter().map(|n| n.id + 1).max().unwrap_or(1);
        debug!(nodes = nodes.len(), next_id, "cluster loaded");
        Ok(Cluster {
            store,
            inner: Mutex::new(ClusterInner { next_id, nodes }),
        })
    }

    /// Register a node; returns its assigned id.
    pub fn add_kv_node(&self, ip: &str, port: u16) -> Result<u32> {
        let mut inner = self.inner.lock();
        let node = Node::new(inner.next_id, ip, port);
        inner.next_id += 1;
        self.store.save_node(&node)?;
        let id = node.id;
        inner.nodes.push(node);
        Ok(id)
    }

    /// Remove a node. Returns false when the id is unknown.
    pub fn del_kv_node(&self, id: u32) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.nodes.iter().position(|n| n.id == id) {
            None => Ok(false),
            Some(idx) => {
                self.store.del_node(id)?;
                inner.nodes.remove(idx);
                Ok(true)
            }
        }
    }

    /// Assign a range to a node, refusing overlap with any SERVING peer.
    pub fn set_kv_range(&self, id: u32, range: KeyRange) -> Result<bool> {
        let mut inner = self.inner.lock();
        let overlap = inner.nodes.iter().any(|n| {
            n.id != id && n.status == NodeStatus::Serving && n.range.overlapped(&range)
        });
        if overlap {
            error!(id, "range overlapped");
            return Err(Error::invalid_input("range overlapped"));
        }
        let node = match inner.nodes.iter_mut().find(|n| n.id == id) {
            None => return Ok(false),
            Some(n) => n,
        };
        node.range = range;
        let snapshot = node.clone();
        self.store.save_node(&snapshot)?;
        Ok(true)
    }

    /// Change a node's lifecycle status.
    pub fn set_kv_status(&self, id: u32, status: NodeStatus) -> Result<bool> {
        let mut inner = self.inner.lock();
        let node = match inner.nodes.iter_mut().find(|n| n.id == id) {
            None => return Ok(false),
            Some(n) => n,
        };
        node.status = status;
        let snapshot = node.clone();
        self.store.save_node(&snapshot)?;
        Ok(true)
    }

    /// Snapshot of the node list.
    pub fn node_list(&self) -> Vec<Node> {
        self.inner.lock().nodes.clone()
    }

    /// Fetch one node.
    pub fn get_kv_node(&self, id: u32) -> Option<Node> {
        self.inner.lock().nodes.iter().find(|n| n.id == id).cloned()
    }

    /// Move `[split_key, src.end)` from `src` to `dst`, persisting both.
    ///
    /// `dst` must be empty or exactly adjacent at `src`'s old end. Returns
    /// the handed-off range.
    pub fn hand_off_range(&self, src_id: u32, dst_id: u32, split_key: &str) -> Result<KeyRange> {
        let mut inner = self.inner.lock();
        let src = inner
            .nodes
            .iter()
            .find(|n| n.id == src_id)
            .cloned()
            .ok_or_else(|| Error::invalid_input("unknown source node"))?;
        let dst = inner
            .nodes
            .iter()
            .find(|n| n.id == dst_id)
            .cloned()
            .ok_or_else(|| Error::invalid_input("unknown destination node"))?;

        if !src.range.contains(split_key) {
            return Err(Error::invalid_input("split key outside source range"));
        }
        let moved = KeyRange::new(split_key, &src.range.end);
        if !dst.range.is_empty() && dst.range.begin != src.range.end {
            return Err(Error::invalid_input("destination range not adjacent"));
        }

        let new_src = KeyRange::new(&src.range.begin, split_key);
        let new_dst = if dst.range.is_empty() {
            moved.clone()
        } else {
            KeyRange::new(split_key, &dst.range.end)
        };

        for node in inner.nodes.iter_mut() {
            if node.id == src_id {
                node.range = new_src.clone();
            } else if node.id == dst_id {
                node.range = new_dst.clone();
            }
        }
        let src_snapshot = inner.nodes.iter().find(|n| n.id == src_id).cloned();
        let dst_snapshot = inner.nodes.iter().find(|n| n.id == dst_id).cloned();
        drop(inner);
        if let Some(n) = src_snapshot {
            self.store.save_node(&n)?;
        }
        if let Some(n) = dst_snapshot {
            self.store.save_node(&n)?;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_engine::MemEngine;
    use kite_store::Store;
    use std::sync::Arc;

    fn cluster() -> Cluster {
        let meta = Store::open_meta(Arc::new(MemEngine::new()));
        Cluster::open(ClusterStore::new(meta)).unwrap()
    }

    #[test]
    fn test_add_del_nodes() {
        let c = cluster();
        let id1 = c.add_kv_node("10.0.0.1", 8888).unwrap();
        let id2 = c.add_kv_node("10.0.0.2", 8888).unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(c.node_list().len(), 2);

        assert!(c.del_kv_node(id1).unwrap());
        assert!(!c.del_kv_node(id1).unwrap());
        assert_eq!(c.node_list().len(), 1);
    }

    #[test]
    fn test_ranges_must_not_overlap_between_serving_nodes() {
        let c = cluster();
        let id1 = c.add_kv_node("10.0.0.1", 8888).unwrap();
        let id2 = c.add_kv_node("10.0.0.2", 8888).unwrap();
        c.set_kv_range(id1, KeyRange::new("a", "m")).unwrap();
        c.set_kv_status(id1, NodeStatus::Serving).unwrap();

        // overlapping with a SERVING node is refused
        assert!(c.set_kv_range(id2, KeyRange::new("h", "z")).is_err());
        // adjacent is fine
        assert!(c.set_kv_range(id2, KeyRange::new("m", "z")).unwrap());
    }

    #[test]
    fn test_persistence_across_reload() {
        let meta = Store::open_meta(Arc::new(MemEngine::new()));
        let id;
        {
            let c = Cluster::open(ClusterStore::new(meta.clone())).unwrap();
            id = c.add_kv_node("10.0.0.1", 8888).unwrap();
            c.set_kv_range(id, KeyRange::new("a", "m")).unwrap();
            c.set_kv_status(id, NodeStatus::Serving).unwrap();
        }
        let c = Cluster::open(ClusterStore::new(meta)).unwrap();
        let node = c.get_kv_node(id).unwrap();
        assert_eq!(node.ip, "10.0.0.1");
        assert_eq!(node.status, NodeStatus::Serving);
        assert_eq!(node.range, KeyRange::new("a", "m"));
        // id allocation resumes after the highest persisted id
        let id2 = c.add_kv_node("10.0.0.2", 8888).unwrap();
        assert_eq!(id2, id + 1);
    }

    #[test]
    fn test_hand_off_updates_both_sides() {
        let c = cluster();
        let src = c.add_kv_node("10.0.0.1", 8888).unwrap();
        let dst = c.add_kv_node("10.0.0.2", 8888).unwrap();
        c.set_kv_range(src, KeyRange::new("a", "z")).unwrap();

        let moved = c.hand_off_range(src, dst, "m").unwrap();
        assert_eq!(moved, KeyRange::new("m", "z"));
        assert_eq!(c.get_kv_node(src).unwrap().range, KeyRange::new("a", "m"));
        assert_eq!(c.get_kv_node(dst).unwrap().range, KeyRange::new("m", "z"));
    }

    #[test]
    fn test_hand_off_rejects_bad_split() {
        let c = cluster();
        let src = c.add_kv_node("10.0.0.1", 8888).unwrap();
        let dst = c.add_kv_node("10.0.0.2", 8888).unwrap();
        c.set_kv_range(src, KeyRange::new("a", "m")).unwrap();
        assert!(c.hand_off_range(src, dst, "x").is_err());
        assert!(c.hand_off_range(99, dst, "b").is_err());
    }
}
