//! Node persistence through the metadata store.
//!
//! Nodes live as JSON values in one hash: field = decimal node id.

use kite_core::{Error, LogType, Result};
use kite_store::Store;

use crate::node::Node;

const NODE_LIST_KEY: &[u8] = b"cluster.kv_node_list";

/// Reads and writes the persisted node table.
pub struct ClusterStore {
    meta: Store,
}

impl ClusterStore {
    /// Wrap the metadata store.
    pub fn new(meta: Store) -> ClusterStore {
        ClusterStore { meta }
    }

    /// Insert or update one node.
    pub fn save_node(&self, node: &Node) -> Result<()> {
        let value = serde_json::to_vec(node)
            .map_err(|e| Error::corruption(format!("node encode failed: {}", e)))?;
        self.meta.hset(
            NODE_LIST_KEY,
            node.id.to_string().as_bytes(),
            &value,
            LogType::Sync,
        )?;
        Ok(())
    }

    /// Load one node.
    pub fn load_node(&self, id: u32) -> Result<Option<Node>> {
        match self.meta.hget(NODE_LIST_KEY, id.to_string().as_bytes())? {
            None => Ok(None),
            Some(value) => Ok(Some(decode_node(&value)?)),
        }
    }

    /// Delete one node.
    pub fn del_node(&self, id: u32) -> Result<()> {
        self.meta
            .hdel(NODE_LIST_KEY, id.to_string().as_bytes(), LogType::Sync)?;
        Ok(())
    }

    /// Load the whole table, ordered by id.
    pub fn load_node_list(&self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for (_, value) in self.meta.hscan(NODE_LIST_KEY, b"", b"", u64::MAX) {
            nodes.push(decode_node(&value)?);
        }
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }
}

fn decode_node(value: &[u8]) -> Result<Node> {
    serde_json::from_slice(value)
        .map_err(|e| Error::corruption(format!("node decode failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{KeyRange, NodeStatus};
    use kite_engine::MemEngine;
    use std::sync::Arc;

    fn cluster_store() -> ClusterStore {
        ClusterStore::new(Store::open_meta(Arc::new(MemEngine::new())))
    }

    #[test]
    fn test_save_load_delete() {
        let cs = cluster_store();
        let mut node = Node::new(7, "10.0.0.1", 8888);
        node.status = NodeStatus::Serving;
        node.range = KeyRange::new("a", "m");
        cs.save_node(&node).unwrap();

        assert_eq!(cs.load_node(7).unwrap(), Some(node.clone()));
        assert_eq!(cs.load_node(8).unwrap(), None);

        cs.del_node(7).unwrap();
        assert_eq!(cs.load_node(7).unwrap(), None);
    }

    #[test]
    fn test_load_list_sorted_by_id() {
        let cs = cluster_store();
        for id in [12u32, 3, 7] {
            cs.save_node(&Node::new(id, "10.0.0.1", 8888)).unwrap();
        }
        let ids: Vec<u32> = cs.load_node_list().unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 7, 12]);
    }
}
