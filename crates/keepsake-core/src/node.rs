//! The built-in descriptor for persistent nodes.

use crate::graph::{Node, SceneGraph, Transform};
use crate::id::*;
use crate::registry::{IdentityRegistry, ObjectRef};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Record tag of node snapshots. Always written first in a record.
pub const NODE_TAG: &str = "keepsake_core::node::NodeSnapshot";

/// Everything needed to rebuild a node from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub loading_order: LoadingOrder,
    pub hide_flags: u32,
    pub name: String,
    pub active: bool,
    pub is_static: bool,
    pub layer: u32,
    pub tag: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub parent: ObjectRef,
}

impl NodeSnapshot {
    pub fn capture(graph: &SceneGraph, refs: &IdentityRegistry, key: NodeKey) -> Option<Self> {
        let node = graph.node(key)?;
        Some(Self {
            loading_order: graph.loading_order(key),
            hide_flags: node.hide_flags,
            name: node.name.clone(),
            active: node.active,
            is_static: node.is_static,
            layer: node.layer,
            tag: node.tag.clone(),
            position: node.transform.position,
            rotation: node.transform.rotation,
            scale: node.transform.scale,
            parent: refs.node_ref(node.parent()),
        })
    }

    /// Copy the stored attributes onto `node`. The parent is handled by
    /// the caller since it needs the graph.
    pub fn apply(&self, node: &mut Node) {
        node.name.clone_from(&self.name);
        node.tag.clone_from(&self.tag);
        node.hide_flags = self.hide_flags;
        node.active = self.active;
        node.is_static = self.is_static;
        node.layer = self.layer;
        node.transform = Transform {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
        };
    }

    /// A fresh, unlinked node carrying the stored attributes.
    pub fn spawn(&self) -> Node {
        let mut node = Node::new(self.name.clone());
        self.apply(&mut node);
        node
    }
}
