//! The live scene graph: a tree of nodes with behaviours attached.
//!
//! Nodes and components live in generational `SlotMap`s, so a handle to a
//! destroyed object never aliases a newer one. The graph itself knows nothing
//! about stable ids beyond storing them; assignment and lookup belong to the
//! [`IdentityRegistry`](crate::registry::IdentityRegistry).

use crate::component::{Behaviour, PersistState};
use crate::id::*;
use glam::{Quat, Vec3};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeKey),
    #[error("component not found: {0:?}")]
    ComponentNotFound(ComponentKey),
    #[error("reparenting {child:?} under {parent:?} would create a cycle")]
    CycleDetected { child: NodeKey, parent: NodeKey },
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Position, rotation and scale of a node.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

/// Per-node data stored in the scene graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub tag: String,
    pub layer: u32,
    pub active: bool,
    pub is_static: bool,
    /// Host-engine flags, stored and restored verbatim.
    pub hide_flags: u32,
    pub transform: Transform,
    /// Stable id, assigned when the node is first observed.
    pub stable_id: Option<StableId>,
    /// Persistence marker. Only nodes carrying one are saved and can be
    /// reconstructed after being destroyed.
    pub persistence: Option<PersistState>,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    components: Vec<ComponentKey>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: "Untagged".to_string(),
            layer: 0,
            active: true,
            is_static: false,
            hide_flags: 0,
            transform: Transform::default(),
            stable_id: None,
            persistence: None,
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn components(&self) -> &[ComponentKey] {
        &self.components
    }
}

/// A behaviour together with the node that owns it.
#[derive(Debug)]
struct ComponentSlot {
    node: NodeKey,
    behaviour: Box<dyn Behaviour>,
}

// ---------------------------------------------------------------------------
// SceneGraph
// ---------------------------------------------------------------------------

/// The live object graph the pipelines save from and load into.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, Node>,
    components: SlotMap<ComponentKey, ComponentSlot>,
    /// Root nodes in insertion order.
    roots: Vec<NodeKey>,
}

impl SceneGraph {
    /// Create a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Insert a node under `parent` (or as a root). A missing parent makes
    /// the node a root.
    pub fn add_node(&mut self, node: Node, parent: Option<NodeKey>) -> NodeKey {
        let parent = parent.filter(|p| self.nodes.contains_key(*p));
        let key = self.nodes.insert(Node {
            parent,
            children: Vec::new(),
            components: Vec::new(),
            ..node
        });
        match parent {
            Some(p) => self.nodes[p].children.push(key),
            None => self.roots.push(key),
        }
        key
    }

    /// Move `child` under `parent`, or to the root when `parent` is `None`.
    pub fn set_parent(&mut self, child: NodeKey, parent: Option<NodeKey>) -> Result<(), GraphError> {
        if !self.nodes.contains_key(child) {
            return Err(GraphError::NodeNotFound(child));
        }
        if let Some(p) = parent {
            if !self.nodes.contains_key(p) {
                return Err(GraphError::NodeNotFound(p));
            }
            if p == child || self.is_ancestor(child, p) {
                return Err(GraphError::CycleDetected { child, parent: p });
            }
        }
        if self.nodes[child].parent == parent {
            return Ok(());
        }

        self.detach(child);
        self.nodes[child].parent = parent;
        match parent {
            Some(p) => self.nodes[p].children.push(child),
            None => self.roots.push(child),
        }
        Ok(())
    }

    /// Whether `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeKey, node: NodeKey) -> bool {
        let mut cursor = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes.get(current).and_then(|n| n.parent);
        }
        false
    }

    /// Unlink `node` from its parent's child list (or the root list).
    fn detach(&mut self, node: NodeKey) {
        match self.nodes[node].parent {
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(p) {
                    parent.children.retain(|c| *c != node);
                }
            }
            None => self.roots.retain(|r| *r != node),
        }
    }

    /// Destroy a node together with all of its descendants and their
    /// components. Returns the number of nodes removed.
    pub fn destroy_node(&mut self, node: NodeKey) -> usize {
        if !self.nodes.contains_key(node) {
            return 0;
        }
        self.detach(node);
        let doomed = self.subtree(node);
        for key in &doomed {
            if let Some(removed) = self.nodes.remove(*key) {
                for component in removed.components {
                    self.components.remove(component);
                }
            }
        }
        doomed.len()
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn contains_node(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &Node)> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (NodeKey, &mut Node)> {
        self.nodes.iter_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    /// `node` followed by every descendant, parents before children.
    pub fn subtree(&self, node: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(n) = self.nodes.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(n.children.iter().rev().copied());
        }
        out
    }

    /// Number of nodes from `node` up to its root, inclusive. Zero for a
    /// missing node.
    pub fn depth(&self, node: NodeKey) -> u32 {
        let mut depth = 0;
        let mut cursor = self.nodes.get(node).map(|_| node);
        while let Some(current) = cursor {
            depth += 1;
            cursor = self.nodes.get(current).and_then(|n| n.parent);
        }
        depth
    }

    /// Position of `node` among its siblings (or among the roots).
    pub fn sibling_index(&self, node: NodeKey) -> u32 {
        let Some(n) = self.nodes.get(node) else {
            return 0;
        };
        let siblings = match n.parent {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        };
        siblings.iter().position(|s| *s == node).unwrap_or(0) as u32
    }

    /// Reconstruction order of `node`.
    pub fn loading_order(&self, node: NodeKey) -> LoadingOrder {
        LoadingOrder {
            depth: self.depth(node),
            sibling: self.sibling_index(node),
        }
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// Attach a behaviour to `node`. Returns `None` if the node is missing.
    pub fn add_component(&mut self, node: NodeKey, behaviour: Box<dyn Behaviour>) -> Option<ComponentKey> {
        if !self.nodes.contains_key(node) {
            return None;
        }
        let key = self.components.insert(ComponentSlot { node, behaviour });
        self.nodes[node].components.push(key);
        Some(key)
    }

    /// Detach and return a behaviour.
    pub fn remove_component(&mut self, key: ComponentKey) -> Option<Box<dyn Behaviour>> {
        let slot = self.components.remove(key)?;
        if let Some(node) = self.nodes.get_mut(slot.node) {
            node.components.retain(|c| *c != key);
        }
        Some(slot.behaviour)
    }

    pub fn contains_component(&self, key: ComponentKey) -> bool {
        self.components.contains_key(key)
    }

    /// The node that owns `key`.
    pub fn owner(&self, key: ComponentKey) -> Option<NodeKey> {
        self.components.get(key).map(|slot| slot.node)
    }

    pub fn behaviour(&self, key: ComponentKey) -> Option<&dyn Behaviour> {
        self.components.get(key).map(|slot| slot.behaviour.as_ref())
    }

    pub fn behaviour_mut(&mut self, key: ComponentKey) -> Option<&mut dyn Behaviour> {
        self.components.get_mut(key).map(|slot| slot.behaviour.as_mut())
    }

    /// Typed read access to a behaviour.
    pub fn component<T: Behaviour>(&self, key: ComponentKey) -> Option<&T> {
        self.behaviour(key)?.as_any().downcast_ref::<T>()
    }

    /// Typed write access to a behaviour.
    pub fn component_mut<T: Behaviour>(&mut self, key: ComponentKey) -> Option<&mut T> {
        self.behaviour_mut(key)?.as_any_mut().downcast_mut::<T>()
    }

    /// First behaviour of type `T` on `node`.
    pub fn find_component<T: Behaviour>(&self, node: NodeKey) -> Option<ComponentKey> {
        self.nodes
            .get(node)?
            .components
            .iter()
            .copied()
            .find(|c| self.component::<T>(*c).is_some())
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentKey, NodeKey, &dyn Behaviour)> {
        self.components
            .iter()
            .map(|(key, slot)| (key, slot.node, slot.behaviour.as_ref()))
    }

    pub fn components_mut(&mut self) -> impl Iterator<Item = (ComponentKey, &mut dyn Behaviour)> {
        self.components
            .iter_mut()
            .map(|(key, slot)| (key, slot.behaviour.as_mut()))
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
