//! Identity registry: stable ids to live handles, and back.
//!
//! The registry is the only place that knows which live object a stored id
//! refers to. Ids are never derived from slot keys, so a node that is
//! destroyed and rebuilt under a new key keeps the id it was saved with.

use crate::graph::SceneGraph;
use crate::id::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// ObjectRef
// ---------------------------------------------------------------------------

/// A reference to another persistent object, as written to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    #[default]
    Null,
    Embedded(StableId),
}

impl ObjectRef {
    pub fn is_null(&self) -> bool {
        matches!(self, ObjectRef::Null)
    }

    pub fn id(&self) -> Option<&StableId> {
        match self {
            ObjectRef::Null => None,
            ObjectRef::Embedded(id) => Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityRegistry
// ---------------------------------------------------------------------------

/// Bidirectional map between stable ids and live handles.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_id: HashMap<StableId, Handle>,
    by_handle: HashMap<Handle, StableId>,
    /// Every id this session has issued or seen. Fresh ids avoid all of them.
    issued: HashSet<StableId>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to `handle` unless either side is already bound. Returns
    /// whether the binding was made.
    pub fn register(&mut self, id: StableId, handle: Handle) -> bool {
        if self.by_id.contains_key(&id) || self.by_handle.contains_key(&handle) {
            return false;
        }
        self.issued.insert(id.clone());
        self.by_handle.insert(handle, id.clone());
        self.by_id.insert(id, handle);
        true
    }

    /// Drop the binding for `id`, if any.
    pub fn forget(&mut self, id: &StableId) -> Option<Handle> {
        let handle = self.by_id.remove(id)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn resolve(&self, id: &StableId) -> Option<Handle> {
        self.by_id.get(id).copied()
    }

    /// Resolve `id` to a node that is still alive in `graph`.
    pub fn resolve_node(&self, graph: &SceneGraph, id: &StableId) -> Option<NodeKey> {
        match self.resolve(id)? {
            Handle::Node(key) if graph.contains_node(key) => Some(key),
            _ => None,
        }
    }

    /// Resolve `id` to a component that is still alive in `graph`.
    pub fn resolve_component(&self, graph: &SceneGraph, id: &StableId) -> Option<ComponentKey> {
        match self.resolve(id)? {
            Handle::Component(key) if graph.contains_component(key) => Some(key),
            _ => None,
        }
    }

    pub fn stable_id_of(&self, handle: Handle) -> Option<&StableId> {
        self.by_handle.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// A fresh random id, never handed out before in this session.
    pub fn issue_id(&mut self) -> StableId {
        loop {
            let candidate = StableId::new(format!("{:016x}", rand::random::<u64>()));
            if self.issued.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reference helpers
    // -----------------------------------------------------------------------

    pub fn node_ref(&self, node: Option<NodeKey>) -> ObjectRef {
        node.and_then(|key| self.stable_id_of(Handle::Node(key)))
            .map_or(ObjectRef::Null, |id| ObjectRef::Embedded(id.clone()))
    }

    pub fn component_ref(&self, component: Option<ComponentKey>) -> ObjectRef {
        component
            .and_then(|key| self.stable_id_of(Handle::Component(key)))
            .map_or(ObjectRef::Null, |id| ObjectRef::Embedded(id.clone()))
    }

    pub fn resolve_node_ref(&self, reference: &ObjectRef) -> Option<NodeKey> {
        match self.resolve(reference.id()?)? {
            Handle::Node(key) => Some(key),
            Handle::Component(_) => None,
        }
    }

    pub fn resolve_component_ref(&self, reference: &ObjectRef) -> Option<ComponentKey> {
        match self.resolve(reference.id()?)? {
            Handle::Component(key) => Some(key),
            Handle::Node(_) => None,
        }
    }

    // -----------------------------------------------------------------------
    // Whole-graph maintenance
    // -----------------------------------------------------------------------

    /// Drop every binding whose handle is no longer alive in `graph`.
    pub fn prune(&mut self, graph: &SceneGraph) -> usize {
        let dead: Vec<StableId> = self
            .by_id
            .iter()
            .filter(|(_, handle)| match handle {
                Handle::Node(key) => !graph.contains_node(*key),
                Handle::Component(key) => !graph.contains_component(*key),
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            self.forget(id);
        }
        dead.len()
    }

    /// Re-populate every binding from the live graph.
    ///
    /// Every node gets an id on first observation. Node markers share their
    /// node's id. Components are bound only once initialized, and their
    /// `node_id` follows their current owner. Objects that were already bound
    /// to their id keep it; when two objects claim the same id, the
    /// newcomer is given a fresh one.
    pub fn rebuild(&mut self, graph: &mut SceneGraph) {
        let previous = std::mem::take(&mut self.by_handle);
        self.by_id.clear();

        let kept = |handle: Handle, id: &Option<StableId>| {
            id.is_some() && previous.get(&handle) == id.as_ref()
        };

        // Nodes: previously bound first, then newcomers.
        let node_keys: Vec<NodeKey> = graph.nodes().map(|(key, _)| key).collect();
        let (bound, fresh): (Vec<NodeKey>, Vec<NodeKey>) = node_keys.into_iter().partition(|key| {
            graph
                .node(*key)
                .is_some_and(|n| kept(Handle::Node(*key), &n.stable_id))
        });
        for key in bound.into_iter().chain(fresh) {
            let Some(node) = graph.node(key) else { continue };
            let id = match &node.stable_id {
                Some(id) if !self.by_id.contains_key(id) => id.clone(),
                _ => self.issue_id(),
            };
            self.register(id.clone(), Handle::Node(key));
            if let Some(node) = graph.node_mut(key) {
                node.stable_id = Some(id.clone());
                if let Some(marker) = node.persistence.as_mut() {
                    marker.component_id = Some(id.clone());
                    marker.node_id = Some(id);
                }
            }
        }

        // Components.
        let component_keys: Vec<(ComponentKey, NodeKey)> =
            graph.components().map(|(key, owner, _)| (key, owner)).collect();
        let (bound, fresh): (Vec<_>, Vec<_>) = component_keys.into_iter().partition(|(key, _)| {
            graph.behaviour(*key).is_some_and(|b| {
                kept(Handle::Component(*key), &b.persistence().component_id)
            })
        });
        for (key, owner) in bound.into_iter().chain(fresh) {
            let owner_id = graph.node(owner).and_then(|n| n.stable_id.clone());
            let Some(state) = graph.behaviour(key).map(|b| b.persistence().clone()) else {
                continue;
            };
            if !state.is_initialized() {
                continue;
            }
            let id = match state.component_id {
                Some(id) if !self.by_id.contains_key(&id) => id,
                _ => self.issue_id(),
            };
            self.register(id.clone(), Handle::Component(key));
            if let Some(behaviour) = graph.behaviour_mut(key) {
                let persist = behaviour.persistence_mut();
                persist.component_id = Some(id);
                if owner_id.is_some() {
                    persist.node_id = owner_id;
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Behaviour, PersistState};
    use crate::graph::Node;
    use std::any::Any;

    #[derive(Debug, Default)]
    struct Stub {
        persist: PersistState,
    }

    impl Behaviour for Stub {
        fn persistence(&self) -> &PersistState {
            &self.persist
        }
        fn persistence_mut(&mut self) -> &mut PersistState {
            &mut self.persist
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn initialized_stub(id: &str, node: &str) -> Box<Stub> {
        let mut stub = Stub::default();
        stub.persist.component_id = Some(StableId::new(id));
        stub.persist.node_id = Some(StableId::new(node));
        Box::new(stub)
    }

    // -----------------------------------------------------------------------
    // Test 1: first writer wins
    // -----------------------------------------------------------------------
    #[test]
    fn register_never_overwrites() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let b = graph.add_node(Node::new("b"), None);
        let mut registry = IdentityRegistry::new();
        let id = StableId::new("x");

        assert!(registry.register(id.clone(), Handle::Node(a)));
        assert!(!registry.register(id.clone(), Handle::Node(b)));
        assert_eq!(registry.resolve(&id), Some(Handle::Node(a)));
        assert_eq!(registry.stable_id_of(Handle::Node(a)), Some(&id));
        assert_eq!(registry.stable_id_of(Handle::Node(b)), None);
    }

    // -----------------------------------------------------------------------
    // Test 2: issued ids are unique
    // -----------------------------------------------------------------------
    #[test]
    fn issue_id_is_unique() {
        let mut registry = IdentityRegistry::new();
        let ids: HashSet<StableId> = (0..1000).map(|_| registry.issue_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    // -----------------------------------------------------------------------
    // Test 3: rebuild assigns node ids and keeps them
    // -----------------------------------------------------------------------
    #[test]
    fn rebuild_assigns_and_keeps_node_ids() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let mut registry = IdentityRegistry::new();

        registry.rebuild(&mut graph);
        let first = graph.node(a).unwrap().stable_id.clone().unwrap();
        registry.rebuild(&mut graph);
        assert_eq!(graph.node(a).unwrap().stable_id.as_ref(), Some(&first));
        assert_eq!(registry.resolve_node(&graph, &first), Some(a));
    }

    // -----------------------------------------------------------------------
    // Test 4: duplicate ids are re-issued for the newcomer
    // -----------------------------------------------------------------------
    #[test]
    fn rebuild_reissues_duplicate_node_ids() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let mut registry = IdentityRegistry::new();
        registry.rebuild(&mut graph);
        let id_a = graph.node(a).unwrap().stable_id.clone().unwrap();

        let mut copy = Node::new("copy");
        copy.stable_id = Some(id_a.clone());
        let b = graph.add_node(copy, None);
        registry.rebuild(&mut graph);

        assert_eq!(graph.node(a).unwrap().stable_id.as_ref(), Some(&id_a));
        let id_b = graph.node(b).unwrap().stable_id.clone().unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(registry.resolve_node(&graph, &id_b), Some(b));
    }

    // -----------------------------------------------------------------------
    // Test 5: markers share their node's id
    // -----------------------------------------------------------------------
    #[test]
    fn rebuild_syncs_node_marker() {
        let mut graph = SceneGraph::new();
        let mut node = Node::new("a");
        node.persistence = Some(PersistState::default());
        let a = graph.add_node(node, None);
        let mut registry = IdentityRegistry::new();
        registry.rebuild(&mut graph);

        let n = graph.node(a).unwrap();
        let marker = n.persistence.as_ref().unwrap();
        assert_eq!(marker.component_id, n.stable_id);
        assert_eq!(marker.node_id, n.stable_id);
    }

    // -----------------------------------------------------------------------
    // Test 6: only initialized components are bound
    // -----------------------------------------------------------------------
    #[test]
    fn rebuild_binds_initialized_components_only() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let ready = graph.add_component(a, initialized_stub("c1", "stale")).unwrap();
        let bare = graph.add_component(a, Box::new(Stub::default())).unwrap();
        let mut registry = IdentityRegistry::new();
        registry.rebuild(&mut graph);

        assert_eq!(
            registry.resolve_component(&graph, &StableId::new("c1")),
            Some(ready)
        );
        assert_eq!(registry.stable_id_of(Handle::Component(bare)), None);
        // node_id follows the owner.
        let owner_id = graph.node(a).unwrap().stable_id.clone();
        assert_eq!(graph.behaviour(ready).unwrap().persistence().node_id, owner_id);
    }

    // -----------------------------------------------------------------------
    // Test 7: prune drops dead handles
    // -----------------------------------------------------------------------
    #[test]
    fn prune_drops_destroyed_objects() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let comp = graph.add_component(a, initialized_stub("c1", "n")).unwrap();
        let mut registry = IdentityRegistry::new();
        registry.rebuild(&mut graph);
        assert_eq!(registry.len(), 2);

        graph.destroy_node(a);
        assert_eq!(registry.prune(&graph), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.stable_id_of(Handle::Component(comp)), None);
    }

    // -----------------------------------------------------------------------
    // Test 8: object refs round trip through the registry
    // -----------------------------------------------------------------------
    #[test]
    fn object_refs_resolve() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let comp = graph.add_component(a, initialized_stub("c1", "n")).unwrap();
        let mut registry = IdentityRegistry::new();
        registry.rebuild(&mut graph);

        let node_ref = registry.node_ref(Some(a));
        assert_eq!(registry.resolve_node_ref(&node_ref), Some(a));
        assert_eq!(registry.resolve_component_ref(&node_ref), None);

        let comp_ref = registry.component_ref(Some(comp));
        assert_eq!(comp_ref, ObjectRef::Embedded(StableId::new("c1")));
        assert_eq!(registry.resolve_component_ref(&comp_ref), Some(comp));

        assert!(registry.node_ref(None).is_null());
        assert_eq!(registry.resolve_node_ref(&ObjectRef::Null), None);
    }

    #[test]
    fn recorded_ids_are_never_reissued() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(Node::new("a"), None);
        let mut registry = IdentityRegistry::new();
        let id = StableId::new("fixed");
        registry.register(id.clone(), Handle::Node(a));
        registry.forget(&id);
        for _ in 0..100 {
            assert_ne!(registry.issue_id(), id);
        }
    }
}
