//! The session: one live graph with its registries and settings.
//!
//! All state the pipelines touch lives here and is passed explicitly; there
//! are no global registries. Save and load borrow the session mutably, so
//! nothing can regroup or destroy entities while a pipeline is running.

use crate::component::{Behaviour, PersistState};
use crate::descriptor::DescriptorRegistry;
use crate::diagnostics::Diagnostics;
use crate::error::PersistError;
use crate::graph::{Node, SceneGraph};
use crate::groups::{GroupError, SaveGroups, SavePaths};
use crate::id::*;
use crate::load::{self, LoadReport};
use crate::pacing::ExecutionMode;
use crate::registry::IdentityRegistry;
use crate::save::{self, SaveReport};
use crate::scope::SaveScope;
use crate::seal::SealKey;
use crate::settings::Settings;
use crate::storage::Store;
use std::any::TypeId;

#[derive(Debug)]
pub struct Session {
    pub(crate) graph: SceneGraph,
    pub(crate) identities: IdentityRegistry,
    pub(crate) descriptors: DescriptorRegistry,
    pub(crate) settings: Settings,
    pub(crate) groups: SaveGroups,
    pub(crate) seal_key: SealKey,
    pub(crate) diagnostics: Diagnostics,
}

impl Session {
    pub fn new(settings: Settings, descriptors: DescriptorRegistry) -> Result<Self, PersistError> {
        settings.validate()?;
        let groups = settings.groups()?;
        Ok(Self {
            graph: SceneGraph::new(),
            identities: IdentityRegistry::new(),
            descriptors,
            diagnostics: Diagnostics::new(settings.debug_mode),
            settings,
            groups,
            seal_key: SealKey::default(),
        })
    }

    /// Replace the default sealing key.
    pub fn with_seal_key(mut self, key: SealKey) -> Self {
        self.seal_key = key;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    /// Direct graph access. Structural edits made here are picked up by the
    /// next [`refresh_identities`](Self::refresh_identities) or pipeline run.
    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn descriptors(&self) -> &DescriptorRegistry {
        &self.descriptors
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn groups(&self) -> &SaveGroups {
        &self.groups
    }

    pub fn paths(&self) -> SavePaths {
        SavePaths::new(
            self.settings.save_root.clone(),
            self.settings.save_slot,
            self.settings.scene.clone(),
        )
    }

    pub(crate) fn store(&self) -> Store {
        let seal = self.settings.encrypt.then(|| self.seal_key.clone());
        Store::new(self.paths(), self.settings.file_extension.clone(), seal)
    }

    pub fn node_id(&self, node: NodeKey) -> Option<&StableId> {
        self.identities.stable_id_of(Handle::Node(node))
    }

    pub fn component_id(&self, component: ComponentKey) -> Option<&StableId> {
        self.identities.stable_id_of(Handle::Component(component))
    }

    pub fn find_node(&self, id: &StableId) -> Option<NodeKey> {
        self.identities.resolve_node(&self.graph, id)
    }

    pub fn find_component(&self, id: &StableId) -> Option<ComponentKey> {
        self.identities.resolve_component(&self.graph, id)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Insert a node and give it a stable id.
    pub fn spawn_node(&mut self, node: Node, parent: Option<NodeKey>) -> NodeKey {
        let key = self.graph.add_node(node, parent);
        self.observe_node(key);
        key
    }

    /// Like [`spawn_node`](Self::spawn_node), then mark the node persistent
    /// in `group`.
    pub fn spawn_persistent(&mut self, node: Node, parent: Option<NodeKey>, group: GroupId) -> NodeKey {
        let key = self.spawn_node(node, parent);
        self.make_persistent(key, group);
        key
    }

    fn observe_node(&mut self, key: NodeKey) -> Option<StableId> {
        if let Some(id) = self.identities.stable_id_of(Handle::Node(key)) {
            return Some(id.clone());
        }
        let existing = self.graph.node(key)?.stable_id.clone();
        let id = match existing {
            Some(id) if self.identities.resolve(&id).is_none() => id,
            _ => self.identities.issue_id(),
        };
        self.identities.register(id.clone(), Handle::Node(key));
        if let Some(node) = self.graph.node_mut(key) {
            node.stable_id = Some(id.clone());
        }
        Some(id)
    }

    /// Attach a persistence marker so the node is saved and can be rebuilt.
    pub fn make_persistent(&mut self, node: NodeKey, group: GroupId) -> bool {
        let Some(id) = self.observe_node(node) else {
            return false;
        };
        let Some(n) = self.graph.node_mut(node) else {
            return false;
        };
        let marker = n.persistence.get_or_insert_with(PersistState::default);
        marker.component_id = Some(id.clone());
        marker.node_id = Some(id);
        marker.group = group;
        true
    }

    /// Attach `behaviour` to `node`, assign its ids and apply the configured
    /// default on/off state for its type.
    pub fn attach<T: Behaviour>(&mut self, node: NodeKey, behaviour: T) -> Option<ComponentKey> {
        let node_id = self.observe_node(node)?;
        let component_id = self.identities.issue_id();
        let on = self.settings.is_on_by_default(behaviour.type_name());

        let mut behaviour = behaviour;
        let persist = behaviour.persistence_mut();
        persist.component_id = Some(component_id.clone());
        persist.node_id = Some(node_id);
        persist.is_on = on;

        let key = self.graph.add_component(node, Box::new(behaviour))?;
        self.identities.register(component_id, Handle::Component(key));
        Some(key)
    }

    /// Destroy a node and its subtree, dropping their bindings.
    pub fn destroy_node(&mut self, node: NodeKey) -> usize {
        let removed = self.graph.destroy_node(node);
        self.identities.prune(&self.graph);
        removed
    }

    /// Re-derive every identity binding from the live graph.
    pub fn refresh_identities(&mut self) {
        self.identities.rebuild(&mut self.graph);
    }

    /// Swap in a different live graph, as after a scene change.
    pub fn replace_graph(&mut self, graph: SceneGraph) -> SceneGraph {
        let old = std::mem::replace(&mut self.graph, graph);
        self.refresh_identities();
        old
    }

    pub fn set_scene(&mut self, scene: impl Into<String>) -> Result<(), PersistError> {
        let mut settings = self.settings.clone();
        settings.scene = scene.into();
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn set_slot(&mut self, slot: u32) {
        self.settings.save_slot = slot;
    }

    // -----------------------------------------------------------------------
    // On/off and grouping
    // -----------------------------------------------------------------------

    /// Components that follow `component` under auto-sync: itself, plus
    /// every other component of the same concrete type with auto-sync on.
    fn sync_set(&self, component: ComponentKey) -> Vec<ComponentKey> {
        let Some(source) = self.graph.behaviour(component) else {
            return Vec::new();
        };
        if !source.persistence().auto_sync {
            return vec![component];
        }
        let ty: TypeId = source.as_any().type_id();
        self.graph
            .components()
            .filter(|(key, _, b)| {
                *key == component || (b.as_any().type_id() == ty && b.persistence().auto_sync)
            })
            .map(|(key, _, _)| key)
            .collect()
    }

    /// Switch a component on or off. Returns how many components changed.
    pub fn set_enabled(&mut self, component: ComponentKey, on: bool) -> usize {
        let keys = self.sync_set(component);
        for key in &keys {
            if let Some(b) = self.graph.behaviour_mut(*key) {
                b.persistence_mut().is_on = on;
            }
        }
        keys.len()
    }

    /// Move a component to another save group. Returns how many components
    /// changed.
    pub fn set_group(&mut self, component: ComponentKey, group: GroupId) -> usize {
        let keys = self.sync_set(component);
        for key in &keys {
            if let Some(b) = self.graph.behaviour_mut(*key) {
                b.persistence_mut().group = group;
            }
        }
        keys.len()
    }

    /// Move a persistent node to another save group.
    pub fn set_node_group(&mut self, node: NodeKey, group: GroupId) -> bool {
        match self.graph.node_mut(node).and_then(|n| n.persistence.as_mut()) {
            Some(marker) => {
                marker.group = group;
                true
            }
            None => false,
        }
    }

    /// Put every persistent entity back into group 0.
    pub fn reset_all_group_ids(&mut self) {
        for (_, node) in self.graph.nodes_mut() {
            if let Some(marker) = node.persistence.as_mut() {
                marker.group = GroupId::MAIN;
            }
        }
        for (_, behaviour) in self.graph.components_mut() {
            behaviour.persistence_mut().group = GroupId::MAIN;
        }
    }

    pub fn rename_group(&mut self, index: i32, name: &str) -> Result<(), GroupError> {
        self.groups.rename(index, name)
    }

    pub fn group_named(&self, name: &str) -> Result<GroupId, GroupError> {
        self.groups
            .id_of(name)
            .ok_or_else(|| GroupError::UnknownName(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    /// Save inline, blocking the caller until every file is written.
    pub fn save(&mut self, scope: &SaveScope) -> Result<SaveReport, PersistError> {
        pollster::block_on(save::run(self, scope, ExecutionMode::Sync))
    }

    /// Load inline, blocking the caller until both passes are done.
    pub fn load(&mut self, scope: &SaveScope) -> Result<LoadReport, PersistError> {
        pollster::block_on(load::run(self, scope, ExecutionMode::Sync))
    }

    /// Save using the configured execution mode. Async mode must be awaited
    /// inside a tokio runtime.
    pub async fn save_async(&mut self, scope: &SaveScope) -> Result<SaveReport, PersistError> {
        let mode = self.settings.execution;
        save::run(self, scope, mode).await
    }

    /// Load using the configured execution mode.
    pub async fn load_async(&mut self, scope: &SaveScope) -> Result<LoadReport, PersistError> {
        let mode = self.settings.execution;
        load::run(self, scope, mode).await
    }

    /// Save with a raw host group id, `-1` meaning every group.
    pub fn save_group(&mut self, raw: i8) -> Result<SaveReport, PersistError> {
        let selector = GroupSelector::from_raw(raw).ok_or(GroupError::OutOfRange(raw as i32))?;
        self.save(&SaveScope::Groups(selector))
    }

    /// Load with a raw host group id, `-1` meaning every group.
    pub fn load_group(&mut self, raw: i8) -> Result<LoadReport, PersistError> {
        let selector = GroupSelector::from_raw(raw).ok_or(GroupError::OutOfRange(raw as i32))?;
        self.load(&SaveScope::Groups(selector))
    }
}
