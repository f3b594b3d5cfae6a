//! Behaviours: the stateful components attached to scene nodes.
//!
//! A behaviour exposes its [`PersistState`] (stable ids, save group, on/off
//! switch) and may override the four pipeline hooks. The default hook
//! implementations are no-ops, so a behaviour only overrides what it needs.
//! Hooks run on the pipeline's own thread and must return promptly.

use crate::id::{GroupId, StableId};
use std::any::Any;

// ---------------------------------------------------------------------------
// PersistState
// ---------------------------------------------------------------------------

/// Per-entity persistence bookkeeping. Carried by every behaviour and by the
/// persistence marker of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistState {
    /// Own stable id. `None` until the entity is initialized.
    pub component_id: Option<StableId>,
    /// Stable id of the owning node. `None` until initialized.
    pub node_id: Option<StableId>,
    /// Save group this entity belongs to.
    pub group: GroupId,
    /// Propagate on/off toggles and group changes to other entities of the
    /// same concrete type that also have `auto_sync` set.
    pub auto_sync: bool,
    /// Whether the entity takes part in save/load at all.
    pub is_on: bool,
    /// Set while a save pipeline is running over this entity.
    pub is_saving: bool,
    /// Set while a load pipeline is running over this entity.
    pub is_loading: bool,
}

impl Default for PersistState {
    fn default() -> Self {
        Self {
            component_id: None,
            node_id: None,
            group: GroupId::MAIN,
            auto_sync: true,
            is_on: true,
            is_saving: false,
            is_loading: false,
        }
    }
}

impl PersistState {
    /// Both stable ids have been assigned.
    pub fn is_initialized(&self) -> bool {
        self.component_id.is_some() && self.node_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Behaviour trait
// ---------------------------------------------------------------------------

/// A persistent behaviour attached to a scene node.
pub trait Behaviour: std::fmt::Debug + 'static {
    fn persistence(&self) -> &PersistState;

    fn persistence_mut(&mut self) -> &mut PersistState;

    /// Called right before this behaviour is saved.
    fn on_pre_save(&mut self) {}

    /// Called right after this behaviour's group has been written.
    fn on_post_save(&mut self) {}

    /// Called right before this behaviour's group is loaded.
    fn on_pre_load(&mut self) {}

    /// Called after both reconstruction passes have completed.
    fn on_post_load(&mut self) {}

    /// Concrete type name, used in diagnostics and `default_on` lookup.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Downcast to `&dyn Any` for type-safe access to the concrete behaviour.
    fn as_any(&self) -> &dyn Any;

    /// Downcast to `&mut dyn Any` for type-safe mutable access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    #[derive(Debug, Default)]
    struct Lamp {
        persist: PersistState,
        lit: bool,
        pre_saves: u32,
    }

    impl Behaviour for Lamp {
        fn persistence(&self) -> &PersistState {
            &self.persist
        }
        fn persistence_mut(&mut self) -> &mut PersistState {
            &mut self.persist
        }
        fn on_pre_save(&mut self) {
            self.pre_saves += 1;
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn default_state_is_on_in_main_group() {
        let state = PersistState::default();
        assert!(state.is_on);
        assert!(state.auto_sync);
        assert_eq!(state.group, GroupId::MAIN);
        assert!(!state.is_initialized());
    }

    #[test]
    fn initialized_needs_both_ids() {
        let mut state = PersistState::default();
        state.component_id = Some(StableId::new("c"));
        assert!(!state.is_initialized());
        state.node_id = Some(StableId::new("n"));
        assert!(state.is_initialized());
    }

    #[test]
    fn hooks_dispatch_through_trait_object() {
        let mut boxed: Box<dyn Behaviour> = Box::new(Lamp::default());
        boxed.on_pre_save();
        boxed.on_post_save();
        let lamp = boxed.as_any().downcast_ref::<Lamp>().unwrap();
        assert_eq!(lamp.pre_saves, 1);
        assert!(!lamp.lit);
    }

    #[test]
    fn type_name_is_concrete() {
        let boxed: Box<dyn Behaviour> = Box::new(Lamp::default());
        assert!(boxed.type_name().ends_with("Lamp"));
        assert_eq!(boxed.as_any().type_id(), TypeId::of::<Lamp>());
    }
}
