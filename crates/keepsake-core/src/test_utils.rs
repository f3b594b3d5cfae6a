//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::component::{Behaviour, PersistState};
use crate::descriptor::{Descriptor, DescriptorRegistry};
use crate::id::*;
use crate::registry::{IdentityRegistry, ObjectRef};
use crate::session::Session;
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};

// ===========================================================================
// Counter: plain fields plus hook bookkeeping
// ===========================================================================

/// A behaviour with two saved fields. Hook calls are counted but not saved.
#[derive(Debug, Default, Clone)]
pub struct Counter {
    pub persist: PersistState,
    pub count: i64,
    pub label: String,
    pub pre_saves: u32,
    pub post_saves: u32,
    pub pre_loads: u32,
    pub post_loads: u32,
}

impl Counter {
    pub fn new(count: i64) -> Self {
        Self {
            count,
            label: format!("counter-{count}"),
            ..Default::default()
        }
    }
}

impl Behaviour for Counter {
    fn persistence(&self) -> &PersistState {
        &self.persist
    }
    fn persistence_mut(&mut self) -> &mut PersistState {
        &mut self.persist
    }
    fn on_pre_save(&mut self) {
        self.pre_saves += 1;
    }
    fn on_post_save(&mut self) {
        self.post_saves += 1;
    }
    fn on_pre_load(&mut self) {
        self.pre_loads += 1;
    }
    fn on_post_load(&mut self) {
        self.post_loads += 1;
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterData {
    pub count: i64,
    pub label: String,
}

impl Descriptor for CounterData {
    type Target = Counter;

    fn capture(target: &Counter, _refs: &IdentityRegistry) -> Self {
        Self {
            count: target.count,
            label: target.label.clone(),
        }
    }

    fn restore_onto(&self, target: &mut Counter, _refs: &IdentityRegistry) {
        target.count = self.count;
        target.label.clone_from(&self.label);
    }
}

// ===========================================================================
// Follower: references to a node and to another component
// ===========================================================================

#[derive(Debug, Default, Clone)]
pub struct Follower {
    pub persist: PersistState,
    pub target: Option<NodeKey>,
    pub buddy: Option<ComponentKey>,
    pub speed: f32,
}

impl Behaviour for Follower {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowerData {
    pub target: ObjectRef,
    pub buddy: ObjectRef,
    pub speed: f32,
}

impl Descriptor for FollowerData {
    type Target = Follower;

    fn type_tag() -> &'static str {
        "keepsake_core::samples::FollowerData"
    }

    fn capture(target: &Follower, refs: &IdentityRegistry) -> Self {
        Self {
            target: refs.node_ref(target.target),
            buddy: refs.component_ref(target.buddy),
            speed: target.speed,
        }
    }

    fn restore_onto(&self, target: &mut Follower, refs: &IdentityRegistry) {
        target.target = refs.resolve_node_ref(&self.target);
        target.buddy = refs.resolve_component_ref(&self.buddy);
        target.speed = self.speed;
    }
}

// ===========================================================================
// Unregistered: a behaviour with no descriptor
// ===========================================================================

#[derive(Debug, Default)]
pub struct Unregistered {
    pub persist: PersistState,
}

impl Behaviour for Unregistered {
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

// ===========================================================================
// Sessions and directories
// ===========================================================================

/// Descriptors for [`Counter`] and [`Follower`].
pub fn sample_descriptors() -> DescriptorRegistry {
    let mut builder = DescriptorRegistry::builder();
    builder
        .register::<CounterData>()
        .expect("CounterData registers once");
    builder
        .register::<FollowerData>()
        .expect("FollowerData registers once");
    builder.build()
}

/// Settings rooted at `dir`, with groups 2 and 3 named.
pub fn test_settings(dir: &Path) -> Settings {
    Settings {
        save_root: dir.to_path_buf(),
        save_groups: vec![
            String::new(),
            String::new(),
            "Player".to_string(),
            "World".to_string(),
        ],
        ..Default::default()
    }
}

pub fn test_session(dir: &Path) -> Session {
    test_session_with(test_settings(dir))
}

pub fn test_session_with(settings: Settings) -> Session {
    Session::new(settings, sample_descriptors()).expect("test settings are valid")
}

/// Create a temporary directory with a unique name for test isolation.
pub fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "keepsake_test_{suffix}_{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create test dir");
    dir
}

/// Clean up a test directory.
pub fn cleanup(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

/// Player group (id 2) in [`test_settings`].
pub fn player() -> GroupId {
    GroupId::new(2).expect("in range")
}

/// World group (id 3) in [`test_settings`].
pub fn world() -> GroupId {
    GroupId::new(3).expect("in range")
}
