//! Serializer descriptors and the immutable descriptor registry.
//!
//! A [`Descriptor`] is a flat snapshot of one behaviour type's persistent
//! fields. The registry erases descriptors behind plain function pointers so
//! the pipelines can capture, decode, instantiate and restore any registered
//! type from a type tag alone.
//!
//! Registration follows the builder lifecycle: register every descriptor on a
//! [`DescriptorRegistryBuilder`], then call `build()` to freeze it.

use crate::component::Behaviour;
use crate::graph::SceneGraph;
use crate::id::*;
use crate::node::NODE_TAG;
use crate::registry::IdentityRegistry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Descriptor trait
// ---------------------------------------------------------------------------

/// Snapshot type for one persistent behaviour type.
///
/// Implementations copy fields out of a live target in [`capture`] and write
/// them back in [`restore_onto`]. References to other persistent objects go
/// through the identity registry as [`ObjectRef`](crate::registry::ObjectRef)s.
///
/// [`capture`]: Descriptor::capture
/// [`restore_onto`]: Descriptor::restore_onto
pub trait Descriptor: Serialize + DeserializeOwned + 'static {
    type Target: Behaviour + Default;

    /// Tag written in front of every record line for this type.
    fn type_tag() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn capture(target: &Self::Target, refs: &IdentityRegistry) -> Self;

    fn restore_onto(&self, target: &mut Self::Target, refs: &IdentityRegistry);
}

/// One stored element: a descriptor plus the ids and group it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<S> {
    pub component_id: StableId,
    pub node_id: StableId,
    pub group_id: GroupId,
    pub auto_sync: bool,
    pub state: S,
}

// ---------------------------------------------------------------------------
// Type-erased entries
// ---------------------------------------------------------------------------

trait ErasedState {
    fn restore(&self, target: &mut dyn Behaviour, refs: &IdentityRegistry) -> bool;
}

impl<D: Descriptor> ErasedState for D {
    fn restore(&self, target: &mut dyn Behaviour, refs: &IdentityRegistry) -> bool {
        match target.as_any_mut().downcast_mut::<D::Target>() {
            Some(target) => {
                self.restore_onto(target, refs);
                true
            }
            None => false,
        }
    }
}

/// A decoded element whose concrete descriptor type has been erased.
pub struct DecodedItem {
    pub component_id: StableId,
    pub node_id: StableId,
    pub group_id: GroupId,
    pub auto_sync: bool,
    state: Box<dyn ErasedState>,
}

impl DecodedItem {
    /// Write the stored fields onto `target`. Returns `false` when `target`
    /// is not the descriptor's target type.
    pub fn restore(&self, target: &mut dyn Behaviour, refs: &IdentityRegistry) -> bool {
        self.state.restore(target, refs)
    }
}

impl std::fmt::Debug for DecodedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedItem")
            .field("component_id", &self.component_id)
            .field("node_id", &self.node_id)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

type CaptureFn =
    fn(&SceneGraph, &IdentityRegistry, ComponentKey) -> serde_json::Result<Option<serde_json::Value>>;
type DecodeFn = fn(&str) -> serde_json::Result<Vec<DecodedItem>>;
type InstantiateFn = fn() -> Box<dyn Behaviour>;

fn capture_one<D: Descriptor>(
    graph: &SceneGraph,
    refs: &IdentityRegistry,
    key: ComponentKey,
) -> serde_json::Result<Option<serde_json::Value>> {
    let Some(target) = graph.component::<D::Target>(key) else {
        return Ok(None);
    };
    let persist = target.persistence();
    let (Some(component_id), Some(node_id)) = (&persist.component_id, &persist.node_id) else {
        return Ok(None);
    };
    let envelope = Envelope {
        component_id: component_id.clone(),
        node_id: node_id.clone(),
        group_id: persist.group,
        auto_sync: persist.auto_sync,
        state: D::capture(target, refs),
    };
    crate::codec::to_readable_value(&envelope).map(Some)
}

fn decode_batch<D: Descriptor>(json: &str) -> serde_json::Result<Vec<DecodedItem>> {
    let envelopes: Vec<Envelope<D>> = serde_json::from_str(json)?;
    Ok(envelopes
        .into_iter()
        .map(|e| DecodedItem {
            component_id: e.component_id,
            node_id: e.node_id,
            group_id: e.group_id,
            auto_sync: e.auto_sync,
            state: Box::new(e.state),
        })
        .collect())
}

fn instantiate<D: Descriptor>() -> Box<dyn Behaviour> {
    Box::new(D::Target::default())
}

/// Everything the pipelines need to handle one descriptor type.
#[derive(Debug, Clone)]
pub struct DescriptorEntry {
    pub tag: &'static str,
    /// First path segment of the tag (the defining crate).
    pub module: &'static str,
    /// Last path segment of the tag.
    pub short_name: &'static str,
    pub target: TypeId,
    pub target_name: &'static str,
    capture: CaptureFn,
    decode: DecodeFn,
    instantiate: InstantiateFn,
}

impl DescriptorEntry {
    fn of<D: Descriptor>() -> Self {
        let tag = D::type_tag();
        Self {
            tag,
            module: module_of(tag),
            short_name: short_name_of(tag),
            target: TypeId::of::<D::Target>(),
            target_name: std::any::type_name::<D::Target>(),
            capture: capture_one::<D>,
            decode: decode_batch::<D>,
            instantiate: instantiate::<D>,
        }
    }

    /// Snapshot one component as a JSON envelope. `None` when the component
    /// is missing, of another type, or has no ids yet.
    pub fn capture(
        &self,
        graph: &SceneGraph,
        refs: &IdentityRegistry,
        key: ComponentKey,
    ) -> serde_json::Result<Option<serde_json::Value>> {
        (self.capture)(graph, refs, key)
    }

    pub fn decode(&self, json: &str) -> serde_json::Result<Vec<DecodedItem>> {
        (self.decode)(json)
    }

    /// A default-constructed target behaviour.
    pub fn instantiate(&self) -> Box<dyn Behaviour> {
        (self.instantiate)()
    }
}

/// The module a type tag belongs to.
pub fn module_of(tag: &str) -> &str {
    tag.split("::").next().unwrap_or(tag)
}

fn short_name_of(tag: &str) -> &str {
    tag.rsplit("::").next().unwrap_or(tag)
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while registering descriptors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate descriptor tag: {0}")]
    DuplicateTag(String),
    #[error("behaviour type {0} already has a descriptor")]
    DuplicateTarget(&'static str),
    #[error("tag {0} is reserved for node snapshots")]
    ReservedTag(String),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for the immutable [`DescriptorRegistry`].
#[derive(Debug, Default)]
pub struct DescriptorRegistryBuilder {
    entries: Vec<DescriptorEntry>,
    by_tag: HashMap<&'static str, usize>,
    by_target: HashMap<TypeId, usize>,
}

impl DescriptorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register descriptor `D`.
    pub fn register<D: Descriptor>(&mut self) -> Result<(), RegistryError> {
        let entry = DescriptorEntry::of::<D>();
        if entry.tag == NODE_TAG {
            return Err(RegistryError::ReservedTag(entry.tag.to_string()));
        }
        if self.by_tag.contains_key(entry.tag) {
            return Err(RegistryError::DuplicateTag(entry.tag.to_string()));
        }
        if self.by_target.contains_key(&entry.target) {
            return Err(RegistryError::DuplicateTarget(entry.target_name));
        }
        let index = self.entries.len();
        self.by_tag.insert(entry.tag, index);
        self.by_target.insert(entry.target, index);
        self.entries.push(entry);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with<D: Descriptor>(mut self) -> Result<Self, RegistryError> {
        self.register::<D>()?;
        Ok(self)
    }

    pub fn build(self) -> DescriptorRegistry {
        DescriptorRegistry {
            entries: self.entries,
            by_tag: self.by_tag,
            by_target: self.by_target,
        }
    }
}

// ---------------------------------------------------------------------------
// DescriptorRegistry
// ---------------------------------------------------------------------------

/// Frozen set of descriptors, looked up by tag or by target type.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    entries: Vec<DescriptorEntry>,
    by_tag: HashMap<&'static str, usize>,
    by_target: HashMap<TypeId, usize>,
}

impl DescriptorRegistry {
    pub fn builder() -> DescriptorRegistryBuilder {
        DescriptorRegistryBuilder::new()
    }

    pub fn get(&self, tag: &str) -> Option<&DescriptorEntry> {
        self.by_tag.get(tag).map(|i| &self.entries[*i])
    }

    pub fn for_target(&self, target: TypeId) -> Option<&DescriptorEntry> {
        self.by_target.get(&target).map(|i| &self.entries[*i])
    }

    /// Resolve a stored tag. An exact match wins; otherwise the tag's last
    /// path segment is matched against descriptors from `modules`, and the
    /// match is used only when it is unambiguous.
    pub fn lookup(&self, tag: &str, modules: &[String]) -> Option<&DescriptorEntry> {
        if let Some(entry) = self.get(tag) {
            return Some(entry);
        }
        let short = short_name_of(tag);
        let mut candidates = self.entries.iter().filter(|e| {
            e.short_name == short && modules.iter().any(|m| m == e.module)
        });
        let first = candidates.next()?;
        candidates.next().is_none().then_some(first)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DescriptorEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::PersistState;
    use crate::graph::Node;
    use std::any::Any;

    #[derive(Debug, Default)]
    struct Gauge {
        persist: PersistState,
        level: i32,
    }

    impl Behaviour for Gauge {
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

    #[derive(Debug, Serialize, Deserialize)]
    struct GaugeData {
        level: i32,
    }

    impl Descriptor for GaugeData {
        type Target = Gauge;

        fn capture(target: &Gauge, _refs: &IdentityRegistry) -> Self {
            Self { level: target.level }
        }

        fn restore_onto(&self, target: &mut Gauge, _refs: &IdentityRegistry) {
            target.level = self.level;
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct OtherGaugeData {
        level: i32,
    }

    impl Descriptor for OtherGaugeData {
        type Target = Gauge;

        fn type_tag() -> &'static str {
            "elsewhere::OtherGaugeData"
        }

        fn capture(target: &Gauge, _refs: &IdentityRegistry) -> Self {
            Self { level: target.level }
        }

        fn restore_onto(&self, target: &mut Gauge, _refs: &IdentityRegistry) {
            target.level = self.level;
        }
    }

    fn registry() -> DescriptorRegistry {
        let mut builder = DescriptorRegistry::builder();
        builder.register::<GaugeData>().unwrap();
        builder.build()
    }

    #[test]
    fn default_tag_is_type_name() {
        let registry = registry();
        let entry = registry.get(GaugeData::type_tag()).unwrap();
        assert!(entry.tag.ends_with("GaugeData"));
        assert_eq!(entry.module, "keepsake_core");
        assert_eq!(entry.short_name, "GaugeData");
        assert_eq!(entry.target, TypeId::of::<Gauge>());
    }

    #[test]
    fn duplicate_target_is_rejected() {
        let mut builder = DescriptorRegistry::builder();
        builder.register::<GaugeData>().unwrap();
        assert!(matches!(
            builder.register::<OtherGaugeData>(),
            Err(RegistryError::DuplicateTarget(_))
        ));
        assert!(matches!(
            builder.register::<GaugeData>(),
            Err(RegistryError::DuplicateTag(_))
        ));
    }

    #[test]
    fn capture_decode_restore() {
        let mut graph = SceneGraph::new();
        let node = graph.add_node(Node::new("n"), None);
        let mut gauge = Gauge { level: 7, ..Default::default() };
        gauge.persist.component_id = Some(StableId::new("c"));
        gauge.persist.node_id = Some(StableId::new("n"));
        let key = graph.add_component(node, Box::new(gauge)).unwrap();
        let bare = graph.add_component(node, Box::new(Gauge::default())).unwrap();
        let refs = IdentityRegistry::new();
        let registry = registry();
        let entry = registry.for_target(TypeId::of::<Gauge>()).unwrap();

        assert!(entry.capture(&graph, &refs, bare).unwrap().is_none());
        let value = entry.capture(&graph, &refs, key).unwrap().unwrap();
        let json = serde_json::to_string(&vec![value]).unwrap();
        let items = entry.decode(&json).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].component_id, StableId::new("c"));
        assert_eq!(items[0].group_id, GroupId::MAIN);

        let mut fresh = entry.instantiate();
        assert!(items[0].restore(fresh.as_mut(), &refs));
        let fresh = fresh.as_any().downcast_ref::<Gauge>().unwrap();
        assert_eq!(fresh.level, 7);
    }

    #[test]
    fn decode_rejects_mismatched_fields() {
        let registry = registry();
        let entry = registry.get(GaugeData::type_tag()).unwrap();
        let bad = r#"[{"component_id":"c","node_id":"n","group_id":0,"auto_sync":true,"state":{"lvl":1}}]"#;
        assert!(entry.decode(bad).is_err());
    }

    #[test]
    fn lookup_falls_back_to_short_name_within_recorded_modules() {
        let registry = registry();
        let moved = "keepsake_core::old_place::GaugeData";
        let modules = vec!["keepsake_core".to_string()];
        assert!(registry.lookup(moved, &modules).is_some());
        assert!(registry.lookup(moved, &[]).is_none());
        assert!(registry.lookup("keepsake_core::Nope", &modules).is_none());
    }

    #[test]
    fn module_of_takes_first_segment() {
        assert_eq!(module_of("a::b::C"), "a");
        assert_eq!(module_of("Plain"), "Plain");
    }
}
