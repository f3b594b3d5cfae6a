//! Keepsake Core -- grouped save/load for live object graphs.
//!
//! Keepsake persists the state of a scene graph (nodes with behaviours
//! attached) and restores it later, even after the live objects have been
//! destroyed and rebuilt under different runtime handles.
//!
//! # Pipelines
//!
//! A [`session::Session`] owns the live [`graph::SceneGraph`], the
//! [`registry::IdentityRegistry`] and the [`descriptor::DescriptorRegistry`].
//! Calling [`session::Session::save`] runs, per save group:
//!
//! 1. **Setup check** -- every qualifying component must carry stable ids.
//! 2. **Pre-save hooks** -- `on_pre_save` on each qualifying behaviour.
//! 3. **Nodes** -- persistent nodes are snapshotted, parents first.
//! 4. **Components** -- one record line per descriptor type.
//! 5. **Write** -- the record and its modules file, optionally sealed.
//! 6. **Post-save hooks**.
//!
//! [`session::Session::load`] reverses it in two passes: pass A rebuilds
//! missing nodes and components, pass B restores fields and references once
//! everything exists.
//!
//! # Identity
//!
//! Storage never sees slot keys. Every persistent object has a
//! [`id::StableId`], and references between objects are written as
//! [`registry::ObjectRef`]s resolved through the identity registry.
//!
//! # Describing a type
//!
//! ```rust,ignore
//! #[derive(Serialize, Deserialize)]
//! struct DoorData { open: bool }
//!
//! impl Descriptor for DoorData {
//!     type Target = Door;
//!     fn capture(door: &Door, _: &IdentityRegistry) -> Self { Self { open: door.open } }
//!     fn restore_onto(&self, door: &mut Door, _: &IdentityRegistry) { door.open = self.open; }
//! }
//!
//! let descriptors = DescriptorRegistry::builder().with::<DoorData>()?.build();
//! let mut session = Session::new(Settings::default(), descriptors)?;
//! ```

pub mod codec;
pub mod component;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod groups;
pub mod id;
pub mod load;
pub mod node;
pub mod pacing;
pub mod registry;
pub mod save;
pub mod scope;
pub mod seal;
pub mod session;
pub mod settings;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
