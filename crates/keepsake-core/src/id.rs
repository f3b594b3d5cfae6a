use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Ephemeral handle to a node in the live scene graph. Only valid for the
    /// current session; never written to storage.
    pub struct NodeKey;

    /// Ephemeral handle to a behaviour attached to a node.
    pub struct ComponentKey;
}

/// Stable textual identity of a node or component. Survives destruction and
/// recreation of the live object, and is the only key written to storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live object the identity registry can bind a stable id to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Node(NodeKey),
    Component(ComponentKey),
}

/// Number of save groups. Group ids are `0..GROUP_COUNT`.
pub const GROUP_COUNT: usize = 16;

/// Identifies a save group (0-15). Groups 0 and 1 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct GroupId(u8);

impl GroupId {
    pub const MAIN: GroupId = GroupId(0);
    pub const GLOBAL: GroupId = GroupId(1);

    /// Returns `None` when `index` is out of range.
    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < GROUP_COUNT).then_some(GroupId(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reserved groups cannot be renamed.
    pub fn is_reserved(self) -> bool {
        self.0 < 2
    }

    pub fn all() -> impl Iterator<Item = GroupId> {
        (0..GROUP_COUNT as u8).map(GroupId)
    }
}

impl TryFrom<u8> for GroupId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        GroupId::new(value).ok_or_else(|| format!("group id {value} out of range"))
    }
}

impl From<GroupId> for u8 {
    fn from(group: GroupId) -> u8 {
        group.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which groups a pipeline call covers. `All` is the `-1` pseudo-group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupSelector {
    All,
    Only(GroupId),
}

impl GroupSelector {
    pub fn matches(self, group: GroupId) -> bool {
        match self {
            GroupSelector::All => true,
            GroupSelector::Only(g) => g == group,
        }
    }

    /// The raw id used by hosts: `-1` for all groups.
    pub fn raw(self) -> i8 {
        match self {
            GroupSelector::All => -1,
            GroupSelector::Only(g) => g.0 as i8,
        }
    }

    /// Parse a raw host id. Anything outside `-1..16` is rejected.
    pub fn from_raw(raw: i8) -> Option<Self> {
        match raw {
            -1 => Some(GroupSelector::All),
            r if r >= 0 => GroupId::new(r as u8).map(GroupSelector::Only),
            _ => None,
        }
    }
}

impl From<GroupId> for GroupSelector {
    fn from(group: GroupId) -> Self {
        GroupSelector::Only(group)
    }
}

/// Reconstruction order of a node: ancestors sort before descendants.
/// `depth` counts the node itself plus every ancestor, `sibling` is the
/// index under its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LoadingOrder {
    pub depth: u32,
    pub sibling: u32,
}
