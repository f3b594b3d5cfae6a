//! What a single save or load call covers, and how it splits into passes.
//!
//! Group saves and level saves run through the same pipeline. A call is
//! expanded into [`Pass`]es; each pass owns one record file and one modules
//! file and decides which entities qualify.

use crate::component::PersistState;
use crate::graph::SceneGraph;
use crate::groups::{GroupError, SaveGroups, SavePaths};
use crate::id::*;
use std::path::PathBuf;

pub const RECORD_STEM: &str = "components";
pub const MODULES_STEM: &str = "assemblies";

/// The extent of one save or load call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveScope {
    /// Group-partitioned persistence of the whole scene.
    Groups(GroupSelector),
    /// Every entity under `root` (inclusive), in a single named file.
    Level { name: String, root: NodeKey },
}

impl SaveScope {
    pub fn all() -> Self {
        SaveScope::Groups(GroupSelector::All)
    }

    pub fn group(group: GroupId) -> Self {
        SaveScope::Groups(GroupSelector::Only(group))
    }

    pub fn level(name: impl Into<String>, root: NodeKey) -> Self {
        SaveScope::Level {
            name: name.into(),
            root,
        }
    }
}

/// Which entities a pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassFilter {
    Group(GroupId),
    Subtree(NodeKey),
}

/// One unit of work: a filter plus the files it reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    pub filter: PassFilter,
    pub label: String,
    pub dir: PathBuf,
    pub record: PathBuf,
    pub modules: PathBuf,
}

impl Pass {
    pub fn for_group(
        paths: &SavePaths,
        groups: &SaveGroups,
        group: GroupId,
        extension: &str,
    ) -> Result<Self, GroupError> {
        let dir = paths.group_dir(groups, group)?;
        Ok(Self {
            filter: PassFilter::Group(group),
            label: groups.name(group).to_string(),
            record: dir.join(format!("{RECORD_STEM}.{extension}")),
            modules: dir.join(format!("{MODULES_STEM}.{extension}")),
            dir,
        })
    }

    pub fn for_level(
        paths: &SavePaths,
        name: &str,
        root: NodeKey,
        extension: &str,
    ) -> Result<Self, GroupError> {
        let bad = name.is_empty() || name.contains(['/', '\\']) || name == "." || name == "..";
        if bad || name.starts_with(&format!("{MODULES_STEM}-")) {
            return Err(GroupError::InvalidLevelName(name.to_string()));
        }
        let dir = paths.levels_dir();
        Ok(Self {
            filter: PassFilter::Subtree(root),
            label: name.to_string(),
            record: dir.join(format!("{name}.{extension}")),
            modules: dir.join(format!("{MODULES_STEM}-{name}.{extension}")),
            dir,
        })
    }

    /// Whether an entity owned by `owner` with `state` belongs to this pass.
    /// Entities that are switched off never qualify.
    pub fn qualifies(&self, graph: &SceneGraph, owner: NodeKey, state: &PersistState) -> bool {
        if !state.is_on {
            return false;
        }
        self.covers(graph, owner, state)
    }

    /// Like [`qualifies`](Self::qualifies) but ignoring the on/off switch.
    pub fn covers(&self, graph: &SceneGraph, owner: NodeKey, state: &PersistState) -> bool {
        match self.filter {
            PassFilter::Group(group) => SaveGroups::classify(state) == group,
            PassFilter::Subtree(root) => owner == root || graph.is_ancestor(root, owner),
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self.filter {
            PassFilter::Group(group) => Some(group),
            PassFilter::Subtree(_) => None,
        }
    }
}
