//! Save groups and where their files live.
//!
//! There are [`GROUP_COUNT`] groups. Groups 0 and 1 are reserved: they are
//! always named and cannot be renamed. Every named group owns one directory
//! under the current slot and scene.

use crate::component::PersistState;
use crate::id::*;
use std::path::{Path, PathBuf};

/// Directory name used for named level saves.
pub const LEVELS_DIR: &str = "levels";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by group naming and path derivation.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("group {0} is reserved and cannot be renamed")]
    Reserved(GroupId),
    #[error("group name '{0}' is already in use")]
    DuplicateName(String),
    #[error("group id {0} is out of range")]
    OutOfRange(i32),
    #[error("group {0} has no name")]
    Unnamed(GroupId),
    #[error("unknown group name '{0}'")]
    UnknownName(String),
    #[error("invalid level name '{0}'")]
    InvalidLevelName(String),
    #[error("invalid group name '{0}': must be a single directory name")]
    InvalidName(String),
}

/// Check that a non-empty group name is usable as one directory name under
/// the scene directory.
pub fn check_name(name: &str) -> Result<(), GroupError> {
    let bad = name == "."
        || name == ".."
        || name.contains(['/', '\\', ':', '\0'])
        || name.trim() != name
        || Path::new(name).has_root();
    if bad {
        return Err(GroupError::InvalidName(name.to_string()));
    }
    if name == LEVELS_DIR {
        return Err(GroupError::DuplicateName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SaveGroups
// ---------------------------------------------------------------------------

/// The names of all save groups. An empty name means the group is unused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveGroups {
    names: [String; GROUP_COUNT],
}

impl Default for SaveGroups {
    fn default() -> Self {
        let mut names: [String; GROUP_COUNT] = Default::default();
        names[0] = "Main".to_string();
        names[1] = "Global".to_string();
        Self { names }
    }
}

impl SaveGroups {
    /// Build from a list of names, in id order. Missing trailing names are
    /// left empty; reserved groups keep their defaults when unnamed.
    pub fn from_names(names: &[String]) -> Result<Self, GroupError> {
        if names.len() > GROUP_COUNT {
            return Err(GroupError::OutOfRange(names.len() as i32 - 1));
        }
        let mut groups = Self::default();
        for (index, name) in names.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            check_name(name)?;
            if groups.names[..index].iter().any(|n| n == name) {
                return Err(GroupError::DuplicateName(name.clone()));
            }
            groups.names[index] = name.clone();
        }
        Ok(groups)
    }

    pub fn name(&self, group: GroupId) -> &str {
        &self.names[group.index()]
    }

    pub fn id_of(&self, name: &str) -> Option<GroupId> {
        if name.is_empty() {
            return None;
        }
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| GroupId::new(i as u8))
    }

    pub fn is_named(&self, group: GroupId) -> bool {
        !self.names[group.index()].is_empty()
    }

    /// Rename group `index`. An empty name frees the group.
    pub fn rename(&mut self, index: i32, name: &str) -> Result<(), GroupError> {
        let group = u8::try_from(index)
            .ok()
            .and_then(GroupId::new)
            .ok_or(GroupError::OutOfRange(index))?;
        if group.is_reserved() {
            return Err(GroupError::Reserved(group));
        }
        if !name.is_empty() {
            check_name(name)?;
        }
        if let Some(existing) = self.id_of(name) {
            if existing != group {
                return Err(GroupError::DuplicateName(name.to_string()));
            }
        }
        self.names[group.index()] = name.to_string();
        Ok(())
    }

    /// Named groups in id order.
    pub fn named(&self) -> impl Iterator<Item = (GroupId, &str)> {
        GroupId::all()
            .map(|g| (g, self.name(g)))
            .filter(|(_, name)| !name.is_empty())
    }

    /// The group a persistent entity belongs to.
    pub fn classify(state: &PersistState) -> GroupId {
        state.group
    }
}

// ---------------------------------------------------------------------------
// SavePaths
// ---------------------------------------------------------------------------

/// Directory layout: `root/slot-<n>/<scene>/<group name | levels>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePaths {
    root: PathBuf,
    slot: u32,
    scene: String,
}

impl SavePaths {
    pub fn new(root: impl Into<PathBuf>, slot: u32, scene: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            slot,
            scene: scene.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self) -> PathBuf {
        self.root.join(format!("slot-{}", self.slot))
    }

    pub fn scene_dir(&self) -> PathBuf {
        self.slot_dir().join(&self.scene)
    }

    pub fn group_dir(&self, groups: &SaveGroups, group: GroupId) -> Result<PathBuf, GroupError> {
        let name = groups.name(group);
        if name.is_empty() {
            return Err(GroupError::Unnamed(group));
        }
        Ok(self.scene_dir().join(name))
    }

    pub fn levels_dir(&self) -> PathBuf {
        self.scene_dir().join(LEVELS_DIR)
    }
}
