//! Blocking file access for the pipelines.
//!
//! Every function here is synchronous. The pipelines hand them to
//! [`offload`](crate::pacing::offload), which keeps them off the async
//! scheduler in async mode.

use crate::error::PersistError;
use crate::groups::{SaveGroups, SavePaths};
use crate::id::GroupId;
use crate::scope::RECORD_STEM;
use crate::seal::SealKey;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File access for one slot and scene, optionally sealed.
#[derive(Debug, Clone)]
pub struct Store {
    paths: SavePaths,
    extension: String,
    seal: Option<SealKey>,
}

impl Store {
    pub fn new(paths: SavePaths, extension: impl Into<String>, seal: Option<SealKey>) -> Self {
        Self {
            paths,
            extension: extension.into(),
            seal,
        }
    }

    pub fn paths(&self) -> &SavePaths {
        &self.paths
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_sealed(&self) -> bool {
        self.seal.is_some()
    }

    /// Delete the files directly inside `dir`. A missing directory is fine.
    pub fn purge_files(&self, dir: &Path) -> Result<usize, PersistError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete the whole scene directory, including level saves.
    pub fn purge_scene(&self) -> Result<(), PersistError> {
        match fs::remove_dir_all(self.paths.scene_dir()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `text` to `path`, sealing it when configured. Returns the
    /// number of bytes written.
    pub fn write(&self, path: &Path, text: &str) -> Result<usize, PersistError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = match &self.seal {
            Some(key) => key.seal(text.as_bytes())?,
            None => text.as_bytes().to_vec(),
        };
        fs::write(path, &bytes)?;
        Ok(bytes.len())
    }

    /// Read and open `path`. `Ok(None)` when the file does not exist.
    pub fn read(&self, path: &Path) -> Result<Option<String>, PersistError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let plain = match &self.seal {
            Some(key) => key.unseal(&bytes)?,
            None => bytes,
        };
        let text = String::from_utf8(plain).map_err(crate::codec::CodecError::from)?;
        Ok(Some(text))
    }

    /// Named groups that have a record file on disk, in id order.
    pub fn discover_groups(&self, groups: &SaveGroups) -> Vec<GroupId> {
        groups
            .named()
            .filter(|(group, _)| {
                self.paths
                    .group_dir(groups, *group)
                    .is_ok_and(|dir| self.record_in(&dir).is_file())
            })
            .map(|(group, _)| group)
            .collect()
    }

    fn record_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{RECORD_STEM}.{}", self.extension))
    }
}
