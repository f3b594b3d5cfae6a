//! Persistence settings, loadable from RON, TOML or JSON.
//!
//! The format is picked from the file extension. Every field has a default,
//! so a settings file only needs to name what it changes:
//!
//! ```toml
//! scene = "Forest"
//! encrypt = true
//! execution = "async"
//! batch_size = 200
//! save_groups = ["Main", "Global", "Player"]
//!
//! [default_on]
//! Door = false
//! ```

use crate::groups::{GroupError, SaveGroups};
use crate::id::GROUP_COUNT;
use crate::pacing::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unsupported settings format: {file}")]
    UnsupportedFormat { file: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error("too many save groups: {0} (at most {GROUP_COUNT})")]
    TooManyGroups(usize),

    #[error("invalid {field}: {value:?}")]
    InvalidName { field: &'static str, value: String },

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

pub fn detect_format(path: &Path) -> Result<Format, SettingsError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(SettingsError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding every save slot.
    pub save_root: PathBuf,
    pub save_slot: u32,
    /// Name of the scene being saved; one directory per scene.
    pub scene: String,
    /// Route recoverable-miss diagnostics to the log.
    pub debug_mode: bool,
    /// Seal every written file.
    pub encrypt: bool,
    pub execution: ExecutionMode,
    /// Entities processed between yields in async mode. Zero acts as one.
    pub batch_size: usize,
    /// Extension of every written file, without the dot.
    pub file_extension: String,
    /// Group names in id order. Empty entries leave the group unused.
    pub save_groups: Vec<String>,
    /// Initial `is_on` per behaviour type name; unlisted types start on.
    pub default_on: HashMap<String, bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            save_root: PathBuf::from("saves"),
            save_slot: 0,
            scene: "default".to_string(),
            debug_mode: false,
            encrypt: false,
            execution: ExecutionMode::Sync,
            batch_size: 100,
            file_extension: "save".to_string(),
            save_groups: Vec::new(),
            default_on: HashMap::new(),
        }
    }
}

impl Settings {
    /// Read settings from a `.ron`, `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let parse = |detail: String| SettingsError::Parse {
            file: path.to_path_buf(),
            detail,
        };
        let settings: Settings = match format {
            Format::Ron => ron::from_str(&content).map_err(|e| parse(e.to_string()))?,
            Format::Toml => toml::from_str(&content).map_err(|e| parse(e.to_string()))?,
            Format::Json => serde_json::from_str(&content).map_err(|e| parse(e.to_string()))?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.save_groups.len() > GROUP_COUNT {
            return Err(SettingsError::TooManyGroups(self.save_groups.len()));
        }
        check_path_segment("scene", &self.scene)?;
        check_path_segment("file_extension", &self.file_extension)?;
        if self.file_extension.contains('.') {
            return Err(SettingsError::InvalidName {
                field: "file_extension",
                value: self.file_extension.clone(),
            });
        }
        self.groups()?;
        Ok(())
    }

    /// The configured group names.
    pub fn groups(&self) -> Result<SaveGroups, SettingsError> {
        Ok(SaveGroups::from_names(&self.save_groups)?)
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Initial on/off state for a behaviour type. Matches the full type
    /// name first, then its last path segment.
    pub fn is_on_by_default(&self, type_name: &str) -> bool {
        if let Some(on) = self.default_on.get(type_name) {
            return *on;
        }
        let short = type_name.rsplit("::").next().unwrap_or(type_name);
        self.default_on.get(short).copied().unwrap_or(true)
    }
}

fn check_path_segment(field: &'static str, value: &str) -> Result<(), SettingsError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.trim() != value;
    if bad {
        return Err(SettingsError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
