//! Pipeline-level error type.

use crate::codec::CodecError;
use crate::groups::GroupError;
use crate::settings::SettingsError;

/// Errors returned by the save and load entry points.
///
/// Only setup problems and hard failures surface here. Per-entity misses are
/// logged and collected in the pipeline reports instead.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// A qualifying entity has no stable ids. Nothing was written or hooked.
    #[error("{type_name} is not set up for persistence: {reason}")]
    Setup {
        type_name: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A captured value would not read back, such as a NaN or infinite
    /// float, which JSON cannot hold. The pass's files were left as they were.
    #[error("could not encode {type_tag}: {detail}")]
    Encode { type_tag: String, detail: String },

    /// A stored partition could not be decoded into its descriptor type.
    #[error("could not decode {type_tag}: {detail}")]
    Decode { type_tag: String, detail: String },

    /// A background task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),
}
