//! Debug-gated diagnostics sink.
//!
//! Recoverable misses (unknown tags, orphaned components, absent files) are
//! reported here. They reach the `log` facade only when debug mode is on, so
//! a shipping build stays quiet about expected gaps in old saves.

use std::fmt;

#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    debug: bool,
}

impl Diagnostics {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            log::info!(target: "keepsake", "{args}");
        }
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            log::warn!(target: "keepsake", "{args}");
        }
    }
}
