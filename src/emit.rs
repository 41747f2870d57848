//! Gzip JSONL sink for the `emit_jsonl` rule action. Each matched position
//! is appended as its own gzip member, which any multi-member decoder (and
//! the replay reader in this crate) reads back as one stream. Appending a
//! complete member per line keeps the file valid even if the process dies
//! mid-run.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::location::Location;

#[derive(Default)]
pub struct JsonlEmitter {
    /// Paths we've already announced, to log each sink once per run.
    seen_paths: Mutex<HashSet<PathBuf>>,
}

impl JsonlEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the location to the gzip JSONL file at `path`, creating parent
    /// directories as needed.
    pub fn append(&self, path: &Path, loc: &Location) -> Result<()> {
        {
            let mut seen = self.seen_paths.lock().unwrap();
            if seen.insert(path.to_path_buf()) {
                info!("emitting matched positions to {}", path.display());
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create emit directory {}", parent.display())
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open emit file {}", path.display()))?;

        let mut encoder = GzEncoder::new(file, Compression::default());
        let line = serde_json::to_string(&loc.to_wire_json())?;
        writeln!(encoder, "{line}").context("failed to write emit line")?;
        encoder.finish().context("failed to finish gzip member")?;
        Ok(())
    }
}
