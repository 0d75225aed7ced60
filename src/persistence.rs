//! `LedgerStore` — spec §6. Atomic write protocol: write to
//! `<path>.tmp-<pid>`, fsync, rename over the target; a `.bak` of the
//! previous file is retained after a successful rename. Unknown keys
//! are tolerated forward-compatibly on load (no `deny_unknown_fields`).

use crate::error::EngineError;
use crate::ledger::LedgerDocument;
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self) -> Result<Option<LedgerDocument>, EngineError>;
    async fn save(&self, doc: &LedgerDocument) -> Result<(), EngineError>;
}

pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn load(&self) -> Result<Option<LedgerDocument>, EngineError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let doc: LedgerDocument = serde_json::from_str(&content).map_err(|e| {
            EngineError::LedgerCorruption(format!("failed to parse ledger at {:?}: {e}", self.path))
        })?;
        log::info!("loaded ledger from {:?}: {} lots, {} disposals", self.path, doc.lots.len(), doc.disposals.len());
        Ok(Some(doc))
    }

    async fn save(&self, doc: &LedgerDocument) -> Result<(), EngineError> {
        atomic_write_json(&self.path, doc)
    }
}

/// Serializes `value` to a temp file beside `path`, fsyncs it, renames
/// over `path`, and retains a `.bak` copy of whatever was there before.
/// The old file is never truncated before the rename lands.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let content = serde_json::to_string_pretty(value)?;
    let pid = std::process::id();
    let tmp_path = path.with_extension(format!("tmp-{pid}"));

    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
    }

    if path.exists() {
        let bak_path = path.with_extension("bak");
        fs::copy(path, &bak_path)?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}
