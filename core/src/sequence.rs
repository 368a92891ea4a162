//! Persisted high-water mark of allocated portfolio identifiers.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// `<ledger>.seq`: a single decimal number, the highest identifier handed out.
#[derive(Debug, Clone)]
pub struct SequenceFile {
    path: PathBuf,
}

impl SequenceFile {
    /// The sequence file that sits beside `ledger`.
    pub fn beside(ledger: &Path) -> Self {
        let mut name = ledger
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".seq");
        Self {
            path: ledger.with_file_name(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last allocated identifier; `0` when the file is missing or unreadable.
    pub fn read(&self) -> u64 {
        match fs::read_to_string(&self.path) {
            Ok(contents) => contents.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    "ignoring unparseable sequence file {}: {:?}",
                    self.path.display(),
                    contents.trim()
                );
                0
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                tracing::warn!("cannot read sequence file {}: {e}", self.path.display());
                0
            }
        }
    }

    /// Raise the stored value to `value`; never lowers it.
    pub fn advance_to(&self, value: u64) -> Result<()> {
        if value <= self.read() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("create {}", parent.display()), e))?;
        }
        let tmp = self.path.with_extension("seq.tmp");
        fs::write(&tmp, format!("{value}\n"))
            .map_err(|e| StoreError::io(format!("write {}", tmp.display()), e))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::io(format!("replace {}", self.path.display()), e))
    }
}
