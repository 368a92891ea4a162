//! The description ledger: one JSON array holding a metadata record per
//! portfolio.
//!
//! Records are kept as raw JSON values so fields this crate does not know
//! about, and records it cannot interpret, survive a rewrite untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::folder_key::{FolderKey, KeyMatch, KeyPattern};
use crate::models::{MetadataUpdate, PortfolioMetadata};

/// Field holding the portfolio's relative path, e.g. `assets/img/portfolio/w3`.
pub const PATH_FIELD: &str = "path";

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing or blank file is an empty ledger; any
    /// other failure is an error, so callers never rewrite a file they
    /// could not read.
    pub fn load(&self) -> Result<Vec<Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::io(
                    format!("read ledger {}", self.path.display()),
                    e,
                ));
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(other) => Err(self.malformed(format!(
                "expected a JSON array, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(self.malformed(e.to_string())),
        }
    }

    /// Like [`Ledger::load`], but degrades to an empty ledger on error.
    pub fn load_lenient(&self) -> Vec<Value> {
        self.load().unwrap_or_else(|e| {
            tracing::warn!("ignoring unreadable ledger: {e}");
            Vec::new()
        })
    }

    /// Replace the whole file: write a sibling temp file, then rename it over
    /// the ledger.
    pub fn save(&self, entries: &[Value]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("create {}", parent.display()), e))?;
        }

        let mut body = serde_json::to_string_pretty(entries)
            .map_err(|e| self.malformed(format!("serialize: {e}")))?;
        body.push('\n');

        let tmp = self.tmp_path();
        fs::write(&tmp, body).map_err(|e| StoreError::io(format!("write {}", tmp.display()), e))?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(
                format!("replace ledger {}", self.path.display()),
                e,
            ));
        }
        tracing::debug!("wrote {} ledger entries to {}", entries.len(), self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn malformed(&self, reason: String) -> StoreError {
        StoreError::Ledger {
            path: self.path.clone(),
            reason,
        }
    }
}

/// The folder key named by a record's `path` field (its last segment).
pub fn entry_key(entry: &Value, pattern: &KeyPattern) -> Option<FolderKey> {
    let path = entry.get(PATH_FIELD)?.as_str()?;
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    match pattern.classify(last) {
        KeyMatch::Key(key) => Some(key),
        KeyMatch::Unparseable | KeyMatch::NotAKey => None,
    }
}

pub fn position(entries: &[Value], key: &FolderKey, pattern: &KeyPattern) -> Option<usize> {
    entries
        .iter()
        .position(|entry| entry_key(entry, pattern).as_ref() == Some(key))
}

/// Metadata of a record; missing or non-string fields read as empty.
pub fn metadata(entry: &Value) -> PortfolioMetadata {
    let mut metadata = PortfolioMetadata::default();
    let Some(object) = entry.as_object() else {
        return metadata;
    };
    for (name, value) in object {
        if let Some(slot) = metadata.field_mut(name) {
            *slot = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => String::new(),
            };
        }
    }
    metadata
}

pub fn new_entry(relative_path: &str, metadata: &PortfolioMetadata) -> Value {
    let mut object = Map::new();
    object.insert(PATH_FIELD.to_string(), Value::String(relative_path.to_string()));
    for (name, value) in metadata.fields() {
        object.insert(name.to_string(), Value::String(value.to_string()));
    }
    Value::Object(object)
}

/// Overwrite the provided fields of a record, leaving every other field
/// (known or not) as it was.
pub fn apply_update(entry: &mut Value, update: &MetadataUpdate) {
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(object) = entry {
        for (name, value) in update.provided() {
            object.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
