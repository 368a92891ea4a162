//! Folder keys: a letter tag followed by the portfolio's sequence number.

use std::fmt;

use regex_lite::Regex;

use crate::error::{Result, StoreError};

/// Names both a portfolio directory and its ledger entry, e.g. `w3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderKey {
    number: u64,
    tag: String,
}

impl FolderKey {
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag, self.number)
    }
}

/// Outcome of matching a directory or path segment against the key syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    Key(FolderKey),
    /// Has the key shape, but the number does not fit an identifier.
    Unparseable,
    NotAKey,
}

/// Parses and builds folder keys for one tag.
///
/// Numbers are written without leading zeros, so every key parses back to
/// the same string it was built from.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    tag: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(tag: &str) -> Result<Self> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StoreError::InvalidFolderKey {
                key: tag.to_string(),
                tag: "<letters>".to_string(),
            });
        }
        let regex = Regex::new(&format!("^{}(0|[1-9][0-9]*)$", regex_lite::escape(tag)))
            .map_err(|e| StoreError::InvalidFolderKey {
                key: format!("{tag}: {e}"),
                tag: tag.to_string(),
            })?;
        Ok(Self {
            tag: tag.to_string(),
            regex,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn key(&self, number: u64) -> FolderKey {
        FolderKey {
            number,
            tag: self.tag.clone(),
        }
    }

    pub fn classify(&self, candidate: &str) -> KeyMatch {
        let Some(captures) = self.regex.captures(candidate) else {
            return KeyMatch::NotAKey;
        };
        match captures[1].parse::<u64>() {
            Ok(number) => KeyMatch::Key(self.key(number)),
            Err(_) => KeyMatch::Unparseable,
        }
    }

    /// Parse a caller-supplied key, rejecting anything that is not a key.
    pub fn parse(&self, candidate: &str) -> Result<FolderKey> {
        match self.classify(candidate) {
            KeyMatch::Key(key) => Ok(key),
            KeyMatch::Unparseable | KeyMatch::NotAKey => Err(StoreError::InvalidFolderKey {
                key: candidate.to_string(),
                tag: self.tag.clone(),
            }),
        }
    }
}
