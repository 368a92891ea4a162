//! The Portfolio Store: numbered image folders kept in step with the
//! description ledger.
//!
//! Mutations are serialized by an in-process writer lock. Reads do not take
//! the lock; they tolerate a half-finished mutation the same way they
//! tolerate a malformed ledger, by degrading to empty metadata.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::folder_key::{FolderKey, KeyMatch, KeyPattern};
use crate::ledger::{self, Ledger};
use crate::models::{
    DeleteOutcome, ImageRef, MetadataUpdate, PortfolioItem, PortfolioMetadata, Upload,
};
use crate::normalizer::ImageNormalizer;
use crate::sequence::SequenceFile;

/// Image `0` is the floor plan; image `1` is the reference photo whose size
/// the floor plan is fitted to.
const FLOOR_PLAN: u64 = 0;
const REFERENCE_PHOTO: u64 = 1;

/// Where the store keeps things, relative to the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Working copy root; every other path is relative to it.
    pub root: PathBuf,
    pub portfolio_dir: String,
    pub ledger_file: String,
    pub key_tag: String,
    /// Lowercase, without the leading dot.
    pub accepted_extensions: Vec<String>,
    pub public_url_prefix: String,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            portfolio_dir: "assets/img/portfolio".to_string(),
            ledger_file: "assets/data/portfolio.json".to_string(),
            key_tag: "w".to_string(),
            accepted_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            public_url_prefix: "/assets/img/portfolio".to_string(),
        }
    }
}

pub struct PortfolioStore {
    config: StoreConfig,
    pattern: KeyPattern,
    ledger: Ledger,
    sequence: SequenceFile,
    normalizer: Arc<dyn ImageNormalizer>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for PortfolioStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An upload resolved to the image number it will be stored under.
#[derive(Debug)]
struct PlannedImage<'a> {
    number: u64,
    extension: String,
    data: &'a [u8],
}

impl PlannedImage<'_> {
    fn file_name(&self) -> String {
        format!("{}.{}", self.number, self.extension)
    }
}

impl PortfolioStore {
    pub fn new(config: StoreConfig, normalizer: Arc<dyn ImageNormalizer>) -> Result<Self> {
        let pattern = KeyPattern::new(&config.key_tag)?;
        let ledger = Ledger::new(config.root.join(&config.ledger_file));
        let sequence = SequenceFile::beside(ledger.path());
        Ok(Self {
            config,
            pattern,
            ledger,
            sequence,
            normalizer,
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn portfolio_root(&self) -> PathBuf {
        self.config.root.join(&self.config.portfolio_dir)
    }

    pub fn folder_path(&self, key: &FolderKey) -> PathBuf {
        self.portfolio_root().join(key.to_string())
    }

    /// Every portfolio folder joined with its ledger entry, newest first.
    ///
    /// Folders without an entry, and entries that cannot be read, list with
    /// empty metadata.
    pub fn list_items(&self) -> Result<Vec<PortfolioItem>> {
        let folders = self.scan_folders()?;
        let entries = self.ledger.load_lenient();

        let mut metadata: HashMap<FolderKey, PortfolioMetadata> = HashMap::new();
        for entry in &entries {
            if let Some(key) = ledger::entry_key(entry, &self.pattern) {
                metadata
                    .entry(key)
                    .or_insert_with(|| ledger::metadata(entry));
            }
        }

        let mut items = Vec::with_capacity(folders.len());
        for (key, dir) in folders.into_iter().rev() {
            let images = match self.image_files(&dir) {
                Ok(files) => files
                    .into_iter()
                    .map(|(_, name)| ImageRef {
                        path: self.public_path(&key, &name),
                        name,
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("cannot list images of {key}: {e}");
                    Vec::new()
                }
            };
            items.push(PortfolioItem {
                name: format!("Portfolio {}", key.number()),
                folder: key.to_string(),
                images,
                metadata: metadata.remove(&key).unwrap_or_default(),
            });
        }
        Ok(items)
    }

    /// The identifier the next created portfolio will get.
    pub fn next_identifier(&self) -> Result<u64> {
        let folders = self.scan_folders()?;
        let highest_folder = folders.keys().map(FolderKey::number).max().unwrap_or(0);
        let highest_entry = self
            .ledger
            .load_lenient()
            .iter()
            .filter_map(|entry| ledger::entry_key(entry, &self.pattern))
            .map(|key| key.number())
            .max()
            .unwrap_or(0);
        let highest = highest_folder
            .max(highest_entry)
            .max(self.sequence.read());
        highest
            .checked_add(1)
            .ok_or(StoreError::IdentifiersExhausted { highest })
    }

    /// Create a new numbered folder from `files` and record `metadata` for it.
    ///
    /// Files with an unaccepted extension are skipped. When anything fails
    /// after the folder exists, the folder is removed before returning.
    pub fn create_portfolio(
        &self,
        files: &[Upload],
        metadata: PortfolioMetadata,
    ) -> Result<FolderKey> {
        let _writer = self.lock();

        let planned = self.plan_create(files)?;
        let key = self.pattern.key(self.next_identifier()?);
        let dir = self.folder_path(&key);

        let root = self.portfolio_root();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::io(format!("create {}", root.display()), e))?;
        fs::create_dir(&dir)
            .map_err(|e| StoreError::io(format!("create folder {key}"), e))?;
        tracing::info!("creating portfolio {key} with {} images", planned.len());

        let populated = self
            .write_images(&dir, &planned)
            .and_then(|()| self.normalize_floor_plan(&dir, &planned))
            .and_then(|()| self.append_entry(&key, &metadata));
        if let Err(e) = populated {
            tracing::warn!("creating {key} failed, removing its folder: {e}");
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                tracing::warn!("failed to remove {}: {cleanup}", dir.display());
            }
            return Err(e);
        }

        if let Err(e) = self.sequence.advance_to(key.number()) {
            tracing::warn!("failed to record identifier {}: {e}", key.number());
        }
        Ok(key)
    }

    /// Replace every image of `folder` with `files`. The ledger is untouched.
    ///
    /// Each file must be named `<number>.<accepted extension>` and the
    /// numbers must be contiguous; the batch is checked before any file on
    /// disk changes.
    pub fn replace_images(&self, folder: &str, files: &[Upload]) -> Result<String> {
        let key = self.pattern.parse(folder)?;
        let _writer = self.lock();

        let planned = self.plan_replace(files)?;
        let numbers: Vec<u64> = planned.iter().map(|image| image.number).collect();
        let missing = missing_numbers(&numbers);
        if !missing.is_empty() {
            return Err(StoreError::MissingNumbers { missing });
        }

        let dir = self.folder_path(&key);
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("create folder {key}"), e))?;

        let mut removed = 0;
        for (_, name) in self.image_files(&dir)? {
            let path = dir.join(&name);
            fs::remove_file(&path)
                .map_err(|e| StoreError::io(format!("remove {}", path.display()), e))?;
            removed += 1;
        }

        self.write_images(&dir, &planned)?;
        self.normalize_floor_plan(&dir, &planned)?;

        tracing::info!(
            "replaced images of {key}: removed {removed}, wrote {}",
            planned.len()
        );
        Ok(format!("Replaced images of {key} ({} files)", planned.len()))
    }

    /// Merge `update` over the ledger entry of `folder` and rewrite the ledger.
    pub fn update_description(&self, folder: &str, update: &MetadataUpdate) -> Result<String> {
        let key = self.pattern.parse(folder)?;
        let _writer = self.lock();

        let mut entries = self.ledger.load()?;
        let index = ledger::position(&entries, &key, &self.pattern).ok_or_else(|| {
            StoreError::NotFound {
                key: key.to_string(),
            }
        })?;
        ledger::apply_update(&mut entries[index], update);
        self.ledger.save(&entries)?;

        tracing::info!("updated description of {key}");
        Ok(format!("Updated description of {key}"))
    }

    /// Remove the folder and the ledger entry of `folder`, independently.
    ///
    /// Only an invalid key is an error; everything else is reported in the
    /// outcome.
    pub fn delete_portfolio(&self, folder: &str) -> Result<DeleteOutcome> {
        let key = self.pattern.parse(folder)?;
        let _writer = self.lock();

        let dir = self.folder_path(&key);
        let (folder_deleted, folder_note) = if dir.is_dir() {
            match fs::remove_dir_all(&dir) {
                Ok(()) => (true, "folder deleted".to_string()),
                Err(e) => {
                    tracing::warn!("failed to remove {}: {e}", dir.display());
                    (false, format!("failed to delete folder: {e}"))
                }
            }
        } else {
            (false, "folder not found".to_string())
        };

        let (ledger_entry_deleted, ledger_note) = match self.remove_entry(&key) {
            Ok(true) => (true, "ledger entry deleted".to_string()),
            Ok(false) => (false, "ledger entry not found".to_string()),
            Err(e) => {
                tracing::warn!("failed to remove ledger entry of {key}: {e}");
                (false, format!("failed to update ledger: {e}"))
            }
        };

        tracing::info!("delete {key}: {folder_note}; {ledger_note}");
        Ok(DeleteOutcome {
            folder_deleted,
            ledger_entry_deleted,
            message: format!("Delete {key}: {folder_note}; {ledger_note}"),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Portfolio folders by key. Directories that look like keys but whose
    /// number does not parse are skipped.
    fn scan_folders(&self) -> Result<BTreeMap<FolderKey, PathBuf>> {
        let root = self.portfolio_root();
        let mut folders = BTreeMap::new();
        if !root.is_dir() {
            return Ok(folders);
        }

        for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let context = format!("scan {}", root.display());
                match e.into_io_error() {
                    Some(source) => StoreError::io(context, source),
                    None => StoreError::io(context, std::io::Error::other("filesystem loop")),
                }
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.pattern.classify(&name) {
                KeyMatch::Key(key) => {
                    folders.insert(key, entry.into_path());
                }
                KeyMatch::Unparseable => {
                    tracing::warn!("skipping folder {name}: identifier out of range");
                }
                KeyMatch::NotAKey => {}
            }
        }
        Ok(folders)
    }

    /// Recognized image files of `dir` as `(number, file name)`, numbered
    /// files first in numeric order, then the rest by name.
    fn image_files(&self, dir: &Path) -> Result<Vec<(Option<u64>, String)>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let context = format!("list {}", dir.display());
                match e.into_io_error() {
                    Some(source) => StoreError::io(context, source),
                    None => StoreError::io(context, std::io::Error::other("filesystem loop")),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((stem, extension)) = split_name(&name) else {
                continue;
            };
            if self.accepts(&extension) {
                files.push((parse_number(stem), name));
            }
        }
        files.sort_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.1.cmp(&b.1)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.1.cmp(&b.1),
        });
        Ok(files)
    }

    fn accepts(&self, extension: &str) -> bool {
        self.config
            .accepted_extensions
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(extension))
    }

    fn accepted_list(&self) -> String {
        self.config.accepted_extensions.join("|")
    }

    /// Numbering for a new portfolio: numeric stems keep their number, other
    /// files take the lowest free numbers in upload order.
    fn plan_create<'a>(&self, files: &'a [Upload]) -> Result<Vec<PlannedImage<'a>>> {
        let accepted: Vec<(&str, String, &[u8])> = files
            .iter()
            .filter_map(|upload| {
                let (stem, extension) = split_name(base_name(&upload.file_name))?;
                self.accepts(&extension)
                    .then_some((stem, extension, upload.data.as_slice()))
            })
            .collect();
        if accepted.is_empty() {
            return Err(StoreError::NoAcceptedFiles {
                accepted: self.accepted_list(),
            });
        }

        let mut taken = BTreeSet::new();
        for (stem, _, _) in &accepted {
            if let Some(number) = parse_number(stem)
                && !taken.insert(number)
            {
                return Err(StoreError::DuplicateNumber { number });
            }
        }

        let mut next_free = 0;
        let mut planned = Vec::with_capacity(accepted.len());
        for (stem, extension, data) in accepted {
            let number = match parse_number(stem) {
                Some(number) => number,
                None => {
                    while taken.contains(&next_free) {
                        next_free += 1;
                    }
                    taken.insert(next_free);
                    next_free
                }
            };
            planned.push(PlannedImage {
                number,
                extension,
                data,
            });
        }
        planned.sort_by_key(|image| image.number);
        Ok(planned)
    }

    /// Strict naming for replacement uploads.
    fn plan_replace<'a>(&self, files: &'a [Upload]) -> Result<Vec<PlannedImage<'a>>> {
        if files.is_empty() {
            return Err(StoreError::NoAcceptedFiles {
                accepted: self.accepted_list(),
            });
        }

        let mut seen = BTreeSet::new();
        let mut planned = Vec::with_capacity(files.len());
        for upload in files {
            let name = base_name(&upload.file_name);
            let parsed = split_name(name).and_then(|(stem, extension)| {
                let number = parse_number(stem)?;
                self.accepts(&extension).then_some((number, extension))
            });
            let Some((number, extension)) = parsed else {
                return Err(StoreError::NamingConvention {
                    file_name: upload.file_name.clone(),
                    accepted: self.accepted_list(),
                });
            };
            if !seen.insert(number) {
                return Err(StoreError::DuplicateNumber { number });
            }
            planned.push(PlannedImage {
                number,
                extension,
                data: upload.data.as_slice(),
            });
        }
        planned.sort_by_key(|image| image.number);
        Ok(planned)
    }

    fn write_images(&self, dir: &Path, planned: &[PlannedImage<'_>]) -> Result<()> {
        for image in planned {
            let path = dir.join(image.file_name());
            fs::write(&path, image.data)
                .map_err(|e| StoreError::io(format!("write {}", path.display()), e))?;
        }
        Ok(())
    }

    /// Fit the floor plan onto the reference photo's canvas when both exist.
    fn normalize_floor_plan(&self, dir: &Path, planned: &[PlannedImage<'_>]) -> Result<()> {
        let find = |number| planned.iter().find(|image| image.number == number);
        let (Some(floor_plan), Some(reference)) = (find(FLOOR_PLAN), find(REFERENCE_PHOTO)) else {
            return Ok(());
        };

        let reference_path = dir.join(reference.file_name());
        let canvas = self
            .normalizer
            .dimensions(&reference_path)
            .map_err(|source| StoreError::Normalize {
                path: reference_path.clone(),
                source,
            })?;
        let floor_plan_path = dir.join(floor_plan.file_name());
        self.normalizer
            .normalize(&floor_plan_path, canvas)
            .map_err(|source| StoreError::Normalize {
                path: floor_plan_path.clone(),
                source,
            })
    }

    fn append_entry(&self, key: &FolderKey, metadata: &PortfolioMetadata) -> Result<()> {
        let mut entries = self.ledger.load()?;
        if ledger::position(&entries, key, &self.pattern).is_some() {
            tracing::warn!("replacing stale ledger entry for {key}");
            entries.retain(|entry| ledger::entry_key(entry, &self.pattern).as_ref() != Some(key));
        }
        entries.push(ledger::new_entry(&self.relative_path(key), metadata));
        self.ledger.save(&entries)
    }

    /// Drop every entry for `key`; `Ok(false)` when there was none.
    fn remove_entry(&self, key: &FolderKey) -> Result<bool> {
        let mut entries = self.ledger.load()?;
        let before = entries.len();
        entries.retain(|entry| ledger::entry_key(entry, &self.pattern).as_ref() != Some(key));
        if entries.len() == before {
            return Ok(false);
        }
        self.ledger.save(&entries)?;
        Ok(true)
    }

    fn relative_path(&self, key: &FolderKey) -> String {
        format!("{}/{key}", self.config.portfolio_dir.trim_matches('/'))
    }

    fn public_path(&self, key: &FolderKey, file_name: &str) -> String {
        format!(
            "{}/{key}/{file_name}",
            self.config.public_url_prefix.trim_end_matches('/')
        )
    }
}

/// Numbers in `[min, max]` of `numbers` that are absent, ascending.
pub fn missing_numbers(numbers: &[u64]) -> Vec<u64> {
    let present: BTreeSet<u64> = numbers.iter().copied().collect();
    let (Some(&min), Some(&max)) = (present.first(), present.last()) else {
        return Vec::new();
    };
    (min..=max).filter(|n| !present.contains(n)).collect()
}

/// Client file names may carry directories; only the last component counts.
fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

/// `(stem, lowercase extension)`; `None` without a stem or an extension.
fn split_name(name: &str) -> Option<(&str, String)> {
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some((stem, extension.to_ascii_lowercase()))
}

fn parse_number(stem: &str) -> Option<u64> {
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::NormalizeError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Records normalize calls instead of decoding images.
    #[derive(Default)]
    struct RecordingNormalizer {
        calls: Mutex<Vec<(String, (u32, u32))>>,
        fail: bool,
    }

    impl ImageNormalizer for RecordingNormalizer {
        fn dimensions(&self, _path: &Path) -> std::result::Result<(u32, u32), NormalizeError> {
            Ok((640, 480))
        }

        fn normalize(
            &self,
            path: &Path,
            canvas: (u32, u32),
        ) -> std::result::Result<(), NormalizeError> {
            if self.fail {
                return Err(NormalizeError::EmptyCanvas {
                    width: 0,
                    height: 0,
                });
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.calls.lock().unwrap().push((name, canvas));
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: PortfolioStore,
        normalizer: Arc<RecordingNormalizer>,
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingNormalizer::default())
    }

    fn fixture_with(normalizer: RecordingNormalizer) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let normalizer = Arc::new(normalizer);
        let store = PortfolioStore::new(
            StoreConfig::new(dir.path()),
            Arc::clone(&normalizer) as Arc<dyn ImageNormalizer>,
        )
        .unwrap();
        Fixture {
            _dir: dir,
            store,
            normalizer,
        }
    }

    fn uploads(names: &[&str]) -> Vec<Upload> {
        names
            .iter()
            .map(|name| Upload::new(*name, name.as_bytes()))
            .collect()
    }

    fn meta(project_name: &str) -> PortfolioMetadata {
        PortfolioMetadata {
            project_name: project_name.to_string(),
            ..Default::default()
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn identifiers_increase_across_creations() {
        let f = fixture();
        assert_eq!(f.store.next_identifier().unwrap(), 1);

        let first = f.store.create_portfolio(&uploads(&["1.jpg"]), meta("a")).unwrap();
        let second = f.store.create_portfolio(&uploads(&["1.jpg"]), meta("b")).unwrap();

        assert_eq!(first.to_string(), "w1");
        assert_eq!(second.to_string(), "w2");
        assert_eq!(f.store.next_identifier().unwrap(), 3);
    }

    #[test]
    fn deleted_identifiers_are_not_reused() {
        let f = fixture();
        f.store.create_portfolio(&uploads(&["1.jpg"]), meta("a")).unwrap();
        let second = f.store.create_portfolio(&uploads(&["1.jpg"]), meta("b")).unwrap();
        assert!(f.store.delete_portfolio(&second.to_string()).unwrap().success());

        assert_eq!(f.store.next_identifier().unwrap(), 3);
    }

    #[test]
    fn exhausted_identifiers_are_an_error() {
        let f = fixture();
        fs::create_dir_all(f.store.portfolio_root().join(format!("w{}", u64::MAX))).unwrap();

        assert_eq!(f.store.list_items().unwrap().len(), 1);
        let err = f.store.next_identifier().unwrap_err();
        assert!(matches!(err, StoreError::IdentifiersExhausted { highest: u64::MAX }));

        let err = f
            .store
            .create_portfolio(&uploads(&["1.jpg"]), meta("a"))
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentifiersExhausted { .. }));
        assert!(f.store.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn create_rejects_batches_without_accepted_files() {
        let f = fixture();
        let err = f
            .store
            .create_portfolio(&uploads(&["plan.png", "notes.txt", "noext"]), meta("a"))
            .unwrap_err();

        assert!(matches!(err, StoreError::NoAcceptedFiles { .. }));
        assert!(!f.store.portfolio_root().exists());
    }

    #[test]
    fn create_numbers_files_and_normalizes_floor_plan() {
        let f = fixture();
        let key = f
            .store
            .create_portfolio(
                &uploads(&["kitchen.JPG", "0.jpg", "dir/2.jpeg", "skip.png", "living.jpg"]),
                meta("Loft"),
            )
            .unwrap();

        let dir = f.store.folder_path(&key);
        assert_eq!(files_in(&dir), vec!["0.jpg", "1.jpg", "2.jpeg", "3.jpg"]);
        assert_eq!(
            fs::read(dir.join("1.jpg")).unwrap(),
            b"kitchen.JPG".to_vec()
        );
        assert_eq!(
            *f.normalizer.calls.lock().unwrap(),
            vec![("0.jpg".to_string(), (640, 480))]
        );
    }

    #[test]
    fn create_without_reference_photo_skips_normalizer() {
        let f = fixture();
        f.store
            .create_portfolio(&uploads(&["0.jpg", "2.jpg"]), meta("a"))
            .unwrap();
        assert!(f.normalizer.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn create_rejects_duplicate_numbers() {
        let f = fixture();
        let err = f
            .store
            .create_portfolio(&uploads(&["1.jpg", "1.jpeg"]), meta("a"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateNumber { number: 1 }));
        assert!(!f.store.portfolio_root().join("w1").exists());
    }

    #[test]
    fn ledger_failure_during_create_removes_folder() {
        let f = fixture();
        // A directory where the ledger file should be makes the append fail.
        fs::create_dir_all(f.store.ledger().path()).unwrap();

        let err = f
            .store
            .create_portfolio(&uploads(&["1.jpg"]), meta("a"))
            .unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!f.store.portfolio_root().join("w1").exists());
    }

    #[test]
    fn normalizer_failure_during_create_removes_folder() {
        let f = fixture_with(RecordingNormalizer {
            fail: true,
            ..Default::default()
        });

        let err = f
            .store
            .create_portfolio(&uploads(&["0.jpg", "1.jpg"]), meta("a"))
            .unwrap_err();

        assert!(matches!(err, StoreError::Normalize { .. }));
        assert!(!f.store.portfolio_root().join("w1").exists());
        assert!(f.store.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn folder_without_entry_lists_with_empty_metadata() {
        let f = fixture();
        let dir = f.store.portfolio_root().join("w5");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("10.jpg"), b"x").unwrap();
        fs::write(dir.join("2.jpg"), b"x").unwrap();
        fs::write(dir.join("cover.jpg"), b"x").unwrap();
        fs::write(dir.join("readme.txt"), b"x").unwrap();

        let items = f.store.list_items().unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.name, "Portfolio 5");
        assert_eq!(item.folder, "w5");
        assert_eq!(item.metadata, PortfolioMetadata::default());
        let names: Vec<&str> = item.images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["2.jpg", "10.jpg", "cover.jpg"]);
        assert_eq!(item.images[0].path, "/assets/img/portfolio/w5/2.jpg");
    }

    #[test]
    fn list_sorts_newest_first_and_ignores_other_folders() {
        let f = fixture();
        for name in ["w2", "w10", "w1", "drafts", "w99999999999999999999999"] {
            fs::create_dir_all(f.store.portfolio_root().join(name)).unwrap();
        }

        let folders: Vec<String> = f
            .store
            .list_items()
            .unwrap()
            .into_iter()
            .map(|item| item.folder)
            .collect();

        assert_eq!(folders, vec!["w10", "w2", "w1"]);
    }

    #[test]
    fn list_survives_malformed_ledger() {
        let f = fixture();
        let key = f.store.create_portfolio(&uploads(&["1.jpg"]), meta("a")).unwrap();
        fs::write(f.store.ledger().path(), "{not json").unwrap();

        let items = f.store.list_items().unwrap();
        assert_eq!(items[0].folder, key.to_string());
        assert_eq!(items[0].metadata.project_name, "");
    }

    #[test]
    fn list_on_missing_root_is_empty() {
        let f = fixture();
        assert!(f.store.list_items().unwrap().is_empty());
    }

    #[test]
    fn update_merges_provided_fields() {
        let f = fixture();
        let key = f
            .store
            .create_portfolio(
                &uploads(&["1.jpg"]),
                PortfolioMetadata {
                    project_name: "Loft".to_string(),
                    area: "80".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();

        f.store
            .update_description(
                &key.to_string(),
                &MetadataUpdate {
                    area: Some("95".to_string()),
                    location: Some("Taipei".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let item = &f.store.list_items().unwrap()[0];
        assert_eq!(item.metadata.project_name, "Loft");
        assert_eq!(item.metadata.area, "95");
        assert_eq!(item.metadata.location, "Taipei");
    }

    #[test]
    fn update_of_unknown_entry_is_not_found() {
        let f = fixture();
        let err = f
            .store
            .update_description("w9", &MetadataUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn update_refuses_to_rewrite_malformed_ledger() {
        let f = fixture();
        let key = f.store.create_portfolio(&uploads(&["1.jpg"]), meta("a")).unwrap();
        fs::write(f.store.ledger().path(), "{not json").unwrap();

        let err = f
            .store
            .update_description(&key.to_string(), &MetadataUpdate::default())
            .unwrap_err();

        assert!(matches!(err, StoreError::Ledger { .. }));
        assert_eq!(
            fs::read_to_string(f.store.ledger().path()).unwrap(),
            "{not json"
        );
    }

    #[test]
    fn update_keeps_unknown_entries_and_fields() {
        let f = fixture();
        let ledger = json!([
            "note",
            {"path": "assets/img/portfolio/w1", "project_name": "Loft", "featured": true},
        ]);
        f.store.ledger().save(ledger.as_array().unwrap()).unwrap();

        f.store
            .update_description(
                "w1",
                &MetadataUpdate {
                    date: Some("2024-03".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(
            f.store.ledger().load().unwrap(),
            vec![
                json!("note"),
                json!({
                    "path": "assets/img/portfolio/w1",
                    "project_name": "Loft",
                    "featured": true,
                    "date": "2024-03",
                }),
            ]
        );
    }

    #[test]
    fn contiguity_reports_gaps() {
        assert_eq!(missing_numbers(&[0, 2, 3]), vec![1]);
        assert_eq!(missing_numbers(&[0, 1, 2]), Vec::<u64>::new());
        assert_eq!(missing_numbers(&[5, 1]), vec![2, 3, 4]);
        assert_eq!(missing_numbers(&[]), Vec::<u64>::new());
    }

    #[test]
    fn replace_rejects_gaps_before_touching_files() {
        let f = fixture();
        let key = f
            .store
            .create_portfolio(&uploads(&["0.jpg", "1.jpg"]), meta("a"))
            .unwrap();

        let err = f
            .store
            .replace_images(&key.to_string(), &uploads(&["0.jpg", "2.jpg", "3.jpg"]))
            .unwrap_err();

        assert!(matches!(err, StoreError::MissingNumbers { ref missing } if missing == &vec![1]));
        assert!(err.to_string().contains("missing 1"));
        assert_eq!(files_in(&f.store.folder_path(&key)), vec!["0.jpg", "1.jpg"]);
    }

    #[test]
    fn replace_rejects_non_numeric_names() {
        let f = fixture();
        for bad in ["cover.jpg", "1.png", "01a.jpg", "2"] {
            let err = f
                .store
                .replace_images("w1", &uploads(&["0.jpg", bad]))
                .unwrap_err();
            assert!(
                matches!(err, StoreError::NamingConvention { .. }),
                "{bad}: {err}"
            );
        }
        assert!(!f.store.portfolio_root().join("w1").exists());
    }

    #[test]
    fn replace_swaps_image_set_and_renormalizes() {
        let f = fixture();
        let key = f
            .store
            .create_portfolio(&uploads(&["0.jpg", "1.jpg", "2.jpg", "3.jpg"]), meta("a"))
            .unwrap();
        let dir = f.store.folder_path(&key);
        fs::write(dir.join("notes.txt"), b"keep").unwrap();
        let ledger_before = fs::read_to_string(f.store.ledger().path()).unwrap();

        let message = f
            .store
            .replace_images(&key.to_string(), &uploads(&["1.jpeg", "0.JPG"]))
            .unwrap();

        assert!(message.contains("2 files"));
        assert_eq!(files_in(&dir), vec!["0.jpg", "1.jpeg", "notes.txt"]);
        assert_eq!(f.normalizer.calls.lock().unwrap().len(), 2);
        assert_eq!(
            fs::read_to_string(f.store.ledger().path()).unwrap(),
            ledger_before
        );
    }

    #[test]
    fn replace_creates_missing_folder() {
        let f = fixture();
        f.store.replace_images("w4", &uploads(&["1.jpg"])).unwrap();
        assert_eq!(files_in(&f.store.portfolio_root().join("w4")), vec!["1.jpg"]);
    }

    #[test]
    fn delete_without_entry_still_succeeds() {
        let f = fixture();
        fs::create_dir_all(f.store.portfolio_root().join("w3")).unwrap();

        let outcome = f.store.delete_portfolio("w3").unwrap();

        assert!(outcome.success());
        assert!(outcome.folder_deleted);
        assert!(!outcome.ledger_entry_deleted);
        assert!(outcome.message.contains("ledger entry not found"));
        assert!(!f.store.portfolio_root().join("w3").exists());
    }

    #[test]
    fn delete_without_folder_removes_entry_but_fails() {
        let f = fixture();
        let key = f.store.create_portfolio(&uploads(&["1.jpg"]), meta("a")).unwrap();
        fs::remove_dir_all(f.store.folder_path(&key)).unwrap();

        let outcome = f.store.delete_portfolio(&key.to_string()).unwrap();

        assert!(!outcome.success());
        assert!(outcome.ledger_entry_deleted);
        assert!(outcome.message.contains("folder not found"));
        assert!(f.store.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn delete_validates_key_syntax() {
        let f = fixture();
        let err = f.store.delete_portfolio("../w1").unwrap_err();
        assert!(matches!(err, StoreError::InvalidFolderKey { .. }));
    }
}
