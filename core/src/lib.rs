//! Portfolio storage: numbered image folders, the description ledger that
//! describes them, and the configuration shared by the service and the CLI.

pub mod config;
mod error;
pub mod folder_key;
pub mod ledger;
mod models;
pub mod normalizer;
mod sequence;
mod store;

pub use config::{ConfigLoadError, ConfigLoader, FolioConfig};
pub use error::{Result, StoreError};
pub use folder_key::{FolderKey, KeyPattern};
pub use models::{
    DeleteOutcome, ImageRef, METADATA_FIELDS, MetadataUpdate, PortfolioItem, PortfolioMetadata,
    Upload,
};
pub use normalizer::{ImageCrateNormalizer, ImageNormalizer, NormalizeError};
pub use sequence::SequenceFile;
pub use store::{PortfolioStore, StoreConfig, missing_numbers};
