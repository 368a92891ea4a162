//! `folio`: command-line client for `folio-service`.

pub mod portfolio_cmd;

pub use portfolio_cmd::FolioCli;
