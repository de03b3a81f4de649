pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::cli::LocalStorage;
pub use config::toml_config::TomlConfig;
pub use core::{etl::ReceiptEngine, pipeline::ReceiptPipeline};
pub use domain::model::{ParsedReceipt, ReceiptImage};
pub use utils::error::{ReceiptError, Result};
