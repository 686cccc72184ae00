//! Shared types, error model, and configuration for SourceRouter.
//!
//! This crate is the foundation depended on by all other SourceRouter crates.
//! It provides:
//! - [`RouterError`]: the unified error type
//! - Domain types ([`Source`], [`Classification`], [`SourceResult`], [`CombinedResult`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AdaptersConfig, AppConfig, ClassifierConfig, CodeHostConfig, DeckEntry, DefaultsConfig,
    ImagesConfig, LlmConfig, SlidesConfig, WikiConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, read_secret, validate_config,
};
pub use error::{Result, RouterError};
pub use types::{
    Classification, CombinedResult, MAX_SLIDE_TARGET, Mode, NO_SOURCE_MESSAGE, RunId,
    SlideTarget, Source, SourceResult, SourceStatus,
};
