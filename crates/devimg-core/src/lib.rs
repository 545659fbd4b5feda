//! Core types and configuration for devimg.
//!
//! This crate defines the `devimg.toml` schema ([`DevimgConfig`]), execution
//! context detection ([`Resolver`] → [`BuildConfig`]), platform identifiers,
//! CI tag derivation, and shared error types.

pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod platform;
pub mod tags;

pub use cache::{ResolverCache, default_cache_path};
pub use config::{
    BuildSettings, CONFIG_FILE, DevimgConfig, ImageConfig, NESTED_PULL_ATTEMPTS,
    NESTED_PULL_RETRY_SECS, ToolCheck, ValidateConfig, Variant, VariantConfig,
};
pub use env::{BuildConfig, EnvSignals, Mode, Overrides, Resolver};
pub use error::{Error, Result};
pub use platform::{Platform, join_platforms, normalize_arch};
pub use tags::{CiEvent, dedupe_tags};
