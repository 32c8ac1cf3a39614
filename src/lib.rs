//! imgcache - resilient remote image loading.
//!
//! Provides URL normalization for share links, a two-tier (memory and disk)
//! image cache, a deduplicating load pipeline with bounded retries, and
//! visibility-driven lazy loading with idle-time prefetching.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, services, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgcache";
