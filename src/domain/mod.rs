//! Domain layer with core entities, errors, port definitions and pure services.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// URL normalization and retry policy.
pub mod services;

pub use entities::{CacheKey, ImageHandle, LoadedImage};
pub use errors::{FetchError, LoadError, LoadErrorKind, StoreError};
