//! Domain entity definitions.

mod cache_key;
mod element;
mod image;

pub use cache_key::CacheKey;
pub use element::{ElementBounds, ElementId, Viewport};
pub use image::{
    FailureRecord, ImageHandle, ImageSource, LoadStatus, LoadedImage, PersistedEntry,
};
