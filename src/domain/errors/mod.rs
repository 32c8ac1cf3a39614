//! Domain error types.

mod load_error;
mod store_error;

pub use load_error::{FetchError, LoadError, LoadErrorKind};
pub use store_error::{StoreError, StoreResult};
