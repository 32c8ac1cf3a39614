mod idle_port;
mod image_fetcher_port;
mod persistent_store_port;
mod visibility_port;

pub use idle_port::IdlePort;
pub use image_fetcher_port::{FetchResponse, ImageFetcherPort};
pub use persistent_store_port::PersistentStorePort;
pub use visibility_port::VisibilityPort;
