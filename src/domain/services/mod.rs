//! Pure domain services.

mod retry_policy;
mod share_link;

pub use retry_policy::{JITTER_FACTOR, RetryPolicy};
pub use share_link::{DIRECT_CONTENT_HOST, ShareLinkKind, normalize_url, share_link_kind};
