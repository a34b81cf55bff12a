//! Shared result alias and cross-cutting error markers.

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Marker error raised when a running job observes its cancellation token.
///
/// Callers detect it with `err.downcast_ref::<Cancelled>()` to distinguish a
/// user-requested stop from a real failure.
#[derive(Debug, thiserror::Error)]
#[error("Scraping abgebrochen")]
pub struct Cancelled;
