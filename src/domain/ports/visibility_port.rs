//! Port definition for near-viewport tracking.

use crate::domain::entities::{ElementBounds, ElementId};

/// Port for tracking when elements approach the viewport.
///
/// Implementations deliver [`ElementId`]s of near-viewport elements on the
/// channel they were constructed with. Signals are level-triggered: an element
/// may be reported again while it stays near, until it is unobserved.
pub trait VisibilityPort: Send + Sync {
    /// Starts watching `element` laid out at `bounds`.
    fn observe(&self, element: ElementId, bounds: ElementBounds);

    /// Stops watching `element`.
    fn unobserve(&self, element: &ElementId);

    /// Returns true if `element` is observed and near the viewport right now.
    ///
    /// Consulted before acting on a queued signal, which may predate a
    /// re-registration at different bounds.
    fn is_near(&self, _element: &ElementId) -> bool {
        true
    }
}
