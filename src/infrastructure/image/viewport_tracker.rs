//! Near-viewport tracking over explicit layout geometry.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::domain::entities::{ElementBounds, ElementId, Viewport};
use crate::domain::ports::VisibilityPort;

/// Reports observed elements that come within `margin_px` of the viewport.
///
/// The host calls [`ViewportTracker::set_viewport`] on every scroll or resize.
/// Each call re-evaluates all observed elements and signals the near ones.
pub struct ViewportTracker {
    margin_px: u32,
    threshold: f64,
    signals: mpsc::UnboundedSender<ElementId>,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    viewport: Option<Viewport>,
    observed: HashMap<ElementId, ElementBounds>,
}

impl ViewportTracker {
    /// Creates a tracker delivering signals on `signals`.
    #[must_use]
    pub fn new(margin_px: u32, threshold: f64, signals: mpsc::UnboundedSender<ElementId>) -> Self {
        Self {
            margin_px,
            threshold,
            signals,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Updates the visible window and signals every near element.
    pub fn set_viewport(&self, viewport: Viewport) {
        let mut state = self.state.lock();
        state.viewport = Some(viewport);

        let near: Vec<ElementId> = state
            .observed
            .iter()
            .filter(|(_, bounds)| self.within_margin(viewport, **bounds))
            .map(|(element, _)| element.clone())
            .collect();
        drop(state);

        trace!(top = viewport.top, height = viewport.height, near = near.len(), "Viewport changed");
        for element in near {
            self.signal(element);
        }
    }

    /// Number of elements being watched.
    #[must_use]
    pub fn observed_count(&self) -> usize {
        self.state.lock().observed.len()
    }

    fn within_margin(&self, viewport: Viewport, bounds: ElementBounds) -> bool {
        let ratio = viewport.intersection_ratio(bounds, self.margin_px);
        ratio > 0.0 && ratio >= self.threshold
    }

    fn signal(&self, element: ElementId) {
        if self.signals.send(element).is_err() {
            debug!("Visibility receiver dropped");
        }
    }
}

impl VisibilityPort for ViewportTracker {
    fn observe(&self, element: ElementId, bounds: ElementBounds) {
        let mut state = self.state.lock();
        let near_now = state
            .viewport
            .is_some_and(|viewport| self.within_margin(viewport, bounds));
        state.observed.insert(element.clone(), bounds);
        drop(state);

        if near_now {
            self.signal(element);
        }
    }

    fn unobserve(&self, element: &ElementId) {
        self.state.lock().observed.remove(element);
    }

    fn is_near(&self, element: &ElementId) -> bool {
        let state = self.state.lock();
        match (state.viewport, state.observed.get(element)) {
            (Some(viewport), Some(bounds)) => self.within_margin(viewport, *bounds),
            _ => false,
        }
    }
}

/// Fallback backend for hosts without layout information.
///
/// Every observed element is reported immediately, which turns lazy
/// registrations into eager loads.
pub struct ImmediateVisibility {
    signals: mpsc::UnboundedSender<ElementId>,
}

impl ImmediateVisibility {
    /// Creates a backend delivering signals on `signals`.
    #[must_use]
    pub fn new(signals: mpsc::UnboundedSender<ElementId>) -> Self {
        Self { signals }
    }
}

impl VisibilityPort for ImmediateVisibility {
    fn observe(&self, element: ElementId, _bounds: ElementBounds) {
        let _ = self.signals.send(element);
    }

    fn unobserve(&self, _element: &ElementId) {}
}
