//! Lazy, visibility-driven image loading.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::domain::entities::{ElementBounds, ElementId, LoadedImage};
use crate::domain::errors::LoadError;
use crate::domain::ports::VisibilityPort;

use super::loader::ImageLoader;
use super::viewport_tracker::{ImmediateVisibility, ViewportTracker};

/// Event sent when a scheduled load settles.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// Element the image was requested for.
    pub element: ElementId,
    /// URL as registered.
    pub url: String,
    /// The loaded image, or the terminal error.
    pub result: Result<LoadedImage, LoadError>,
}

/// When a registered element starts loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Wait until the element is near the viewport.
    #[default]
    Lazy,
    /// Load right away.
    Eager,
}

struct Registration {
    url: String,
    pending: bool,
}

/// Defers image loads until their elements approach the viewport.
///
/// Cheap to clone. Each registration triggers at most one load; use
/// [`VisibilityScheduler::retry`] to load again after a failure.
#[derive(Clone)]
pub struct VisibilityScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    loader: ImageLoader,
    port: Arc<dyn VisibilityPort>,
    registrations: Mutex<HashMap<ElementId, Registration>>,
    event_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
}

impl std::fmt::Debug for VisibilityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityScheduler")
            .field("registered", &self.inner.registrations.lock().len())
            .finish_non_exhaustive()
    }
}

impl VisibilityScheduler {
    /// Creates a scheduler over `port`, which reports near elements on `signals`.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(
        loader: ImageLoader,
        event_tx: &mpsc::UnboundedSender<ImageLoadedEvent>,
        port: Arc<dyn VisibilityPort>,
        signals: mpsc::UnboundedReceiver<ElementId>,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            loader,
            port,
            registrations: Mutex::new(HashMap::new()),
            event_tx: event_tx.clone(),
        });

        tokio::spawn(Self::run_worker_loop(Arc::downgrade(&inner), signals));

        Self { inner }
    }

    /// Creates a scheduler driven by a [`ViewportTracker`] configured from the loader.
    #[must_use]
    pub fn with_viewport(
        loader: ImageLoader,
        event_tx: &mpsc::UnboundedSender<ImageLoadedEvent>,
    ) -> (Self, Arc<ViewportTracker>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let config = loader.config();
        let tracker = Arc::new(ViewportTracker::new(
            config.viewport_margin_px,
            config.viewport_threshold,
            signal_tx,
        ));
        let scheduler = Self::new(loader, event_tx, tracker.clone(), signal_rx);
        (scheduler, tracker)
    }

    /// Creates a scheduler for hosts without layout information; every registration loads eagerly.
    #[must_use]
    pub fn immediate(
        loader: ImageLoader,
        event_tx: &mpsc::UnboundedSender<ImageLoadedEvent>,
    ) -> Self {
        warn!("Visibility tracking unavailable, loading images eagerly");
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let port = Arc::new(ImmediateVisibility::new(signal_tx));
        Self::new(loader, event_tx, port, signal_rx)
    }

    /// Registers `element` to display `url`. Never blocks.
    ///
    /// Re-registering an element replaces its pending registration.
    pub fn register(&self, element: ElementId, url: impl Into<String>, bounds: ElementBounds, mode: LoadMode) {
        let url = url.into();
        let previous = self.inner.registrations.lock().insert(
            element.clone(),
            Registration {
                url: url.clone(),
                pending: mode == LoadMode::Lazy,
            },
        );

        if previous.is_some_and(|registration| registration.pending) {
            trace!(element = %element, "Replacing pending registration");
            self.inner.port.unobserve(&element);
        }

        match mode {
            LoadMode::Lazy => {
                trace!(element = %element, url = %url, "Waiting for visibility");
                self.inner.port.observe(element, bounds);
            }
            LoadMode::Eager => self.inner.start_load(element, url),
        }
    }

    /// Drops `element`, cancelling its load if it has not triggered yet.
    pub fn unregister(&self, element: &ElementId) {
        let removed = self.inner.registrations.lock().remove(element);
        if removed.is_some_and(|registration| registration.pending) {
            self.inner.port.unobserve(element);
        }
    }

    /// Loads the image for `element` again, clearing any recorded failure.
    ///
    /// Returns false if the element is not registered.
    pub fn retry(&self, element: &ElementId) -> bool {
        let url = {
            let mut registrations = self.inner.registrations.lock();
            let Some(registration) = registrations.get_mut(element) else {
                return false;
            };
            let was_pending = std::mem::replace(&mut registration.pending, false);
            if was_pending {
                self.inner.port.unobserve(element);
            }
            registration.url.clone()
        };

        let loader = self.inner.loader.clone();
        let event_tx = self.inner.event_tx.clone();
        let element = element.clone();
        tokio::spawn(async move {
            let result = loader.retry(&url).await;
            let _ = event_tx.send(ImageLoadedEvent {
                element,
                url,
                result,
            });
        });
        true
    }

    /// Number of registrations still waiting for visibility.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .registrations
            .lock()
            .values()
            .filter(|registration| registration.pending)
            .count()
    }

    /// Returns true if `element` is registered.
    #[must_use]
    pub fn is_registered(&self, element: &ElementId) -> bool {
        self.inner.registrations.lock().contains_key(element)
    }

    /// Worker loop turning visibility signals into loads.
    async fn run_worker_loop(
        inner: Weak<SchedulerInner>,
        mut signals: mpsc::UnboundedReceiver<ElementId>,
    ) {
        while let Some(element) = signals.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.trigger(&element);
        }
        debug!("Visibility worker stopped");
    }
}

impl SchedulerInner {
    fn trigger(&self, element: &ElementId) {
        if !self.port.is_near(element) {
            trace!(element = %element, "Ignoring stale visibility signal");
            return;
        }

        let url = {
            let mut registrations = self.registrations.lock();
            match registrations.get_mut(element) {
                Some(registration) if registration.pending => {
                    registration.pending = false;
                    registration.url.clone()
                }
                _ => return,
            }
        };

        self.port.unobserve(element);
        debug!(element = %element, url = %url, "Element near viewport, loading");
        self.start_load(element.clone(), url);
    }

    fn start_load(&self, element: ElementId, url: String) {
        let loader = self.loader.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = loader.load(&url).await;
            let event = ImageLoadedEvent {
                element,
                url,
                result,
            };
            if event_tx.send(event).is_err() {
                trace!("Image event receiver dropped");
            }
        });
    }
}
