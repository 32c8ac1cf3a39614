//! UI element identity and layout geometry for lazy loading.

/// Identifier of a UI element that displays an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(String);

impl ElementId {
    /// Creates a new `ElementId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Vertical extent of an element in document coordinates (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementBounds {
    /// Offset of the top edge.
    pub top: i64,
    /// Height of the element.
    pub height: u32,
}

impl ElementBounds {
    /// Creates bounds.
    #[must_use]
    pub const fn new(top: i64, height: u32) -> Self {
        Self { top, height }
    }

    /// Offset of the bottom edge.
    #[must_use]
    pub const fn bottom(&self) -> i64 {
        self.top + self.height as i64
    }
}

/// Visible vertical window of the document (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Scroll offset of the top edge.
    pub top: i64,
    /// Visible height.
    pub height: u32,
}

impl Viewport {
    /// Creates a viewport.
    #[must_use]
    pub const fn new(top: i64, height: u32) -> Self {
        Self { top, height }
    }

    /// Fraction of `bounds` that lies within the viewport grown by `margin` on both edges.
    ///
    /// Zero-height elements count as fully visible when their edge lies inside.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn intersection_ratio(&self, bounds: ElementBounds, margin: u32) -> f64 {
        let margin = i64::from(margin);
        let low = self.top - margin;
        let high = self.top + i64::from(self.height) + margin;

        if bounds.height == 0 {
            return if (low..=high).contains(&bounds.top) {
                1.0
            } else {
                0.0
            };
        }

        let overlap = bounds.bottom().min(high) - bounds.top.max(low);
        if overlap <= 0 {
            0.0
        } else {
            overlap as f64 / f64::from(bounds.height)
        }
    }
}
