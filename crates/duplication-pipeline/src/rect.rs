//! Screen-space rectangle algebra and the dirty-region accumulator.

/// A point in desktop coordinates, relative to the top left corner of the
/// primary display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    /// Horizontal position in pixels.
    pub x: i32,
    /// Vertical position in pixels.
    pub y: i32,
}

impl Point {
    /// Create a new point.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A screen-space rectangle. Left/top are inclusive, right/bottom exclusive.
///
/// A rect with `right <= left` or `bottom <= top` is empty; empty rects are
/// ignored by [`Rect::union`] and produce no intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge in pixels.
    pub left: i32,
    /// Top edge in pixels.
    pub top: i32,
    /// Right edge in pixels, exclusive.
    pub right: i32,
    /// Bottom edge in pixels, exclusive.
    pub bottom: i32,
}

impl Rect {
    /// Create a new rect from its edges.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Create a rect from a position and size.
    pub const fn from_position_size(position: Point, width: u32, height: u32) -> Self {
        Self {
            left: position.x,
            top: position.y,
            right: position.x + width as i32,
            bottom: position.y + height as i32,
        }
    }

    /// Returns whether this rect covers no pixels.
    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// The rect's width in pixels, zero when empty.
    pub const fn width(&self) -> u32 {
        if self.right <= self.left {
            0
        } else {
            (self.right - self.left) as u32
        }
    }

    /// The rect's height in pixels, zero when empty.
    pub const fn height(&self) -> u32 {
        if self.bottom <= self.top {
            0
        } else {
            (self.bottom - self.top) as u32
        }
    }

    /// The rect's top-left corner.
    pub const fn top_left(&self) -> Point {
        Point::new(self.left, self.top)
    }

    /// The smallest rect containing both `self` and `other`.
    ///
    /// Union with an empty rect returns the other operand unchanged, so
    /// folding a sequence of rects never inflates the result.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// The overlap of `self` and `other`, `None` when they do not intersect.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let rect = Self {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };

        if rect.is_empty() { None } else { Some(rect) }
    }

    /// Returns whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Self) -> bool {
        other.is_empty()
            || (self.left <= other.left
                && self.top <= other.top
                && self.right >= other.right
                && self.bottom >= other.bottom)
    }

    /// The rect moved by an offset.
    pub const fn translated(&self, offset: Point) -> Self {
        Self {
            left: self.left + offset.x,
            top: self.top + offset.y,
            right: self.right + offset.x,
            bottom: self.bottom + offset.y,
        }
    }
}

#[cfg(windows)]
impl From<windows::Win32::Foundation::RECT> for Rect {
    fn from(rect: windows::Win32::Foundation::RECT) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        }
    }
}

#[cfg(windows)]
impl From<Rect> for windows::Win32::Foundation::RECT {
    fn from(rect: Rect) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        }
    }
}

/// Accumulates the union of all screen-space areas that have been invalidated
/// but not yet republished.
///
/// The accumulator persists across skipped ticks; it is only cleared by
/// [`DirtyRegion::take`] after a successful publish, so no invalidation is
/// ever lost to rate limiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyRegion {
    bounds: Option<Rect>,
}

impl DirtyRegion {
    /// An empty region.
    pub const fn new() -> Self {
        Self { bounds: None }
    }

    /// Returns whether nothing has been invalidated.
    pub const fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// The accumulated bounds, `None` when empty.
    pub const fn bounds(&self) -> Option<Rect> {
        self.bounds
    }

    /// Fold a rect into the accumulated bounds. Empty rects are ignored.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        self.bounds = Some(match self.bounds {
            Some(bounds) => bounds.union(&rect),
            None => rect,
        });
    }

    /// Fold another region into this one, leaving the other untouched.
    pub fn merge(&mut self, other: &Self) {
        if let Some(rect) = other.bounds {
            self.add(rect);
        }
    }

    /// Take the accumulated bounds, leaving the region empty.
    pub fn take(&mut self) -> Option<Rect> {
        self.bounds.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_rects() {
        let rect = Rect::new(10, 10, 20, 20);
        assert_eq!(rect.union(&Rect::default()), rect);
        assert_eq!(Rect::default().union(&rect), rect);
    }

    #[test]
    fn union_is_idempotent() {
        let mut region = DirtyRegion::new();
        let rect = Rect::new(0, 0, 100, 50);

        region.add(rect);
        let once = region;

        region.add(rect);
        assert_eq!(region, once);
    }

    #[test]
    fn intersect_disjoint_is_none() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 20, 10);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn intersect_overlap() {
        let a = Rect::new(0, 0, 1920, 1080);
        let b = Rect::new(1900, 1000, 2000, 1200);
        assert_eq!(a.intersect(&b), Some(Rect::new(1900, 1000, 1920, 1080)));
    }

    #[test]
    fn accumulator_merge_preserves_both() {
        let mut deferred = DirtyRegion::new();
        deferred.add(Rect::new(0, 0, 10, 10));

        let mut current = DirtyRegion::new();
        current.add(Rect::new(100, 100, 110, 110));
        current.merge(&deferred);

        assert_eq!(current.bounds(), Some(Rect::new(0, 0, 110, 110)));
    }

    #[test]
    fn take_empties_the_region() {
        let mut region = DirtyRegion::new();
        region.add(Rect::new(1, 2, 3, 4));

        assert_eq!(region.take(), Some(Rect::new(1, 2, 3, 4)));
        assert!(region.is_empty());
        assert_eq!(region.take(), None);
    }
}
