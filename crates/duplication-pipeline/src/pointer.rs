//! Shared pointer state and the per-frame pointer arbitration.
//!
//! Every capture worker reports the pointer data its duplication source
//! attached to a frame. Exactly one process-wide [`PointerState`] holds the
//! merged result; it is only touched while the shared-surface lock is held,
//! which is why it lives inside the same guarded capture state as the dirty
//! accumulator rather than behind its own lock.

use crate::rect::{Point, Rect};

/// The pixel layout of a pointer shape reported by a duplication source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerShapeKind {
    /// 1bpp AND/XOR mask pair.
    Monochrome,
    /// 32bpp ARGB.
    Color,
    /// 32bpp ARGB with a per-pixel mask in the alpha channel.
    MaskedColor,
}

/// An already-decoded pointer shape bitmap and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerShape {
    /// Shape width in pixels.
    pub width: u32,
    /// Shape height in pixels. For monochrome shapes this is the combined
    /// height of the AND and XOR masks.
    pub height: u32,
    /// Row stride of `data` in bytes.
    pub pitch: u32,
    /// Pixel layout.
    pub kind: PointerShapeKind,
    /// Hotspot offset from the shape's top-left corner.
    pub hotspot: Point,
    /// The raw shape buffer.
    pub data: Vec<u8>,
}

impl PointerShape {
    /// The on-screen height of the drawn shape. Monochrome shapes store the
    /// AND and XOR masks stacked vertically in one buffer.
    pub const fn visible_height(&self) -> u32 {
        match self.kind {
            PointerShapeKind::Monochrome => self.height / 2,
            _ => self.height,
        }
    }
}

/// One frame's pointer report from a capture worker.
///
/// Carries a position/shape update only when `update_time` is non-zero;
/// a zero timestamp means the frame held no pointer information at all.
#[derive(Debug, Clone)]
pub struct PointerReport {
    /// Monotonic update timestamp from the duplication source, zero when the
    /// frame carried no pointer update.
    pub update_time: u64,
    /// Whether the pointer is visible on the reporting output.
    pub visible: bool,
    /// Pointer position in output-local coordinates.
    pub position: Point,
    /// A replacement shape, present only when the frame carried one.
    pub shape: Option<PointerShape>,
}

/// The process-wide last-known pointer state.
#[derive(Debug, Clone, Default)]
pub struct PointerState {
    /// Last known position in desktop-global coordinates (minus the combined
    /// desktop offset supplied at update time).
    pub position: Point,
    /// Last known visibility.
    pub visible: bool,
    /// Timestamp of the newest applied positional update.
    pub last_update_time: u64,
    /// Index of the worker that last applied a positional update. Tracked so
    /// one output's stale invisible report cannot blank a pointer another
    /// output is actively tracking.
    pub last_updater: Option<usize>,
    /// The current shape, `None` until the first shape report arrives.
    pub shape: Option<PointerShape>,
    /// Incremented every time a report replaces the shape. Readers compare
    /// against the serial they last acted on instead of a one-shot flag, so
    /// an idle pointer never reads as changed.
    pub shape_serial: u64,
}

impl PointerState {
    /// Create an empty pointer state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one worker's frame report into the shared state.
    ///
    /// `output_origin` is the reporting output's desktop-space top-left and
    /// `desktop_offset` the combined-desktop offset, converting the report's
    /// output-local position into the shared surface's coordinate space.
    ///
    /// Returns whether a positional update was applied.
    pub fn apply_report(
        &mut self,
        worker_index: usize,
        report: PointerReport,
        output_origin: Point,
        desktop_offset: Point,
    ) -> bool {
        if report.update_time == 0 {
            return false;
        }

        // An output reporting "my region has no cursor" must not blank a
        // cursor another output is actively tracking.
        let stale_invisible = !report.visible && self.last_updater != Some(worker_index);

        // Older visible reports never override newer ones, even across
        // outputs.
        let outdated =
            report.visible && self.visible && report.update_time < self.last_update_time;

        let applied = !(stale_invisible || outdated);
        if applied {
            self.position = Point::new(
                report.position.x + output_origin.x - desktop_offset.x,
                report.position.y + output_origin.y - desktop_offset.y,
            );
            self.visible = report.visible;
            self.last_update_time = report.update_time;
            self.last_updater = Some(worker_index);
        }

        if let Some(shape) = report.shape {
            self.shape = Some(shape);
            self.shape_serial += 1;
        }

        applied
    }

    /// The desktop-space bounding box of the drawn pointer, `None` while
    /// invisible or before any shape arrived.
    pub fn bounds(&self) -> Option<Rect> {
        if !self.visible {
            return None;
        }

        let shape = self.shape.as_ref()?;
        Some(Rect::from_position_size(
            self.position,
            shape.width,
            shape.visible_height(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(update_time: u64, visible: bool, x: i32, y: i32) -> PointerReport {
        PointerReport {
            update_time,
            visible,
            position: Point::new(x, y),
            shape: None,
        }
    }

    fn shape() -> PointerShape {
        PointerShape {
            width: 32,
            height: 32,
            pitch: 128,
            kind: PointerShapeKind::Color,
            hotspot: Point::new(0, 0),
            data: vec![0; 128 * 32],
        }
    }

    #[test]
    fn zero_timestamp_is_ignored() {
        let mut state = PointerState::new();
        assert!(!state.apply_report(0, report(0, true, 5, 5), Point::default(), Point::default()));
        assert_eq!(state.last_update_time, 0);
    }

    #[test]
    fn newest_visible_report_wins_in_either_order() {
        let origin = Point::default();
        let offset = Point::default();

        let mut forward = PointerState::new();
        forward.apply_report(0, report(1, true, 10, 10), origin, offset);
        forward.apply_report(1, report(2, true, 20, 20), origin, offset);

        let mut reverse = PointerState::new();
        reverse.apply_report(1, report(2, true, 20, 20), origin, offset);
        reverse.apply_report(0, report(1, true, 10, 10), origin, offset);

        assert_eq!(forward.position, Point::new(20, 20));
        assert_eq!(reverse.position, Point::new(20, 20));
        assert_eq!(forward.last_update_time, 2);
        assert_eq!(reverse.last_update_time, 2);
    }

    #[test]
    fn invisible_report_from_other_worker_is_ignored() {
        let mut state = PointerState::new();
        state.apply_report(0, report(5, true, 100, 100), Point::default(), Point::default());

        assert!(!state.apply_report(
            1,
            report(6, false, 0, 0),
            Point::default(),
            Point::default()
        ));
        assert!(state.visible);
        assert_eq!(state.position, Point::new(100, 100));
    }

    #[test]
    fn invisible_report_from_last_updater_applies() {
        let mut state = PointerState::new();
        state.apply_report(0, report(5, true, 100, 100), Point::default(), Point::default());

        assert!(state.apply_report(
            0,
            report(6, false, 0, 0),
            Point::default(),
            Point::default()
        ));
        assert!(!state.visible);
    }

    #[test]
    fn position_is_translated_to_desktop_space() {
        let mut state = PointerState::new();
        state.apply_report(
            1,
            report(1, true, 80, 100),
            Point::new(1920, 0),
            Point::new(-160, 0),
        );

        assert_eq!(state.position, Point::new(1920 + 80 + 160, 100));
    }

    #[test]
    fn shape_serial_advances_only_on_replacement() {
        let mut state = PointerState::new();

        let mut with_shape = report(1, true, 0, 0);
        with_shape.shape = Some(shape());
        state.apply_report(0, with_shape, Point::default(), Point::default());
        assert_eq!(state.shape_serial, 1);
        assert!(state.shape.is_some());

        // A reader that published serial 1 must not see further reports as
        // shape changes while the shape stays the same.
        let published = state.shape_serial;
        state.apply_report(0, report(2, true, 1, 1), Point::default(), Point::default());
        assert_eq!(state.shape_serial, published);
        assert!(state.shape.is_some(), "previous shape must be kept");

        let mut replaced = report(3, true, 1, 1);
        replaced.shape = Some(shape());
        state.apply_report(0, replaced, Point::default(), Point::default());
        assert_ne!(state.shape_serial, published);
    }

    #[test]
    fn bounds_follow_shape_and_visibility() {
        let mut state = PointerState::new();
        assert_eq!(state.bounds(), None);

        let mut with_shape = report(1, true, 10, 20);
        with_shape.shape = Some(shape());
        state.apply_report(0, with_shape, Point::default(), Point::default());
        assert_eq!(state.bounds(), Some(Rect::new(10, 20, 42, 52)));

        state.apply_report(0, report(2, false, 10, 20), Point::default(), Point::default());
        assert_eq!(state.bounds(), None);
    }
}
