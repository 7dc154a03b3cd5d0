//! Captured output descriptors and capture-region selection.

use crate::rect::Rect;

/// Which part of the desktop the pipeline captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureRegionMode {
    /// The union of every active output.
    #[default]
    CombinedDesktop,
    /// A single output, identified by its stable enumeration index.
    SingleOutput(usize),
}

/// One physical display included in capture.
///
/// Descriptors are created during topology enumeration and replaced wholesale
/// on every re-enumeration; they are never mutated field by field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputDescriptor {
    /// Stable index assigned at enumeration time. Resolves adapter/output
    /// ordering across multiple GPUs.
    pub index: usize,

    /// The index of the adapter this output is attached to.
    pub adapter_index: usize,

    /// The output's slot on its own adapter, used to reopen the output on a
    /// device that lives on that adapter.
    pub adapter_slot: usize,

    /// The output's desktop-coordinate rectangle.
    pub rect: Rect,

    /// White-level adjustment factor applied when compositing this output's
    /// pixels into an HDR-aware presentation. `1.0` for plain SDR outputs.
    pub white_level_adjustment: f32,
}

impl OutputDescriptor {
    /// The output's width and height in pixels.
    pub const fn size(&self) -> [u32; 2] {
        [self.rect.width(), self.rect.height()]
    }
}
