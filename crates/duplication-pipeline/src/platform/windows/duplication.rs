//! Wrapper over one output's desktop duplication session.

use core::time::Duration;

use tracing::error;
use windows::Win32::{
    Foundation::RECT,
    Graphics::{
        Direct3D11::{ID3D11Device, ID3D11Texture2D},
        Dxgi::{
            IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource, DXGI_ERROR_WAIT_TIMEOUT,
            DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT, DXGI_OUTDUPL_POINTER_SHAPE_INFO,
            DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR, DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MONOCHROME,
        },
    },
};
use windows_core::{Interface, HRESULT};

use crate::{
    pointer::{PointerReport, PointerShape, PointerShapeKind},
    rect::Point,
    status::Status,
};

use super::{LabelledWinResult, WinError};

/// A frame acquired from a duplication session. Must be released through
/// [`DuplicationSource::release_frame`] before the next acquire.
pub struct AcquiredFrame {
    /// The full current output image on the capture device.
    pub texture: ID3D11Texture2D,
    /// Accumulated frame metadata.
    pub info: DXGI_OUTDUPL_FRAME_INFO,
}

/// One output's duplication session and its reusable metadata buffers.
///
/// The metadata buffers grow to the largest frame seen and are then reused;
/// growth goes through `try_reserve` so an allocation failure surfaces as a
/// fatal error instead of an abort.
pub struct DuplicationSource {
    duplication: IDXGIOutputDuplication,
    dirty_buffer: Vec<RECT>,
    move_buffer: Vec<DXGI_OUTDUPL_MOVE_RECT>,
    shape_buffer: Vec<u8>,
}

impl DuplicationSource {
    /// Start duplicating `output` on `device`. The device must live on the
    /// output's adapter.
    pub fn new(output: &IDXGIOutput1, device: &ID3D11Device) -> LabelledWinResult<Self> {
        let duplication = unsafe { output.DuplicateOutput(device) }
            .map_err(|e| WinError::new(e, "IDXGIOutput1::DuplicateOutput"))?;

        Ok(Self {
            duplication,
            dirty_buffer: Vec::new(),
            move_buffer: Vec::new(),
            shape_buffer: Vec::new(),
        })
    }

    /// Poll for the next frame, waiting at most `timeout`. `Ok(None)` when no
    /// frame arrived in time.
    pub fn acquire_frame(&mut self, timeout: Duration) -> LabelledWinResult<Option<AcquiredFrame>> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        match unsafe {
            self.duplication
                .AcquireNextFrame(timeout.as_millis() as u32, &mut info, &mut resource)
        } {
            Ok(()) => {}
            Err(error) if error.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(None),
            Err(error) => {
                return Err(WinError::new(
                    error,
                    "IDXGIOutputDuplication::AcquireNextFrame",
                ));
            }
        }

        let resource = resource.expect("acquired resource was none");
        let texture = resource
            .cast()
            .map_err(|e| WinError::new(e, "IDXGIResource::cast"))?;

        Ok(Some(AcquiredFrame { texture, info }))
    }

    /// The frame's dirty rects in output-local coordinates.
    pub fn dirty_rects(&mut self, info: &DXGI_OUTDUPL_FRAME_INFO) -> LabelledWinResult<&[RECT]> {
        if info.TotalMetadataBufferSize == 0 {
            return Ok(&[]);
        }

        let capacity = info.TotalMetadataBufferSize as usize / size_of::<RECT>();
        grow_buffer(&mut self.dirty_buffer, capacity, "dirty rect buffer")?;

        let mut size = (self.dirty_buffer.len() * size_of::<RECT>()) as u32;
        unsafe {
            self.duplication
                .GetFrameDirtyRects(size, self.dirty_buffer.as_mut_ptr(), &mut size)
        }
        .map_err(|e| WinError::new(e, "IDXGIOutputDuplication::GetFrameDirtyRects"))?;

        let count = size as usize / size_of::<RECT>();
        Ok(&self.dirty_buffer[..count])
    }

    /// The frame's move rects in output-local coordinates.
    pub fn move_rects(
        &mut self,
        info: &DXGI_OUTDUPL_FRAME_INFO,
    ) -> LabelledWinResult<&[DXGI_OUTDUPL_MOVE_RECT]> {
        if info.TotalMetadataBufferSize == 0 {
            return Ok(&[]);
        }

        let capacity = info.TotalMetadataBufferSize as usize / size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        grow_buffer(&mut self.move_buffer, capacity, "move rect buffer")?;

        let mut size = (self.move_buffer.len() * size_of::<DXGI_OUTDUPL_MOVE_RECT>()) as u32;
        unsafe {
            self.duplication
                .GetFrameMoveRects(size, self.move_buffer.as_mut_ptr(), &mut size)
        }
        .map_err(|e| WinError::new(e, "IDXGIOutputDuplication::GetFrameMoveRects"))?;

        let count = size as usize / size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        Ok(&self.move_buffer[..count])
    }

    /// The frame's pointer report, including a replacement shape when the
    /// frame carried one.
    pub fn pointer_report(
        &mut self,
        info: &DXGI_OUTDUPL_FRAME_INFO,
    ) -> LabelledWinResult<PointerReport> {
        let mut report = PointerReport {
            update_time: info.LastMouseUpdateTime.max(0) as u64,
            visible: info.PointerPosition.Visible.as_bool(),
            position: Point::new(info.PointerPosition.Position.x, info.PointerPosition.Position.y),
            shape: None,
        };

        if info.PointerShapeBufferSize > 0 {
            grow_buffer(
                &mut self.shape_buffer,
                info.PointerShapeBufferSize as usize,
                "pointer shape buffer",
            )?;

            let mut shape_info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
            let mut required = 0u32;
            unsafe {
                self.duplication.GetFramePointerShape(
                    self.shape_buffer.len() as u32,
                    self.shape_buffer.as_mut_ptr().cast(),
                    &mut required,
                    &mut shape_info,
                )
            }
            .map_err(|e| WinError::new(e, "IDXGIOutputDuplication::GetFramePointerShape"))?;

            let kind = match shape_info.Type {
                t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MONOCHROME.0 as u32 => {
                    PointerShapeKind::Monochrome
                }
                t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR.0 as u32 => PointerShapeKind::Color,
                _ => PointerShapeKind::MaskedColor,
            };

            report.shape = Some(PointerShape {
                width: shape_info.Width,
                height: shape_info.Height,
                pitch: shape_info.Pitch,
                kind,
                hotspot: Point::new(shape_info.HotSpot.x, shape_info.HotSpot.y),
                data: self.shape_buffer[..required as usize].to_vec(),
            });
        }

        Ok(report)
    }

    /// Release the acquired frame back to the duplication session.
    pub fn release_frame(&mut self) -> LabelledWinResult<()> {
        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|e| WinError::new(e, "IDXGIOutputDuplication::ReleaseFrame"))
    }
}

fn grow_buffer<T: Default + Clone>(
    buffer: &mut Vec<T>,
    capacity: usize,
    label: &str,
) -> LabelledWinResult<()> {
    if buffer.len() >= capacity {
        return Ok(());
    }

    if let Err(allocation) = buffer.try_reserve_exact(capacity - buffer.len()) {
        error!("Could not grow the {label} to {capacity} elements: {allocation}");
        return Err(WinError::from_hresult(
            HRESULT(Status::OUT_OF_MEMORY.0),
            "Vec::try_reserve_exact",
        ));
    }
    buffer.resize(capacity, T::default());

    Ok(())
}
