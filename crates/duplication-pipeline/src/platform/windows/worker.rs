//! One output's capture worker thread.

use core::time::Duration;
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info, info_span};
use windows::Win32::{
    Foundation::GENERIC_READ,
    Graphics::{
        Direct3D11::{
            D3D11_BOX, D3D11_CPU_ACCESS_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ,
            D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING, ID3D11Texture2D,
        },
        Dxgi::{
            Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
            IDXGIOutput1,
        },
    },
    System::StationsAndDesktops::{
        OpenInputDesktop, SetThreadDesktop, DESKTOP_ACCESS_FLAGS, DESKTOP_CONTROL_FLAGS,
        DF_ALLOWOTHERACCOUNTHOOK,
    },
};

use crate::{
    classify::{classify, Classification, ExpectedErrors, Verdict},
    output::OutputDescriptor,
    pointer::PointerReport,
    rect::{Point, Rect},
    signals::{ErrorSignal, PipelineSignals},
    status::Status,
    surface::{with_surface_lock, MutexKey},
};

use super::{
    directx::DirectX,
    duplication::{AcquiredFrame, DuplicationSource},
    surface::{GuardedCaptureState, OpenedSurface, StagedUpdate},
    LabelledWinResult, SendHANDLE, WinError,
};

/// How long one frame poll blocks before re-checking the run state.
const ACQUIRE_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// The bounded wait for the shared surface. A timeout parks the acquired
/// frame and retries after re-checking termination, so a stalled arbitration
/// routine can never deadlock shutdown.
const SURFACE_WAIT: Duration = Duration::from_secs(1);

/// Everything a capture worker needs, captured at spawn time.
pub struct WorkerContext {
    /// The captured output.
    pub output: OutputDescriptor,
    /// Top-left of the combined capture region in desktop coordinates.
    pub surface_origin: Point,
    /// Shared run/error signalling.
    pub signals: Arc<PipelineSignals>,
    /// Shared dirty/pointer state.
    pub state: Arc<GuardedCaptureState>,
    /// The shared surface's handle.
    pub shared_handle: SendHANDLE,
    /// Whether the output sits on the surface's own adapter.
    pub same_adapter: bool,
    /// The device set on the output's adapter.
    pub directx: Arc<DirectX>,
    /// The output to duplicate.
    pub dxgi_output: IDXGIOutput1,
}

/// Handle to a running capture worker. Joins on drop; the owner signals
/// termination first.
pub struct CaptureWorker {
    index: usize,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Spawn the worker thread for `context.output`.
    pub fn spawn(context: WorkerContext) -> std::io::Result<Self> {
        let index = context.output.index;

        let thread = thread::Builder::new()
            .name(format!("Capture Worker {index}"))
            .spawn(move || {
                let _span = info_span!("[Capture Worker]", output = index).entered();
                run_worker(context);
            })?;

        Ok(Self {
            index,
            thread: Some(thread),
        })
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Joining capture worker {} returned an error", self.index);
            }
        }
    }
}

/// How a committed frame left the loop iteration.
enum Commit {
    /// The frame was written into the surface.
    Written { notify: bool },
    /// The surface was busy; the frame stays acquired and is retried.
    SurfaceBusy,
}

fn run_worker(context: WorkerContext) {
    // Secure-desktop transitions revoke input-desktop access; the attach is
    // retried on the rebuilt pipeline once the transition settles.
    if let Err(error) = attach_to_input_desktop() {
        report_failure(
            &context.signals,
            Classification {
                verdict: Verdict::Expected,
                status: error.status(),
            },
            &error,
        );
        return;
    }

    let mut source = match DuplicationSource::new(&context.dxgi_output, &context.directx.device) {
        Ok(source) => source,
        Err(error) => {
            report_failure(
                &context.signals,
                classify(
                    Some(context.directx.removed_reason()),
                    error.status(),
                    ExpectedErrors::CreateDuplication,
                ),
                &error,
            );
            return;
        }
    };

    // Setup failures share the duplication table: a session switch surfaces
    // as ACCESS_DENIED here and must unwind for retry, not terminate.
    let mut writer = if context.same_adapter {
        match OpenedSurface::open(&context.directx.device, context.shared_handle) {
            Ok(surface) => SurfaceWriter::Direct(surface),
            Err(error) => {
                report_failure(
                    &context.signals,
                    classify(
                        Some(context.directx.removed_reason()),
                        error.status(),
                        ExpectedErrors::CreateDuplication,
                    ),
                    &error,
                );
                return;
            }
        }
    } else {
        debug!(
            "Output {} is on adapter {}, staging through CPU memory",
            context.output.index, context.output.adapter_index
        );
        SurfaceWriter::Staged { staging: None }
    };

    let mut pending: Option<AcquiredFrame> = None;

    loop {
        if context.signals.should_terminate() {
            break;
        }
        if !context.signals.wait_while_paused() {
            break;
        }

        let frame = match pending.take() {
            Some(frame) => frame,
            None => match source.acquire_frame(ACQUIRE_FRAME_TIMEOUT) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(error) => {
                    report_failure(
                        &context.signals,
                        classify(
                            Some(context.directx.removed_reason()),
                            error.status(),
                            ExpectedErrors::FrameInfo,
                        ),
                        &error,
                    );
                    break;
                }
            },
        };

        match commit_frame(&context, &mut source, &mut writer, &frame) {
            Ok(Commit::Written { notify }) => {
                if let Err(error) = source.release_frame() {
                    report_failure(
                        &context.signals,
                        classify(
                            Some(context.directx.removed_reason()),
                            error.status(),
                            ExpectedErrors::SystemTransitions,
                        ),
                        &error,
                    );
                    break;
                }

                if notify {
                    context.signals.notify_new_frame();
                }
            }
            Ok(Commit::SurfaceBusy) => {
                pending = Some(frame);
            }
            Err(classification) => {
                signal_verdict(&context.signals, classification);
                break;
            }
        }
    }
}

enum SurfaceWriter {
    /// Same-adapter writes through an opened view of the shared surface.
    Direct(OpenedSurface),
    /// Cross-adapter writes staged through CPU memory.
    Staged {
        staging: Option<ID3D11Texture2D>,
    },
}

fn commit_frame(
    context: &WorkerContext,
    source: &mut DuplicationSource,
    writer: &mut SurfaceWriter,
    frame: &AcquiredFrame,
) -> Result<Commit, Classification> {
    let frame_info = |error: &WinError| {
        classify(
            Some(context.directx.removed_reason()),
            error.status(),
            ExpectedErrors::FrameInfo,
        )
    };

    // Frame metadata is read before touching the surface, so the lock is only
    // held for the blits themselves.
    let mut rects: Vec<Rect> = Vec::new();
    {
        let dirty = source
            .dirty_rects(&frame.info)
            .map_err(|e| log_and(frame_info, e))?;
        rects.extend(dirty.iter().map(|rect| Rect::from(*rect)));
    }
    {
        let moves = source
            .move_rects(&frame.info)
            .map_err(|e| log_and(frame_info, e))?;
        // The acquired frame already contains the moved content, so the
        // destination rect is blitted from the frame like a dirty rect.
        rects.extend(moves.iter().map(|m| Rect::from(m.DestinationRect)));
    }
    let pointer = source
        .pointer_report(&frame.info)
        .map_err(|e| log_and(frame_info, e))?;

    if rects.is_empty() && pointer.update_time == 0 {
        return Ok(Commit::Written { notify: false });
    }

    let origin = context.output.rect.top_left();
    let offset = Point::new(
        origin.x - context.surface_origin.x,
        origin.y - context.surface_origin.y,
    );

    match writer {
        SurfaceWriter::Direct(surface) => {
            let transitions = |status: Status| {
                classify(
                    Some(context.directx.removed_reason()),
                    status,
                    ExpectedErrors::SystemTransitions,
                )
            };

            let locked = with_surface_lock(
                surface,
                MutexKey::Capture,
                MutexKey::Publish,
                SURFACE_WAIT,
                || {
                    blit_rects(context, surface, frame, &rects, offset);
                    record_metadata(context, &rects, offset, pointer);
                    Ok(())
                },
            )
            .map_err(transitions)?;

            match locked {
                Some(()) => Ok(Commit::Written { notify: true }),
                None => Ok(Commit::SurfaceBusy),
            }
        }
        SurfaceWriter::Staged { staging } => {
            stage_rects(context, staging, frame, &rects, offset)
                .map_err(|e| log_and(frame_info, e))?;
            record_metadata(context, &rects, offset, pointer);
            Ok(Commit::Written { notify: true })
        }
    }
}

/// Blit every changed rect from the acquired frame into the shared surface.
/// Caller holds the keyed mutex.
fn blit_rects(
    context: &WorkerContext,
    surface: &OpenedSurface,
    frame: &AcquiredFrame,
    rects: &[Rect],
    offset: Point,
) {
    let gpu = &context.directx.context;

    for rect in rects {
        let src_box = D3D11_BOX {
            left: rect.left.max(0) as u32,
            top: rect.top.max(0) as u32,
            front: 0,
            right: rect.right.max(0) as u32,
            bottom: rect.bottom.max(0) as u32,
            back: 1,
        };

        unsafe {
            gpu.CopySubresourceRegion(
                surface.texture(),
                0,
                (rect.left + offset.x).max(0) as u32,
                (rect.top + offset.y).max(0) as u32,
                0,
                &frame.texture,
                0,
                Some(&src_box),
            );
        }
    }
}

/// Fold this frame's invalidations and pointer report into the shared state.
fn record_metadata(
    context: &WorkerContext,
    rects: &[Rect],
    offset: Point,
    pointer: PointerReport,
) {
    let mut state = context.state.lock();
    for rect in rects {
        state.dirty.add(rect.translated(offset));
    }
    state.pointer.apply_report(
        context.output.index,
        pointer,
        context.output.rect.top_left(),
        context.surface_origin,
    );
}

/// Read the changed rows back through a staging texture and park them for the
/// arbitration routine.
fn stage_rects(
    context: &WorkerContext,
    staging: &mut Option<ID3D11Texture2D>,
    frame: &AcquiredFrame,
    rects: &[Rect],
    offset: Point,
) -> LabelledWinResult<()> {
    if rects.is_empty() {
        return Ok(());
    }

    let [width, height] = context.output.size();
    if staging.is_none() {
        *staging = Some(create_staging_texture(context, width, height)?);
    }
    let Some(staging) = staging.as_ref() else {
        return Ok(());
    };

    let gpu = &context.directx.context;
    unsafe { gpu.CopyResource(&*staging, &frame.texture) };

    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    unsafe { gpu.Map(&*staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
        .map_err(|e| WinError::new(e, "ID3D11DeviceContext::Map"))?;

    let mut updates = Vec::with_capacity(rects.len());
    for rect in rects {
        let clipped = match rect.intersect(&Rect::new(0, 0, width as i32, height as i32)) {
            Some(clipped) => clipped,
            None => continue,
        };

        let row_bytes = clipped.width() as usize * 4;
        let mut data = vec![0u8; row_bytes * clipped.height() as usize];
        for row in 0..clipped.height() as usize {
            let src_offset = (clipped.top as usize + row) * mapped.RowPitch as usize
                + clipped.left as usize * 4;
            let src = unsafe {
                core::slice::from_raw_parts(mapped.pData.cast::<u8>().add(src_offset), row_bytes)
            };
            data[row * row_bytes..(row + 1) * row_bytes].copy_from_slice(src);
        }

        updates.push(StagedUpdate {
            rect: clipped.translated(offset),
            pitch: row_bytes as u32,
            data,
        });
    }

    unsafe { gpu.Unmap(&*staging, 0) };

    context.state.lock().staged.extend(updates);

    Ok(())
}

fn create_staging_texture(
    context: &WorkerContext,
    width: u32,
    height: u32,
) -> LabelledWinResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: 0,
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: 0,
    };

    let mut texture = None;
    unsafe {
        context
            .directx
            .device
            .CreateTexture2D(&desc, None, Some(&mut texture))
    }
    .map_err(|e| WinError::new(e, "ID3D11Device::CreateTexture2D"))?;

    Ok(texture.expect("created texture was none"))
}

fn log_and(
    classifier: impl Fn(&WinError) -> Classification,
    error: WinError,
) -> Classification {
    let classification = classifier(&error);
    if classification.is_expected() {
        info!("Expected failure, unwinding for retry: {error}");
    }
    classification
}

fn report_failure(signals: &PipelineSignals, classification: Classification, error: &WinError) {
    if classification.is_expected() {
        info!("Expected failure, unwinding for retry: {error}");
    }
    signal_verdict(signals, classification);
}

fn signal_verdict(signals: &PipelineSignals, classification: Classification) {
    let signal = if classification.is_expected() {
        ErrorSignal::Expected
    } else {
        ErrorSignal::Unexpected
    };
    signals.signal_error(signal);
}

/// Attach this thread to the current input desktop so duplication keeps
/// working across secure-desktop transitions.
fn attach_to_input_desktop() -> LabelledWinResult<()> {
    let desktop = unsafe {
        OpenInputDesktop(
            DESKTOP_CONTROL_FLAGS(DF_ALLOWOTHERACCOUNTHOOK),
            true,
            DESKTOP_ACCESS_FLAGS(GENERIC_READ.0),
        )
    }
    .map_err(|e| WinError::new(e, "OpenInputDesktop"))?;

    unsafe { SetThreadDesktop(desktop) }.map_err(|e| WinError::new(e, "SetThreadDesktop"))?;

    Ok(())
}
