//! The GPU half of the frame arbitration routine.
//!
//! One thread runs [`FrameArbitrator::run`]: it waits for committed frames,
//! drains the shared surface under the keyed mutex, asks the pure
//! [`Arbitrator`] what to do, and executes the resulting copies on the
//! presentation device.

use core::time::Duration;
use std::{sync::Arc, time::Instant};

use tracing::{info, info_span, warn};
use utilities::FrameRateTracker;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};

use crate::{
    classify::{classify, ExpectedErrors},
    consumer::{ConsumerQuery, ConsumerRegion},
    limiter::{UpdateLimitMode, UpdateLimiter},
    plan::{Arbitrator, PlanInputs, PublishPlan, UpdatePlan},
    pointer::PointerState,
    rect::{Point, Rect},
    signals::{ErrorSignal, PipelineSignals},
    status::Status,
    surface::{with_surface_lock, MutexKey},
};

use super::{
    directx,
    surface::{GuardedCaptureState, SharedSurface, StagedUpdate},
    LabelledWinResult,
};

/// The externally-owned destination texture.
///
/// The pipeline publishes into this texture and knows nothing else about
/// presentation. Only the arbitration thread calls through this trait, so the
/// context handed out here is never used concurrently by the pipeline.
pub trait PresentationTexture: Send {
    /// The device the texture lives on. The shared surface is created on this
    /// device so publishes are same-device copies.
    fn device(&self) -> &ID3D11Device;

    /// Called once per pipeline generation, before any publish, with the new
    /// surface rectangle. The texture must match that size afterwards.
    fn prepare(&mut self, rect: Rect) -> LabelledWinResult<()>;

    /// The device's immediate context.
    fn context(&self) -> &ID3D11DeviceContext;

    /// The destination texture. Must match the capture region's size.
    fn texture(&self) -> &ID3D11Texture2D;

    /// Composite the pointer over the just-published region.
    fn draw_pointer(&mut self, pointer: &PointerState) -> LabelledWinResult<()>;

    /// Called after the copies for one publish completed. `dirty` is in
    /// surface coordinates.
    fn frame_published(&mut self, dirty: Rect);
}

/// Tuning handed down from the supervisor.
pub struct ArbitrationConfig {
    /// The global update-rate limit.
    pub update_limit: UpdateLimitMode,
    /// The longest the routine blocks waiting for a frame or the surface.
    pub max_refresh_delay: Duration,
    /// Top-left of the capture region in desktop coordinates, for translating
    /// consumer crops into surface space.
    pub desktop_origin: Point,
}

/// The frame arbitration routine for one pipeline generation.
pub struct FrameArbitrator {
    presentation: Box<dyn PresentationTexture>,
    consumers: Box<dyn ConsumerQuery + Send>,
    surface: SharedSurface,
    state: Arc<GuardedCaptureState>,
    signals: Arc<PipelineSignals>,
    config: ArbitrationConfig,

    arbitrator: Arbitrator,
    limiter: UpdateLimiter,
    last_publish: Instant,
    published_pointer_time: u64,
    published_shape_serial: u64,
    last_pointer_bounds: Option<Rect>,
    publish_rate: FrameRateTracker,
}

impl FrameArbitrator {
    /// Create the routine around an already-created shared surface.
    pub fn new(
        presentation: Box<dyn PresentationTexture>,
        consumers: Box<dyn ConsumerQuery + Send>,
        surface: SharedSurface,
        state: Arc<GuardedCaptureState>,
        signals: Arc<PipelineSignals>,
        config: ArbitrationConfig,
    ) -> Self {
        Self {
            presentation,
            consumers,
            surface,
            state,
            signals,
            config,
            arbitrator: Arbitrator::new(),
            limiter: UpdateLimiter::new(),
            last_publish: Instant::now(),
            published_pointer_time: 0,
            published_shape_serial: 0,
            last_pointer_bounds: None,
            publish_rate: FrameRateTracker::new("frame publishes", Duration::from_secs(10)),
        }
    }

    /// Give back the externally-owned parts for the next pipeline generation.
    pub fn into_parts(self) -> (Box<dyn PresentationTexture>, Box<dyn ConsumerQuery + Send>) {
        (self.presentation, self.consumers)
    }

    /// Run ticks until termination or a failure. Failures are classified and
    /// signalled; the supervisor decides what happens next.
    pub fn run(&mut self) {
        let _span = info_span!("[Frame Arbitration]").entered();

        loop {
            if self.signals.should_terminate() {
                break;
            }
            if !self.signals.wait_while_paused() {
                break;
            }

            let new_frame = self.signals.wait_new_frame(self.config.max_refresh_delay);
            if self.signals.should_terminate() {
                break;
            }

            if let Err(status) = self.tick(new_frame) {
                let classification = classify(
                    Some(directx::removed_reason(self.presentation.device())),
                    status,
                    ExpectedErrors::SystemTransitions,
                );

                let signal = if classification.is_expected() {
                    info!(
                        "Expected failure, unwinding for retry: {}",
                        classification.status
                    );
                    ErrorSignal::Expected
                } else {
                    ErrorSignal::Unexpected
                };
                self.signals.signal_error(signal);
                break;
            }
        }
    }

    fn tick(&mut self, new_frame: bool) -> Result<(), Status> {
        let consumers = self.consumers.visible_consumers();
        self.limiter.recompute(
            self.config.update_limit,
            consumers
                .iter()
                .filter(|consumer| consumer.sources_pipeline)
                .filter_map(|consumer| consumer.limit_override),
        );

        let now = Instant::now();
        let skip = self.limiter.should_skip(self.last_publish, now);

        if !self.arbitrator.needs_surface(new_frame, skip) {
            if skip {
                // Rate-limited with no new frame: fold whatever the workers
                // committed so far without touching the GPU.
                let dirty = core::mem::take(&mut self.state.lock().dirty);
                self.arbitrator.defer(&dirty);
            }
            return Ok(());
        }

        let origin = self.config.desktop_origin;
        let surface_consumers: Vec<ConsumerRegion> = consumers
            .iter()
            .map(|consumer| ConsumerRegion {
                crop: consumer.crop.translated(Point::new(-origin.x, -origin.y)),
                ..*consumer
            })
            .collect();

        let key = self.arbitrator.mutex_key(new_frame);
        let full_refresh = self.signals.take_full_refresh();
        let surface_rect = self.surface.rect();

        let surface = &self.surface;
        let state = &self.state;
        let arbitrator = &mut self.arbitrator;
        let presentation = &mut self.presentation;
        let published_pointer_time = &mut self.published_pointer_time;
        let published_shape_serial = &mut self.published_shape_serial;
        let last_pointer_bounds = &mut self.last_pointer_bounds;

        let outcome = with_surface_lock(
            surface,
            key,
            MutexKey::Capture,
            self.config.max_refresh_delay,
            || {
                let (dirty, staged, pointer, pointer_changed, new_bounds) = {
                    let mut guard = state.lock();
                    let new_bounds = guard.pointer.bounds();
                    let pointer_changed = guard.pointer.last_update_time
                        != *published_pointer_time
                        || guard.pointer.shape_serial != *published_shape_serial
                        || new_bounds != *last_pointer_bounds;

                    (
                        core::mem::take(&mut guard.dirty),
                        core::mem::take(&mut guard.staged),
                        guard.pointer.clone(),
                        pointer_changed,
                        new_bounds,
                    )
                };

                upload_staged(presentation.context(), surface.texture(), &staged);

                let inputs = PlanInputs {
                    new_frame,
                    skip,
                    dirty,
                    pointer_changed,
                    old_pointer_bounds: *last_pointer_bounds,
                    new_pointer_bounds: new_bounds,
                    full_refresh,
                    surface_rect,
                    consumers: &surface_consumers,
                };
                let plan = arbitrator.plan(&inputs);

                if let UpdatePlan::Publish(publish) = plan {
                    execute_publish(presentation.as_mut(), surface, publish, &pointer)?;
                    *published_pointer_time = pointer.last_update_time;
                    *published_shape_serial = pointer.shape_serial;
                    *last_pointer_bounds = new_bounds;
                }

                Ok(plan)
            },
        )?;

        match outcome {
            Some(UpdatePlan::Publish(publish)) => {
                // A pointer-only publish inside the limit window must not
                // restart the limit clock, or constant mouse movement would
                // starve content publishes.
                if !skip {
                    self.last_publish = now;
                }
                self.publish_rate.record(now);
                self.presentation.frame_published(publish.dirty);
            }
            Some(_) => {
                // A skipped tick consumed the flag without honouring it.
                if full_refresh {
                    self.signals.request_full_refresh();
                }
            }
            None => {
                // The surface was busy. Put the tick's triggers back so the
                // next tick retries instead of losing them.
                if new_frame {
                    self.signals.notify_new_frame();
                }
                if full_refresh {
                    self.signals.request_full_refresh();
                }
            }
        }

        Ok(())
    }
}

/// Upload cross-adapter staged rows into the shared surface. Caller holds the
/// keyed mutex.
fn upload_staged(context: &ID3D11DeviceContext, texture: &ID3D11Texture2D, staged: &[StagedUpdate]) {
    for update in staged {
        let rect = update.rect;
        if rect.is_empty() {
            continue;
        }

        let dst_box = D3D11_BOX {
            left: rect.left.max(0) as u32,
            top: rect.top.max(0) as u32,
            front: 0,
            right: rect.right.max(0) as u32,
            bottom: rect.bottom.max(0) as u32,
            back: 1,
        };

        unsafe {
            context.UpdateSubresource(
                texture,
                0,
                Some(&dst_box),
                update.data.as_ptr().cast(),
                update.pitch,
                0,
            );
        }
    }
}

fn execute_publish(
    presentation: &mut dyn PresentationTexture,
    surface: &SharedSurface,
    publish: PublishPlan,
    pointer: &PointerState,
) -> Result<(), Status> {
    {
        let context = presentation.context();

        if publish.full_copy {
            unsafe { context.CopyResource(presentation.texture(), surface.texture()) };
        } else {
            let dirty = publish.dirty;
            let src_box = D3D11_BOX {
                left: dirty.left.max(0) as u32,
                top: dirty.top.max(0) as u32,
                front: 0,
                right: dirty.right.max(0) as u32,
                bottom: dirty.bottom.max(0) as u32,
                back: 1,
            };

            unsafe {
                context.CopySubresourceRegion(
                    presentation.texture(),
                    0,
                    dirty.left.max(0) as u32,
                    dirty.top.max(0) as u32,
                    0,
                    surface.texture(),
                    0,
                    Some(&src_box),
                );
            }
        }
    }

    if publish.draw_pointer {
        presentation.draw_pointer(pointer).map_err(|error| {
            warn!("Pointer composition failed: {error}");
            error.status()
        })?;
    }

    Ok(())
}
