//! Pipeline lifecycle supervision.
//!
//! The supervisor owns the build/run/unwind cycle: it enumerates the current
//! topology, builds one pipeline generation (shared surface, capture workers,
//! frame arbitration thread), then sleeps until a failure or termination is
//! signalled. Expected failures unwind the whole generation and rebuild it
//! after a progressive backoff; unexpected failures terminate the run.

use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, info_span, warn};
use windows::Win32::Graphics::{Direct3D11::ID3D11Device, Dxgi::IDXGIAdapter1};

use crate::{
    backoff::TransitionBackoff,
    classify::{classify, ExpectedErrors},
    consumer::{ConsumerQuery, TopologyProvider},
    limiter::UpdateLimitMode,
    output::CaptureRegionMode,
    rect::{Point, Rect},
    signals::{ErrorSignal, PipelineSignals, SupervisorWake},
    status::Status,
};

use super::{
    arbitration::{ArbitrationConfig, FrameArbitrator, PresentationTexture},
    directx::DirectX,
    enumerate::DxgiTopologyProvider,
    surface::{GuardedCaptureState, SharedSurface},
    worker::{CaptureWorker, WorkerContext},
    WinError,
};

/// Tuning for a supervised pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Which part of the desktop to capture.
    pub region_mode: CaptureRegionMode,
    /// The global update-rate limit.
    pub update_limit: UpdateLimitMode,
    /// The longest the arbitration routine blocks waiting for a frame.
    pub max_refresh_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region_mode: CaptureRegionMode::default(),
            update_limit: UpdateLimitMode::default(),
            max_refresh_delay: Duration::from_millis(500),
        }
    }
}

/// Everything the caller hands over to run a pipeline.
pub struct PipelineContext {
    /// The destination texture and its device.
    pub presentation: Box<dyn PresentationTexture>,
    /// The visible-consumer query.
    pub consumers: Box<dyn ConsumerQuery + Send>,
    /// Tuning.
    pub config: PipelineConfig,
}

/// A fatal supervision failure. Expected failures never surface here; they
/// are retried internally.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Output enumeration failed with an unexpected status.
    #[error("output enumeration failed: {0}")]
    Enumerate(Status),

    /// A GPU resource could not be created.
    #[error("GPU setup failed: {0}")]
    Gpu(#[from] WinError),

    /// A pipeline thread could not be spawned.
    #[error("failed to spawn a pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A worker or the arbitration routine hit an unrecoverable failure.
    #[error("the pipeline reported an unrecoverable failure")]
    Unexpected,

    /// The arbitration thread panicked, losing the presentation texture.
    #[error("the frame arbitration thread panicked")]
    ArbitrationPanic,
}

#[derive(Default)]
struct HandleShared {
    stop: AtomicBool,
    paused: AtomicBool,
    signals: Mutex<Option<Arc<PipelineSignals>>>,
}

/// Remote control for a running [`PipelineSupervisor`].
///
/// The handle outlives individual pipeline generations; pause and stop state
/// is re-applied to every freshly built generation.
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<HandleShared>,
}

impl SupervisorHandle {
    /// Stop the supervisor. [`PipelineSupervisor::run`] returns once the
    /// current generation has unwound.
    pub fn terminate(&self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(signals) = self.shared.signals.lock().as_ref() {
            signals.terminate();
        }
    }

    /// Pause capture until [`SupervisorHandle::resume`]. Survives rebuilds.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        if let Some(signals) = self.shared.signals.lock().as_ref() {
            signals.pause();
        }
    }

    /// Resume paused capture.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        if let Some(signals) = self.shared.signals.lock().as_ref() {
            signals.resume();
        }
    }

    /// Ask the current generation to republish the entire surface.
    pub fn request_full_refresh(&self) {
        if let Some(signals) = self.shared.signals.lock().as_ref() {
            signals.request_full_refresh();
            signals.notify_new_frame();
        }
    }
}

/// One generation's capture-side pieces, built before the arbitration thread
/// takes ownership of the surface.
struct CaptureSet {
    signals: Arc<PipelineSignals>,
    state: Arc<GuardedCaptureState>,
    surface: SharedSurface,
    workers: Vec<CaptureWorker>,
    desktop_origin: Point,
}

/// Builds and rebuilds pipeline generations until stopped.
pub struct PipelineSupervisor {
    provider: DxgiTopologyProvider,
    context: PipelineContext,
    shared: Arc<HandleShared>,
}

impl PipelineSupervisor {
    /// Create a supervisor and its control handle.
    pub fn new(context: PipelineContext) -> Result<(Self, SupervisorHandle), SupervisorError> {
        let provider = DxgiTopologyProvider::new(context.config.region_mode)?;
        let shared = Arc::new(HandleShared::default());
        let handle = SupervisorHandle {
            shared: Arc::clone(&shared),
        };

        Ok((
            Self {
                provider,
                context,
                shared,
            },
            handle,
        ))
    }

    /// Run the pipeline until the handle terminates it or an unexpected
    /// failure occurs. Blocks the calling thread for the whole run.
    pub fn run(self) -> Result<(), SupervisorError> {
        let _span = info_span!("[Pipeline Supervisor]").entered();

        let Self {
            mut provider,
            context,
            shared,
        } = self;
        let PipelineContext {
            mut presentation,
            mut consumers,
            config,
        } = context;

        let mut backoff = TransitionBackoff::new();

        loop {
            if shared.stop.load(Ordering::Acquire) {
                return Ok(());
            }

            let capture = match build_capture(&mut provider, presentation.device()) {
                Ok(capture) => capture,
                Err(error) => {
                    if build_failure_is_expected(&error) {
                        warn!("Pipeline build failed, retrying: {error}");
                        backoff.wait();
                        continue;
                    }
                    return Err(error);
                }
            };

            if let Err(error) = presentation.prepare(capture.surface.rect()) {
                capture.signals.terminate();
                drop(capture);

                if classify(None, error.status(), ExpectedErrors::SystemTransitions).is_expected()
                {
                    warn!("Presentation texture rebuild failed, retrying: {error}");
                    backoff.wait();
                    continue;
                }
                return Err(SupervisorError::Gpu(error));
            }

            info!(
                "Pipeline generation up with {} capture worker(s)",
                capture.workers.len()
            );

            let mut arbitrator = FrameArbitrator::new(
                presentation,
                consumers,
                capture.surface,
                Arc::clone(&capture.state),
                Arc::clone(&capture.signals),
                ArbitrationConfig {
                    update_limit: config.update_limit,
                    max_refresh_delay: config.max_refresh_delay,
                    desktop_origin: capture.desktop_origin,
                },
            );

            let arbitration: JoinHandle<_> = match thread::Builder::new()
                .name("Frame Arbitration".to_string())
                .spawn(move || {
                    arbitrator.run();
                    arbitrator.into_parts()
                }) {
                Ok(handle) => handle,
                Err(error) => {
                    // The workers must be woken before their Drop joins them.
                    capture.signals.terminate();
                    return Err(SupervisorError::Spawn(error));
                }
            };

            *shared.signals.lock() = Some(Arc::clone(&capture.signals));
            if shared.paused.load(Ordering::Acquire) {
                capture.signals.pause();
            }
            if shared.stop.load(Ordering::Acquire) {
                capture.signals.terminate();
            }

            let wake = capture.signals.wait_failure();

            capture.signals.terminate();
            *shared.signals.lock() = None;
            drop(capture.workers);
            let parts = arbitration
                .join()
                .map_err(|_| SupervisorError::ArbitrationPanic)?;
            presentation = parts.0;
            consumers = parts.1;

            match wake {
                SupervisorWake::Terminated => return Ok(()),
                SupervisorWake::Error(ErrorSignal::Expected) => {
                    info!("Rebuilding the pipeline after an expected failure");
                    backoff.wait();
                }
                SupervisorWake::Error(ErrorSignal::Unexpected) => {
                    return Err(SupervisorError::Unexpected);
                }
            }
        }
    }
}

fn build_failure_is_expected(error: &SupervisorError) -> bool {
    match error {
        SupervisorError::Enumerate(status) => {
            classify(None, *status, ExpectedErrors::EnumOutputs).is_expected()
        }
        SupervisorError::Gpu(gpu) => {
            classify(None, gpu.status(), ExpectedErrors::SystemTransitions).is_expected()
        }
        _ => false,
    }
}

/// Enumerate the topology and build the capture side of one generation: the
/// shared surface on the presentation device and one worker per output.
fn build_capture(
    provider: &mut DxgiTopologyProvider,
    presentation_device: &ID3D11Device,
) -> Result<CaptureSet, SupervisorError> {
    let mut topology = provider
        .enumerate()
        .map_err(SupervisorError::Enumerate)?;

    // Workers on the presentation adapter blit directly into the shared
    // surface; everyone else stages through CPU memory. `None` means no
    // captured output shares the presentation adapter at all.
    topology.presentation_adapter = provider
        .adapter_index_of(presentation_device)?
        .unwrap_or(usize::MAX);

    let desktop = topology.desktop_rect;
    let desktop_origin = desktop.top_left();
    let surface_rect = Rect::new(0, 0, desktop.width() as i32, desktop.height() as i32);

    let signals = Arc::new(PipelineSignals::new());
    let state = Arc::new(GuardedCaptureState::new());
    let surface = SharedSurface::new(presentation_device, surface_rect)?;

    // All fallible GPU work happens before the first worker spawns, so an
    // error here never strands a running worker behind an unterminated
    // signal block.
    let mut adapters: BTreeMap<usize, (IDXGIAdapter1, Arc<DirectX>)> = BTreeMap::new();
    let mut contexts = Vec::with_capacity(topology.outputs.len());

    for output in &topology.outputs {
        let (adapter, directx) = match adapters.get(&output.adapter_index) {
            Some((adapter, directx)) => (adapter.clone(), Arc::clone(directx)),
            None => {
                let adapter = provider.adapter(output.adapter_index)?;
                let directx = Arc::new(DirectX::on_adapter(adapter.clone())?);
                adapters.insert(output.adapter_index, (adapter.clone(), Arc::clone(&directx)));
                (adapter, directx)
            }
        };

        let dxgi_output = provider.open_output(&adapter, output.adapter_slot)?;

        contexts.push(WorkerContext {
            output: *output,
            surface_origin: desktop_origin,
            signals: Arc::clone(&signals),
            state: Arc::clone(&state),
            shared_handle: surface.shared_handle(),
            same_adapter: output.adapter_index == topology.presentation_adapter,
            directx,
            dxgi_output,
        });
    }

    let mut workers = Vec::with_capacity(contexts.len());
    for context in contexts {
        match CaptureWorker::spawn(context) {
            Ok(worker) => workers.push(worker),
            Err(error) => {
                signals.terminate();
                return Err(SupervisorError::Spawn(error));
            }
        }
    }

    Ok(CaptureSet {
        signals,
        state,
        surface,
        workers,
        desktop_origin,
    })
}
