//! # duplication-pipeline
//!
//! Mirrors one or more physical displays (or the combined desktop) into a GPU
//! texture owned by an external presentation layer.
//!
//! One capture worker per captured output pulls frames from a desktop
//! duplication source and writes them into a shared, keyed-mutex guarded
//! surface. A frame arbitration routine drains that surface once per tick,
//! accumulates dirty regions, applies an update-rate limit, and republishes
//! only the changed area.
//!
//! The pipeline is built to survive constant, expected disruption: display
//! mode changes, GPU resets, session lock and unlock, and monitor hot-plug
//! all unwind the pipeline and rebuild it after a progressive backoff rather
//! than terminating it.

pub mod backoff;
pub mod classify;
pub mod consumer;
pub mod limiter;
pub mod output;
pub mod plan;
pub mod pointer;
pub mod rect;
pub mod signals;
pub mod status;
pub mod surface;

#[cfg(windows)]
pub mod platform;

pub use backoff::TransitionBackoff;
pub use classify::{classify, Classification, ExpectedErrors, Verdict};
pub use consumer::{ConsumerQuery, ConsumerRegion, Topology, TopologyProvider};
pub use limiter::{FpsLimit, UpdateLimitMode, UpdateLimiter};
pub use output::{CaptureRegionMode, OutputDescriptor};
pub use plan::{Arbitrator, PlanInputs, PublishPlan, UpdatePlan};
pub use pointer::{PointerReport, PointerShape, PointerShapeKind, PointerState};
pub use rect::{DirtyRegion, Point, Rect};
pub use signals::{ErrorSignal, PipelineSignals, RunState};
pub use status::Status;
pub use surface::{with_surface_lock, MutexKey, SurfaceMutex};

#[cfg(windows)]
pub use platform::windows::{
    arbitration::{ArbitrationConfig, FrameArbitrator, PresentationTexture},
    directx::DirectX,
    enumerate::DxgiTopologyProvider,
    supervisor::{
        PipelineConfig, PipelineContext, PipelineSupervisor, SupervisorError, SupervisorHandle,
    },
    LabelledWinResult, WinError,
};
