//! Boundary contracts with the externally-owned presentation state.

use core::time::Duration;

use crate::{output::OutputDescriptor, rect::Rect, status::Status};

/// One visible consumer's view of the captured desktop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumerRegion {
    /// The consumer's crop rectangle in desktop-global coordinates.
    pub crop: Rect,
    /// Whether the consumer's capture source is this pipeline. Consumers fed
    /// by another source contribute neither clipping nor rate overrides.
    pub sources_pipeline: bool,
    /// The consumer's update-rate override, if any.
    pub limit_override: Option<Duration>,
}

/// Read-only query against externally-owned overlay state.
///
/// The arbitration routine calls this once per tick to learn which desktop
/// regions are actually visible to someone.
pub trait ConsumerQuery {
    /// Every currently visible consumer.
    fn visible_consumers(&self) -> Vec<ConsumerRegion>;
}

/// The result of walking GPU adapters and outputs.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Every captured output, in stable enumeration order.
    pub outputs: Vec<OutputDescriptor>,
    /// The union of the captured outputs' rectangles.
    pub desktop_rect: Rect,
    /// The adapter the presentation device lives on, used to decide whether
    /// publishes need the cross-adapter staging path.
    pub presentation_adapter: usize,
}

/// Walks adapters/outputs and builds [`OutputDescriptor`]s.
///
/// Enumeration is re-run from scratch whenever the pipeline rebuilds after a
/// display-change event; descriptors are replaced wholesale, never patched.
pub trait TopologyProvider {
    /// Enumerate the current topology.
    fn enumerate(&mut self) -> Result<Topology, Status>;
}
