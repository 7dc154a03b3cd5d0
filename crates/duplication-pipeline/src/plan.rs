//! The decision half of the frame arbitration routine.
//!
//! Everything that decides *what* to publish is here and host-independent;
//! the GPU copies that execute a [`PublishPlan`] live in the platform module.
//! The split keeps skip/defer/clip behaviour testable without a device.

use crate::{
    consumer::ConsumerRegion,
    rect::{DirtyRegion, Rect},
    surface::MutexKey,
};

/// Per-tick inputs to [`Arbitrator::plan`].
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    /// Whether a worker committed a new frame since the last tick.
    pub new_frame: bool,
    /// Whether the rate limiter marked this tick as skipped.
    pub skip: bool,
    /// Dirty region drained from the guarded capture state this tick.
    pub dirty: DirtyRegion,
    /// Whether the pointer changed position, shape or visibility since the
    /// last accepted publish. An unchanged pointer never forces a redraw.
    pub pointer_changed: bool,
    /// The drawn pointer's bounds at the last accepted publish.
    pub old_pointer_bounds: Option<Rect>,
    /// The pointer's current bounds, `None` while invisible.
    pub new_pointer_bounds: Option<Rect>,
    /// Whether an explicit full refresh was requested, e.g. after a
    /// resolution change.
    pub full_refresh: bool,
    /// The shared surface's rectangle.
    pub surface_rect: Rect,
    /// Every currently visible consumer.
    pub consumers: &'a [ConsumerRegion],
}

/// A publish decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPlan {
    /// The region to copy from the shared surface.
    pub dirty: Rect,
    /// Whether to hand off the full texture instead of blitting the
    /// sub-rectangle.
    pub full_copy: bool,
    /// Whether the pointer image must be composited over the dirty region.
    pub draw_pointer: bool,
}

/// The outcome of one arbitration tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePlan {
    /// Nothing to do.
    Idle,
    /// The tick's invalidations were deferred (rate-limit skip, or nothing
    /// visible overlapped them).
    Deferred,
    /// Copy the dirty region to the presentation texture.
    Publish(PublishPlan),
}

/// Carries the arbitration state that survives between ticks: the deferred
/// dirty accumulator, the parked-skipped-frame flag and the owed cursor
/// redraw.
#[derive(Debug, Default)]
pub struct Arbitrator {
    deferred: DirtyRegion,
    skip_pending: bool,
    cursor_redraw_owed: bool,
}

impl Arbitrator {
    /// Create an arbitrator with no pending state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this tick needs the shared surface at all.
    ///
    /// A skipped tick without a new frame defers on the CPU side only; a tick
    /// with neither new content nor parked state is a no-op.
    pub fn needs_surface(&self, new_frame: bool, skip: bool) -> bool {
        if skip {
            return new_frame;
        }
        new_frame || self.skip_pending || !self.deferred.is_empty() || self.cursor_redraw_owed
    }

    /// The key to acquire the surface with this tick.
    ///
    /// Draining parked state without a genuinely new frame re-acquires with
    /// the capture key, taking back the arbitration routine's own prior
    /// release instead of waiting for a worker hand-off.
    pub fn mutex_key(&self, new_frame: bool) -> MutexKey {
        if !new_frame && self.skip_pending {
            MutexKey::Capture
        } else {
            MutexKey::Publish
        }
    }

    /// Fold a dirty region into the deferred accumulator without touching the
    /// surface. Used for the skip-with-no-new-frame path.
    pub fn defer(&mut self, dirty: &DirtyRegion) {
        self.deferred.merge(dirty);
        if !self.deferred.is_empty() {
            self.skip_pending = true;
        }
    }

    /// Decide what this tick publishes. Called while the surface lock is
    /// held, after the guarded dirty state has been drained into
    /// `inputs.dirty`.
    pub fn plan(&mut self, inputs: &PlanInputs<'_>) -> UpdatePlan {
        if inputs.skip {
            self.deferred.merge(&inputs.dirty);
            if inputs.new_frame || !self.deferred.is_empty() {
                self.skip_pending = true;
            }

            // The rate limit only holds back redraws. A tick whose sole
            // change is the pointer publishes its old and new bounds right
            // away; deferred content stays parked for the accepting tick.
            if inputs.pointer_changed && inputs.dirty.is_empty() && !inputs.full_refresh {
                let mut bounds = DirtyRegion::new();
                if let Some(rect) = inputs.old_pointer_bounds {
                    bounds.add(rect);
                }
                if let Some(rect) = inputs.new_pointer_bounds {
                    bounds.add(rect);
                }

                if let Some(dirty) = bounds.bounds() {
                    self.cursor_redraw_owed = false;
                    return UpdatePlan::Publish(PublishPlan {
                        dirty,
                        full_copy: false,
                        draw_pointer: inputs.new_pointer_bounds.is_some(),
                    });
                }
            }

            return UpdatePlan::Deferred;
        }

        let mut dirty = inputs.dirty;
        dirty.merge(&self.deferred);

        if inputs.pointer_changed || self.cursor_redraw_owed {
            if let Some(bounds) = inputs.old_pointer_bounds {
                dirty.add(bounds);
            }
            if let Some(bounds) = inputs.new_pointer_bounds {
                dirty.add(bounds);
            }
        }

        let dirty_rect = if inputs.full_refresh {
            inputs.surface_rect
        } else {
            let Some(bounds) = dirty.bounds() else {
                self.skip_pending = false;
                return UpdatePlan::Idle;
            };

            let mut clip = DirtyRegion::new();
            for consumer in inputs.consumers {
                if !consumer.sources_pipeline {
                    continue;
                }
                if let Some(overlap) = consumer.crop.intersect(&bounds) {
                    clip.add(overlap);
                }
            }

            // Nothing visible overlaps the invalidation. Keep it; a consumer
            // may scroll or appear over this region before the next frame.
            if clip.is_empty() {
                self.deferred = dirty;
                self.skip_pending = false;
                return UpdatePlan::Deferred;
            }

            bounds
        };

        let draw_pointer = match inputs.new_pointer_bounds {
            Some(bounds) => bounds.intersect(&dirty_rect).is_some(),
            None => false,
        };
        self.cursor_redraw_owed = inputs.new_pointer_bounds.is_some() && !draw_pointer;

        self.deferred = DirtyRegion::new();
        self.skip_pending = false;

        UpdatePlan::Publish(PublishPlan {
            dirty: dirty_rect,
            full_copy: dirty_rect.contains(&inputs.surface_rect),
            draw_pointer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(crop: Rect) -> ConsumerRegion {
        ConsumerRegion {
            crop,
            sources_pipeline: true,
            limit_override: None,
        }
    }

    fn inputs<'a>(consumers: &'a [ConsumerRegion], surface: Rect) -> PlanInputs<'a> {
        PlanInputs {
            new_frame: true,
            skip: false,
            dirty: DirtyRegion::new(),
            pointer_changed: false,
            old_pointer_bounds: None,
            new_pointer_bounds: None,
            full_refresh: false,
            surface_rect: surface,
            consumers,
        }
    }

    const SURFACE: Rect = Rect::new(0, 0, 3840, 1080);

    #[test]
    fn partial_dirty_publishes_sub_rectangle() {
        // Two outputs side by side; the second one reports a small change.
        let consumers = [consumer(Rect::new(0, 0, 3840, 1080))];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.dirty.add(Rect::new(1920, 0, 2000, 100));

        let plan = arbitrator.plan(&tick);
        assert_eq!(
            plan,
            UpdatePlan::Publish(PublishPlan {
                dirty: Rect::new(1920, 0, 2000, 100),
                full_copy: false,
                draw_pointer: false,
            })
        );
    }

    #[test]
    fn skip_then_resume_conserves_dirty_union() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        let mut skipped = inputs(&consumers, SURFACE);
        skipped.skip = true;
        skipped.dirty.add(Rect::new(0, 0, 100, 100));
        assert_eq!(arbitrator.plan(&skipped), UpdatePlan::Deferred);

        let mut accepted = inputs(&consumers, SURFACE);
        accepted.dirty.add(Rect::new(200, 200, 300, 300));

        let UpdatePlan::Publish(publish) = arbitrator.plan(&accepted) else {
            panic!("accepted tick must publish");
        };
        assert_eq!(publish.dirty, Rect::new(0, 0, 300, 300));
    }

    #[test]
    fn pointer_move_bypasses_the_rate_limit() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        // Content deferred by the limiter earlier in the window.
        let mut skipped = inputs(&consumers, SURFACE);
        skipped.skip = true;
        skipped.dirty.add(Rect::new(0, 0, 100, 100));
        assert_eq!(arbitrator.plan(&skipped), UpdatePlan::Deferred);

        // The pointer moves inside the same window; only its bounds publish.
        let mut moved = inputs(&consumers, SURFACE);
        moved.skip = true;
        moved.pointer_changed = true;
        moved.old_pointer_bounds = Some(Rect::new(200, 200, 232, 232));
        moved.new_pointer_bounds = Some(Rect::new(500, 500, 532, 532));

        let UpdatePlan::Publish(publish) = arbitrator.plan(&moved) else {
            panic!("pointer move must not be rate limited");
        };
        assert_eq!(publish.dirty, Rect::new(200, 200, 532, 532));
        assert!(publish.draw_pointer);
        assert!(!publish.full_copy);

        // The parked content still drains once the limit elapses.
        let accepted = inputs(&consumers, SURFACE);
        let UpdatePlan::Publish(publish) = arbitrator.plan(&accepted) else {
            panic!("deferred content must drain");
        };
        assert_eq!(publish.dirty, Rect::new(0, 0, 100, 100));
    }

    #[test]
    fn skipped_frame_carrying_redraw_content_defers_wholesale() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        // A frame with both redraw content and a pointer change is not a
        // pointer-only update; the limiter holds all of it back.
        let mut tick = inputs(&consumers, SURFACE);
        tick.skip = true;
        tick.dirty.add(Rect::new(0, 0, 100, 100));
        tick.pointer_changed = true;
        tick.new_pointer_bounds = Some(Rect::new(500, 500, 532, 532));

        assert_eq!(arbitrator.plan(&tick), UpdatePlan::Deferred);
    }

    #[test]
    fn skip_without_new_frame_defers_without_surface() {
        let mut arbitrator = Arbitrator::new();
        assert!(!arbitrator.needs_surface(false, true));

        let mut dirty = DirtyRegion::new();
        dirty.add(Rect::new(5, 5, 10, 10));
        arbitrator.defer(&dirty);

        // The parked state is re-taken through the capture key once eligible.
        assert!(arbitrator.needs_surface(false, false));
        assert_eq!(arbitrator.mutex_key(false), MutexKey::Capture);
        assert_eq!(arbitrator.mutex_key(true), MutexKey::Publish);
    }

    #[test]
    fn full_refresh_forces_whole_surface() {
        let consumers = [consumer(Rect::new(0, 0, 10, 10))];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.full_refresh = true;

        let UpdatePlan::Publish(publish) = arbitrator.plan(&tick) else {
            panic!("full refresh must publish");
        };
        assert_eq!(publish.dirty, SURFACE);
        assert!(publish.full_copy);
    }

    #[test]
    fn dirty_outside_every_consumer_is_kept() {
        let consumers = [consumer(Rect::new(0, 0, 100, 100))];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.dirty.add(Rect::new(2000, 500, 2100, 600));
        assert_eq!(arbitrator.plan(&tick), UpdatePlan::Deferred);

        // Once a consumer covers the region, the kept invalidation drains.
        let wide = [consumer(SURFACE)];
        let mut next = inputs(&wide, SURFACE);
        next.new_frame = false;

        let UpdatePlan::Publish(publish) = arbitrator.plan(&next) else {
            panic!("kept invalidation must drain");
        };
        assert_eq!(publish.dirty, Rect::new(2000, 500, 2100, 600));
    }

    #[test]
    fn consumers_fed_by_other_sources_do_not_clip() {
        let consumers = [ConsumerRegion {
            crop: SURFACE,
            sources_pipeline: false,
            limit_override: None,
        }];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.dirty.add(Rect::new(0, 0, 50, 50));
        assert_eq!(arbitrator.plan(&tick), UpdatePlan::Deferred);
    }

    #[test]
    fn unchanged_pointer_does_not_force_redraw() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.new_pointer_bounds = Some(Rect::new(100, 100, 132, 132));
        tick.old_pointer_bounds = Some(Rect::new(100, 100, 132, 132));
        tick.pointer_changed = false;

        assert_eq!(arbitrator.plan(&tick), UpdatePlan::Idle);
    }

    #[test]
    fn moved_pointer_dirties_old_and_new_bounds() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.pointer_changed = true;
        tick.old_pointer_bounds = Some(Rect::new(0, 0, 32, 32));
        tick.new_pointer_bounds = Some(Rect::new(500, 500, 532, 532));

        let UpdatePlan::Publish(publish) = arbitrator.plan(&tick) else {
            panic!("pointer move must publish");
        };
        assert_eq!(publish.dirty, Rect::new(0, 0, 532, 532));
        assert!(publish.draw_pointer);
    }

    #[test]
    fn owed_cursor_redraw_is_remembered() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        // A publish whose dirty region misses the pointer leaves a redraw
        // owed.
        let mut tick = inputs(&consumers, SURFACE);
        tick.dirty.add(Rect::new(0, 0, 50, 50));
        tick.new_pointer_bounds = Some(Rect::new(1000, 1000, 1032, 1032));

        let UpdatePlan::Publish(publish) = arbitrator.plan(&tick) else {
            panic!("tick must publish");
        };
        assert!(!publish.draw_pointer);

        // The next tick expands the dirty region to cover the pointer even
        // though the pointer itself did not change.
        let mut next = inputs(&consumers, SURFACE);
        next.dirty.add(Rect::new(0, 0, 10, 10));
        next.new_pointer_bounds = Some(Rect::new(1000, 1000, 1032, 1032));

        let UpdatePlan::Publish(publish) = arbitrator.plan(&next) else {
            panic!("tick must publish");
        };
        assert!(publish.draw_pointer);
        assert_eq!(publish.dirty, Rect::new(0, 0, 1032, 1032));
    }

    #[test]
    fn full_surface_dirty_uses_full_copy() {
        let consumers = [consumer(SURFACE)];
        let mut arbitrator = Arbitrator::new();

        let mut tick = inputs(&consumers, SURFACE);
        tick.dirty.add(SURFACE);

        let UpdatePlan::Publish(publish) = arbitrator.plan(&tick) else {
            panic!("tick must publish");
        };
        assert!(publish.full_copy);
    }
}
