//! C9 — pluggable observers for flight/step boundaries.
//!
//! Mirrors the composite-injector pattern `chem-core` uses for composing
//! `ParamInjector`s (`injection/composite.rs`): an ordered `Vec` of trait
//! objects, invoked in registration order. A failing hook is logged and
//! does not stop the remaining hooks from running, nor does it affect the
//! flight's outcome (DESIGN.md Open Question #2).

use crate::context::StairwayContext;
use crate::model::FlightStatus;

pub trait FlightHook: Send + Sync {
    fn start_flight(&self, _ctx: &StairwayContext) -> Result<(), String> {
        Ok(())
    }

    fn end_flight(&self, _ctx: &StairwayContext) -> Result<(), String> {
        Ok(())
    }

    fn start_step(&self, _ctx: &StairwayContext) -> Result<(), String> {
        Ok(())
    }

    fn end_step(&self, _ctx: &StairwayContext) -> Result<(), String> {
        Ok(())
    }

    fn state_transition(&self, _ctx: &StairwayContext, _new_status: FlightStatus) -> Result<(), String> {
        Ok(())
    }
}

/// Composes an ordered list of hooks, applying all of them and logging (but
/// not propagating) any individual failure.
#[derive(Default)]
pub struct CompositeHook {
    hooks: Vec<Box<dyn FlightHook>>,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Box<dyn FlightHook>) {
        self.hooks.push(hook);
    }

    pub fn start_flight(&self, ctx: &StairwayContext) {
        for h in &self.hooks {
            if let Err(e) = h.start_flight(ctx) {
                log::warn!("startFlight hook failed for flight {}: {e}", ctx.flight_id);
            }
        }
    }

    pub fn end_flight(&self, ctx: &StairwayContext) {
        for h in &self.hooks {
            if let Err(e) = h.end_flight(ctx) {
                log::warn!("endFlight hook failed for flight {}: {e}", ctx.flight_id);
            }
        }
    }

    pub fn start_step(&self, ctx: &StairwayContext) {
        for h in &self.hooks {
            if let Err(e) = h.start_step(ctx) {
                log::warn!("startStep hook failed for flight {}: {e}", ctx.flight_id);
            }
        }
    }

    pub fn end_step(&self, ctx: &StairwayContext) {
        for h in &self.hooks {
            if let Err(e) = h.end_step(ctx) {
                log::warn!("endStep hook failed for flight {}: {e}", ctx.flight_id);
            }
        }
    }

    pub fn state_transition(&self, ctx: &StairwayContext, new_status: FlightStatus) {
        for h in &self.hooks {
            if let Err(e) = h.state_transition(ctx, new_status) {
                log::warn!("stateTransition hook failed for flight {}: {e}", ctx.flight_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook(Arc<AtomicUsize>);
    impl FlightHook for CountingHook {
        fn start_step(&self, _ctx: &StairwayContext) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHook;
    impl FlightHook for FailingHook {
        fn start_step(&self, _ctx: &StairwayContext) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[test]
    fn one_failing_hook_does_not_skip_the_rest() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut composite = CompositeHook::new();
        composite.push(Box::new(FailingHook));
        composite.push(Box::new(CountingHook(counter.clone())));
        let ctx = StairwayContext::new("f1");
        composite.start_step(&ctx);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
