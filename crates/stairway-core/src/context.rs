//! Explicit context value replacing the source's global thread-local MDC
//! (§9 "Global thread-local context (MDC)"). Carried by each task and
//! installed around step invocation; propagated to child tasks minus
//! step-specific keys rather than inherited implicitly.

use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StairwayContext {
    pub flight_id: String,
    pub class_name: Option<String>,
    pub step_index: Option<i64>,
    pub step_class_name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl StairwayContext {
    pub fn new(flight_id: impl Into<String>) -> Self {
        Self {
            flight_id: flight_id.into(),
            class_name: None,
            step_index: None,
            step_class_name: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Returns the context to install on the worker around one step
    /// invocation: step-specific fields filled in.
    pub fn for_step(&self, step_index: i64, step_class_name: impl Into<String>) -> Self {
        let mut c = self.clone();
        c.step_index = Some(step_index);
        c.step_class_name = Some(step_class_name.into());
        c
    }

    /// The context propagated to a sub-flight submission: everything but
    /// the step-specific keys (§4.9).
    pub fn for_sub_flight(&self) -> Self {
        Self {
            flight_id: self.flight_id.clone(),
            class_name: self.class_name.clone(),
            step_index: None,
            step_class_name: None,
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_flight_context_drops_step_fields() {
        let ctx = StairwayContext::new("f1").with_class_name("MyFlight").for_step(2, "StepTwo");
        let sub = ctx.for_sub_flight();
        assert_eq!(sub.flight_id, "f1");
        assert_eq!(sub.class_name.as_deref(), Some("MyFlight"));
        assert!(sub.step_index.is_none());
        assert!(sub.step_class_name.is_none());
    }
}
