//! Best-effort ordered shutdown
//!
//! Each step is attempted regardless of what happened to the steps before it.
//! Failures are recorded and reported together once every step has run.

use shared::{component_debug, component_warn, Component};

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug)]
pub struct Teardown {
    component: Component,
    completed: Vec<String>,
    skipped: Vec<String>,
    failures: Vec<String>,
}

impl Teardown {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            completed: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Record the outcome of one step without propagating it
    pub fn record(&mut self, step: &str, result: HarnessResult<()>) {
        match result {
            Ok(()) => {
                component_debug!(self.component, "🛑 {} stopped", step);
                self.completed.push(step.to_string());
            }
            Err(e) => {
                component_warn!(self.component, "⚠️ {} shutdown failed: {}", step, e);
                self.failures.push(format!("{step}: {e}"));
            }
        }
    }

    /// The step's resource was never started, or is already gone
    pub fn skip(&mut self, step: &str) {
        self.skipped.push(step.to_string());
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// `Teardown` error carrying every recorded failure, if any
    pub fn finish(self) -> HarnessResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Teardown {
                failures: self.failures,
            })
        }
    }
}
