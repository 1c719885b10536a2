use crate::domain::payload::PowerSupplyStatus;

pub const DEFAULT_GRID_DELTA: f64 = 20.0;
pub const JOB_REQUEST_MESSAGE: &str = "start job";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchDecision {
    Hold,
    RequestJob,
}

/// Threshold rule over the latest power sample only; there is no smoothing
/// between samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchPolicy {
    grid_delta: f64,
}

impl DispatchPolicy {
    pub fn new(grid_delta: f64) -> Self {
        Self { grid_delta }
    }

    pub fn grid_delta(&self) -> f64 {
        self.grid_delta
    }

    pub fn decide(&self, status: &PowerSupplyStatus) -> DispatchDecision {
        if status.production.grid + self.grid_delta >= 0.0 {
            DispatchDecision::Hold
        } else {
            DispatchDecision::RequestJob
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_DELTA)
    }
}
