//! Control loop state management
//!
//! Tracks the phase of the plan/execute/observe/evaluate cycle and the
//! counters behind its terminal conditions.

use std::fmt;

use crate::core::{AgentConfig, FailureMode, RunStatus};

/// Phase of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Planning,
    Executing,
    Observing,
    Evaluating,
    Done(RunStatus),
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Idle => write!(f, "idle"),
            LoopPhase::Planning => write!(f, "planning"),
            LoopPhase::Executing => write!(f, "executing"),
            LoopPhase::Observing => write!(f, "observing"),
            LoopPhase::Evaluating => write!(f, "evaluating"),
            LoopPhase::Done(status) => write!(f, "done ({})", status),
        }
    }
}

/// State of one control loop run
#[derive(Debug, Clone)]
pub struct LoopState {
    pub phase: LoopPhase,
    /// Hard cap on planning cycles
    pub max_cycles: usize,
    pub failure_ceiling: usize,
    pub failure_mode: FailureMode,
    consecutive_failures: usize,
    total_failures: usize,
    /// A mutating action ran since the page was last observed
    page_dirty: bool,
}

impl LoopState {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            phase: LoopPhase::Idle,
            max_cycles: config.max_cycles,
            failure_ceiling: config.failure_ceiling,
            failure_mode: config.failure_mode,
            consecutive_failures: 0,
            total_failures: 0,
            page_dirty: true,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
    }

    /// Failures as counted by the configured mode
    pub fn failures(&self) -> usize {
        match self.failure_mode {
            FailureMode::Consecutive => self.consecutive_failures,
            FailureMode::Total => self.total_failures,
        }
    }

    pub fn total_failures(&self) -> usize {
        self.total_failures
    }

    pub fn failure_ceiling_reached(&self) -> bool {
        self.failures() >= self.failure_ceiling
    }

    /// Terminal status from the budgets alone, if one has fired
    pub fn budget_status(&self, cycle_count: usize) -> Option<RunStatus> {
        if self.failure_ceiling_reached() {
            Some(RunStatus::FailureCeilingReached)
        } else if cycle_count >= self.max_cycles {
            Some(RunStatus::CycleBudgetExhausted)
        } else {
            None
        }
    }

    pub fn mark_page_dirty(&mut self) {
        self.page_dirty = true;
    }

    pub fn mark_observed(&mut self) {
        self.page_dirty = false;
    }

    pub fn page_dirty(&self) -> bool {
        self.page_dirty
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, LoopPhase::Done(_))
    }
}
