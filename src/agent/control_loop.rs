//! Control loop
//!
//! Drives one goal to completion as an explicit state machine:
//!
//! ```text
//! Idle -> Planning -> Executing -> Observing -> Evaluating -> {Planning | Done}
//! ```
//!
//! The run ends when the evaluator accepts the goal, the cycle budget is
//! spent, or the failure ceiling is reached. Every executed task, failed or
//! not, is appended to the goal history and never removed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::evaluator::GoalEvaluator;
use crate::agent::executor::ActionExecutor;
use crate::agent::loop_state::{LoopPhase, LoopState};
use crate::agent::planner::TaskPlanner;
use crate::browser::{BrowserDriver, SelectorResolver};
use crate::core::{
    AgentConfig, Config, GoalState, PageSnapshot, ReobservePolicy, RunReport, RunStatus, Task,
};
use crate::llm::OracleGateway;

/// One goal-directed agent bound to one browser tab
pub struct ControlLoop {
    planner: TaskPlanner,
    executor: ActionExecutor,
    evaluator: GoalEvaluator,
    resolver: SelectorResolver,
    driver: Arc<dyn BrowserDriver>,
    agent: AgentConfig,
    reobserve: ReobservePolicy,
}

impl ControlLoop {
    pub fn new(gateway: Arc<OracleGateway>, driver: Arc<dyn BrowserDriver>, config: &Config) -> Self {
        Self {
            planner: TaskPlanner::new(gateway.clone(), config),
            executor: ActionExecutor::from_config(driver.clone(), &config.browser),
            evaluator: GoalEvaluator::new(gateway, config),
            resolver: SelectorResolver::from_config(&config.browser),
            driver,
            agent: config.agent.clone(),
            reobserve: config.browser.reobserve,
        }
    }

    /// Replace the executor, e.g. to change settle delay or artifact dir
    pub fn with_executor(mut self, executor: ActionExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Pursue a goal until a terminal condition fires
    ///
    /// Always returns a complete report; failures along the way are part of
    /// its history rather than errors.
    pub async fn run(&self, instruction: &str) -> RunReport {
        let mut goal = GoalState::new(instruction);
        let mut state = LoopState::new(&self.agent);
        let mut snapshot: Option<PageSnapshot> = None;
        let mut pending: Option<Task> = None;

        loop {
            debug!(phase = %state.phase, cycle = goal.cycle_count, "control loop step");

            state.phase = match state.phase {
                LoopPhase::Idle => {
                    info!(goal = %goal.instruction, max_cycles = state.max_cycles, "starting run");
                    LoopPhase::Planning
                }

                LoopPhase::Planning => match state.budget_status(goal.cycle_count) {
                    Some(status) => LoopPhase::Done(status),
                    None => {
                        goal.cycle_count += 1;
                        info!(cycle = goal.cycle_count, "planning");
                        let task = self
                            .planner
                            .plan_next(&goal.instruction, goal.history(), snapshot.as_ref())
                            .await;
                        pending = Some(task);
                        LoopPhase::Executing
                    }
                },

                LoopPhase::Executing => {
                    if let Some(task) = pending.take() {
                        self.execute_with_recovery(task, &mut goal, &mut state, &mut snapshot)
                            .await;
                    }
                    LoopPhase::Observing
                }

                LoopPhase::Observing => {
                    let due = match self.reobserve {
                        ReobservePolicy::Always => true,
                        ReobservePolicy::AfterMutation => state.page_dirty(),
                    };
                    if due || snapshot.is_none() {
                        self.refresh(&mut snapshot, &mut state).await;
                    } else {
                        debug!("page unchanged, reusing last observation");
                    }
                    LoopPhase::Evaluating
                }

                LoopPhase::Evaluating => {
                    let blank;
                    let page = match &snapshot {
                        Some(page) => page,
                        None => {
                            blank = PageSnapshot::blank();
                            &blank
                        }
                    };
                    let achieved = self
                        .evaluator
                        .is_goal_achieved(&goal.instruction, goal.history(), page)
                        .await;

                    if achieved {
                        LoopPhase::Done(RunStatus::GoalAchieved)
                    } else {
                        match state.budget_status(goal.cycle_count) {
                            Some(status) => LoopPhase::Done(status),
                            None => LoopPhase::Planning,
                        }
                    }
                }

                LoopPhase::Done(status) => {
                    let report = RunReport::from_goal(goal, status);
                    info!(
                        success = report.success,
                        cycles = report.cycles,
                        summary = %report.summary,
                        "run finished"
                    );
                    return report;
                }
            };
        }
    }

    /// Execute a task and, if it fails, at most one recovery task
    async fn execute_with_recovery(
        &self,
        mut task: Task,
        goal: &mut GoalState,
        state: &mut LoopState,
        snapshot: &mut Option<PageSnapshot>,
    ) {
        if task.action.is_mutating() {
            state.mark_page_dirty();
        }

        let failed = self.executor.execute(&mut task).await.is_err();
        goal.record(task);

        if !failed {
            state.record_success();
            return;
        }
        state.record_failure();

        if !self.agent.recovery_enabled || state.failure_ceiling_reached() {
            return;
        }

        self.refresh(snapshot, state).await;
        let Some(failed_task) = goal.history().last() else {
            return;
        };
        let mut recovery = self
            .planner
            .plan_recovery(&goal.instruction, goal.history(), failed_task, snapshot.as_ref())
            .await;
        info!(
            failed = %failed_task.id,
            recovery = %recovery.id,
            kind = recovery.action.kind(),
            "attempting recovery"
        );

        if recovery.action.is_mutating() {
            state.mark_page_dirty();
        }
        match self.executor.execute(&mut recovery).await {
            Ok(()) => state.record_success(),
            Err(_) => state.record_failure(),
        }
        goal.record(recovery);
    }

    /// Take a fresh observation, keeping the last one if the page is unreachable
    async fn refresh(&self, snapshot: &mut Option<PageSnapshot>, state: &mut LoopState) {
        match self.resolver.snapshot(self.driver.as_ref()).await {
            Ok(fresh) => {
                debug!(url = %fresh.url, "observed page");
                *snapshot = Some(fresh);
                state.mark_observed();
            }
            Err(e) => warn!(error = %e, "page observation failed, keeping last snapshot"),
        }
    }
}
