//! Agent module - planning, execution and orchestration
//!
//! Contains the control loop that drives a goal through plan, execute,
//! observe and evaluate phases, and the scheduler that runs many loops at once.

pub mod control_loop;
pub mod evaluator;
pub mod executor;
pub mod loop_state;
pub mod orchestrator;
pub mod planner;
pub mod scheduler;

pub use control_loop::ControlLoop;
pub use evaluator::{Evaluation, GoalEvaluator};
pub use executor::ActionExecutor;
pub use loop_state::{LoopPhase, LoopState};
pub use orchestrator::Agent;
pub use planner::TaskPlanner;
pub use scheduler::{ScheduledTask, Scheduler, TabSession, TaskOutcome, TaskResult};
