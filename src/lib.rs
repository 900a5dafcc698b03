//! Tabpilot - goal-directed browser agent
//!
//! Drives a real browser towards a natural-language goal by repeatedly asking
//! a language model (the oracle) for the next action, executing it through
//! agent-browser, and asking the oracle whether the goal has been reached.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Completion client abstraction, Ollama client, and the rate
//!   limited oracle gateway
//! - **Browser**: Driver abstraction, agent-browser driver, DOM snapshots and
//!   selector resolution
//! - **Agent**: Planner, executor, evaluator, the control loop state machine
//!   and the multi-tab scheduler
//!
//! # Usage
//!
//! ```rust,no_run
//! use tabpilot::agent::Agent;
//!
//! #[tokio::main]
//! async fn main() -> tabpilot::Result<()> {
//!     let agent = Agent::new()?;
//!     agent.initialize().await?;
//!
//!     let report = agent.run_goal("Open https://example.com and read the heading").await?;
//!     println!("{}", report.summary);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod browser;
pub mod core;
pub mod llm;

// Re-export commonly used items
pub use agent::{Agent, ControlLoop, ScheduledTask, Scheduler, TaskResult};
pub use core::{Config, PilotError, Result, RunReport, RunStatus};
