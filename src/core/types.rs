//! Shared types used across tabpilot modules
//!
//! Contains page observations, plannable actions, task lifecycle, goal state
//! and the run report handed back to callers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::browser::DomTree;
use crate::core::{PilotError, Result};

/// Longest explicit wait a task may request
pub const MAX_WAIT_MS: u64 = 30_000;

/// One observation of a live page
///
/// Captured fresh before planning and evaluation, and replaced wholesale;
/// never mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Compact rendering of the DOM fed to the oracle
    pub dom_summary: String,
    #[serde(skip)]
    pub dom_tree: Option<DomTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl PageSnapshot {
    /// Create a snapshot without a DOM tree
    pub fn new(url: impl Into<String>, title: impl Into<String>, dom_summary: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            dom_summary: dom_summary.into(),
            dom_tree: None,
            screenshot_ref: None,
            captured_at: Utc::now(),
        }
    }

    /// Placeholder used when nothing could be observed at all
    pub fn blank() -> Self {
        Self::new("about:blank", "", "(page could not be observed)")
    }

    /// Attach an extracted DOM tree
    pub fn with_tree(mut self, tree: DomTree) -> Self {
        self.dom_tree = Some(tree);
        self
    }
}

/// Scroll direction for `scroll` actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollDirection::Up => write!(f, "up"),
            ScrollDirection::Down => write!(f, "down"),
        }
    }
}

/// A concrete browser action, as exchanged with the oracle
///
/// The wire shape is a JSON object tagged by `type`, e.g.
/// `{"type": "click", "selector": "/body[1]/button[2]"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Navigate {
        url: String,
    },
    Click {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    ClickByText {
        text: String,
    },
    Type {
        selector: String,
        text: String,
        /// Press Enter after typing
        #[serde(default)]
        submit: bool,
    },
    Wait {
        #[serde(default)]
        selector: Option<String>,
        /// Visible text to wait for
        #[serde(default)]
        text: Option<String>,
        #[serde(default, alias = "ms")]
        duration_ms: Option<u64>,
    },
    Extract {
        #[serde(default)]
        selector: Option<String>,
    },
    Press {
        key: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default)]
        pixels: Option<u32>,
    },
    Screenshot,
    Custom {
        instruction: String,
    },
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl Action {
    /// Wire name of the action kind
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::ClickByText { .. } => "clickByText",
            Action::Type { .. } => "type",
            Action::Wait { .. } => "wait",
            Action::Extract { .. } => "extract",
            Action::Press { .. } => "press",
            Action::Scroll { .. } => "scroll",
            Action::Screenshot => "screenshot",
            Action::Custom { .. } => "custom",
        }
    }

    /// Whether the action can change what the page shows
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::Navigate { .. }
                | Action::Click { .. }
                | Action::ClickByText { .. }
                | Action::Type { .. }
                | Action::Press { .. }
                | Action::Scroll { .. }
        )
    }

    /// Whether running the action involves the browser at all
    ///
    /// `custom` steps complete without a driver call, so they never count as
    /// progress on a goal.
    pub fn touches_page(&self) -> bool {
        !matches!(self, Action::Custom { .. })
    }

    /// Check required fields without touching any browser
    pub fn validate(&self) -> Result<()> {
        match self {
            Action::Navigate { url } => {
                let parsed = Url::parse(url)
                    .map_err(|e| PilotError::validation(format!("navigate: bad url '{}': {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https" | "file" | "about") {
                    return Err(PilotError::validation(format!(
                        "navigate: unsupported scheme '{}'",
                        parsed.scheme()
                    )));
                }
            }
            Action::Click { selector, text } => {
                if !non_blank(selector) && !non_blank(text) {
                    return Err(PilotError::validation(
                        "click requires a selector or a text reference",
                    ));
                }
            }
            Action::ClickByText { text } if text.trim().is_empty() => {
                return Err(PilotError::validation("clickByText requires text"));
            }
            Action::Type { selector, .. } if selector.trim().is_empty() => {
                return Err(PilotError::validation("type requires a selector"));
            }
            Action::Wait {
                selector,
                text,
                duration_ms,
            } => {
                if !non_blank(selector) && !non_blank(text) && duration_ms.is_none() {
                    return Err(PilotError::validation(
                        "wait requires a selector, a text or a duration",
                    ));
                }
                if duration_ms.is_some_and(|ms| ms > MAX_WAIT_MS) {
                    return Err(PilotError::validation(format!(
                        "wait duration exceeds {}ms",
                        MAX_WAIT_MS
                    )));
                }
            }
            Action::Press { key } if key.trim().is_empty() => {
                return Err(PilotError::validation("press requires a key"));
            }
            Action::Custom { instruction } if instruction.trim().is_empty() => {
                return Err(PilotError::validation("custom requires an instruction"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Trim fields, add a missing URL scheme, then validate
    pub fn normalize(self) -> Result<Self> {
        let action = match self {
            Action::Navigate { url } => {
                let url = url.trim();
                let url = if url.contains("://") || url.starts_with("about:") {
                    url.to_string()
                } else {
                    format!("https://{}", url)
                };
                Action::Navigate { url }
            }
            Action::Click { selector, text } => Action::Click {
                selector: selector.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                text: text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            },
            Action::ClickByText { text } => Action::ClickByText {
                text: text.trim().to_string(),
            },
            Action::Type {
                selector,
                text,
                submit,
            } => Action::Type {
                selector: selector.trim().to_string(),
                text,
                submit,
            },
            other => other,
        };
        action.validate()?;
        Ok(action)
    }

    /// Human-readable description used when the oracle gives none
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { url } => format!("Navigate to {}", url),
            Action::Click {
                selector: Some(s), ..
            } => format!("Click {}", s),
            Action::Click { text, .. } => {
                format!("Click \"{}\"", text.as_deref().unwrap_or_default())
            }
            Action::ClickByText { text } => format!("Click \"{}\"", text),
            Action::Type { selector, text, .. } => format!("Type \"{}\" into {}", text, selector),
            Action::Wait {
                selector: Some(s), ..
            } => format!("Wait for {}", s),
            Action::Wait { text: Some(t), .. } => format!("Wait for \"{}\"", t),
            Action::Wait { duration_ms, .. } => {
                format!("Wait {}ms", duration_ms.unwrap_or_default())
            }
            Action::Extract { selector } => format!(
                "Extract text from {}",
                selector.as_deref().unwrap_or("page")
            ),
            Action::Press { key } => format!("Press {}", key),
            Action::Scroll { direction, .. } => format!("Scroll {}", direction),
            Action::Screenshot => "Take a screenshot".to_string(),
            Action::Custom { instruction } => instruction.clone(),
        }
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(format!("task-{}", NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a task: planned, executing, then exactly one terminal state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Planned,
    Executing,
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Failed {
        error: String,
    },
}

/// One plannable browser action plus its outcome
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Set when this task was planned to recover from another one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_of: Option<TaskId>,
    status: TaskStatus,
}

impl Task {
    /// Create a planned task
    pub fn new(action: Action, description: impl Into<String>) -> Self {
        let description = description.into();
        let description = if description.trim().is_empty() {
            action.describe()
        } else {
            description
        };
        Self {
            id: TaskId::next(),
            description,
            action,
            reasoning: None,
            recovery_of: None,
            status: TaskStatus::Planned,
        }
    }

    /// Attach the oracle's reasoning
    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning.filter(|r| !r.trim().is_empty());
        self
    }

    /// Mark this task as the recovery attempt for `failed`
    pub fn recovering(mut self, failed: &TaskId) -> Self {
        self.recovery_of = Some(failed.clone());
        self
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    /// Planned -> Executing
    pub fn begin(&mut self) {
        if self.status == TaskStatus::Planned {
            self.status = TaskStatus::Executing;
        } else {
            tracing::warn!(task = %self.id, status = ?self.status, "ignoring begin on non-planned task");
        }
    }

    /// Executing -> Completed
    pub fn complete(&mut self, result: Option<serde_json::Value>) {
        if self.status == TaskStatus::Executing {
            self.status = TaskStatus::Completed { result };
        } else {
            tracing::warn!(task = %self.id, status = ?self.status, "ignoring completion of non-executing task");
        }
    }

    /// Executing -> Failed
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status == TaskStatus::Executing {
            self.status = TaskStatus::Failed {
                error: error.into(),
            };
        } else {
            tracing::warn!(task = %self.id, status = ?self.status, "ignoring failure of non-executing task");
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TaskStatus::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TaskStatus::Failed { .. })
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.status {
            TaskStatus::Completed { result } => result.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Short status marker for prompt rendering
    pub fn marker(&self) -> &'static str {
        match self.status {
            TaskStatus::Planned => "planned",
            TaskStatus::Executing => "running",
            TaskStatus::Completed { .. } => "ok",
            TaskStatus::Failed { .. } => "failed",
        }
    }
}

/// The goal being pursued and everything tried so far
///
/// History is append-only for the duration of a run.
#[derive(Debug, Clone)]
pub struct GoalState {
    pub instruction: String,
    history: Vec<Task>,
    pub cycle_count: usize,
}

impl GoalState {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            history: Vec::new(),
            cycle_count: 0,
        }
    }

    /// Append a finished task
    pub fn record(&mut self, task: Task) {
        self.history.push(task);
    }

    pub fn history(&self) -> &[Task] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Task> {
        self.history
    }

    pub fn completed_count(&self) -> usize {
        self.history.iter().filter(|t| t.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.history.iter().filter(|t| t.is_failed()).count()
    }
}

/// Render the most recent `window` entries of a history, one line each
pub fn render_history(history: &[Task], window: usize) -> String {
    if history.is_empty() {
        return "(nothing attempted yet)".to_string();
    }

    let start = history.len().saturating_sub(window.max(1));
    let mut output = String::new();
    if start > 0 {
        output.push_str(&format!("({} earlier steps omitted)\n", start));
    }

    for (i, task) in history.iter().enumerate().skip(start) {
        output.push_str(&format!("{}. [{}] {}", i + 1, task.marker(), task.description));
        if task.recovery_of.is_some() {
            output.push_str(" (recovery)");
        }
        if let Some(err) = task.error() {
            let err: String = err.chars().take(160).collect();
            output.push_str(&format!(" - error: {}", err));
        }
        output.push('\n');
    }
    output
}

/// Why a control loop run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    GoalAchieved,
    CycleBudgetExhausted,
    FailureCeilingReached,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::GoalAchieved => write!(f, "goal achieved"),
            RunStatus::CycleBudgetExhausted => write!(f, "cycle budget exhausted"),
            RunStatus::FailureCeilingReached => write!(f, "failure ceiling reached"),
        }
    }
}

/// Complete outcome of one control loop run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub status: RunStatus,
    pub cycles: usize,
    pub history: Vec<Task>,
    pub summary: String,
}

impl RunReport {
    /// Build the report from the final goal state
    pub fn from_goal(goal: GoalState, status: RunStatus) -> Self {
        let completed = goal.completed_count();
        let failed = goal.failed_count();
        let cycles = goal.cycle_count;
        let history = goal.into_history();
        let summary = format!(
            "{}: {} of {} tasks completed, {} failed, over {} cycle(s)",
            status,
            completed,
            history.len(),
            failed,
            cycles
        );
        Self {
            success: status == RunStatus::GoalAchieved,
            status,
            cycles,
            history,
            summary,
        }
    }
}
