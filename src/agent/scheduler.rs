//! Multi-tab concurrency scheduler
//!
//! Runs many goals at once, each in its own tab with its own control loop.
//! All loops share one oracle gateway, and therefore one call budget.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::agent::control_loop::ControlLoop;
use crate::browser::{Tab, TabProvider};
use crate::core::{Config, PilotError, Result, RunReport};
use crate::llm::OracleGateway;

/// One goal submitted to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub instruction: String,
    /// Higher runs first
    #[serde(default)]
    pub priority: i32,
    /// Reuse this tab instead of opening a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    /// Per-task timeout; the scheduler default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ScheduledTask {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            priority: 0,
            tab_id: None,
            timeout_ms: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn tab(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = Some(tab_id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// A batch file: a list of `[[task]]` tables
#[derive(Debug, Deserialize)]
struct BatchFile {
    #[serde(default, rename = "task")]
    tasks: Vec<ScheduledTask>,
}

/// Parse a TOML batch of `[[task]]` entries
pub fn parse_batch(content: &str) -> Result<Vec<ScheduledTask>> {
    let batch: BatchFile = toml::from_str(content)?;
    if batch.tasks.is_empty() {
        return Err(PilotError::config("batch file contains no [[task]] entries"));
    }
    if let Some(task) = batch.tasks.iter().find(|t| t.instruction.trim().is_empty()) {
        return Err(PilotError::config(format!(
            "batch task with priority {} has an empty instruction",
            task.priority
        )));
    }
    Ok(batch.tasks)
}

/// Read and parse a batch file
pub async fn load_batch(path: &Path) -> Result<Vec<ScheduledTask>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_batch(&content)
}

/// How a scheduled task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The goal was achieved
    Succeeded,
    /// The loop ran to a budget without achieving the goal
    Failed,
    /// The timer won the race
    TimedOut,
    /// No loop could run, or the loop died
    Errored,
}

/// Uniform result for every scheduled task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub instruction: String,
    pub priority: i32,
    pub tab_id: Option<String>,
    pub success: bool,
    pub outcome: TaskOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TaskResult {
    fn from_report(
        task: &ScheduledTask,
        tab_id: String,
        report: RunReport,
        started: Instant,
    ) -> Self {
        Self {
            instruction: task.instruction.clone(),
            priority: task.priority,
            tab_id: Some(tab_id),
            success: report.success,
            outcome: if report.success {
                TaskOutcome::Succeeded
            } else {
                TaskOutcome::Failed
            },
            error: (!report.success).then(|| report.summary.clone()),
            report: Some(report),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(
        task: &ScheduledTask,
        tab_id: Option<String>,
        outcome: TaskOutcome,
        error: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            instruction: task.instruction.clone(),
            priority: task.priority,
            tab_id,
            success: false,
            outcome,
            report: None,
            error: Some(error.into()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Bookkeeping for one tab the scheduler has handed out
#[derive(Debug, Clone, Serialize)]
pub struct TabSession {
    pub tab_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_active: bool,
}

type Sessions = Arc<Mutex<HashMap<String, TabSession>>>;

/// One lock per supplied tab id; a tab serves one loop at a time
type TabLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

async fn lock_tab(locks: &TabLocks, tab_id: &str) -> OwnedMutexGuard<()> {
    let lock = locks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(tab_id.to_string())
        .or_default()
        .clone();
    lock.lock_owned().await
}

fn touch_session(sessions: &Sessions, tab_id: &str, active: bool) {
    let mut sessions = sessions.lock().unwrap_or_else(PoisonError::into_inner);
    let now = Utc::now();
    sessions
        .entry(tab_id.to_string())
        .and_modify(|s| {
            s.last_accessed = now;
            s.is_active = active;
        })
        .or_insert_with(|| TabSession {
            tab_id: tab_id.to_string(),
            created_at: now,
            last_accessed: now,
            is_active: active,
        });
}

/// Everything one dispatched task needs, cloned into its spawned future
#[derive(Clone)]
struct Dispatch {
    gateway: Arc<OracleGateway>,
    tabs: Arc<dyn TabProvider>,
    config: Arc<Config>,
    sessions: Sessions,
    tab_locks: TabLocks,
}

impl Dispatch {
    async fn run(self, task: ScheduledTask, permit: OwnedSemaphorePermit) -> TaskResult {
        let started = Instant::now();
        let reused = task.tab_id.is_some();

        // Held until the tab is released, also by the timeout cleanup
        let tab_guard = match &task.tab_id {
            Some(id) => {
                let guard = lock_tab(&self.tab_locks, id).await;
                debug!(tab = %id, "acquired supplied tab");
                Some(guard)
            }
            None => None,
        };

        let opened = match &task.tab_id {
            Some(id) => self.tabs.attach(id).await,
            None => self.tabs.new_tab().await,
        };
        let Tab { id: tab_id, driver } = match opened {
            Ok(tab) => tab,
            Err(e) => {
                warn!(instruction = %task.instruction, error = %e, "could not open tab");
                return TaskResult::failed(
                    &task,
                    task.tab_id.clone(),
                    TaskOutcome::Errored,
                    e.to_string(),
                    started,
                );
            }
        };
        touch_session(&self.sessions, &tab_id, true);

        let timeout = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.scheduler.default_timeout());
        info!(
            tab = %tab_id,
            priority = task.priority,
            timeout_ms = timeout.as_millis() as u64,
            "task admitted"
        );

        let control = ControlLoop::new(self.gateway.clone(), driver, &self.config);
        let instruction = task.instruction.clone();
        let mut handle = tokio::spawn(async move { control.run(&instruction).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => {
                self.release(&tab_id, reused).await;
                drop(tab_guard);
                drop(permit);
                match joined {
                    Ok(report) => TaskResult::from_report(&task, tab_id, report, started),
                    Err(e) => {
                        error!(tab = %tab_id, error = %e, "control loop panicked");
                        TaskResult::failed(
                            &task,
                            Some(tab_id),
                            TaskOutcome::Errored,
                            format!("control loop panicked: {}", e),
                            started,
                        )
                    }
                }
            }
            Err(_) => {
                warn!(tab = %tab_id, timeout_ms = timeout.as_millis() as u64, "task timed out");
                let result = TaskResult::failed(
                    &task,
                    Some(tab_id.clone()),
                    TaskOutcome::TimedOut,
                    PilotError::Timeout {
                        after_ms: timeout.as_millis() as u64,
                    }
                    .to_string(),
                    started,
                );

                // The slot stays taken until the abandoned loop and its tab are gone
                tokio::spawn(async move {
                    handle.abort();
                    let _ = handle.await;
                    self.release(&tab_id, reused).await;
                    drop(tab_guard);
                    drop(permit);
                    debug!(tab = %tab_id, "cleaned up timed out task");
                });
                result
            }
        }
    }

    /// Close tabs the scheduler opened; reused tabs stay open
    async fn release(&self, tab_id: &str, reused: bool) {
        touch_session(&self.sessions, tab_id, false);
        if reused {
            return;
        }
        if let Err(e) = self.tabs.close_tab(tab_id).await {
            warn!(tab = %tab_id, error = %e, "could not close tab");
        }
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tab_id);
    }
}

/// Runs scheduled tasks under bounded concurrency
pub struct Scheduler {
    dispatch: Dispatch,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(gateway: Arc<OracleGateway>, tabs: Arc<dyn TabProvider>, config: &Config) -> Self {
        Self {
            max_concurrent: config.scheduler.max_concurrent_tasks.max(1),
            dispatch: Dispatch {
                gateway,
                tabs,
                config: Arc::new(config.clone()),
                sessions: Arc::new(Mutex::new(HashMap::new())),
                tab_locks: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tabs currently known to the scheduler
    pub fn sessions(&self) -> Vec<TabSession> {
        let sessions = self
            .dispatch
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<TabSession> = sessions.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Run every task and return one result per task, in dispatch order
    ///
    /// Tasks are dispatched by descending priority (ties keep input order).
    /// At most `max_concurrent` loops run at once; the next task is admitted
    /// as soon as any running one finishes. A failure or timeout never
    /// affects the other tasks.
    pub async fn run_all(&self, mut tasks: Vec<ScheduledTask>) -> Vec<TaskResult> {
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        info!(tasks = tasks.len(), max_concurrent = self.max_concurrent, "scheduling batch");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let started = Instant::now();
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "admission semaphore closed");
                    handles.push((task, started, None));
                    continue;
                }
            };

            let dispatch = self.dispatch.clone();
            let queued = task.clone();
            handles.push((
                task,
                started,
                Some(tokio::spawn(async move { dispatch.run(queued, permit).await })),
            ));
        }

        let settled = join_all(handles.into_iter().map(|(task, started, handle)| async move {
            let Some(handle) = handle else {
                return TaskResult::failed(
                    &task,
                    None,
                    TaskOutcome::Errored,
                    "admission closed before the task could start",
                    started,
                );
            };
            match handle.await {
                Ok(result) => result,
                Err(e) => TaskResult::failed(
                    &task,
                    task.tab_id.clone(),
                    TaskOutcome::Errored,
                    format!("task panicked: {}", e),
                    started,
                ),
            }
        }))
        .await;

        let succeeded = settled.iter().filter(|r| r.success).count();
        info!(succeeded, total = settled.len(), "batch settled");
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch() {
        let tasks = parse_batch(
            r#"
[[task]]
instruction = "open https://example.com"
priority = 2

[[task]]
instruction = "search for rust"
tab_id = "tabpilot-9"
timeout_ms = 5000
"#,
        )
        .unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, 2);
        assert_eq!(tasks[1].priority, 0);
        assert_eq!(tasks[1].tab_id.as_deref(), Some("tabpilot-9"));
        assert_eq!(tasks[1].timeout_ms, Some(5000));
    }

    #[test]
    fn test_parse_batch_rejects_empty() {
        assert!(parse_batch("").is_err());
        assert!(parse_batch("[[task]]\ninstruction = \"  \"\n").is_err());
    }

    #[test]
    fn test_priority_sort_is_stable() {
        let mut tasks = vec![
            ScheduledTask::new("a").priority(1),
            ScheduledTask::new("b").priority(5),
            ScheduledTask::new("c").priority(1),
            ScheduledTask::new("d").priority(5),
        ];
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        let order: Vec<&str> = tasks.iter().map(|t| t.instruction.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_session_bookkeeping() {
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        touch_session(&sessions, "t1", true);
        touch_session(&sessions, "t1", false);
        let sessions = sessions.lock().unwrap();
        let session = &sessions["t1"];
        assert!(!session.is_active);
        assert!(session.last_accessed >= session.created_at);
    }
}
