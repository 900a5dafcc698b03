//! Action executor
//!
//! Runs one task against the browser driver. Required fields are validated
//! before the driver is touched, structural paths are grounded into CSS
//! locators, and every driver failure is preceded by a best-effort diagnostic
//! screenshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{ground, BrowserDriver, Locator, SelectorResolver, WaitCondition};
use crate::core::{Action, BrowserConfig, PilotError, Result, ScrollDirection, Task, TaskId};

const DEFAULT_SCROLL_PIXELS: u32 = 600;

/// Executes tasks on one browser tab
pub struct ActionExecutor {
    driver: Arc<dyn BrowserDriver>,
    resolver: SelectorResolver,
    settle_delay: Duration,
    artifacts_dir: Option<PathBuf>,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>, resolver: SelectorResolver) -> Self {
        Self {
            driver,
            resolver,
            settle_delay: Duration::ZERO,
            artifacts_dir: None,
        }
    }

    pub fn from_config(driver: Arc<dyn BrowserDriver>, config: &BrowserConfig) -> Self {
        Self {
            driver,
            resolver: SelectorResolver::from_config(config),
            settle_delay: config.settle_delay(),
            artifacts_dir: config.artifacts_dir.clone(),
        }
    }

    /// Bounded pause after mutating actions
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Directory for on-failure screenshots
    pub fn with_artifacts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.artifacts_dir = dir;
        self
    }

    /// Run a planned task to completion or failure
    ///
    /// The task moves to executing, then to completed with its result or to
    /// failed with the error text. The returned error is always
    /// `PilotError::Execution` tagged with the task id.
    pub async fn execute(&self, task: &mut Task) -> Result<()> {
        task.begin();
        debug!(task = %task.id, kind = task.action.kind(), "executing task");

        if let Err(e) = task.action.validate() {
            let error = tagged(&task.id, &e, None);
            task.fail(e.to_string());
            return Err(error);
        }

        match self.dispatch(&task.action).await {
            Ok(result) => {
                if task.action.is_mutating() && !self.settle_delay.is_zero() {
                    tokio::time::sleep(self.settle_delay).await;
                }
                info!(task = %task.id, description = %task.description, "task completed");
                task.complete(result);
                Ok(())
            }
            Err(e) => {
                let artifact = self.capture_artifact(&task.id).await;
                warn!(task = %task.id, error = %e, artifact = ?artifact, "task failed");
                let error = tagged(&task.id, &e, artifact);
                task.fail(e.to_string());
                Err(error)
            }
        }
    }

    async fn dispatch(&self, action: &Action) -> Result<Option<serde_json::Value>> {
        let driver = self.driver.as_ref();

        match action {
            Action::Navigate { url } => {
                driver.navigate(url).await?;
                Ok(Some(serde_json::json!({ "url": url })))
            }
            Action::Click {
                selector: Some(selector),
                ..
            } if !selector.trim().is_empty() => {
                driver.click(ground(selector).as_str()).await?;
                Ok(None)
            }
            Action::Click {
                text: Some(text), ..
            }
            | Action::ClickByText { text } => {
                let locator = self.locate_text(text).await?;
                driver.click(locator.as_str()).await?;
                Ok(None)
            }
            Action::Click { .. } => Err(PilotError::validation(
                "click requires a selector or a text reference",
            )),
            Action::Type {
                selector,
                text,
                submit,
            } => {
                driver.type_text(ground(selector).as_str(), text).await?;
                if *submit {
                    driver.press("Enter").await?;
                }
                Ok(None)
            }
            Action::Wait {
                selector: Some(selector),
                ..
            } if !selector.trim().is_empty() => {
                let condition = WaitCondition::Locator(ground(selector).into_inner());
                driver.wait_for(&condition).await?;
                Ok(None)
            }
            Action::Wait {
                text: Some(text), ..
            } if !text.trim().is_empty() => {
                driver
                    .wait_for(&WaitCondition::Text(text.trim().to_string()))
                    .await?;
                Ok(None)
            }
            Action::Wait { duration_ms, .. } => {
                tokio::time::sleep(Duration::from_millis(duration_ms.unwrap_or_default())).await;
                Ok(None)
            }
            Action::Extract { selector } => self.extract(selector.as_deref()).await.map(Some),
            Action::Press { key } => {
                driver.press(key).await?;
                Ok(None)
            }
            Action::Scroll { direction, pixels } => {
                let pixels = i64::from(pixels.unwrap_or(DEFAULT_SCROLL_PIXELS));
                let dy = match direction {
                    ScrollDirection::Up => -pixels,
                    ScrollDirection::Down => pixels,
                };
                driver
                    .evaluate(&format!("window.scrollBy(0, {}); window.scrollY", dy))
                    .await?;
                Ok(None)
            }
            Action::Screenshot => {
                let bytes = driver.screenshot().await?;
                let path = self.save_artifact("screenshot", &bytes).await;
                Ok(Some(serde_json::json!({
                    "bytes": bytes.len(),
                    "path": path,
                })))
            }
            Action::Custom { instruction } => {
                Ok(Some(serde_json::Value::String(instruction.clone())))
            }
        }
    }

    async fn locate_text(&self, text: &str) -> Result<Locator> {
        self.resolver
            .locate_by_text(self.driver.as_ref(), text)
            .await?
            .ok_or_else(|| PilotError::driver(format!("no clickable element with text \"{}\"", text)))
    }

    async fn extract(&self, selector: Option<&str>) -> Result<serde_json::Value> {
        let script = match selector {
            Some(selector) => {
                let css = serde_json::to_string(ground(selector).as_str())?;
                format!(
                    "(() => {{ const el = document.querySelector({}); return el ? el.innerText : null; }})()",
                    css
                )
            }
            None => "document.body ? document.body.innerText : ''".to_string(),
        };

        match self.driver.evaluate(&script).await? {
            serde_json::Value::Null => Err(PilotError::driver(format!(
                "no element matches {}",
                selector.unwrap_or("body")
            ))),
            value => Ok(value),
        }
    }

    /// Best-effort failure diagnostics; never fails itself
    async fn capture_artifact(&self, task_id: &TaskId) -> Option<String> {
        match self.driver.screenshot().await {
            Ok(bytes) => {
                if let Some(path) = self.save_artifact(task_id.as_str(), &bytes).await {
                    return Some(path);
                }
                let url = self.driver.current_url().await.unwrap_or_default();
                Some(format!("screenshot of {} ({} bytes, not saved)", url, bytes.len()))
            }
            Err(e) => {
                debug!(task = %task_id, error = %e, "could not capture failure screenshot");
                self.driver
                    .current_url()
                    .await
                    .ok()
                    .map(|url| format!("page {}", url))
            }
        }
    }

    async fn save_artifact(&self, stem: &str, bytes: &[u8]) -> Option<String> {
        let dir = self.artifacts_dir.as_ref()?;
        let path = dir.join(format!(
            "{}-{}.png",
            stem,
            chrono::Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));

        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;

        match written {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not save screenshot");
                None
            }
        }
    }
}

fn tagged(task_id: &TaskId, cause: &PilotError, artifact: Option<String>) -> PilotError {
    PilotError::Execution {
        task_id: task_id.to_string(),
        cause: cause.to_string(),
        artifact,
    }
}
