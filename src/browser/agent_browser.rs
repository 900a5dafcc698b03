//! agent-browser CLI driver
//!
//! Every tab is its own agent-browser session, so tabs never share cookies,
//! history or focus.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::browser::driver::{BrowserDriver, Tab, TabProvider, WaitCondition};
use crate::core::{BrowserConfig, PilotError, Result};

const BINARY: &str = "agent-browser";

/// Driver for one agent-browser session
#[derive(Debug, Clone)]
pub struct AgentBrowser {
    /// Session name for isolation
    session_name: String,
    /// Whether to run in headed mode
    headed: bool,
    /// Upper bound on any single command
    timeout: Duration,
}

impl AgentBrowser {
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            headed: false,
            timeout: Duration::from_millis(BrowserConfig::default().timeout_ms),
        }
    }

    pub fn from_config(session_name: impl Into<String>, config: &BrowserConfig) -> Self {
        Self {
            session_name: session_name.into(),
            headed: config.headed,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn set_headed(&mut self, headed: bool) {
        self.headed = headed;
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Check if agent-browser is installed
    pub async fn is_available() -> bool {
        Command::new(BINARY)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(BINARY);
        cmd.args(["--session", &self.session_name]);
        if self.headed {
            cmd.arg("--headed");
        }
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run an agent-browser command and return its stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        debug!(session = %self.session_name, ?args, "agent-browser");

        let output = tokio::time::timeout(self.timeout, self.command(args).output())
            .await
            .map_err(|_| PilotError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PilotError::DriverUnavailable
                } else {
                    PilotError::driver(format!("Failed to run agent-browser: {}", e))
                }
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PilotError::driver(format!(
                "agent-browser {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )))
        }
    }

    /// Close the session's browser
    pub async fn close(&self) -> Result<()> {
        self.run_command(&["close"]).await.map(|_| ())
    }
}

/// Interpret `eval` output: JSON when it parses, otherwise the raw text
fn parse_eval_output(output: &str) -> serde_json::Value {
    let trimmed = output.trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(mut map)) if map.contains_key("result") => {
            map.remove("result").unwrap_or(serde_json::Value::Null)
        }
        Ok(value) => value,
        Err(_) => serde_json::Value::String(trimmed.to_string()),
    }
}

#[async_trait]
impl BrowserDriver for AgentBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.run_command(&["open", url]).await.map(|_| ())
    }

    async fn click(&self, locator: &str) -> Result<()> {
        self.run_command(&["click", locator]).await.map(|_| ())
    }

    async fn type_text(&self, locator: &str, text: &str) -> Result<()> {
        self.run_command(&["fill", locator, text]).await.map(|_| ())
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.run_command(&["press", key]).await.map(|_| ())
    }

    async fn wait_for(&self, condition: &WaitCondition) -> Result<()> {
        let args: Vec<&str> = match condition {
            WaitCondition::Locator(locator) => vec!["wait", locator.as_str()],
            WaitCondition::Text(text) => vec!["wait", "--text", text.as_str()],
        };
        self.run_command(&args).await.map(|_| ())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let path = std::env::temp_dir().join(format!(
            "{}-{}.png",
            self.session_name,
            chrono::Utc::now().timestamp_millis()
        ));
        let path_str = path.to_string_lossy().into_owned();

        self.run_command(&["screenshot", &path_str]).await?;
        let bytes = tokio::fs::read(&path).await?;
        let _ = tokio::fs::remove_file(&path).await;
        Ok(bytes)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let output = self.run_command(&["eval", script]).await?;
        Ok(parse_eval_output(&output))
    }

    async fn current_url(&self) -> Result<String> {
        self.run_command(&["get", "url"])
            .await
            .map(|s| s.trim().to_string())
    }

    async fn title(&self) -> Result<String> {
        self.run_command(&["get", "title"])
            .await
            .map(|s| s.trim().to_string())
    }
}

/// Tab provider handing out one agent-browser session per tab
pub struct AgentBrowserTabs {
    base_session: String,
    config: BrowserConfig,
    next: AtomicU64,
    open: Mutex<BTreeSet<String>>,
}

impl AgentBrowserTabs {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            base_session: config.session_name.clone(),
            config: config.clone(),
            next: AtomicU64::new(1),
            open: Mutex::new(BTreeSet::new()),
        }
    }

    fn driver(&self, id: &str) -> AgentBrowser {
        AgentBrowser::from_config(id, &self.config)
    }
}

#[async_trait]
impl TabProvider for AgentBrowserTabs {
    async fn new_tab(&self) -> Result<Tab> {
        let id = format!(
            "{}-{}",
            self.base_session,
            self.next.fetch_add(1, Ordering::Relaxed)
        );
        let driver = self.driver(&id);
        // Sessions start lazily; opening a blank page brings the browser up
        driver.navigate("about:blank").await?;

        self.open.lock().await.insert(id.clone());
        info!(tab = %id, "opened tab");
        Ok(Tab {
            id,
            driver: Arc::new(driver),
        })
    }

    async fn attach(&self, id: &str) -> Result<Tab> {
        let mut open = self.open.lock().await;
        let driver = self.driver(id);
        if !open.contains(id) {
            if driver.current_url().await.is_err() {
                driver.navigate("about:blank").await?;
            }
            open.insert(id.to_string());
        }
        Ok(Tab {
            id: id.to_string(),
            driver: Arc::new(driver),
        })
    }

    async fn close_tab(&self, id: &str) -> Result<()> {
        self.open.lock().await.remove(id);
        self.driver(id).close().await?;
        info!(tab = %id, "closed tab");
        Ok(())
    }

    async fn list_tabs(&self) -> Result<Vec<String>> {
        Ok(self.open.lock().await.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_creation() {
        let driver = AgentBrowser::new("test-session");
        assert_eq!(driver.session_name(), "test-session");
        assert!(!driver.headed);
    }

    #[test]
    fn test_eval_output_parsing() {
        assert_eq!(parse_eval_output("42\n"), serde_json::json!(42));
        assert_eq!(
            parse_eval_output(r#"{"success":true,"result":"ok"}"#),
            serde_json::json!("ok")
        );
        assert_eq!(
            parse_eval_output("/body[1]/a[2]"),
            serde_json::json!("/body[1]/a[2]")
        );
    }

    #[tokio::test]
    async fn test_tab_ids_are_session_scoped() {
        let tabs = AgentBrowserTabs::new(&BrowserConfig::default());
        assert!(tabs.list_tabs().await.unwrap().is_empty());
        assert_eq!(tabs.driver("tabpilot-7").session_name(), "tabpilot-7");
    }
}
