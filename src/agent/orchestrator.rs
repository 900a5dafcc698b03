//! Agent orchestrator
//!
//! Wires the production collaborators together: an Ollama completion client
//! behind one shared oracle gateway, and agent-browser tabs. Single goals run
//! one control loop; batches go through the scheduler.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::control_loop::ControlLoop;
use crate::agent::scheduler::{ScheduledTask, Scheduler, TaskResult};
use crate::browser::{AgentBrowser, AgentBrowserTabs, TabProvider};
use crate::core::{Config, PilotError, Result, RunReport};
use crate::llm::{CompletionClient, OllamaClient, OracleGateway};

/// Main entry point for running browser goals
pub struct Agent {
    /// Configuration
    config: Config,
    /// Ollama client, kept for model checks
    llm: Arc<OllamaClient>,
    /// The one gateway every loop shares
    gateway: Arc<OracleGateway>,
    /// Tab source
    tabs: Arc<dyn TabProvider>,
}

impl Agent {
    /// Create an agent from the loaded configuration
    pub fn new() -> Result<Self> {
        Self::with_config(Config::load())
    }

    /// Create an agent with custom configuration
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        let llm = Arc::new(OllamaClient::from_config(&config)?);
        let gateway = Arc::new(OracleGateway::new(llm.clone(), &config.oracle));
        let tabs: Arc<dyn TabProvider> = Arc::new(AgentBrowserTabs::new(&config.browser));

        Ok(Self {
            config,
            llm,
            gateway,
            tabs,
        })
    }

    /// Check that the browser driver and the oracle model are usable
    pub async fn initialize(&self) -> Result<()> {
        if !AgentBrowser::is_available().await {
            return Err(PilotError::DriverUnavailable);
        }

        let models = self.llm.list_models().await?;
        debug!(?models, "available models");

        if !self.llm.is_model_available().await? {
            return Err(PilotError::ModelNotFound(self.config.models.oracle.clone()));
        }

        info!(model = %self.config.models.oracle, "agent initialized");
        Ok(())
    }

    /// Pursue one goal in a fresh tab
    pub async fn run_goal(&self, instruction: &str) -> Result<RunReport> {
        let tab = self.tabs.new_tab().await?;
        let report = ControlLoop::new(self.gateway.clone(), tab.driver.clone(), &self.config)
            .run(instruction)
            .await;

        if let Err(e) = self.tabs.close_tab(&tab.id).await {
            warn!(tab = %tab.id, error = %e, "could not close tab");
        }
        Ok(report)
    }

    /// Run a batch of goals concurrently
    pub async fn run_batch(&self, tasks: Vec<ScheduledTask>) -> Vec<TaskResult> {
        Scheduler::new(self.gateway.clone(), self.tabs.clone(), &self.config)
            .run_all(tasks)
            .await
    }

    /// Get current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared oracle gateway
    pub fn gateway(&self) -> &Arc<OracleGateway> {
        &self.gateway
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        self.llm.list_models().await
    }
}
