//! Configuration management for tabpilot
//!
//! Supports environment variables, config files, and runtime overrides.
//!
//! Config file location: ~/.config/tabpilot/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{PilotError, Result};

/// Main configuration for tabpilot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ollama configuration
    pub ollama: OllamaConfig,
    /// Model configuration
    pub models: ModelConfig,
    /// Browser configuration
    pub browser: BrowserConfig,
    /// Oracle gateway (rate limit and retry) configuration
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Control loop configuration
    pub agent: AgentConfig,
    /// Multi-tab scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Ollama server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Host address (default: localhost)
    pub host: String,
    /// Port number (default: 11434)
    pub port: u16,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used for both planning and goal evaluation
    pub oracle: String,
    /// Sampling temperature for planning calls
    pub planner_temperature: f32,
    /// Sampling temperature for evaluation calls
    pub evaluator_temperature: f32,
}

/// When the control loop re-extracts the page between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReobservePolicy {
    /// Extract after every executed task
    Always,
    /// Extract only after tasks that can change the page
    AfterMutation,
}

/// Browser automation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Base session name for agent-browser (tabs get a numeric suffix)
    pub session_name: String,
    /// Whether to run in headed mode (visible browser)
    pub headed: bool,
    /// Default timeout for browser operations in ms
    pub timeout_ms: u64,
    /// Settle delay after mutating actions in ms
    pub settle_delay_ms: u64,
    /// Where diagnostic screenshots are written (none = keep in memory only)
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    /// Maximum nodes kept from one DOM extraction
    pub max_dom_nodes: usize,
    /// Maximum characters of DOM summary fed to the oracle
    pub summary_max_chars: usize,
    /// Re-observation policy between cycles
    pub reobserve: ReobservePolicy,
}

/// Oracle gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Calls allowed per window before the gateway blocks
    pub ceiling_per_window: u32,
    /// Rolling window length in seconds
    pub window_secs: u64,
    /// Total attempts per completion (first call included)
    pub max_attempts: u32,
    /// Delays used after rate-limit failures, clamped at the last entry
    pub rate_limit_schedule_ms: Vec<u64>,
    /// First delay after a transient failure
    pub backoff_base_ms: u64,
    /// Hard ceiling for transient backoff
    pub backoff_cap_ms: u64,
    /// Multiplier applied to the ceiling on every rate-limit failure
    pub ceiling_backoff_factor: f64,
    /// Floor for the lowered ceiling
    pub min_ceiling: u32,
    /// Random extra delay added to transient backoff (0 disables)
    pub jitter_ms: u64,
}

/// How failures count toward the failure ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Reset the count whenever a task completes
    Consecutive,
    /// Count every failure of the run
    Total,
}

/// Control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on plan/execute/evaluate cycles
    /// Default: 20
    pub max_cycles: usize,
    /// Failures tolerated before the run stops
    /// Default: 4
    pub failure_ceiling: usize,
    /// How failures are counted
    pub failure_mode: FailureMode,
    /// Confidence the evaluator must exceed to accept the goal
    /// Default: 0.7
    pub confidence_threshold: f64,
    /// Number of recent history entries rendered into prompts
    pub history_window: usize,
    /// Whether a failed task may trigger one recovery task
    pub recovery_enabled: bool,
    /// Whether to show debug output
    pub debug: bool,
}

/// Multi-tab scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Control loops allowed to run at once
    pub max_concurrent_tasks: usize,
    /// Timeout for tasks that do not set their own
    pub default_timeout_secs: u64,
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v == "true" || v == "1")
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("OLLAMA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(11434),
            timeout_secs: 120,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            oracle: env::var("TABPILOT_MODEL").unwrap_or_else(|_| "qwen3:8b".to_string()),
            planner_temperature: 0.1,
            evaluator_temperature: 0.0,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            session_name: env::var("TABPILOT_BROWSER_SESSION")
                .unwrap_or_else(|_| "tabpilot".to_string()),
            headed: env_flag("TABPILOT_BROWSER_HEADED").unwrap_or(false),
            timeout_ms: 30000,
            settle_delay_ms: 500,
            artifacts_dir: None,
            max_dom_nodes: 1500,
            summary_max_chars: 6000,
            reobserve: ReobservePolicy::Always,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            ceiling_per_window: 15,
            window_secs: 60,
            max_attempts: 5,
            rate_limit_schedule_ms: vec![1000, 2000, 5000, 10000, 30000],
            backoff_base_ms: 500,
            backoff_cap_ms: 8000,
            ceiling_backoff_factor: 0.75,
            min_ceiling: 1,
            jitter_ms: 0,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_cycles: env::var("TABPILOT_MAX_CYCLES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            failure_ceiling: 4,
            failure_mode: FailureMode::Consecutive,
            confidence_threshold: 0.7,
            history_window: 12,
            recovery_enabled: true,
            debug: env_flag("TABPILOT_DEBUG").unwrap_or(false),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            default_timeout_secs: 300,
        }
    }
}

impl OracleConfig {
    /// Rolling window as a duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl BrowserConfig {
    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl SchedulerConfig {
    /// Default per-task timeout as a duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabpilot")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(PilotError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| PilotError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| PilotError::config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)
            .map_err(|e| PilotError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Reject values the control loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.oracle.ceiling_per_window == 0 {
            return Err(PilotError::config("oracle.ceiling_per_window must be > 0"));
        }
        if self.oracle.window_secs == 0 {
            return Err(PilotError::config("oracle.window_secs must be > 0"));
        }
        if self.oracle.max_attempts == 0 {
            return Err(PilotError::config("oracle.max_attempts must be > 0"));
        }
        if self.oracle.rate_limit_schedule_ms.is_empty() {
            return Err(PilotError::config(
                "oracle.rate_limit_schedule_ms needs at least one entry",
            ));
        }
        if !(0.0..1.0).contains(&self.oracle.ceiling_backoff_factor) {
            return Err(PilotError::config(
                "oracle.ceiling_backoff_factor must be in [0, 1)",
            ));
        }
        if self.agent.max_cycles == 0 {
            return Err(PilotError::config("agent.max_cycles must be > 0"));
        }
        if self.agent.failure_ceiling == 0 {
            return Err(PilotError::config("agent.failure_ceiling must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.agent.confidence_threshold) {
            return Err(PilotError::config(
                "agent.confidence_threshold must be in [0, 1]",
            ));
        }
        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(PilotError::config(
                "scheduler.max_concurrent_tasks must be > 0",
            ));
        }
        Ok(())
    }

    /// Get the full Ollama API URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama.host, self.ollama.port)
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}
