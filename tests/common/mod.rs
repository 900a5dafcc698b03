//! Shared fakes for integration tests
//!
//! A scripted completion client, an in-memory browser driver that records
//! every call, and a tab provider that tracks how many tabs are open at once.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tabpilot::browser::{BrowserDriver, Tab, TabProvider, WaitCondition};
use tabpilot::core::{Config, PilotError, Result};
use tabpilot::llm::{CompletionClient, CompletionRequest, OracleGateway};

/// Whether a prompt comes from the goal evaluator
pub fn is_evaluation(prompt: &str) -> bool {
    prompt.contains("\"achieved\"")
}

pub fn verdict(achieved: bool, confidence: f64) -> String {
    json!({ "achieved": achieved, "confidence": confidence, "reasoning": "scripted" }).to_string()
}

type Script = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Completion client answering every prompt through a closure
pub struct ScriptedClient {
    script: Script,
    calls: AtomicUsize,
    evaluations: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(script: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            evaluations: AtomicUsize::new(0),
        })
    }

    /// Planner replies with `plan`, evaluator with the given verdict
    pub fn planner(
        plan: impl Fn(&str) -> String + Send + Sync + 'static,
        achieved: bool,
        confidence: f64,
    ) -> Arc<Self> {
        Self::new(move |prompt| {
            if is_evaluation(prompt) {
                Ok(verdict(achieved, confidence))
            } else {
                Ok(plan(prompt))
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if is_evaluation(&request.prompt) {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
        }
        (self.script)(&request.prompt)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Test configuration: no settle delay, generous oracle budget
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.browser.settle_delay_ms = 0;
    config.oracle.ceiling_per_window = 1000;
    config.agent.max_cycles = 5;
    config.agent.failure_ceiling = 4;
    config
}

pub fn gateway(client: Arc<ScriptedClient>, config: &Config) -> Arc<OracleGateway> {
    Arc::new(OracleGateway::new(client, &config.oracle))
}

/// A small page as the extraction script would return it
pub fn sample_extraction() -> Value {
    json!({
        "root": 0,
        "nodes": [
            {"kind": "element", "id": 0, "tag": "body", "children": [1, 3], "path": "/body[1]"},
            {"kind": "element", "id": 1, "tag": "h1", "children": [2], "path": "/body[1]/h1[1]"},
            {"kind": "text", "id": 2, "text": "Example Domain", "path": "/body[1]/h1[1]"},
            {"kind": "element", "id": 3, "tag": "a", "attributes": {"href": "https://www.iana.org/domains/example"}, "children": [4], "path": "/body[1]/div[1]/p[2]/a[1]"},
            {"kind": "text", "id": 4, "text": "More information...", "path": "/body[1]/div[1]/p[2]/a[1]"}
        ]
    })
}

#[derive(Default)]
struct DriverState {
    url: String,
    calls: Vec<String>,
    failing: HashSet<String>,
}

/// In-memory browser driver
///
/// Navigating to a URL containing "slow" blocks for a long time, which lets
/// tests exercise timeouts.
pub struct FakeDriver {
    state: Mutex<DriverState>,
    extraction: Value,
    text_match: Option<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverState {
                url: "about:blank".to_string(),
                ..Default::default()
            }),
            extraction: Value::String(sample_extraction().to_string()),
            text_match: None,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Structural path returned by text lookups
    pub fn with_text_match(mut self, path: &str) -> Self {
        self.text_match = Some(path.to_string());
        self
    }

    /// Delay applied to every navigation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every call of an operation fail
    pub fn fail(self, operation: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(operation.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    /// Most navigations ever in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &str, detail: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", operation, detail).trim().to_string());
        if state.failing.contains(operation) {
            return Err(PilotError::driver(format!("{} failed on {}", operation, detail)));
        }
        Ok(())
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.record("navigate", url)?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if url.contains("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn click(&self, locator: &str) -> Result<()> {
        self.record("click", locator)
    }

    async fn type_text(&self, locator: &str, text: &str) -> Result<()> {
        self.record("type", &format!("{} {}", locator, text))
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.record("press", key)
    }

    async fn wait_for(&self, condition: &WaitCondition) -> Result<()> {
        self.record("wait", &condition.to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.record("screenshot", "")?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        if script.contains("MAX_NODES") {
            self.record("evaluate", "extract")?;
            return Ok(self.extraction.clone());
        }
        if script.contains("querySelectorAll") {
            self.record("evaluate", "locate")?;
            return Ok(self
                .text_match
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null));
        }
        self.record("evaluate", "script")?;
        Ok(Value::String("page text".to_string()))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url())
    }

    async fn title(&self) -> Result<String> {
        let url = self.url();
        Ok(if url.contains("example.com") {
            "Example Domain".to_string()
        } else {
            String::new()
        })
    }
}

#[derive(Default)]
struct TabCounts {
    open: HashSet<String>,
    max_open: usize,
    opened: usize,
    closed: Vec<String>,
    drivers: HashMap<String, Arc<FakeDriver>>,
}

/// Tab provider handing out fake drivers and counting open tabs
pub struct FakeTabs {
    counts: Mutex<TabCounts>,
    delay: Duration,
}

impl FakeTabs {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            counts: Mutex::new(TabCounts::default()),
            delay,
        })
    }

    fn open(&self, id: &str) -> Tab {
        let mut counts = self.counts.lock().unwrap();
        if counts.open.insert(id.to_string()) {
            counts.opened += 1;
            counts.max_open = counts.max_open.max(counts.open.len());
        }
        let delay = self.delay;
        let driver = counts
            .drivers
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(FakeDriver::new().with_delay(delay)))
            .clone();
        Tab {
            id: id.to_string(),
            driver,
        }
    }

    /// The driver behind a tab id, shared by every attach of that id
    pub fn driver(&self, id: &str) -> Option<Arc<FakeDriver>> {
        self.counts.lock().unwrap().drivers.get(id).cloned()
    }

    pub fn max_open(&self) -> usize {
        self.counts.lock().unwrap().max_open
    }

    pub fn open_now(&self) -> usize {
        self.counts.lock().unwrap().open.len()
    }

    pub fn opened(&self) -> usize {
        self.counts.lock().unwrap().opened
    }

    pub fn closed(&self) -> Vec<String> {
        self.counts.lock().unwrap().closed.clone()
    }
}

#[async_trait]
impl TabProvider for FakeTabs {
    async fn new_tab(&self) -> Result<Tab> {
        let next = self.counts.lock().unwrap().opened + 1;
        Ok(self.open(&format!("fake-{}", next)))
    }

    async fn attach(&self, id: &str) -> Result<Tab> {
        Ok(self.open(id))
    }

    async fn close_tab(&self, id: &str) -> Result<()> {
        let mut counts = self.counts.lock().unwrap();
        counts.open.remove(id);
        counts.closed.push(id.to_string());
        Ok(())
    }

    async fn list_tabs(&self) -> Result<Vec<String>> {
        Ok(self.counts.lock().unwrap().open.iter().cloned().collect())
    }
}
