//! Live browser integration tests
//!
//! Need agent-browser on PATH and a running Ollama with the configured model.

use std::time::Duration;

use tabpilot::agent::{Agent, ScheduledTask, TaskOutcome};
use tabpilot::browser::{AgentBrowser, BrowserDriver, SelectorResolver};
use tabpilot::core::{BrowserConfig, Config};
use tokio::time::timeout;

/// Helper to create an initialized agent for live tests
async fn create_browser_agent() -> Result<Agent, Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.agent.max_cycles = 6;
    config.agent.debug = false;
    config.scheduler.max_concurrent_tasks = 2;

    let agent = Agent::with_config(config)?;
    agent.initialize().await?;
    Ok(agent)
}

/// Test raw driver navigation and observation
#[tokio::test]
#[ignore] // Requires agent-browser to be installed
async fn test_driver_observes_example_com() {
    if !AgentBrowser::is_available().await {
        eprintln!("Skipping test: agent-browser not available");
        return;
    }

    let config = BrowserConfig::default();
    let browser = AgentBrowser::from_config("tabpilot-live-test", &config);

    let result = timeout(Duration::from_secs(60), async {
        browser.navigate("https://example.com").await?;
        SelectorResolver::from_config(&config).snapshot(&browser).await
    })
    .await;

    let _ = browser.close().await;
    let snapshot = result.expect("observation timed out").expect("observation failed");
    assert!(snapshot.url.contains("example.com"));
    assert!(snapshot.dom_summary.contains("Example Domain"));
}

/// Test a single goal end to end
#[tokio::test]
#[ignore]
async fn test_goal_on_example_com() {
    let agent = match create_browser_agent().await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Skipping test: {}", e);
            return;
        }
    };

    let result = timeout(
        Duration::from_secs(180),
        agent.run_goal("Open https://example.com and read the main heading"),
    )
    .await;

    assert!(result.is_ok(), "Goal timed out");
    let report = result.unwrap().expect("run failed to start");
    assert!(!report.history.is_empty());
    println!("{}", report.summary);
}

/// Test two goals in parallel tabs
#[tokio::test]
#[ignore]
async fn test_batch_in_parallel_tabs() {
    let agent = match create_browser_agent().await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Skipping test: {}", e);
            return;
        }
    };

    let tasks = vec![
        ScheduledTask::new("Open https://example.com and read the heading").priority(1),
        ScheduledTask::new("Open https://www.iana.org and find the about page")
            .timeout(Duration::from_secs(120)),
    ];

    let results = timeout(Duration::from_secs(300), agent.run_batch(tasks))
        .await
        .expect("batch timed out");

    assert_eq!(results.len(), 2);
    for result in &results {
        println!(
            "[{:?}] {} ({}ms)",
            result.outcome, result.instruction, result.duration_ms
        );
        assert_ne!(result.outcome, TaskOutcome::Errored);
    }
}
