//! Action executor tests against the in-memory driver

mod common;

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use common::FakeDriver;
use tabpilot::agent::ActionExecutor;
use tabpilot::browser::SelectorResolver;
use tabpilot::core::{Action, PilotError, Task};

fn executor(driver: &Arc<FakeDriver>) -> ActionExecutor {
    ActionExecutor::new(driver.clone(), SelectorResolver::default())
}

fn click(selector: &str) -> Task {
    Task::new(
        Action::Click {
            selector: Some(selector.to_string()),
            text: None,
        },
        "click",
    )
}

#[tokio::test]
async fn test_structural_path_is_grounded_before_clicking() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = click("/body[1]/div[2]/button");

    assert_ok!(executor(&driver).execute(&mut task).await);

    assert!(task.is_completed());
    assert_eq!(
        driver.calls(),
        vec!["click body:nth-of-type(1) > div:nth-of-type(2) > button:nth-of-type(1)"]
    );
}

#[tokio::test]
async fn test_css_selector_passes_through() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = click("  #submit ");

    assert_ok!(executor(&driver).execute(&mut task).await);
    assert_eq!(driver.calls(), vec!["click #submit"]);
}

#[tokio::test]
async fn test_invalid_task_never_reaches_driver() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = Task::new(
        Action::Type {
            selector: " ".to_string(),
            text: "hello".to_string(),
            submit: false,
        },
        "type into nothing",
    );

    let err = assert_err!(executor(&driver).execute(&mut task).await);

    assert!(task.is_failed());
    assert!(driver.calls().is_empty());
    match err {
        PilotError::Execution {
            task_id, artifact, ..
        } => {
            assert_eq!(task_id, task.id.to_string());
            assert!(artifact.is_none());
        }
        other => panic!("expected Execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_driver_failure_saves_screenshot() {
    let dir = std::env::temp_dir().join(format!("tabpilot-artifacts-{}", std::process::id()));
    let driver = Arc::new(FakeDriver::new().fail("click"));
    let executor = executor(&driver).with_artifacts_dir(Some(dir.clone()));
    let mut task = click("#gone");

    let err = assert_err!(executor.execute(&mut task).await);

    assert!(task.is_failed());
    assert!(task.error().unwrap().contains("click failed"));
    let artifact = match err {
        PilotError::Execution { artifact, .. } => artifact.unwrap(),
        other => panic!("expected Execution error, got {other:?}"),
    };
    assert!(artifact.contains(task.id.as_str()));
    assert!(std::path::Path::new(&artifact).exists());
    assert_eq!(driver.calls(), vec!["click #gone", "screenshot"]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_failure_without_artifact_dir_still_describes_page() {
    let driver = Arc::new(FakeDriver::new().fail("press"));
    let mut task = Task::new(
        Action::Press {
            key: "Escape".to_string(),
        },
        "dismiss",
    );

    let err = assert_err!(executor(&driver).execute(&mut task).await);

    match err {
        PilotError::Execution { artifact, .. } => {
            assert!(artifact.unwrap().contains("about:blank"));
        }
        other => panic!("expected Execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_click_by_text_uses_page_lookup() {
    let driver = Arc::new(FakeDriver::new().with_text_match("/body[1]/a[1]"));
    let mut task = Task::new(
        Action::ClickByText {
            text: "More information".to_string(),
        },
        "follow link",
    );

    assert_ok!(executor(&driver).execute(&mut task).await);
    assert_eq!(
        driver.calls(),
        vec![
            "evaluate locate",
            "click body:nth-of-type(1) > a:nth-of-type(1)"
        ]
    );
}

#[tokio::test]
async fn test_click_by_text_falls_back_to_extracted_tree() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = Task::new(
        Action::ClickByText {
            text: "More information".to_string(),
        },
        "follow link",
    );

    assert_ok!(executor(&driver).execute(&mut task).await);
    assert_eq!(
        driver.calls(),
        vec![
            "evaluate locate",
            "evaluate extract",
            "click body:nth-of-type(1) > div:nth-of-type(1) > p:nth-of-type(2) > a:nth-of-type(1)"
        ]
    );
}

#[tokio::test]
async fn test_click_by_text_without_match_fails() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = Task::new(
        Action::Click {
            selector: None,
            text: Some("Sign In".to_string()),
        },
        "sign in",
    );

    assert_err!(executor(&driver).execute(&mut task).await);
    assert!(task.error().unwrap().contains("no clickable element"));
}

#[tokio::test]
async fn test_type_with_submit_presses_enter() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = Task::new(
        Action::Type {
            selector: "input[name=\"q\"]".to_string(),
            text: "rust".to_string(),
            submit: true,
        },
        "search",
    );

    assert_ok!(executor(&driver).execute(&mut task).await);
    assert_eq!(
        driver.calls(),
        vec!["type input[name=\"q\"] rust", "press Enter"]
    );
}

#[tokio::test]
async fn test_custom_and_extract_results() {
    let driver = Arc::new(FakeDriver::new());
    let executor = executor(&driver);

    let mut custom = Task::new(
        Action::Custom {
            instruction: "look around".to_string(),
        },
        "think",
    );
    assert_ok!(executor.execute(&mut custom).await);
    assert_eq!(custom.result(), Some(&serde_json::json!("look around")));
    assert!(driver.calls().is_empty());

    let mut extract = Task::new(Action::Extract { selector: None }, "read page");
    assert_ok!(executor.execute(&mut extract).await);
    assert_eq!(extract.result(), Some(&serde_json::json!("page text")));
}

#[tokio::test]
async fn test_navigate_records_url() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = Task::new(
        Action::Navigate {
            url: "https://example.com".to_string(),
        },
        "open",
    );

    assert_ok!(executor(&driver).execute(&mut task).await);
    assert_eq!(
        task.result(),
        Some(&serde_json::json!({ "url": "https://example.com" }))
    );
    assert_eq!(driver.url(), "https://example.com");
}

#[tokio::test]
async fn test_wait_for_visible_text() {
    let driver = Arc::new(FakeDriver::new());
    let mut task = Task::new(
        Action::Wait {
            selector: None,
            text: Some(" Example Domain ".to_string()),
            duration_ms: None,
        },
        "wait for heading",
    );

    assert_ok!(executor(&driver).execute(&mut task).await);
    assert!(task.is_completed());
    assert_eq!(driver.calls(), vec!["wait text \"Example Domain\""]);
}
