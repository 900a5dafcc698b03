//! Browser driver abstraction
//!
//! The rest of the crate only talks to a page through `BrowserDriver`, and
//! only obtains pages through `TabProvider`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Result;

/// What a `wait_for` call blocks on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// A CSS locator becomes present
    Locator(String),
    /// Some text becomes visible
    Text(String),
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Locator(l) => write!(f, "locator {}", l),
            WaitCondition::Text(t) => write!(f, "text \"{}\"", t),
        }
    }
}

/// Primitive operations on one browser page
///
/// Locators passed in are CSS selectors; structural paths are converted
/// before they reach a driver.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn click(&self, locator: &str) -> Result<()>;

    /// Replace the value of an input with `text`
    async fn type_text(&self, locator: &str, text: &str) -> Result<()>;

    async fn press(&self, key: &str) -> Result<()>;

    async fn wait_for(&self, condition: &WaitCondition) -> Result<()>;

    /// PNG bytes of the visible viewport
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Run a script in the page and return its value
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;
}

/// An open tab and the driver bound to it
#[derive(Clone)]
pub struct Tab {
    pub id: String,
    pub driver: Arc<dyn BrowserDriver>,
}

impl fmt::Debug for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tab").field("id", &self.id).finish()
    }
}

/// Source of isolated browser tabs
#[async_trait]
pub trait TabProvider: Send + Sync {
    /// Open a fresh tab
    async fn new_tab(&self) -> Result<Tab>;

    /// Bind to a tab by id, opening it if it is not open yet
    async fn attach(&self, id: &str) -> Result<Tab>;

    async fn close_tab(&self, id: &str) -> Result<()>;

    async fn list_tabs(&self) -> Result<Vec<String>>;
}
