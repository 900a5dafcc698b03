//! Browser module - page access and DOM grounding
//!
//! Drivers execute primitive page operations; the selector resolver turns a
//! page into a `DomTree` and maps references in that tree back to locators.

pub mod agent_browser;
pub mod dom;
pub mod driver;
pub mod selector;

pub use agent_browser::{AgentBrowser, AgentBrowserTabs};
pub use dom::{DomNode, DomTree, ElementNode, NodeId, StructuralPath, TextNode};
pub use driver::{BrowserDriver, Tab, TabProvider, WaitCondition};
pub use selector::{
    canonical_locator, ground, structural_path_of, to_locator, Locator, SelectorResolver,
};
