//! Task planner
//!
//! Asks the oracle for the single next action towards a goal. Oracle output
//! is treated as untrusted: it is parsed into a closed `Action` and validated,
//! and anything unusable is replaced by a safe fallback task. Planning never
//! fails from the loop's point of view.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::{render_history, Action, Config, PageSnapshot, PilotError, Result, Task};
use crate::llm::{CompletionRequest, OracleGateway};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>()\[\]]+"#).expect("url pattern is valid")
});

/// Instruction of the fallback task used when planning produced nothing usable
pub const REANALYZE_INSTRUCTION: &str = "Re-analyze the current page and decide the next step";

const ACTION_REFERENCE: &str = r#"Available actions (respond with exactly ONE JSON object, no markdown):
{"type":"navigate","url":"https://..."}
{"type":"click","selector":"<css locator or structural path>"}
{"type":"clickByText","text":"<visible text of a link or button>"}
{"type":"type","selector":"<css locator or structural path>","text":"...","submit":false}
{"type":"wait","selector":"<css locator>"}  or  {"type":"wait","text":"<visible text>"}  or  {"type":"wait","duration_ms":1000}
{"type":"extract","selector":"<css locator, omit for the whole page>"}
{"type":"press","key":"Enter"}
{"type":"scroll","direction":"down","pixels":600}
{"type":"screenshot"}
{"type":"custom","instruction":"<a reasoning step that needs no browser action>"}

Every object must also carry "description" (one short sentence) and "reasoning".

Rules:
1. Refer to elements by the locator after "=>" when a line has one, otherwise by the path after "@".
2. Never repeat a step that just failed in the same way; try an alternative.
3. If no page is loaded yet, start with navigate."#;

/// Plans the next task towards a goal
pub struct TaskPlanner {
    gateway: Arc<OracleGateway>,
    temperature: f32,
    history_window: usize,
}

impl TaskPlanner {
    pub fn new(gateway: Arc<OracleGateway>, config: &Config) -> Self {
        Self {
            gateway,
            temperature: config.models.planner_temperature,
            history_window: config.agent.history_window,
        }
    }

    /// Plan the next task; always returns a task
    pub async fn plan_next(
        &self,
        instruction: &str,
        history: &[Task],
        page: Option<&PageSnapshot>,
    ) -> Task {
        let page = page.filter(|p| !is_blank(p));
        let prompt = self.build_prompt(instruction, history, page, None);
        self.plan(instruction, page, &prompt).await
    }

    /// Plan one recovery task for `failed`, seeded with its error
    pub async fn plan_recovery(
        &self,
        instruction: &str,
        history: &[Task],
        failed: &Task,
        page: Option<&PageSnapshot>,
    ) -> Task {
        let page = page.filter(|p| !is_blank(p));
        let prompt = self.build_prompt(instruction, history, page, Some(failed));
        self.plan(instruction, page, &prompt).await.recovering(&failed.id)
    }

    async fn plan(&self, instruction: &str, page: Option<&PageSnapshot>, prompt: &str) -> Task {
        let request = CompletionRequest::new(prompt).temperature(self.temperature);

        let parsed = match self.gateway.complete_request(&request).await {
            Ok(text) => parse_task(&text),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(task) => {
                info!(kind = task.action.kind(), description = %task.description, "planned task");
                task
            }
            Err(e) => {
                warn!(error = %e, "planner output unusable, using fallback task");
                fallback_task(instruction, page.is_none(), &e)
            }
        }
    }

    /// Prompt for the next step, or for a recovery when `failed` is given
    pub fn build_prompt(
        &self,
        instruction: &str,
        history: &[Task],
        page: Option<&PageSnapshot>,
        failed: Option<&Task>,
    ) -> String {
        let page_section = match page {
            Some(p) => format!(
                "URL: {}\nTitle: {}\nElements (each line ends with @ <structural path>, and => <css locator> when one exists):\n{}",
                p.url, p.title, p.dom_summary
            ),
            None => "No page is loaded yet.".to_string(),
        };

        let mut prompt = format!(
            "You are controlling a web browser to accomplish a goal. Decide the single next action.\n\n\
             ## Goal\n{}\n\n## Steps so far\n{}\n## Current page\n{}\n\n",
            instruction.trim(),
            render_history(history, self.history_window),
            page_section
        );

        if let Some(task) = failed {
            prompt.push_str(&format!(
                "## Last step failed\nStep: {}\nError: {}\nPropose ONE different action that works around this failure.\n\n",
                task.description,
                task.error().unwrap_or("unknown error")
            ));
        }

        prompt.push_str(ACTION_REFERENCE);
        prompt
    }
}

fn is_blank(page: &PageSnapshot) -> bool {
    let url = page.url.trim();
    url.is_empty() || url == "about:blank"
}

/// Locate the JSON object in a model reply, ignoring fences and chatter
pub(crate) fn json_object(text: &str) -> Option<&str> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    (end > start).then(|| &cleaned[start..=end])
}

/// Parse a planner reply into a validated, planned task
pub fn parse_task(text: &str) -> Result<Task> {
    let object = json_object(text)
        .ok_or_else(|| PilotError::validation("planner reply holds no JSON object"))?;
    let mut value: serde_json::Value = serde_json::from_str(object)
        .map_err(|e| PilotError::validation(format!("planner reply is not valid JSON: {}", e)))?;

    let map = value
        .as_object_mut()
        .ok_or_else(|| PilotError::validation("planner reply is not an object"))?;

    // Some models name the tag "action" instead of "type"
    if !map.contains_key("type") {
        if let Some(kind) = map.remove("action") {
            map.insert("type".to_string(), kind);
        }
    }

    let description = take_string(map, "description");
    let reasoning = take_string(map, "reasoning");

    let action: Action = serde_json::from_value(value)
        .map_err(|e| PilotError::validation(format!("unknown or malformed action: {}", e)))?;
    let action = action.normalize()?;

    Ok(Task::new(action, description.unwrap_or_default()).with_reasoning(reasoning))
}

fn take_string(
    map: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    match map.remove(key)? {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    }
}

/// First http(s) URL mentioned in an instruction
pub fn first_url(instruction: &str) -> Option<String> {
    URL_PATTERN
        .find(instruction)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
}

fn fallback_task(instruction: &str, no_page: bool, cause: &PilotError) -> Task {
    if no_page {
        if let Some(url) = first_url(instruction) {
            let action = Action::Navigate { url };
            if action.validate().is_ok() {
                debug!("falling back to the url named in the instruction");
                return Task::new(action, "").with_reasoning(Some(format!(
                    "No page loaded and the planner reply was unusable ({})",
                    cause
                )));
            }
        }
    }

    Task::new(
        Action::Custom {
            instruction: REANALYZE_INSTRUCTION.to_string(),
        },
        "Re-analyze the page and decide the next step",
    )
    .with_reasoning(Some(format!("Planner fallback: {}", cause)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Sure!\n```json\n{\"type\": \"navigate\", \"url\": \"example.com\", \"description\": \"Open the site\", \"reasoning\": \"start\"}\n```";
        let task = parse_task(reply).unwrap();
        assert_eq!(
            task.action,
            Action::Navigate {
                url: "https://example.com".to_string()
            }
        );
        assert_eq!(task.description, "Open the site");
        assert_eq!(task.reasoning.as_deref(), Some("start"));
        assert_eq!(task.marker(), "planned");
    }

    #[test]
    fn test_parse_accepts_action_tag() {
        let task = parse_task(r#"{"action": "clickByText", "text": "Sign in"}"#).unwrap();
        assert_eq!(task.action.kind(), "clickByText");
        assert_eq!(task.description, "Click \"Sign in\"");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(parse_task("I think we should click the button").is_err());
        assert!(parse_task(r#"{"type": "teleport"}"#).is_err());
        assert!(parse_task(r#"{"type": "click"}"#).is_err());
        assert!(parse_task(r#"{"type": "navigate", "url": "javascript:void(0)"}"#).is_err());
    }

    #[test]
    fn test_first_url() {
        assert_eq!(
            first_url("navigate to https://example.com."),
            Some("https://example.com".to_string())
        );
        assert_eq!(first_url("find the weather"), None);
    }

    #[test]
    fn test_fallback_prefers_instruction_url_without_page() {
        let cause = PilotError::validation("nope");
        let task = fallback_task("open https://example.com/docs", true, &cause);
        assert_eq!(task.action.kind(), "navigate");

        let task = fallback_task("open https://example.com/docs", false, &cause);
        assert_eq!(
            task.action,
            Action::Custom {
                instruction: REANALYZE_INSTRUCTION.to_string()
            }
        );
    }
}
