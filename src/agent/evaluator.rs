//! Goal evaluator
//!
//! Decides whether the goal has been reached. Fails safe: before any browser
//! step completes, on oracle failure, or on an unusable verdict the answer is
//! "not yet".

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::planner::json_object;
use crate::core::{Config, PageSnapshot, PilotError, Result, Task};
use crate::llm::{CompletionRequest, OracleGateway};

/// The oracle's verdict on a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub achieved: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Parse and range-check an evaluator reply
pub fn parse_evaluation(text: &str) -> Result<Evaluation> {
    let object = json_object(text)
        .ok_or_else(|| PilotError::validation("evaluator reply holds no JSON object"))?;
    let evaluation: Evaluation = serde_json::from_str(object)
        .map_err(|e| PilotError::validation(format!("malformed evaluation: {}", e)))?;

    if !(0.0..=1.0).contains(&evaluation.confidence) {
        return Err(PilotError::validation(format!(
            "confidence {} outside [0, 1]",
            evaluation.confidence
        )));
    }
    Ok(evaluation)
}

pub struct GoalEvaluator {
    gateway: Arc<OracleGateway>,
    threshold: f64,
    temperature: f32,
}

impl GoalEvaluator {
    pub fn new(gateway: Arc<OracleGateway>, config: &Config) -> Self {
        Self {
            gateway,
            threshold: config.agent.confidence_threshold,
            temperature: config.models.evaluator_temperature,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether a verdict clears the confidence gate
    pub fn accepts(&self, evaluation: &Evaluation) -> bool {
        evaluation.achieved && evaluation.confidence > self.threshold
    }

    /// Ask the oracle for a verdict
    ///
    /// `None` when no browser action has completed yet, or when no usable
    /// verdict could be obtained.
    pub async fn evaluate(
        &self,
        instruction: &str,
        history: &[Task],
        page: &PageSnapshot,
    ) -> Option<Evaluation> {
        let completed: Vec<&Task> = history.iter().filter(|t| t.is_completed()).collect();
        if !completed.iter().any(|t| t.action.touches_page()) {
            debug!("no completed browser action, goal cannot be achieved yet");
            return None;
        }

        let prompt = build_prompt(instruction, &completed, page);
        let request = CompletionRequest::new(prompt).temperature(self.temperature);

        let reply = match self.gateway.complete_request(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "evaluator oracle call failed, assuming not achieved");
                return None;
            }
        };

        match parse_evaluation(&reply) {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                warn!(error = %e, "unusable evaluator reply, assuming not achieved");
                None
            }
        }
    }

    /// Verdict after the confidence gate
    pub async fn is_goal_achieved(
        &self,
        instruction: &str,
        history: &[Task],
        page: &PageSnapshot,
    ) -> bool {
        let Some(evaluation) = self.evaluate(instruction, history, page).await else {
            return false;
        };

        let accepted = self.accepts(&evaluation);
        info!(
            achieved = evaluation.achieved,
            confidence = evaluation.confidence,
            threshold = self.threshold,
            accepted,
            reasoning = %evaluation.reasoning,
            "goal evaluation"
        );
        accepted
    }
}

fn build_prompt(instruction: &str, completed: &[&Task], page: &PageSnapshot) -> String {
    let steps = completed
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let mut line = format!("{}. {}", i + 1, task.description);
            if let Some(result) = task.result() {
                let shown: String = result.to_string().chars().take(300).collect();
                line.push_str(&format!(" -> {}", shown));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You judge whether a browser automation goal has been accomplished.

## Goal
{}

## Completed steps
{}

## Current page
URL: {}
Title: {}
{}

Respond with ONLY this JSON object:
{{"achieved": true or false, "confidence": 0.0 to 1.0, "reasoning": "one sentence"}}
Only claim the goal is achieved when the page or the step results show it."#,
        instruction.trim(),
        steps,
        page.url,
        page.title,
        page.dom_summary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_evaluation() {
        let evaluation = parse_evaluation(
            "```json\n{\"achieved\": true, \"confidence\": 0.9, \"reasoning\": \"done\"}\n```",
        )
        .unwrap();
        assert!(evaluation.achieved);
        assert_eq!(evaluation.confidence, 0.9);

        assert!(parse_evaluation(r#"{"achieved": true, "confidence": 1.5}"#).is_err());
        assert!(parse_evaluation(r#"{"achieved": "yes", "confidence": 0.9}"#).is_err());
        assert!(parse_evaluation("looks good to me").is_err());
    }

    #[test]
    fn test_prompt_lists_completed_steps() {
        use crate::core::Action;

        let mut task = Task::new(
            Action::Navigate {
                url: "https://example.com".to_string(),
            },
            "Open example.com",
        );
        task.begin();
        task.complete(None);

        let page = PageSnapshot::new("https://example.com", "Example Domain", "h1 \"Example\"");
        let prompt = build_prompt("open example.com", &[&task], &page);
        assert!(prompt.contains("1. Open example.com"));
        assert!(prompt.contains("Title: Example Domain"));
        assert!(prompt.contains("\"achieved\""));
    }

    struct UnreachableClient;

    #[async_trait::async_trait]
    impl crate::llm::CompletionClient for UnreachableClient {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            panic!("evaluator must not consult the oracle without browser progress");
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_custom_steps_are_not_progress() {
        use crate::core::Action;

        let config = Config::default();
        let gateway = Arc::new(OracleGateway::new(Arc::new(UnreachableClient), &config.oracle));
        let evaluator = GoalEvaluator::new(gateway, &config);

        let mut task = Task::new(
            Action::Custom {
                instruction: "think it over".to_string(),
            },
            "",
        );
        task.begin();
        task.complete(None);

        let page = PageSnapshot::blank();
        assert!(evaluator.evaluate("book a flight", &[task], &page).await.is_none());
    }
}
