//! Keyword-based capability inference for submitted tasks.

use crate::config::RoutingRule;
use crate::error::{OrchestrationError, Result};
use crate::task::Task;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// Derives capability tags from a task description.
#[derive(Debug, Clone)]
pub struct TaskAnalyzer {
    rules: Vec<(String, Regex)>,
}

impl TaskAnalyzer {
    /// Compiles the routing rules into word-boundary matchers.
    ///
    /// # Errors
    /// Returns `Configuration` if a rule has no keywords.
    pub fn new(rules: &[RoutingRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.keywords.is_empty() {
                return Err(OrchestrationError::Configuration(format!(
                    "routing rule for tag '{}' has no keywords",
                    rule.tag
                )));
            }
            let alternatives: Vec<String> =
                rule.keywords.iter().map(|k| regex::escape(k.trim())).collect();
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            let regex = Regex::new(&pattern).map_err(|e| {
                OrchestrationError::Configuration(format!("routing rule '{}': {}", rule.tag, e))
            })?;
            compiled.push((rule.tag.clone(), regex));
        }
        Ok(Self { rules: compiled })
    }

    /// Tags whose keywords appear in `description`.
    pub fn infer_tags(&self, description: &str) -> BTreeSet<String> {
        self.rules
            .iter()
            .filter(|(_, regex)| regex.is_match(description))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Fills in the task's tags when the submitter gave none.
    pub fn apply(&self, task: &mut Task) {
        if !task.tags.is_empty() {
            return;
        }
        task.tags = self.infer_tags(&task.description);
        debug!(task_id = %task.id, tags = ?task.tags, "Inferred task tags");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_routing_rules;

    fn analyzer() -> TaskAnalyzer {
        TaskAnalyzer::new(&default_routing_rules()).unwrap()
    }

    #[test]
    fn test_infers_ui_tag() {
        let tags = analyzer().infer_tags("Create UI component for booking form");
        assert!(tags.contains("ui"));
    }

    #[test]
    fn test_infers_multiple_tags() {
        let tags = analyzer().infer_tags("Setup API integration with Square and add tests");
        assert!(tags.contains("api"));
        assert!(tags.contains("qa"));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let tags = analyzer().infer_tags("Refactor the apiary module");
        assert!(!tags.contains("api"));
    }

    #[test]
    fn test_explicit_tags_are_kept() {
        let mut task = Task::new("t1", "Create UI component", 1).with_tag("security");
        analyzer().apply(&mut task);
        assert_eq!(task.tags.len(), 1);
        assert!(task.tags.contains("security"));
    }

    #[test]
    fn test_rule_without_keywords_is_rejected() {
        let rules = vec![RoutingRule { tag: "empty".to_string(), keywords: vec![] }];
        assert!(TaskAnalyzer::new(&rules).is_err());
    }
}
