//! Orchestrator configuration.
//!
//! Configuration is TOML. Every field has a default, so an empty file (or no
//! file at all) yields a runnable setup with the built-in agent roster.

use crate::trigger::TriggerDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Execution loop settings.
    pub execution: ExecutionConfig,
    /// Score learning settings.
    pub learning: LearningConfig,
    /// Trigger poll settings and definitions.
    pub triggers: TriggersConfig,
    /// Duplication checker settings.
    pub dedup: DedupConfig,
    /// Static agent roster.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
    /// Keyword routing rules.
    pub routing: RoutingConfig,
    /// Status export settings.
    pub status: StatusConfig,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            learning: LearningConfig::default(),
            triggers: TriggersConfig::default(),
            dedup: DedupConfig::default(),
            agents: default_agents(),
            routing: RoutingConfig::default(),
            status: StatusConfig::default(),
            log_level: None,
        }
    }
}

/// Execution loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Sleep between polls while the queue is empty.
    pub idle_poll_ms: u64,
    /// Sleep after returning a task to the queue for lack of an agent.
    pub requeue_backoff_ms: u64,
    /// Per-task timeout; 0 disables it.
    pub task_timeout_secs: u64,
    /// Finished tasks retained in the queue history.
    pub history_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 100,
            requeue_backoff_ms: 500,
            task_timeout_secs: 300,
            history_limit: 100,
        }
    }
}

impl ExecutionConfig {
    /// Idle poll interval.
    #[must_use]
    pub const fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Backoff after a requeue.
    #[must_use]
    pub const fn requeue_backoff(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff_ms)
    }

    /// Per-task timeout, if enabled.
    #[must_use]
    pub const fn task_timeout(&self) -> Option<Duration> {
        if self.task_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.task_timeout_secs))
        }
    }
}

/// Score learning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// EMA smoothing factor α in `new = α·observed + (1-α)·old`.
    pub smoothing_factor: f64,
    /// Score given to agents configured without one.
    pub initial_score: f64,
    /// Composition of the per-execution score.
    pub scoring: ScoringConfig,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self { smoothing_factor: 0.2, initial_score: 50.0, scoring: ScoringConfig::default() }
    }
}

/// Composition of the per-execution outcome score.
///
/// `score = success_weight·[success] + speed_weight·min(1, target/duration)
/// - error_penalty·errors`, clamped to [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Points for a self-reported success.
    pub success_weight: f64,
    /// Points for finishing within the target duration.
    pub speed_weight: f64,
    /// Duration that still earns full speed points.
    pub target_duration_secs: f64,
    /// Points removed per reported error.
    pub error_penalty: f64,
    /// Minimum score for a successful run to count as `success` rather than `partial`.
    pub success_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            success_weight: 70.0,
            speed_weight: 30.0,
            target_duration_secs: 60.0,
            error_penalty: 10.0,
            success_threshold: 70.0,
        }
    }
}

/// Trigger poll settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    /// Seconds between trigger evaluations.
    pub poll_interval_secs: u64,
    /// Trigger definitions.
    pub definitions: Vec<TriggerDefinition>,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self { poll_interval_secs: 30, definitions: Vec::new() }
    }
}

impl TriggersConfig {
    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Duplication checker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Root of the artifact tree; no root disables artifact checks.
    pub artifact_root: Option<PathBuf>,
    /// File extensions counted as artifacts; empty accepts every file.
    pub extensions: Vec<String>,
    /// Identifiers shorter than this (after normalization) never match.
    pub min_identifier_len: usize,
    /// Also gate external submissions, not only trigger-generated tasks.
    pub check_submissions: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            artifact_root: None,
            extensions: vec![
                "md".to_string(),
                "tsx".to_string(),
                "ts".to_string(),
                "jsx".to_string(),
                "js".to_string(),
                "rs".to_string(),
            ],
            min_identifier_len: 4,
            check_submissions: true,
        }
    }
}

/// A statically configured agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent name.
    pub name: String,
    /// Capability tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Starting performance score; defaults to `learning.initial_score`.
    #[serde(default)]
    pub score: Option<f64>,
}

impl AgentConfig {
    fn new(name: &str, score: f64, tags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            score: Some(score),
        }
    }
}

/// The built-in agent roster.
#[must_use]
pub fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new("learning-curator", 95.0, &["learning", "documentation"]),
        AgentConfig::new("reiki-frontend-strategist", 88.0, &["ui", "frontend"]),
        AgentConfig::new("business-api-strategist", 92.0, &["api", "backend"]),
        AgentConfig::new("qa-strategist", 90.0, &["qa", "testing"]),
        AgentConfig::new("security-strategist", 85.0, &["security"]),
        AgentConfig::new("infrastructure-strategist", 87.0, &["infrastructure", "deployment"]),
        AgentConfig::new("business-domain-strategist", 91.0, &["domain", "requirements"]),
    ]
}

/// A keyword rule mapping description words to a capability tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Tag assigned when any keyword matches.
    pub tag: String,
    /// Whole-word, case-insensitive keywords.
    pub keywords: Vec<String>,
}

impl RoutingRule {
    fn new(tag: &str, keywords: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
        }
    }
}

/// Keyword routing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Rules applied to tasks submitted without tags.
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { rules: default_routing_rules() }
    }
}

/// The built-in keyword rules.
#[must_use]
pub fn default_routing_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new("ui", &["ui", "component", "components", "page", "header", "footer", "form", "design"]),
        RoutingRule::new("api", &["api", "integration", "endpoint", "backend"]),
        RoutingRule::new("qa", &["test", "tests", "testing", "qa", "validate"]),
        RoutingRule::new("infrastructure", &["deploy", "hosting", "infrastructure", "assets", "ci"]),
        RoutingRule::new("security", &["security", "auth", "vulnerability"]),
        RoutingRule::new("learning", &["document", "documentation", "pattern", "patterns"]),
        RoutingRule::new("domain", &["requirements", "business", "clarify"]),
    ]
}

/// Status export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// JSON status file rewritten after every recorded result.
    pub status_file: Option<PathBuf>,
    /// JSON-lines file receiving every execution result.
    pub execution_log: Option<PathBuf>,
    /// Number of results kept for status queries.
    pub recent_results: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { status_file: None, execution_log: None, recent_results: 20 }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".autopilot")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("autopilot.toml")
    }

    /// Discover and load configuration files.
    ///
    /// A local `./autopilot.toml` takes precedence over the global
    /// `~/.autopilot/config.toml`; with neither present the defaults apply.
    pub fn discover_and_load() -> ConfigResult<Self> {
        for path in [Self::default_local_path(), Self::default_global_path()] {
            match Self::load_from_file(&path) {
                Ok(config) => return Ok(config),
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Self::default())
    }

    /// Check values that deserialization alone cannot enforce.
    pub fn validate(&self) -> ConfigResult<()> {
        self.validate_settings()?;
        self.validate_roster()
    }

    /// Check everything except the agent roster.
    ///
    /// Used when the registry is supplied separately from the config.
    pub fn validate_settings(&self) -> ConfigResult<()> {
        let alpha = self.learning.smoothing_factor;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "learning.smoothing_factor must be in (0, 1], got {}",
                alpha
            )));
        }
        if !(0.0..=100.0).contains(&self.learning.initial_score) {
            return Err(ConfigError::InvalidValue(format!(
                "learning.initial_score must be in [0, 100], got {}",
                self.learning.initial_score
            )));
        }

        let scoring = &self.learning.scoring;
        if scoring.success_weight < 0.0 || scoring.speed_weight < 0.0 || scoring.error_penalty < 0.0 {
            return Err(ConfigError::InvalidValue("scoring weights must be non-negative".to_string()));
        }
        if (scoring.success_weight + scoring.speed_weight - 100.0).abs() > f64::EPSILON {
            return Err(ConfigError::InvalidValue(format!(
                "scoring.success_weight + scoring.speed_weight must equal 100, got {}",
                scoring.success_weight + scoring.speed_weight
            )));
        }
        if scoring.target_duration_secs <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "scoring.target_duration_secs must be positive".to_string(),
            ));
        }

        if self.execution.idle_poll_ms == 0 {
            return Err(ConfigError::InvalidValue("execution.idle_poll_ms must be positive".to_string()));
        }
        if self.triggers.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "triggers.poll_interval_secs must be positive".to_string(),
            ));
        }

        let mut trigger_names = HashSet::new();
        for trigger in &self.triggers.definitions {
            if !trigger_names.insert(trigger.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate trigger name: {}",
                    trigger.name
                )));
            }
        }

        Ok(())
    }

    fn validate_roster(&self) -> ConfigResult<()> {
        if self.agents.is_empty() {
            return Err(ConfigError::InvalidValue("at least one agent must be configured".to_string()));
        }
        let mut names = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue("agent names must not be empty".to_string()));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!("duplicate agent name: {}", agent.name)));
            }
            if let Some(score) = agent.score {
                if !(0.0..=100.0).contains(&score) {
                    return Err(ConfigError::InvalidValue(format!(
                        "agent '{}' score must be in [0, 100], got {}",
                        agent.name, score
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerCondition;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agents.len(), 7);
        assert!((config.learning.smoothing_factor - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.triggers.poll_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            log_level = "debug"

            [learning]
            smoothing_factor = 0.5

            [[agents]]
            name = "solo"
            tags = ["ui"]

            [[triggers.definitions]]
            name = "refill"
            [triggers.definitions.condition]
            kind = "queue_depth_below"
            threshold = 1
            [triggers.definitions.template]
            id_prefix = "refill"
            description = "Review open work"
            priority = 10
        "#;
        let config = OrchestratorConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!((config.learning.smoothing_factor - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].score, None);
        assert_eq!(config.execution, ExecutionConfig::default());
        assert_eq!(
            config.triggers.definitions[0].condition,
            TriggerCondition::QueueDepthBelow { threshold: 1 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let mut config = OrchestratorConfig::default();
        config.learning.smoothing_factor = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
        config.learning.smoothing_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_agents() {
        let mut config = OrchestratorConfig::default();
        config.agents.push(config.agents[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_roster() {
        let config = OrchestratorConfig { agents: Vec::new(), ..OrchestratorConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbalanced_weights() {
        let mut config = OrchestratorConfig::default();
        config.learning.scoring.speed_weight = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("autopilot.toml");
        let mut config = OrchestratorConfig::default();
        config.execution.task_timeout_secs = 5;

        config.save_to_file(&path).unwrap();
        let loaded = OrchestratorConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.execution.task_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = OrchestratorConfig::load_from_file(Path::new("/nonexistent/autopilot.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
