use std::time::Duration;

/// Context window budget applied before every model call.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextWindowConfig {
    /// Used when the model does not report its window.
    pub default_window: u64,
    pub total_threshold: f64,
    pub system_prompt_threshold: f64,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            default_window: 100_000,
            total_threshold: 0.95,
            system_prompt_threshold: 0.7,
        }
    }
}

/// Runtime configuration for run processing.
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerConfig {
    pub max_run_messages: usize,
    pub cycle_window: usize,
    pub max_steps: usize,
    pub default_model: String,
    pub search_model: String,
    pub summary_model: String,
    pub title_model: String,
    pub title_words: usize,
    pub summarize_threshold_chars: usize,
    pub relevant_tool_limit: usize,
    pub message_load_limit: usize,
    pub cluster_settings_ttl: Duration,
    pub app_origin: String,
    pub context: ContextWindowConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_run_messages: 100,
            cycle_window: 10,
            max_steps: 100,
            default_model: "claude-3-5-sonnet".to_string(),
            search_model: "claude-3-5-sonnet".to_string(),
            summary_model: "claude-3-haiku".to_string(),
            title_model: "claude-3-haiku".to_string(),
            title_words: 10,
            summarize_threshold_chars: 10_000,
            relevant_tool_limit: 50,
            message_load_limit: 1_000,
            cluster_settings_ttl: Duration::from_secs(120),
            app_origin: "http://localhost:3000".to_string(),
            context: ContextWindowConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn run_url(&self, cluster_id: &str, run_id: &str) -> String {
        format!(
            "{}/clusters/{cluster_id}/runs/{run_id}",
            self.app_origin.trim_end_matches('/')
        )
    }
}
