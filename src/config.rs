//! Configuration for the streaming agent
//!
//! [`AgentConfig`] is the snapshot the controller reads at the start of every cycle and
//! before every tool call. Hosts build one with [`AgentConfig::builder`], pick up
//! overrides from the environment with [`AgentConfig::from_env`], or restore a
//! previously persisted copy with [`AgentConfig::from_json`].

use serde::{Deserialize, Serialize};
use std::env;

/// Default chat completions endpoint
pub const DEFAULT_API_ENDPOINT: &str = "https://api.aihubmix.com/v1/chat/completions";

/// Default model name
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Default search endpoint used by the `search_web` tool
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://ddg-webapp-aagd.vercel.app/search";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const ENV_API_KEY: &str = "STREAMING_AGENT_API_KEY";
const ENV_ENDPOINT: &str = "STREAMING_AGENT_ENDPOINT";
const ENV_MODEL: &str = "STREAMING_AGENT_MODEL";
const ENV_SEARCH_ENDPOINT: &str = "STREAMING_AGENT_SEARCH_ENDPOINT";
const ENV_SEARCH_KEY: &str = "STREAMING_AGENT_SEARCH_KEY";

/// Settings for the chat endpoint, the search tool and the loop itself
#[derive(Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Bearer token for the chat endpoint. Required before submitting.
    pub api_key: String,

    /// Full URL of the chat completions endpoint
    pub api_endpoint: String,

    /// Model name sent with every request
    pub model: String,

    /// Prepended as a system message when non-empty
    pub system_prompt: String,

    /// Base URL of the search API
    pub search_endpoint: String,

    /// Sent as `X-Search-Api-Key` when non-empty
    pub search_key: String,

    /// HTTP timeout for chat and search requests, in seconds
    pub timeout_secs: u64,

    /// Upper bound on tool rounds per submitted message; `None` means keep going
    /// until the model stops calling tools
    pub max_tool_rounds: Option<u32>,

    /// Keep the partial assistant text on cancel instead of replacing it with
    /// the fixed cancel message
    pub keep_partial_on_cancel: bool,
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("api_key", &"***")
            .field("api_endpoint", &self.api_endpoint)
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("search_endpoint", &self.search_endpoint)
            .field("search_key", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("keep_partial_on_cancel", &self.keep_partial_on_cancel)
            .finish()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            search_key: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_tool_rounds: None,
            keep_partial_on_cancel: false,
        }
    }
}

/// The subset of [`AgentConfig`] a UI layer persists between sessions.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    search_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    search_key: Option<String>,
}

/// Trimmed value, or `None` when nothing is left.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AgentConfig {
    /// Create a new builder for AgentConfig
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Defaults overridden by `STREAMING_AGENT_*` environment variables.
    ///
    /// ```rust,no_run
    /// use streaming_agent::AgentConfig;
    ///
    /// // STREAMING_AGENT_API_KEY=sk-... STREAMING_AGENT_MODEL=gpt-4o
    /// let config = AgentConfig::from_env();
    /// ```
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(key) = non_empty(lookup(ENV_API_KEY)) {
            config.api_key = key;
        }
        if let Some(endpoint) = non_empty(lookup(ENV_ENDPOINT)) {
            config.api_endpoint = endpoint;
        }
        if let Some(model) = non_empty(lookup(ENV_MODEL)) {
            config.model = model;
        }
        if let Some(endpoint) = non_empty(lookup(ENV_SEARCH_ENDPOINT)) {
            config.search_endpoint = endpoint;
        }
        if let Some(key) = non_empty(lookup(ENV_SEARCH_KEY)) {
            config.search_key = key;
        }
        config
    }

    /// Restores the user-editable fields to their defaults and clears both keys.
    /// Loop settings (`timeout_secs`, `max_tool_rounds`, `keep_partial_on_cancel`)
    /// are left alone.
    pub fn reset(&mut self) {
        let defaults = Self::default();
        self.api_key = defaults.api_key;
        self.api_endpoint = defaults.api_endpoint;
        self.model = defaults.model;
        self.system_prompt = defaults.system_prompt;
        self.search_endpoint = defaults.search_endpoint;
        self.search_key = defaults.search_key;
    }

    /// Serializes the user-editable fields with camelCase keys
    /// (`apiKey`, `apiEndpoint`, `model`, `systemPrompt`, `searchEndpoint`, `searchKey`).
    pub fn to_json(&self) -> crate::Result<String> {
        let persisted = PersistedConfig {
            api_key: Some(self.api_key.clone()),
            api_endpoint: Some(self.api_endpoint.clone()),
            model: Some(self.model.clone()),
            system_prompt: Some(self.system_prompt.clone()),
            search_endpoint: Some(self.search_endpoint.clone()),
            search_key: Some(self.search_key.clone()),
        };
        Ok(serde_json::to_string(&persisted)?)
    }

    /// Defaults with a persisted copy applied on top.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let mut config = Self::default();
        config.apply_json(json)?;
        Ok(config)
    }

    /// Applies a persisted copy. Only fields that are present and non-empty after
    /// trimming override the current values.
    pub fn apply_json(&mut self, json: &str) -> crate::Result<()> {
        let persisted: PersistedConfig = serde_json::from_str(json)?;

        if let Some(key) = non_empty(persisted.api_key) {
            self.api_key = key;
        }
        if let Some(endpoint) = non_empty(persisted.api_endpoint) {
            self.api_endpoint = endpoint;
        }
        if let Some(model) = non_empty(persisted.model) {
            self.model = model;
        }
        if let Some(prompt) = non_empty(persisted.system_prompt) {
            self.system_prompt = prompt;
        }
        if let Some(endpoint) = non_empty(persisted.search_endpoint) {
            self.search_endpoint = endpoint;
        }
        if let Some(key) = non_empty(persisted.search_key) {
            self.search_key = key;
        }
        Ok(())
    }

    /// Checks the fields a cycle cannot run without.
    pub fn validate(&self) -> crate::Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(crate::Error::config("api key is required"));
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(crate::Error::config("api endpoint is required"));
        }
        if self.model.trim().is_empty() {
            return Err(crate::Error::config("model is required"));
        }
        Ok(())
    }
}

/// Builder for AgentConfig
#[derive(Default)]
pub struct AgentConfigBuilder {
    api_key: Option<String>,
    api_endpoint: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    search_endpoint: Option<String>,
    search_key: Option<String>,
    timeout_secs: Option<u64>,
    max_tool_rounds: Option<u32>,
    keep_partial_on_cancel: Option<bool>,
}

impl std::fmt::Debug for AgentConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfigBuilder")
            .field("api_endpoint", &self.api_endpoint)
            .field("model", &self.model)
            .field("search_endpoint", &self.search_endpoint)
            .finish()
    }
}

impl AgentConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn api_endpoint(mut self, url: impl Into<String>) -> Self {
        self.api_endpoint = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn search_endpoint(mut self, url: impl Into<String>) -> Self {
        self.search_endpoint = Some(url.into());
        self
    }

    pub fn search_key(mut self, key: impl Into<String>) -> Self {
        self.search_key = Some(key.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = Some(rounds);
        self
    }

    pub fn keep_partial_on_cancel(mut self, keep: bool) -> Self {
        self.keep_partial_on_cancel = Some(keep);
        self
    }

    /// Fills unset fields with defaults.
    ///
    /// The API key may still be empty here; it is checked when a message is
    /// submitted so a host can construct the client before the user enters one.
    pub fn build(self) -> crate::Result<AgentConfig> {
        let defaults = AgentConfig::default();

        let api_endpoint = self
            .api_endpoint
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.api_endpoint);
        if api_endpoint.is_empty() {
            return Err(crate::Error::config("api endpoint must not be empty"));
        }

        let model = self
            .model
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.model);
        if model.is_empty() {
            return Err(crate::Error::config("model must not be empty"));
        }

        let timeout_secs = self.timeout_secs.unwrap_or(defaults.timeout_secs);
        if timeout_secs == 0 {
            return Err(crate::Error::config("timeout must be at least one second"));
        }

        Ok(AgentConfig {
            api_key: self.api_key.map(|v| v.trim().to_string()).unwrap_or_default(),
            api_endpoint,
            model,
            system_prompt: self
                .system_prompt
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.system_prompt),
            search_endpoint: self
                .search_endpoint
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.search_endpoint),
            search_key: self
                .search_key
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            timeout_secs,
            max_tool_rounds: self.max_tool_rounds,
            keep_partial_on_cancel: self.keep_partial_on_cancel.unwrap_or(false),
        })
    }
}
