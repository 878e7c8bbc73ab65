//! The `search_web` tool
//!
//! One GET against the configured search endpoint:
//!
//! ```text
//! GET {search_endpoint}?q=<query>&max_results=5
//! X-Search-Api-Key: <search_key>        (only when a key is configured)
//! ```
//!
//! The response is JSON with the hits under `results` or `data`. At most
//! [`MAX_RESULTS`] items are kept. They are rendered into a numbered summary for
//! display, and the kept items themselves (pretty-printed JSON) become the payload
//! fed back to the model.
//!
//! There is no retry. A failed search is reported once as an `ok: false` outcome
//! and the model decides whether to try again.

use crate::config::AgentConfig;
use crate::types::{ToolCallRequest, ToolOutcome};
use crate::{Error, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Upper bound on items requested from and kept out of a search response
pub const MAX_RESULTS: usize = 5;

const SEARCH_KEY_HEADER: &str = "X-Search-Api-Key";

/// One normalized search hit, used for the display summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

impl SearchHit {
    /// Reads a raw item, falling back across the field names different search
    /// backends use.
    pub fn from_item(item: &Value) -> Self {
        Self {
            title: first_text(item, &["title", "name"])
                .unwrap_or("Untitled result")
                .to_string(),
            link: first_text(item, &["link", "url"]).unwrap_or_default().to_string(),
            snippet: first_text(item, &["body", "description", "snippet"])
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn first_text<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    #[serde(default)]
    query: Option<Value>,
}

/// Pulls a non-empty `query` string out of the call's JSON arguments.
pub fn parse_query(arguments: &str) -> Result<String> {
    let args: SearchArguments = serde_json::from_str(arguments)
        .map_err(|e| Error::tool_arguments(format!("arguments are not an object: {}", e)))?;

    let query = args
        .query
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if query.is_empty() {
        return Err(Error::tool_arguments("query is required"));
    }
    Ok(query.to_string())
}

/// `endpoint` with `q` set and `max_results` added unless the endpoint already
/// carries one.
pub fn build_search_url(endpoint: &str, query: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint.trim())
        .map_err(|e| Error::config(format!("invalid search endpoint '{}': {}", endpoint, e)))?;

    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "q")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let has_max_results = existing.iter().any(|(key, _)| key == "max_results");

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &existing {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("q", query);
        if !has_max_results {
            pairs.append_pair("max_results", &MAX_RESULTS.to_string());
        }
    }

    Ok(url)
}

/// Hit list out of a search response body, as the backend returned it.
pub fn extract_items(body: &Value) -> Vec<Value> {
    let items = body
        .get("results")
        .and_then(Value::as_array)
        .or_else(|| body.get("data").and_then(Value::as_array));

    items
        .cloned()
        .unwrap_or_default()
}

/// Numbered, human-readable rendering of the first [`MAX_RESULTS`] hits.
pub fn summarize(items: &[Value]) -> String {
    if items.is_empty() {
        return "No results found".to_string();
    }

    items
        .iter()
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(i, item)| {
            let hit = SearchHit::from_item(item);
            format!("{}. {}\n{}\n{}", i + 1, hit.title, hit.link, hit.snippet)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// HTTP client for the search endpoint.
#[derive(Debug, Clone, Default)]
pub struct WebSearch {
    http: reqwest::Client,
}

impl WebSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Runs the query and returns the full hit list.
    pub async fn search(&self, query: &str, config: &AgentConfig) -> Result<Vec<Value>> {
        let url = build_search_url(&config.search_endpoint, query)?;
        log::debug!("Searching {} for '{}'", config.search_endpoint, query);

        let mut request = self
            .http
            .get(url)
            .timeout(Duration::from_secs(config.timeout_secs));
        if !config.search_key.is_empty() {
            request = request.header(SEARCH_KEY_HEADER, &config.search_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::api(status, ""));
        }

        let body: Value = response.json().await?;
        Ok(extract_items(&body))
    }

    /// Executes a `search_web` call. Never fails; problems become `ok: false`.
    pub async fn run(&self, request: &ToolCallRequest, config: &AgentConfig) -> ToolOutcome {
        let result = match parse_query(&request.arguments) {
            Ok(query) => self.search(&query, config).await.and_then(|items| {
                let raw = serde_json::to_string_pretty(&items)?;
                Ok(ToolOutcome::success(summarize(&items), raw))
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::debug!("search_web call {} failed: {}", request.id, e);
                ToolOutcome::failure(format!("Search failed: {}", e), e.to_string())
            }
        }
    }
}
