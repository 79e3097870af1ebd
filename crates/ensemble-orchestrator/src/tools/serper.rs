//! Web search through the Serper API (google.serper.dev).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Tool, ToolArguments, ToolHandler, ToolParameters, ToolResult};
use crate::error::{OrchestrationError, Result};

/// Environment variable holding the Serper API key.
pub const SERPER_API_KEY_ENV: &str = "SERPER_API_KEY";

/// Public Serper endpoint.
pub const DEFAULT_SERPER_URL: &str = "https://google.serper.dev";

const TOOL_NAME: &str = "Search the internet";
const TOOL_DESCRIPTION: &str =
    "A tool that can be used to search the internet with a search_query.";
const DEFAULT_RESULTS: u64 = 10;

/// Serper-backed web search.
#[derive(Clone)]
pub struct SerperSearchTool {
    api_key: String,
    base_url: String,
    n_results: u64,
    client: Client,
}

impl SerperSearchTool {
    /// Creates a search tool with an explicit API key.
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_SERPER_URL.to_string(),
            n_results: DEFAULT_RESULTS,
            client: Client::new(),
        }
    }

    /// Creates a search tool reading the key from `SERPER_API_KEY`.
    ///
    /// # Errors
    /// Returns an error if the variable is not set.
    pub fn from_env() -> Result<Self> {
        std::env::var(SERPER_API_KEY_ENV).map(Self::new).map_err(|_| {
            OrchestrationError::Other(format!("{} environment variable not set", SERPER_API_KEY_ENV))
        })
    }

    /// Points the tool at another Serper-compatible host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets how many results are requested when the model does not say.
    #[must_use]
    pub fn with_n_results(mut self, n_results: u64) -> Self {
        self.n_results = n_results.max(1);
        self
    }

    /// Wraps the search into a [`Tool`] an agent can call.
    pub fn into_tool(self) -> Tool {
        let parameters = ToolParameters::new()
            .add_property("search_query", "string", "Mandatory search query you want to use to search the internet", true)
            .add_property("n_results", "integer", "Number of results to return", false);
        Tool::new(TOOL_NAME, TOOL_DESCRIPTION, parameters, Arc::new(self))
    }
}

impl std::fmt::Debug for SerperSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperSearchTool")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("n_results", &self.n_results)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default, rename = "knowledgeGraph")]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

fn format_results(response: &SearchResponse, limit: usize) -> String {
    let mut blocks = Vec::new();

    if let Some(graph) = &response.knowledge_graph {
        let mut block = format!("Title: {}", graph.title);
        if let Some(kind) = &graph.kind {
            let _ = write!(block, " ({})", kind);
        }
        if let Some(website) = &graph.website {
            let _ = write!(block, "\nLink: {}", website);
        }
        if let Some(description) = &graph.description {
            let _ = write!(block, "\nSnippet: {}", description);
        }
        blocks.push(block);
    }

    for result in response.organic.iter().take(limit) {
        blocks.push(format!(
            "Title: {}\nLink: {}\nSnippet: {}",
            result.title, result.link, result.snippet
        ));
    }

    blocks.join("\n---\n")
}

#[async_trait]
impl ToolHandler for SerperSearchTool {
    async fn execute(&self, args: &ToolArguments) -> Result<ToolResult> {
        let Some(query) = args.get_string("search_query").filter(|q| !q.trim().is_empty()) else {
            return Ok(ToolResult::error("search_query is required"));
        };
        let num = args.get_u64("n_results").unwrap_or(self.n_results).max(1);

        debug!(query = %query, num, "Searching the web");

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .timeout(Duration::from_secs(30))
            .header("X-API-KEY", &self.api_key)
            .json(&SearchRequest { q: &query, num })
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Search request failed");
                return Ok(ToolResult::error(format!("Search request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Search API returned error status");
            return Ok(ToolResult::error(format!("Search API error ({}): {}", status, body)));
        }

        let parsed: SearchResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Failed to parse search response");
                return Ok(ToolResult::error(format!("Failed to parse search response: {}", e)));
            }
        };

        let limit = usize::try_from(num).unwrap_or(usize::MAX);
        let count = parsed.organic.len().min(limit);
        if count == 0 && parsed.knowledge_graph.is_none() {
            return Ok(ToolResult::success(format!("No results found for '{}'", query))
                .with_metadata("results", "0"));
        }

        Ok(ToolResult::success(format_results(&parsed, limit))
            .with_metadata("results", count.to_string()))
    }
}
