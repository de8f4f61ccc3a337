use std::fmt::Write as _;
use std::time::Duration;

use reqwest::{Client, Url, header};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use storm_agent_core::tool::{Error as ToolError, Tool, ToolOutcome};

use super::{request_error, status_error};

const ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_COUNT: u32 = 5;
const MAX_COUNT: u32 = 20;
const MAX_NEWS_RESULTS: usize = 2;

#[derive(Deserialize, JsonSchema)]
pub struct WebSearchParameters {
    #[schemars(description = "The search query to find information about.")]
    query: String,
    #[schemars(
        description = "Number of results to return, default to 5.",
        range(min = 1, max = 20)
    )]
    count: Option<u32>,
    #[schemars(description = "Number of results to skip, default to 0.")]
    offset: Option<u32>,
    #[schemars(
        description = "Country code for localized results (e.g. `US`, `GB`), default to `US`."
    )]
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<ResultList>,
    #[serde(default)]
    news: Option<ResultList>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    age: Option<String>,
}

/// A tool for searching the web with the Brave Search API.
pub struct WebSearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
    parameter_schema: Value,
}

impl WebSearchTool {
    /// Creates a new web search tool with a Brave Search API key.
    #[inline]
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        WebSearchTool {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: ENDPOINT.to_owned(),
            parameter_schema: schema_for!(WebSearchParameters).to_value(),
        }
    }

    /// Sends the searches to another endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Tool for WebSearchTool {
    type Input = WebSearchParameters;

    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        r#"
Searches the web for current information.
Returns recent results with titles, snippets and URLs. Use `extract_content` afterwards to read a page in full."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: WebSearchParameters,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let count = input.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT);
            let url = search_url(&endpoint, &input, count)?;
            debug!("searching for {:?}", input.query);

            let resp = client
                .get(url)
                .header(header::ACCEPT, "application/json")
                .header("X-Subscription-Token", api_key)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .map_err(|err| request_error("Brave Search", err))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(status_error(
                    "Brave Search",
                    "BRAVE_SEARCH_API_KEY",
                    status,
                ));
            }

            let body: SearchResponse = resp
                .json()
                .await
                .map_err(|err| request_error("Brave Search", err))?;
            Ok(format_results(&input.query, body, count as usize))
        }
    }
}

fn search_url(
    endpoint: &str,
    input: &WebSearchParameters,
    count: u32,
) -> Result<Url, ToolError> {
    let query = input.query.trim();
    if query.is_empty() {
        return Err(ToolError::invalid_input().with_reason("`query` must not be empty"));
    }

    let count = count.to_string();
    let offset = input.offset.unwrap_or(0).to_string();
    let country = input.country.as_deref().unwrap_or("US");
    let mut params = vec![
        ("q", query),
        ("count", count.as_str()),
        ("country", country),
        ("search_lang", "en"),
    ];
    if input.offset.unwrap_or(0) > 0 {
        params.push(("offset", offset.as_str()));
    }
    Url::parse_with_params(endpoint, &params).map_err(|err| {
        ToolError::execution_error().with_reason(format!("invalid search endpoint: {err}"))
    })
}

fn format_results(query: &str, body: SearchResponse, count: usize) -> String {
    let web = body.web.unwrap_or_default().results;
    let news = body.news.unwrap_or_default().results;

    let web_results = web.into_iter().take(count).map(|r| ("web", r));
    let news_limit = MAX_NEWS_RESULTS.min(count.saturating_sub(web_results.len()));
    let results: Vec<_> = web_results
        .chain(news.into_iter().take(news_limit).map(|r| ("news", r)))
        .collect();

    if results.is_empty() {
        return format!("No results found for: {query}");
    }

    let mut output = format!("Search results for: {query}\n\n");
    for (i, (kind, result)) in results.iter().enumerate() {
        let _ = writeln!(output, "{}. [{kind}] {}", i + 1, result.title);
        if !result.description.is_empty() {
            let _ = writeln!(output, "   {}", result.description);
        }
        let _ = writeln!(output, "   URL: {}", result.url);
        if let Some(age) = result.age.as_deref().filter(|a| !a.is_empty()) {
            let _ = writeln!(output, "   Published: {age}");
        }
        output.push('\n');
    }
    output
}
