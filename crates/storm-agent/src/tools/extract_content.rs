use std::time::Duration;

use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use storm_agent_core::tool::{Error as ToolError, Tool, ToolOutcome};

use super::{request_error, status_error};

const ENDPOINT: &str = "https://api.firecrawl.dev/v1/scrape";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const DEFAULT_MAX_LENGTH: usize = 8000;
const MIN_MAX_LENGTH: usize = 500;
const MAX_MAX_LENGTH: usize = 50_000;
const DEFAULT_INCLUDE_TAGS: &[&str] =
    &["h1", "h2", "h3", "p", "a", "ul", "ol", "li"];
const DEFAULT_EXCLUDE_TAGS: &[&str] =
    &["nav", "footer", "header", "sidebar", "ads"];
const TRUNCATION_NOTICE: &str = "\n\n... (content truncated)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ContentFormat {
    Markdown,
    Html,
    RawHtml,
}

#[derive(Deserialize, JsonSchema)]
pub struct ExtractContentParameters {
    #[schemars(description = "Absolute http(s) URL of the page to read.")]
    url: String,
    #[schemars(description = "Output formats to request, default to `markdown`.")]
    formats: Option<Vec<ContentFormat>>,
    #[schemars(description = "HTML tags to keep, e.g. `h1`, `p`, `a`.")]
    include_tags: Option<Vec<String>>,
    #[schemars(description = "HTML tags to drop, e.g. `nav`, `footer`.")]
    exclude_tags: Option<Vec<String>>,
    #[schemars(
        description = "Maximum content length in characters, default to 8000.",
        range(min = 500, max = 50000)
    )]
    max_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeData {
    markdown: Option<String>,
    html: Option<String>,
    raw_html: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    title: Option<String>,
    description: Option<String>,
}

/// A tool for extracting readable content from web pages with the
/// Firecrawl scrape API.
pub struct ExtractContentTool {
    client: Client,
    api_key: String,
    endpoint: String,
    parameter_schema: Value,
}

impl ExtractContentTool {
    /// Creates a new content extraction tool with a Firecrawl API key.
    #[inline]
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        ExtractContentTool {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: ENDPOINT.to_owned(),
            parameter_schema: schema_for!(ExtractContentParameters).to_value(),
        }
    }

    /// Sends the scrape requests to another endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Tool for ExtractContentTool {
    type Input = ExtractContentParameters;

    fn name(&self) -> &str {
        "extract_content"
    }

    fn description(&self) -> &str {
        r#"
Extracts clean, readable content from a web page.
Returns markdown with the page title and description. Long pages are truncated to `max_length` characters."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: ExtractContentParameters,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let url = validate_url(&input.url)?;
            let max_length = input
                .max_length
                .unwrap_or(DEFAULT_MAX_LENGTH)
                .clamp(MIN_MAX_LENGTH, MAX_MAX_LENGTH);
            debug!("extracting content from {url}");

            let resp = client
                .post(&endpoint)
                .bearer_auth(api_key)
                .json(&scrape_request(&url, &input))
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .map_err(|err| request_error("Firecrawl", err))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(status_error("Firecrawl", "FIRECRAWL_API_KEY", status));
            }

            let body: ScrapeResponse = resp
                .json()
                .await
                .map_err(|err| request_error("Firecrawl", err))?;
            format_page(&url, body, max_length)
        }
    }
}

fn validate_url(url: &str) -> Result<Url, ToolError> {
    let invalid = || {
        ToolError::invalid_input()
            .with_reason(format!("`{url}` is not an absolute http(s) URL"))
    };
    let parsed = Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none()
    {
        return Err(invalid());
    }
    Ok(parsed)
}

fn scrape_request(url: &Url, input: &ExtractContentParameters) -> Value {
    let tags = |tags: &Option<Vec<String>>, default: &[&str]| match tags {
        Some(tags) => tags.clone(),
        None => default.iter().map(|t| (*t).to_owned()).collect(),
    };
    json!({
        "url": url.as_str(),
        "formats": input.formats.as_deref().unwrap_or(&[ContentFormat::Markdown]),
        "includeTags": tags(&input.include_tags, DEFAULT_INCLUDE_TAGS),
        "excludeTags": tags(&input.exclude_tags, DEFAULT_EXCLUDE_TAGS),
        "waitFor": 2000,
        "timeout": 30000,
    })
}

fn format_page(
    url: &Url,
    body: ScrapeResponse,
    max_length: usize,
) -> ToolOutcome {
    if !body.success {
        let reason = body.error.unwrap_or_else(|| "unknown error".to_owned());
        return Err(ToolError::execution_error()
            .with_reason(format!("failed to extract {url}: {reason}")));
    }

    let data = body.data.unwrap_or_default();
    let Some(content) = [data.markdown, data.html, data.raw_html]
        .into_iter()
        .flatten()
        .find(|c| !c.trim().is_empty())
    else {
        return Err(ToolError::execution_error()
            .with_reason(format!("no content extracted from {url}")));
    };

    let mut output = format!("URL: {url}\n");
    if let Some(title) = data.metadata.title.filter(|t| !t.is_empty()) {
        output.push_str(&format!("Title: {title}\n"));
    }
    if let Some(description) =
        data.metadata.description.filter(|d| !d.is_empty())
    {
        output.push_str(&format!("Description: {description}\n"));
    }
    output.push_str("\n---\n\n");
    output.push_str(truncate_chars(&content, max_length));
    if content.chars().count() > max_length {
        output.push_str(TRUNCATION_NOTICE);
    }
    Ok(output)
}

#[inline]
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(url: &str) -> ExtractContentParameters {
        ExtractContentParameters {
            url: url.to_owned(),
            formats: None,
            include_tags: None,
            exclude_tags: Some(vec!["nav".to_owned()]),
            max_length: None,
        }
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/a?b=c").is_ok());
        for url in ["example.com", "/relative", "ftp://example.com", "file:///etc/hosts"] {
            let err = validate_url(url).unwrap_err();
            assert_eq!(err.kind(), storm_agent_core::tool::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_scrape_request() {
        let url = validate_url("https://example.com/").unwrap();
        let req = scrape_request(&url, &params("https://example.com/"));
        assert_eq!(req["formats"], json!(["markdown"]));
        assert_eq!(req["includeTags"][0], "h1");
        assert_eq!(req["excludeTags"], json!(["nav"]));
    }

    #[test]
    fn test_format_page() {
        let url = validate_url("https://example.com/").unwrap();
        let body: ScrapeResponse = serde_json::from_value(json!({
            "success": true,
            "data": {
                "markdown": "é".repeat(600),
                "metadata": { "title": "Example", "description": "" },
            },
        }))
        .unwrap();
        let output = format_page(&url, body, 500).unwrap();
        assert!(output.starts_with("URL: https://example.com/\nTitle: Example\n\n---\n\n"));
        assert!(output.ends_with(TRUNCATION_NOTICE));
        assert_eq!(output.matches('é').count(), 500);
    }

    #[test]
    fn test_failed_scrape() {
        let url = validate_url("https://example.com/").unwrap();
        let body: ScrapeResponse = serde_json::from_value(json!({
            "success": false,
            "error": "blocked",
        }))
        .unwrap();
        let err = format_page(&url, body, 8000).unwrap_err();
        assert_eq!(err.reason(), "failed to extract https://example.com/: blocked");
    }
}
