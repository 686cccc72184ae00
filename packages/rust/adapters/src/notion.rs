//! Workspace wiki adapter backed by the Notion API.
//!
//! Pipeline per query: search pages → pull each page's blocks (text,
//! tables, optionally OCR'd images) → ask the chat model to answer from
//! that material. Notion's search only matches titles, so when the query
//! hits nothing every page is pulled and the model filters relevance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use sourcerouter_shared::{Result, Source, WikiConfig, read_secret};

use crate::chat::{ChatClient, CompletionOptions};
use crate::error::{AdapterError, AdapterResult};
use crate::http;
use crate::images::{ImageParser, ImageRef};
use crate::{FetchRequest, SourceAdapter};

const NOTION_VERSION: &str = "2022-06-28";

/// Blocks fetched per children request (API maximum).
const BLOCK_PAGE_SIZE: u32 = 100;

/// Block types whose `rich_text` is plain prose.
const TEXT_BLOCKS: &[&str] = &[
    "paragraph",
    "heading_1",
    "heading_2",
    "heading_3",
    "bulleted_list_item",
    "numbered_list_item",
    "quote",
    "callout",
];

/// Marker the model is asked to put before the page names it relied on.
const SOURCES_MARKER: &str = "SOURCES USED:";

pub const NO_PAGES_MESSAGE: &str = "I couldn't find any relevant pages in your Notion workspace.";
pub const NO_CONTENT_MESSAGE: &str = "Found pages but couldn't extract any content.";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<PageObject>,
}

#[derive(Debug, Deserialize)]
struct PageObject {
    id: String,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ChildrenResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Extracted content
// ---------------------------------------------------------------------------

/// Everything pulled out of one page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub text: Vec<String>,
    pub tables: Vec<String>,
    pub images: Vec<String>,
}

impl PageContent {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tables.is_empty() && self.images.is_empty()
    }

    /// Page block handed to the model, headed by the page title.
    pub fn render(&self, title: &str) -> String {
        let rule = "=".repeat(60);
        let mut out = format!("\n{rule}\nSOURCE: {title}\n{rule}\n");

        if !self.text.is_empty() {
            out.push_str("\nTEXT CONTENT:\n");
            out.push_str(&self.text.join("\n"));
            out.push('\n');
        }
        if !self.tables.is_empty() {
            out.push_str(&format!("\nTABLES ({}):\n", self.tables.len()));
            for table in &self.tables {
                out.push_str(&format!("\n{table}\n"));
            }
        }
        if !self.images.is_empty() {
            out.push_str("\nIMAGE CONTENT:\n");
            for text in &self.images {
                out.push_str(text);
                out.push('\n');
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Notion-backed wiki adapter.
pub struct NotionAdapter {
    http: Client,
    base_url: String,
    token: Option<String>,
    token_env: String,
    max_pages: u32,
    chat: ChatClient,
    images: Option<Arc<ImageParser>>,
}

impl NotionAdapter {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        max_pages: u32,
        chat: ChatClient,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            token_env: "NOTION_TOKEN".into(),
            max_pages,
            chat,
            images: None,
        })
    }

    pub fn from_config(
        config: &WikiConfig,
        chat: ChatClient,
        images: Option<Arc<ImageParser>>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut adapter = Self::new(
            &config.base_url,
            read_secret(&config.token_env),
            config.max_pages,
            chat,
            timeout,
        )?;
        adapter.token_env = config.token_env.clone();
        adapter.images = images;
        Ok(adapter)
    }

    fn token(&self) -> AdapterResult<&str> {
        self.token.as_deref().ok_or_else(|| {
            AdapterError::hard(format!("Notion unavailable: {} is not set", self.token_env))
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> AdapterResult<reqwest::RequestBuilder> {
        Ok(builder
            .bearer_auth(self.token()?)
            .header("Notion-Version", NOTION_VERSION))
    }

    /// Title search, falling back to every page when nothing matches.
    #[instrument(skip(self))]
    async fn search_pages(&self, query: &str) -> AdapterResult<Vec<PageObject>> {
        let hits = self.search(Some(query)).await?;
        if !hits.is_empty() {
            info!(count = hits.len(), "pages matched query");
            return Ok(hits);
        }

        debug!("no title matches, pulling all pages");
        let all = self.search(None).await?;
        info!(count = all.len(), "pulled all pages for analysis");
        Ok(all)
    }

    async fn search(&self, query: Option<&str>) -> AdapterResult<Vec<PageObject>> {
        let mut body = json!({
            "filter": {"property": "object", "value": "page"},
            "page_size": self.max_pages,
        });
        if let Some(q) = query {
            body["query"] = json!(q);
        }

        let url = format!("{}/v1/search", self.base_url);
        let response = self.authed(self.http.post(&url))?.json(&body).send().await?;
        let parsed: SearchResponse = http::read_json(response, "notion search").await?;
        Ok(parsed.results)
    }

    /// Every child block of `block_id`, following pagination cursors.
    async fn children(&self, block_id: &str) -> AdapterResult<Vec<Value>> {
        let url = format!("{}/v1/blocks/{block_id}/children", self.base_url);
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("page_size", BLOCK_PAGE_SIZE.to_string())];
            if let Some(c) = &cursor {
                params.push(("start_cursor", c.clone()));
            }

            let response = self
                .authed(self.http.get(&url))?
                .query(&params)
                .send()
                .await?;
            let page: ChildrenResponse = http::read_json(response, "notion blocks").await?;
            blocks.extend(page.results);

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(blocks)
    }

    /// Text, tables and image text from one page.
    async fn extract_page(&self, page_id: &str) -> AdapterResult<PageContent> {
        let mut content = PageContent::default();

        for block in self.children(page_id).await? {
            let Some(kind) = block.get("type").and_then(Value::as_str) else {
                continue;
            };

            if TEXT_BLOCKS.contains(&kind) {
                let text = rich_text(&block[kind]["rich_text"]);
                let text = text.trim();
                if !text.is_empty() {
                    content.text.push(text.to_string());
                }
            } else if kind == "table" {
                let Some(id) = block.get("id").and_then(Value::as_str) else {
                    continue;
                };
                match self.table(id).await {
                    Ok(Some(table)) => content.tables.push(table),
                    Ok(None) => {}
                    Err(e) => warn!(table = id, error = %e, "table extraction failed"),
                }
            } else if kind == "image" {
                if let Some(text) = self.image_text(&block["image"]).await {
                    content.images.push(text);
                }
            }
        }

        Ok(content)
    }

    async fn table(&self, table_id: &str) -> AdapterResult<Option<String>> {
        let rows: Vec<Vec<String>> = self
            .children(table_id)
            .await?
            .iter()
            .filter(|row| row.get("type").and_then(Value::as_str) == Some("table_row"))
            .map(|row| {
                row["table_row"]["cells"]
                    .as_array()
                    .map(|cells| cells.iter().map(rich_text).collect())
                    .unwrap_or_default()
            })
            .collect();

        Ok(markdown_table(&rows))
    }

    /// OCR an image block. Failures are logged and dropped.
    async fn image_text(&self, image: &Value) -> Option<String> {
        let parser = self.images.as_ref()?;
        let kind = image.get("type").and_then(Value::as_str)?;
        let url = image[kind]["url"].as_str()?;

        match parser.parse(&ImageRef::new(url)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "image parsing failed");
                None
            }
        }
    }

    async fn analyze(&self, question: &str, material: &str) -> AdapterResult<String> {
        let prompt = analysis_prompt(question, material);
        let reply = self
            .chat
            .complete(
                None,
                &prompt,
                CompletionOptions {
                    temperature: 0.3,
                    max_tokens: Some(1000),
                },
            )
            .await?;

        let (answer, sources) = split_sources(&reply);
        if sources.is_empty() {
            Ok(answer)
        } else {
            Ok(format!("{answer}\n\nSources: {}", sources.join(", ")))
        }
    }
}

#[async_trait]
impl SourceAdapter for NotionAdapter {
    fn source(&self) -> Source {
        Source::Wiki
    }

    fn name(&self) -> &str {
        "notion"
    }

    #[instrument(skip_all, fields(adapter = "notion"))]
    async fn fetch(&self, request: &FetchRequest) -> AdapterResult<String> {
        let pages = self.search_pages(&request.query).await?;
        if pages.is_empty() {
            return Err(AdapterError::soft(NO_PAGES_MESSAGE));
        }

        let mut material = Vec::new();
        for page in &pages {
            let title = page_title(page);
            match self.extract_page(&page.id).await {
                Ok(content) if !content.is_empty() => material.push(content.render(&title)),
                Ok(_) => debug!(%title, "page has no extractable content"),
                Err(e) => warn!(%title, error = %e, "page extraction failed, skipping"),
            }
        }

        if material.is_empty() {
            return Err(AdapterError::soft(NO_CONTENT_MESSAGE));
        }

        self.analyze(&request.query, &material.join("\n")).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Concatenated `plain_text` of a rich-text array.
fn rich_text(value: &Value) -> String {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("plain_text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Text of the page's `title`-typed property.
fn page_title(page: &PageObject) -> String {
    page.properties
        .values()
        .find(|prop| prop.get("type").and_then(Value::as_str) == Some("title"))
        .map(|prop| rich_text(&prop["title"]))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// First row is the header. `None` when there are no rows.
fn markdown_table(rows: &[Vec<String>]) -> Option<String> {
    let (header, data) = rows.split_first()?;

    let mut table = format!("| {} |\n", header.join(" | "));
    table.push_str(&format!("| {} |\n", vec!["---"; header.len()].join(" | ")));
    for row in data {
        table.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    Some(table)
}

fn analysis_prompt(question: &str, material: &str) -> String {
    format!(
        "You are answering a question from the contents of a Notion workspace.\n\n\
         QUESTION: {question}\n\n\
         WORKSPACE PAGES:\n{material}\n\n\
         Answer using only the pages above:\n\
         - ignore pages unrelated to the question\n\
         - quote concrete numbers, dates and facts where they exist (text, tables and image text all count)\n\
         - if the pages cannot answer the question, say so plainly\n\
         - be concise and do not mention irrelevant pages\n\n\
         End your reply with a line `---` followed by `{SOURCES_MARKER} ` and the \
         comma-separated names of the pages you actually used.\n\nANSWER:"
    )
}

/// Split the model reply into the answer and the page names it cited.
fn split_sources(reply: &str) -> (String, Vec<String>) {
    let Some((answer, cited)) = reply.split_once(SOURCES_MARKER) else {
        return (reply.trim().to_string(), Vec::new());
    };

    let answer = answer.trim();
    let answer = answer.strip_suffix("---").unwrap_or(answer).trim().to_string();
    let sources = cited
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (answer, sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> NotionAdapter {
        let chat = ChatClient::new(
            &format!("{}/llm", server.uri()),
            Some("llm-key".into()),
            "m",
            Duration::from_secs(5),
        )
        .expect("chat");
        NotionAdapter::new(&server.uri(), Some("notion-key".into()), 5, chat, Duration::from_secs(5))
            .expect("adapter")
    }

    fn page(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "properties": {
                "Name": {"type": "title", "title": [{"plain_text": title}]}
            }
        })
    }

    fn text_block(kind: &str, text: &str) -> Value {
        json!({"type": kind, kind: {"rich_text": [{"plain_text": text}]}})
    }

    #[test]
    fn title_from_title_property() {
        let page: PageObject = serde_json::from_value(page("p1", "Q4 Revenue")).expect("page");
        assert_eq!(page_title(&page), "Q4 Revenue");

        let untitled: PageObject =
            serde_json::from_value(json!({"id": "p2", "properties": {}})).expect("page");
        assert_eq!(page_title(&untitled), "Untitled");
    }

    #[test]
    fn table_rendering() {
        let rows = vec![
            vec!["Quarter".to_string(), "Loss".to_string()],
            vec!["Q1".to_string(), "$2M".to_string()],
        ];
        let table = markdown_table(&rows).expect("table");
        assert_eq!(table, "| Quarter | Loss |\n| --- | --- |\n| Q1 | $2M |\n");
        assert!(markdown_table(&[]).is_none());
    }

    #[test]
    fn sources_marker_is_split_off() {
        let (answer, sources) =
            split_sources("Fraud fell 12%.\n\n---\nSOURCES USED: Fraud Report, Q4 Revenue");
        assert_eq!(answer, "Fraud fell 12%.");
        assert_eq!(sources, vec!["Fraud Report", "Q4 Revenue"]);

        let (answer, sources) = split_sources("  plain answer ");
        assert_eq!(answer, "plain answer");
        assert!(sources.is_empty());
    }

    #[test]
    fn page_render_sections() {
        let content = PageContent {
            text: vec!["intro".into()],
            tables: vec!["| a |\n".into()],
            images: vec![],
        };
        let rendered = content.render("Budget");
        assert!(rendered.contains("SOURCE: Budget"));
        assert!(rendered.contains("TEXT CONTENT:\nintro"));
        assert!(rendered.contains("TABLES (1):"));
        assert!(!rendered.contains("IMAGE CONTENT"));
    }

    #[tokio::test]
    async fn fetch_searches_extracts_and_analyzes() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(body_partial_json(json!({"query": "fraud losses"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": [page("page-1", "Fraud Report")]})),
            )
            .mount(&server)
            .await;

        // Two pages of blocks to exercise the cursor.
        Mock::given(method("GET"))
            .and(path("/v1/blocks/page-1/children"))
            .and(query_param("start_cursor", "c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "tbl", "type": "table", "table": {}}],
                "has_more": false
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/blocks/page-1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    text_block("heading_1", "Fraud overview"),
                    text_block("paragraph", "Losses dropped in Q4."),
                    {"type": "divider", "divider": {}}
                ],
                "has_more": true,
                "next_cursor": "c2"
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/blocks/tbl/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"type": "table_row", "table_row": {"cells": [[{"plain_text": "Quarter"}], [{"plain_text": "Loss"}]]}},
                    {"type": "table_row", "table_row": {"cells": [[{"plain_text": "Q4"}], [{"plain_text": "$1.2M"}]]}}
                ],
                "has_more": false
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/llm/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Q4 losses were $1.2M.\n---\nSOURCES USED: Fraud Report"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let answer = adapter(&server)
            .fetch(&FetchRequest::new("fraud losses", sourcerouter_shared::Mode::Summary))
            .await
            .expect("answer");

        assert_eq!(answer, "Q4 losses were $1.2M.\n\nSources: Fraud Report");

        let requests = server.received_requests().await.expect("recording enabled");
        let llm_call = requests
            .iter()
            .find(|r| r.url.path() == "/llm/chat/completions")
            .expect("llm called");
        let body = String::from_utf8_lossy(&llm_call.body);
        assert!(body.contains("Losses dropped in Q4."));
        assert!(body.contains("| Q4 | $1.2M |"));
    }

    #[tokio::test]
    async fn empty_workspace_is_soft_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(2)
            .mount(&server)
            .await;

        let err = adapter(&server)
            .fetch(&FetchRequest::new("anything", sourcerouter_shared::Mode::Summary))
            .await
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.message(), NO_PAGES_MESSAGE);
    }

    #[tokio::test]
    async fn search_failure_is_hard_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .fetch(&FetchRequest::new("anything", sourcerouter_shared::Mode::Summary))
            .await
            .unwrap_err();
        assert!(!err.is_soft());
        assert!(err.message().contains("401"));
    }

    #[tokio::test]
    async fn pages_without_content_is_soft_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [page("p", "Empty")]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/blocks/p/children"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [], "has_more": false})),
            )
            .mount(&server)
            .await;

        let err = adapter(&server)
            .fetch(&FetchRequest::new("anything", sourcerouter_shared::Mode::Summary))
            .await
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.message(), NO_CONTENT_MESSAGE);
    }

    #[tokio::test]
    async fn missing_token_is_hard_error() {
        let server = MockServer::start().await;
        let chat = ChatClient::new(&server.uri(), None, "m", Duration::from_secs(5)).expect("chat");
        let adapter = NotionAdapter::new(&server.uri(), None, 5, chat, Duration::from_secs(5))
            .expect("adapter");

        let err = adapter
            .fetch(&FetchRequest::new("q", sourcerouter_shared::Mode::Summary))
            .await
            .unwrap_err();
        assert!(!err.is_soft());
        assert!(err.message().contains("NOTION_TOKEN"));
    }
}
