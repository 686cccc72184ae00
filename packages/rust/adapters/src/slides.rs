//! Presentation adapter: Google Slides text extraction plus model analysis.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use sourcerouter_shared::{Mode, Result, SlidesConfig, Source, read_secret};

use crate::chat::{ChatClient, CompletionOptions};
use crate::error::{AdapterError, AdapterResult};
use crate::http;
use crate::{FetchRequest, SourceAdapter};

pub const INVALID_LINK_MESSAGE: &str =
    "Invalid Google Slides link. Expected format: https://docs.google.com/presentation/d/<ID>/edit";
pub const NO_TEXT_MESSAGE: &str = "No text content found in this presentation.";
pub const NO_DECK_MESSAGE: &str = "No presentation configured for this request.";

/// Longest slide text sent to the model.
pub const MAX_SLIDE_TEXT: usize = 12_000;
const TRUNCATION_NOTE: &str = "\n\n[Content truncated for analysis...]";

const SYSTEM_PROMPT: &str = "You are a concise and analytical presentation summarizer.";

static PRESENTATION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/presentation/d/([a-zA-Z0-9_-]+)").unwrap());

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Presentation {
    #[serde(default)]
    slides: Vec<Slide>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Slide {
    #[serde(default)]
    page_elements: Vec<PageElement>,
}

#[derive(Debug, Default, Deserialize)]
struct PageElement {
    #[serde(default)]
    shape: Option<Shape>,
}

#[derive(Debug, Default, Deserialize)]
struct Shape {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextContent {
    #[serde(default)]
    text_elements: Vec<TextElement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextElement {
    #[serde(default)]
    text_run: Option<TextRun>,
}

#[derive(Debug, Default, Deserialize)]
struct TextRun {
    #[serde(default)]
    content: String,
}

impl Presentation {
    /// Slide text under `--- Slide N ---` headers; empty when no slide has text.
    fn extract_text(&self) -> String {
        let mut lines = Vec::new();
        let mut any_text = false;

        for (idx, slide) in self.slides.iter().enumerate() {
            lines.push(format!("\n--- Slide {} ---", idx + 1));
            let runs = slide
                .page_elements
                .iter()
                .filter_map(|el| el.shape.as_ref()?.text.as_ref())
                .flat_map(|text| &text.text_elements)
                .filter_map(|te| te.text_run.as_ref())
                .map(|run| run.content.trim())
                .filter(|content| !content.is_empty());

            for content in runs {
                any_text = true;
                lines.push(content.to_string());
            }
        }

        if any_text { lines.join("\n") } else { String::new() }
    }
}

/// Presentation id from a deck link.
pub fn presentation_id(link: &str) -> Option<&str> {
    PRESENTATION_ID
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Cap `text` at [`MAX_SLIDE_TEXT`] characters.
fn truncate(text: String) -> String {
    match text.char_indices().nth(MAX_SLIDE_TEXT) {
        Some((cut, _)) => format!("{}{TRUNCATION_NOTE}", &text[..cut]),
        None => text,
    }
}

/// Analysis prompt for `mode`.
pub fn analysis_prompt(mode: Mode, slide_text: &str) -> String {
    match mode {
        Mode::Summary => format!(
            "Analyze and summarize the following Google Slides content:\n\n{slide_text}\n\n\
             Provide:\n\
             - A short summary of the key topics\n\
             - Any actionable insights or conclusions\n\
             - A structured breakdown (bullet points)\n\
             Be factual and concise."
        ),
        Mode::Stats => format!(
            "From the following slides, extract all quantitative and statistical data:\n\n{slide_text}\n\n\
             List key numbers, growth rates, trends, and relevant metrics with explanations."
        ),
        Mode::Topics => format!(
            "Identify the main topics and subtopics discussed in the following slides:\n\n{slide_text}\n\n\
             Organize your response hierarchically by topic and subtopic."
        ),
        Mode::Title => format!(
            "State the title of the following presentation:\n\n{slide_text}\n\n\
             Reply with the title on the first line, then one sentence describing what the deck is about."
        ),
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Google Slides adapter. Analyses the deck resolved by the orchestrator.
pub struct GoogleSlidesAdapter {
    http: Client,
    api_base: String,
    access_token: Option<String>,
    access_token_env: String,
    chat: ChatClient,
}

impl GoogleSlidesAdapter {
    pub fn new(
        api_base: &str,
        access_token: Option<String>,
        chat: ChatClient,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token,
            access_token_env: "GOOGLE_SLIDES_TOKEN".into(),
            chat,
        })
    }

    pub fn from_config(config: &SlidesConfig, chat: ChatClient, timeout: Duration) -> Result<Self> {
        let mut adapter = Self::new(
            &config.api_base,
            read_secret(&config.access_token_env),
            chat,
            timeout,
        )?;
        adapter.access_token_env = config.access_token_env.clone();
        Ok(adapter)
    }

    /// All slide text of `presentation_id`, truncated for analysis.
    #[instrument(skip(self))]
    async fn slide_text(&self, presentation_id: &str) -> AdapterResult<String> {
        let token = self.access_token.as_deref().ok_or_else(|| {
            AdapterError::hard(format!(
                "Google Slides unavailable: {} is not set",
                self.access_token_env
            ))
        })?;

        let url = format!("{}/v1/presentations/{presentation_id}", self.api_base);
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let presentation: Presentation = http::read_json(response, "google slides").await?;
        debug!(slides = presentation.slides.len(), "presentation loaded");

        let text = presentation.extract_text();
        if text.is_empty() {
            return Err(AdapterError::soft(NO_TEXT_MESSAGE));
        }
        Ok(truncate(text))
    }
}

#[async_trait]
impl SourceAdapter for GoogleSlidesAdapter {
    fn source(&self) -> Source {
        Source::Slides
    }

    fn name(&self) -> &str {
        "google-slides"
    }

    #[instrument(skip_all, fields(adapter = "google-slides", mode = ?request.mode))]
    async fn fetch(&self, request: &FetchRequest) -> AdapterResult<String> {
        let deck = request
            .deck
            .as_deref()
            .ok_or_else(|| AdapterError::soft(NO_DECK_MESSAGE))?;
        let id = presentation_id(deck).ok_or_else(|| AdapterError::soft(INVALID_LINK_MESSAGE))?;

        let text = self.slide_text(id).await?;
        info!(chars = text.len(), "analysing slide text");

        self.chat
            .complete(
                Some(SYSTEM_PROMPT),
                &analysis_prompt(request.mode, &text),
                CompletionOptions {
                    temperature: 0.4,
                    max_tokens: Some(800),
                },
            )
            .await
    }
}
