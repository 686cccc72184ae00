//! Source adapters: the uniform boundary between the orchestrator and each
//! knowledge backend.
//!
//! This crate provides:
//! - [`SourceAdapter`]: the `fetch(request) -> text` contract
//! - [`AdapterSet`]: adapters keyed by [`Source`], injected into the orchestrator
//! - Built-in adapters for Notion, GitHub, Google Slides and image parsing
//! - [`ChatClient`]: the OpenAI-compatible completion client they share

pub mod chat;
pub mod error;
pub mod github;
mod http;
pub mod images;
pub mod notion;
pub mod slides;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sourcerouter_shared::{AppConfig, Mode, Result, SlideTarget, Source};

pub use chat::{ChatClient, CompletionOptions};
pub use error::{AdapterError, AdapterResult, ErrorKind};
pub use github::GitHubAdapter;
pub use images::{ImageAdapter, ImageParser};
pub use notion::NotionAdapter;
pub use slides::GoogleSlidesAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Everything an adapter gets to work with for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// The user's original question, unmodified.
    pub query: String,
    /// Analysis mode chosen by the classifier.
    pub mode: Mode,
    /// Deck alias from the query, if any.
    pub slide_target: Option<SlideTarget>,
    /// Resolved deck reference (slides only).
    pub deck: Option<String>,
}

impl FetchRequest {
    pub fn new(query: impl Into<String>, mode: Mode) -> Self {
        Self {
            query: query.into(),
            mode,
            slide_target: None,
            deck: None,
        }
    }

    pub fn with_deck(mut self, deck: impl Into<String>, target: Option<SlideTarget>) -> Self {
        self.deck = Some(deck.into());
        self.slide_target = target;
        self
    }
}

/// A knowledge backend reachable through a single text-in, text-out call.
///
/// Adapters derive whatever sub-queries they need from the request; the
/// orchestrator treats the returned text as opaque.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source this adapter serves.
    fn source(&self) -> Source;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;

    /// Retrieve content for the request.
    async fn fetch(&self, request: &FetchRequest) -> AdapterResult<String>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Adapters keyed by the source they serve. At most one per source.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<Source, Arc<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter`, replacing any previous adapter for its source.
    pub fn insert(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.insert(Arc::new(adapter));
        self
    }

    pub fn get(&self, source: Source) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    /// Registered sources in canonical order.
    pub fn sources(&self) -> impl Iterator<Item = Source> + '_ {
        self.adapters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.adapters.iter().map(|(s, a)| (s, a.name())))
            .finish()
    }
}

/// Build the four built-in adapters from config. Credentials are read from
/// the environment now; a missing one only fails that adapter's calls.
pub fn build_adapters(config: &AppConfig) -> Result<AdapterSet> {
    let timeout = Duration::from_secs(config.adapters.timeout_secs);
    let chat = ChatClient::from_config(&config.llm, timeout)?;
    let parser = Arc::new(ImageParser::from_config(&config.images)?);

    Ok(AdapterSet::new()
        .with(NotionAdapter::from_config(
            &config.wiki,
            chat.clone(),
            Some(parser.clone()),
            timeout,
        )?)
        .with(GitHubAdapter::from_config(&config.code_host, timeout)?)
        .with(GoogleSlidesAdapter::from_config(&config.slides, chat, timeout)?)
        .with(ImageAdapter::new(parser, config.images.default_image.clone())))
}
