//! Core domain types: sources, classifications and dispatch results.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RouterError;

/// Highest slide deck alias accepted by the "slide N" rule.
pub const MAX_SLIDE_TARGET: u8 = 4;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A knowledge backend a query can be routed to.
///
/// The derived `Ord` is the canonical priority used everywhere results are
/// ordered: wiki, code-host, slides, images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Wiki,
    CodeHost,
    Slides,
    Images,
}

impl Source {
    /// Every source, in canonical priority order.
    pub const ALL: [Source; 4] = [Source::Wiki, Source::CodeHost, Source::Slides, Source::Images];

    /// Stable identifier used in config and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wiki => "wiki",
            Self::CodeHost => "code-host",
            Self::Slides => "slides",
            Self::Images => "images",
        }
    }

    /// Human-facing name of the backing service.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Wiki => "Notion",
            Self::CodeHost => "GitHub",
            Self::Slides => "Slides",
            Self::Images => "Images",
        }
    }

    /// The full source set, used by the fallback and broadening rules.
    pub fn all() -> BTreeSet<Source> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How the slides adapter should analyse a deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Summary,
    Stats,
    Topics,
    Title,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Stats => "stats",
            Self::Topics => "topics",
            Self::Title => "title",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SlideTarget
// ---------------------------------------------------------------------------

/// A deck alias in `1..=MAX_SLIDE_TARGET`, as in "summarize slide 3".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlideTarget(u8);

impl SlideTarget {
    /// Returns `None` when `n` is outside the accepted alias range.
    pub fn new(n: u64) -> Option<Self> {
        if (1..=u64::from(MAX_SLIDE_TARGET)).contains(&n) {
            Some(Self(n as u8))
        } else {
            None
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SlideTarget {
    type Error = RouterError;

    fn try_from(n: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(u64::from(n)).ok_or_else(|| {
            RouterError::validation(format!(
                "slide target {n} is outside 1..={MAX_SLIDE_TARGET}"
            ))
        })
    }
}

impl From<SlideTarget> for u8 {
    fn from(target: SlideTarget) -> Self {
        target.0
    }
}

impl fmt::Display for SlideTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slide{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The classifier's routing decision for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    sources: BTreeSet<Source>,
    slide_target: Option<SlideTarget>,
    mode: Mode,
}

impl Classification {
    /// Build a classification. A slide target always implies the slides source.
    pub fn new(
        sources: impl IntoIterator<Item = Source>,
        slide_target: Option<SlideTarget>,
        mode: Mode,
    ) -> Self {
        let mut sources: BTreeSet<Source> = sources.into_iter().collect();
        if slide_target.is_some() {
            sources.insert(Source::Slides);
        }
        Self {
            sources,
            slide_target,
            mode,
        }
    }

    /// Selected sources, iterated in canonical order.
    pub fn sources(&self) -> &BTreeSet<Source> {
        &self.sources
    }

    pub fn contains(&self, source: Source) -> bool {
        self.sources.contains(&source)
    }

    pub fn slide_target(&self) -> Option<SlideTarget> {
        self.slide_target
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// SourceResult
// ---------------------------------------------------------------------------

/// Terminal state of one source's dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Failed,
    Skipped,
}

/// Message carried by the synthetic result used when nothing was dispatched.
pub const NO_SOURCE_MESSAGE: &str = "No valid source detected for this query.";

/// Outcome of dispatching to one source.
///
/// Only constructible through the named constructors, so `error_message`
/// is present exactly when the status is `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceResult {
    source: Option<Source>,
    status: SourceStatus,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    elapsed_ms: u64,
}

impl SourceResult {
    fn base(source: Option<Source>, status: SourceStatus) -> Self {
        Self {
            source,
            status,
            content: String::new(),
            error_message: None,
            degraded: false,
            detail: None,
            elapsed_ms: 0,
        }
    }

    /// Content retrieved successfully.
    pub fn ok(source: Source, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::base(Some(source), SourceStatus::Ok)
        }
    }

    /// The adapter answered with an expected, user-facing notice
    /// (bad link, nothing found) instead of content.
    pub fn degraded(source: Source, notice: impl Into<String>) -> Self {
        Self {
            content: notice.into(),
            degraded: true,
            ..Self::base(Some(source), SourceStatus::Ok)
        }
    }

    /// The adapter raised a hard error.
    pub fn failed(source: Source, error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::base(Some(source), SourceStatus::Failed)
        }
    }

    /// The source was not dispatched.
    pub fn skipped(source: Source) -> Self {
        Self::base(Some(source), SourceStatus::Skipped)
    }

    /// Synthetic record for a dispatch that had no source to call.
    pub fn no_source() -> Self {
        Self::base(None, SourceStatus::Skipped)
    }

    /// Attach a qualifier shown next to the source name (e.g. `slide2`).
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn source(&self) -> Option<Source> {
        self.source
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Name plus qualifier, e.g. `Slides (slide2)`.
    pub fn label(&self) -> String {
        let name = self.source.map_or("Router", |s| s.display_name());
        match &self.detail {
            Some(detail) => format!("{name} ({detail})"),
            None => name.to_string(),
        }
    }

    /// Block header used in the persisted log, e.g. `SLIDES (slide2)`.
    pub fn header(&self) -> String {
        let name = self
            .source
            .map_or_else(|| "ROUTER".to_string(), |s| s.display_name().to_uppercase());
        match &self.detail {
            Some(detail) => format!("{name} ({detail})"),
            None => name,
        }
    }

    /// One-line outcome for the summary log.
    pub fn summary_line(&self) -> String {
        if self.source.is_none() {
            return "✗ No relevant sources found.".to_string();
        }
        let label = self.label();
        match self.status {
            SourceStatus::Ok if self.degraded => format!("✓ {label} — answered with a notice."),
            SourceStatus::Ok => format!("✓ {label} — data retrieved."),
            SourceStatus::Failed => format!(
                "✗ {label} — failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            SourceStatus::Skipped => format!("– {label} — skipped."),
        }
    }

    /// Text block body for the persisted log and the combined answer.
    pub fn rendered_body(&self) -> String {
        match self.status {
            SourceStatus::Ok => self.content.clone(),
            SourceStatus::Failed => format!(
                "⚠️ {} error: {}",
                self.label(),
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            SourceStatus::Skipped if self.source.is_none() => format!("⚠️ {NO_SOURCE_MESSAGE}"),
            SourceStatus::Skipped => format!("⚠️ {} was not queried.", self.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one dispatch (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CombinedResult
// ---------------------------------------------------------------------------

/// Aggregate of every source result for one query.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedResult {
    run_id: RunId,
    query: String,
    results: Vec<SourceResult>,
    summary_log: Vec<String>,
    timestamp: DateTime<Local>,
    cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_path: Option<PathBuf>,
}

impl CombinedResult {
    /// Assemble from results in any order; they are sorted into canonical
    /// source order and the summary log is derived from that order.
    pub fn new(query: impl Into<String>, mut results: Vec<SourceResult>, cancelled: bool) -> Self {
        // Synthetic records (no source) sort last.
        results.sort_by_key(|r| (r.source.is_none(), r.source));
        let summary_log = results.iter().map(SourceResult::summary_line).collect();
        Self {
            run_id: RunId::new(),
            query: query.into(),
            results,
            summary_log,
            timestamp: Local::now(),
            cancelled,
            log_path: None,
        }
    }

    /// Record where the result logger persisted this result.
    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[SourceResult] {
        &self.results
    }

    pub fn summary_log(&self) -> &[String] {
        &self.summary_log
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Persistence key with second resolution.
    pub fn storage_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d_%H-%M-%S").to_string()
    }

    /// Result for `source`, if it was part of the dispatch.
    pub fn result_for(&self, source: Source) -> Option<&SourceResult> {
        self.results.iter().find(|r| r.source == Some(source))
    }

    /// The most relevant answer text: first successful, non-degraded
    /// content, else the first block of any kind.
    pub fn primary_content(&self) -> String {
        self.results
            .iter()
            .find(|r| r.status == SourceStatus::Ok && !r.degraded)
            .or_else(|| self.results.first())
            .map(SourceResult::rendered_body)
            .unwrap_or_else(|| format!("⚠️ {NO_SOURCE_MESSAGE}"))
    }

    /// Every source block with its header, separated by blank lines.
    pub fn combined_output(&self) -> String {
        self.results
            .iter()
            .map(|r| format!("=== {} ===\n{}", r.header(), r.rendered_body()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
