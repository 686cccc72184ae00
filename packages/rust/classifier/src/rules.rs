//! The declarative rule table behind the classifier.
//!
//! Source rules are `(matcher, effect)` pairs evaluated uniformly and
//! additively against the lower-cased query. Mode rules are evaluated in
//! precedence order and the first match wins.

use regex::Regex;

use sourcerouter_shared::{Mode, Source};

/// How a rule inspects the lower-cased query.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Any of the keywords occurs as a substring.
    Contains(&'static [&'static str]),
    /// The pattern matches anywhere in the query.
    Pattern(Regex),
}

impl Matcher {
    pub fn matches(&self, query: &str) -> bool {
        match self {
            Self::Contains(keywords) => keywords.iter().any(|k| query.contains(k)),
            Self::Pattern(re) => re.is_match(query),
        }
    }
}

/// What a matching rule does to the source set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Select(Source),
    SelectAll,
}

/// One row of the source table.
#[derive(Debug, Clone)]
pub struct SourceRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub effect: Effect,
}

impl SourceRule {
    pub fn new(name: &'static str, matcher: Matcher, effect: Effect) -> Self {
        Self {
            name,
            matcher,
            effect,
        }
    }
}

/// One row of the mode table.
#[derive(Debug, Clone, Copy)]
pub struct ModeRule {
    pub mode: Mode,
    pub keywords: &'static [&'static str],
}

pub const WIKI_KEYWORDS: &[&str] = &["notion", "workspace", "document", "wiki"];
pub const SLIDES_KEYWORDS: &[&str] = &["slide", "presentation", "deck"];
pub const IMAGE_KEYWORDS: &[&str] = &["image", "screenshot", "diagram", "photo", "picture"];
pub const FINANCE_KEYWORDS: &[&str] = &[
    "finance",
    "financial",
    "banking",
    "revenue",
    "fraud",
    "transaction",
];

/// Code-host vocabulary, matched as whole words so that e.g. "report"
/// does not count as "repo".
const CODE_HOST_PATTERN: &str = r"github\.com|\bgithub\b|\b(?:repos?|repository|repositories|forks?|forked|pulls?|pull\s+requests?|issues?|commits?)\b";

const SLIDES_LINK_PATTERN: &str = r"docs\.google\.com/presentation|slides\.google\.com";

const IMAGE_FILE_PATTERN: &str = r"\.(?:png|jpe?g|gif|webp|bmp)\b";

/// `slide 3`, `slide3`, `slide  12` (the number is range-checked later).
pub const SLIDE_NUMBER_PATTERN: &str = r"slide\s*(\d+)";

/// Mode precedence: stats > topics > title > summary.
pub const MODE_RULES: &[ModeRule] = &[
    ModeRule {
        mode: Mode::Stats,
        keywords: &["stat", "data", "numbers", "metrics", "figures"],
    },
    ModeRule {
        mode: Mode::Topics,
        keywords: &["topic", "subject", "theme"],
    },
    ModeRule {
        mode: Mode::Title,
        keywords: &["title", "heading", "name"],
    },
    ModeRule {
        mode: Mode::Summary,
        keywords: &["summarize", "summary", "overview", "analyze"],
    },
];

fn static_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in classifier pattern must compile")
}

/// The built-in source table, before any configured project identifiers.
pub fn default_source_rules() -> Vec<SourceRule> {
    vec![
        SourceRule::new(
            "code-host-keywords",
            Matcher::Pattern(static_pattern(CODE_HOST_PATTERN)),
            Effect::Select(Source::CodeHost),
        ),
        SourceRule::new(
            "wiki-keywords",
            Matcher::Contains(WIKI_KEYWORDS),
            Effect::Select(Source::Wiki),
        ),
        SourceRule::new(
            "slides-keywords",
            Matcher::Contains(SLIDES_KEYWORDS),
            Effect::Select(Source::Slides),
        ),
        SourceRule::new(
            "slides-link",
            Matcher::Pattern(static_pattern(SLIDES_LINK_PATTERN)),
            Effect::Select(Source::Slides),
        ),
        SourceRule::new(
            "image-keywords",
            Matcher::Contains(IMAGE_KEYWORDS),
            Effect::Select(Source::Images),
        ),
        SourceRule::new(
            "image-file",
            Matcher::Pattern(static_pattern(IMAGE_FILE_PATTERN)),
            Effect::Select(Source::Images),
        ),
        SourceRule::new(
            "finance-domain",
            Matcher::Contains(FINANCE_KEYWORDS),
            Effect::SelectAll,
        ),
    ]
}

/// Whole-word, case-insensitive pattern over the given identifiers.
/// Returns `None` when the list is empty.
pub fn project_identifier_pattern(
    identifiers: &[String],
) -> Option<Result<Regex, regex::Error>> {
    let alternatives: Vec<String> = identifiers
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| regex::escape(&id.to_lowercase()))
        .collect();

    if alternatives.is_empty() {
        return None;
    }

    Some(Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))))
}

pub fn slide_number_pattern() -> Regex {
    static_pattern(SLIDE_NUMBER_PATTERN)
}
