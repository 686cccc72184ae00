//! Query classification: which sources a question should be routed to,
//! which slide deck it targets, and how the deck should be analysed.
//!
//! The classifier is a pure function of the query text. It never fails:
//! when nothing in the query is recognised it selects every source.

pub mod rules;

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use sourcerouter_shared::{
    Classification, ClassifierConfig, Mode, Result, RouterError, SlideTarget, Source,
};

use crate::rules::{Effect, MODE_RULES, Matcher, ModeRule, SourceRule};

static DEFAULT_CLASSIFIER: LazyLock<Classifier> = LazyLock::new(|| {
    Classifier::with_project_identifiers(&ClassifierConfig::default().project_identifiers)
        .unwrap_or_default()
});

/// Classify `query` with the built-in rule table and the default project
/// identifiers.
pub fn classify(query: &str) -> Classification {
    DEFAULT_CLASSIFIER.classify(query)
}

/// Rule-table classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    source_rules: Vec<SourceRule>,
    mode_rules: &'static [ModeRule],
    slide_number: Regex,
}

impl Classifier {
    /// Built-in rules only, no project identifiers.
    pub fn new() -> Self {
        Self {
            source_rules: rules::default_source_rules(),
            mode_rules: MODE_RULES,
            slide_number: rules::slide_number_pattern(),
        }
    }

    /// Built-in rules plus a whole-word rule selecting the code host for
    /// any of the given project or organisation names.
    pub fn with_project_identifiers(identifiers: &[String]) -> Result<Self> {
        let mut classifier = Self::new();
        if let Some(pattern) = rules::project_identifier_pattern(identifiers) {
            let re = pattern.map_err(|e| {
                RouterError::config(format!("invalid project identifier list: {e}"))
            })?;
            classifier.source_rules.insert(
                1,
                SourceRule::new(
                    "project-identifiers",
                    Matcher::Pattern(re),
                    Effect::Select(Source::CodeHost),
                ),
            );
        }
        Ok(classifier)
    }

    /// Decide sources, slide target and mode for `query`.
    pub fn classify(&self, query: &str) -> Classification {
        self.evaluate(query).0
    }

    /// Like [`classify`](Self::classify), also returning the names of the
    /// rules that fired, in table order.
    pub fn explain(&self, query: &str) -> (Classification, Vec<&'static str>) {
        self.evaluate(query)
    }

    fn evaluate(&self, query: &str) -> (Classification, Vec<&'static str>) {
        let query = query.to_lowercase();
        let mut sources = BTreeSet::new();
        let mut fired = Vec::new();

        for rule in &self.source_rules {
            if !rule.matcher.matches(&query) {
                continue;
            }
            fired.push(rule.name);
            match rule.effect {
                Effect::Select(source) => {
                    sources.insert(source);
                }
                Effect::SelectAll => sources.extend(Source::ALL),
            }
        }

        let slide_target = self.slide_target(&query);
        if slide_target.is_some() {
            fired.push("slide-number");
            sources.insert(Source::Slides);
        }

        let mode = self
            .mode_rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| query.contains(k)))
            .map_or(Mode::default(), |rule| rule.mode);

        if sources.is_empty() {
            fired.push("fallback-all");
            sources = Source::all();
        }

        (Classification::new(sources, slide_target, mode), fired)
    }

    /// First "slide N" occurrence, kept only when N is a known deck alias.
    fn slide_target(&self, query: &str) -> Option<SlideTarget> {
        let caps = self.slide_number.captures(query)?;
        let n: u64 = caps.get(1)?.as_str().parse().ok()?;
        SlideTarget::new(n)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}
