//! Classifier plus orchestrator behind a single `ask` call.

use std::future::Future;
use std::path::PathBuf;

use tracing::{info, instrument};

use sourcerouter_adapters::{AdapterSet, build_adapters};
use sourcerouter_classifier::Classifier;
use sourcerouter_shared::{AppConfig, Classification, CombinedResult, Result};

use crate::logger::ResultLogger;
use crate::orchestrator::{DispatchObserver, Orchestrator, SilentObserver};

/// Routes free-text questions to the sources that can answer them.
#[derive(Debug, Clone)]
pub struct Router {
    classifier: Classifier,
    orchestrator: Orchestrator,
}

impl Router {
    pub fn new(classifier: Classifier, orchestrator: Orchestrator) -> Self {
        Self {
            classifier,
            orchestrator,
        }
    }

    /// Built-in adapters and rules configured from `config`. `output_dir`
    /// overrides `[defaults] output_dir`.
    pub fn from_config(config: &AppConfig, output_dir: Option<PathBuf>) -> Result<Self> {
        let adapters = build_adapters(config)?;
        Self::with_adapters(config, adapters, output_dir)
    }

    /// Like [`from_config`](Self::from_config) with caller-supplied adapters.
    pub fn with_adapters(
        config: &AppConfig,
        adapters: AdapterSet,
        output_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let classifier =
            Classifier::with_project_identifiers(&config.classifier.project_identifiers)?;
        let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));
        let orchestrator = Orchestrator::new(
            adapters,
            config.slides.clone(),
            ResultLogger::new(output_dir),
        );
        Ok(Self::new(classifier, orchestrator))
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn classify(&self, query: &str) -> Classification {
        self.classifier.classify(query)
    }

    /// Classify `query` and dispatch it to completion.
    pub async fn ask(&self, query: &str) -> CombinedResult {
        self.ask_until(query, std::future::pending(), &SilentObserver)
            .await
    }

    /// Classify `query` and dispatch it until `cancel` resolves.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn ask_until<F>(
        &self,
        query: &str,
        cancel: F,
        observer: &dyn DispatchObserver,
    ) -> CombinedResult
    where
        F: Future<Output = ()>,
    {
        let classification = self.classify(query);
        info!(
            sources = ?classification.sources(),
            slide_target = ?classification.slide_target(),
            mode = ?classification.mode(),
            "query classified"
        );
        self.orchestrator
            .dispatch_until(&classification, query, cancel, observer)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sourcerouter_adapters::{AdapterError, AdapterResult, FetchRequest, SourceAdapter};
    use sourcerouter_shared::{Source, SourceStatus};

    struct Echo(Source);

    #[async_trait]
    impl SourceAdapter for Echo {
        fn source(&self) -> Source {
            self.0
        }

        fn name(&self) -> &str {
            "echo"
        }

        async fn fetch(&self, request: &FetchRequest) -> AdapterResult<String> {
            match self.0 {
                Source::CodeHost => Err(AdapterError::hard("rate limited")),
                _ => Ok(format!("{}: {}", self.0, request.query)),
            }
        }
    }

    fn router(dir: &tempfile::TempDir) -> Router {
        let adapters = Source::ALL
            .into_iter()
            .fold(AdapterSet::new(), |set, source| set.with(Echo(source)));
        Router::with_adapters(&AppConfig::default(), adapters, Some(dir.path().to_path_buf()))
            .expect("router")
    }

    #[tokio::test]
    async fn ask_routes_slide_stats_to_slides_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let combined = router(&dir).ask("Show me stats from slide 2").await;

        let sources: Vec<_> = combined.results().iter().filter_map(|r| r.source()).collect();
        assert_eq!(sources, vec![Source::Slides]);
        assert_eq!(combined.summary_log(), &["✓ Slides (slide2) — data retrieved."]);
        assert!(combined.log_path().is_some());
    }

    #[tokio::test]
    async fn unrecognised_query_fans_out_and_isolates_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let combined = router(&dir).ask("asdkjasd").await;

        assert_eq!(combined.results().len(), 4);
        let failed: Vec<_> = combined
            .results()
            .iter()
            .filter(|r| r.status() == SourceStatus::Failed)
            .filter_map(|r| r.source())
            .collect();
        assert_eq!(failed, vec![Source::CodeHost]);
    }

    #[test]
    fn project_identifiers_come_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let classification = router(&dir).classify("what is dshah1003 working on");
        assert_eq!(
            classification.sources().iter().copied().collect::<Vec<_>>(),
            vec![Source::CodeHost]
        );
    }
}
