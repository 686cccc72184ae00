//! Plain-text persistence of combined results.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use sourcerouter_shared::{CombinedResult, RouterError};

/// File name prefix of every persisted result.
pub const FILE_PREFIX: &str = "combined_results_";

/// Numbered names tried once the bare timestamp is taken.
const MAX_SUFFIX: u32 = 999;

/// Writes one text file per dispatch into `output_dir`.
#[derive(Debug, Clone)]
pub struct ResultLogger {
    output_dir: PathBuf,
}

impl ResultLogger {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Candidate path for `result`. Attempt 0 is the bare timestamp,
    /// later attempts append `_1`, `_2`, ...
    pub fn path_for(&self, result: &CombinedResult, attempt: u32) -> PathBuf {
        let stem = format!("{FILE_PREFIX}{}", result.storage_key());
        let name = match attempt {
            0 => format!("{stem}.txt"),
            n => format!("{stem}_{n}.txt"),
        };
        self.output_dir.join(name)
    }

    /// Write `result` to a fresh file and return its path. Existing files
    /// are never overwritten. Failures are logged, never raised.
    pub async fn persist(&self, result: &CombinedResult) -> Option<PathBuf> {
        match self.try_persist(result).await {
            Ok(path) => {
                debug!(path = %path.display(), "result persisted");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "could not persist combined result");
                None
            }
        }
    }

    async fn try_persist(&self, result: &CombinedResult) -> Result<PathBuf, RouterError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| RouterError::io(&self.output_dir, e))?;

        let body = render(result);
        for attempt in 0..=MAX_SUFFIX {
            let path = self.path_for(result, attempt);
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RouterError::io(&path, e)),
            };
            file.write_all(body.as_bytes())
                .await
                .map_err(|e| RouterError::io(&path, e))?;
            file.flush().await.map_err(|e| RouterError::io(&path, e))?;
            return Ok(path);
        }

        Err(RouterError::io(
            &self.output_dir,
            std::io::Error::new(ErrorKind::AlreadyExists, "no free result file name"),
        ))
    }
}

/// Text layout of a persisted result.
pub fn render(result: &CombinedResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "USER QUERY: {}\n", result.query());
    out.push_str("SOURCE SUMMARY:\n");
    for line in result.summary_log() {
        let _ = writeln!(out, "  {line}");
    }
    out.push_str("\n\n");
    out.push_str(&result.combined_output());
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcerouter_shared::{Source, SourceResult};

    fn sample() -> CombinedResult {
        CombinedResult::new(
            "Show me stats from slide 2",
            vec![
                SourceResult::failed(Source::CodeHost, "HTTP 404"),
                SourceResult::ok(Source::Slides, "Revenue +20%").with_detail("slide2"),
            ],
            false,
        )
    }

    #[test]
    fn render_layout() {
        let text = render(&sample());
        let expected = "USER QUERY: Show me stats from slide 2\n\n\
            SOURCE SUMMARY:\n\
            \x20 ✗ GitHub — failed: HTTP 404\n\
            \x20 ✓ Slides (slide2) — data retrieved.\n\
            \n\n\
            === GITHUB ===\n\
            ⚠️ GitHub error: HTTP 404\n\n\
            === SLIDES (slide2) ===\n\
            Revenue +20%\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn no_source_renders_warning() {
        let result = CombinedResult::new("asdf", vec![SourceResult::no_source()], false);
        let text = render(&result);
        assert!(text.contains("  ✗ No relevant sources found.\n"));
        assert!(text.contains("⚠️ No valid source detected for this query."));
    }

    #[tokio::test]
    async fn persist_creates_directory_and_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = ResultLogger::new(dir.path().join("nested/outputs"));
        let result = sample();

        let path = logger.persist(&result).await.expect("persisted");
        assert_eq!(path, logger.path_for(&result, 0));

        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with(FILE_PREFIX));
        assert!(name.ends_with(".txt"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), render(&result));
    }

    #[tokio::test]
    async fn same_second_results_get_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = ResultLogger::new(dir.path());
        let first = sample();
        let second = CombinedResult::new(
            "second question",
            vec![SourceResult::ok(Source::Wiki, "wiki answer")],
            false,
        );

        let first_path = logger.persist(&first).await.expect("first");
        let second_path = logger.persist(&second).await.expect("second");

        assert_ne!(first_path, second_path);
        assert_eq!(std::fs::read_to_string(&first_path).expect("read"), render(&first));
        assert_eq!(std::fs::read_to_string(&second_path).expect("read"), render(&second));
        assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 2);
    }

    #[tokio::test]
    async fn numbered_name_follows_bare_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = ResultLogger::new(dir.path());
        let result = sample();

        let first = logger.persist(&result).await.expect("first");
        let second = logger.persist(&result).await.expect("second");

        assert_eq!(first, logger.path_for(&result, 0));
        assert_eq!(second, logger.path_for(&result, 1));
        let name = second.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.ends_with("_1.txt"), "{name}");
    }

    #[tokio::test]
    async fn persist_failure_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").expect("write");

        let logger = ResultLogger::new(blocker.join("outputs"));
        assert!(logger.persist(&sample()).await.is_none());
    }
}
