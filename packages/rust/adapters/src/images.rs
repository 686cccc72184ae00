//! Image adapter: text extraction through a document-parse model.
//!
//! The parser is shared with the wiki adapter, which uses it for images
//! embedded in pages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use sourcerouter_shared::{ImagesConfig, Result, RouterError, Source, read_secret};

use crate::error::{AdapterError, AdapterResult};
use crate::http;
use crate::{FetchRequest, SourceAdapter};

pub const NO_IMAGE_MESSAGE: &str = "No image reference found in the query.";
pub const NO_TEXT_MESSAGE: &str = "Could not extract text from image.";

/// Parse task requested from the model.
const PARSE_TASK: &str = "markdown_no_bbox";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Where an image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(Url),
    File(PathBuf),
}

impl ImageRef {
    /// `http(s)://` references are URLs, everything else is a local path.
    pub fn new(reference: &str) -> Self {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(url),
            _ => Self::File(PathBuf::from(reference)),
        }
    }

    /// MIME type from the extension, `image/jpeg` when unknown.
    pub fn mime_type(&self) -> &'static str {
        let ext = match self {
            Self::Url(url) => Path::new(url.path()).extension(),
            Self::File(path) => path.extension(),
        };

        match ext
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("bmp") => "image/bmp",
            _ => "image/jpeg",
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url.as_str()),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// First whitespace-separated token ending in an image extension.
pub fn find_image_reference(query: &str) -> Option<&str> {
    query
        .split_whitespace()
        .map(|token| {
            token
                .trim_start_matches(['"', '\'', '(', '<'])
                .trim_end_matches(['"', '\'', ')', '>', ',', '.', '?', '!', ';', ':'])
        })
        .find(|token| {
            let path = token.split(['?', '#']).next().unwrap_or(token);
            path.rsplit_once('.').is_some_and(|(stem, ext)| {
                !stem.is_empty() && IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
            })
        })
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    choices: Vec<ParseChoice>,
}

#[derive(Debug, Deserialize)]
struct ParseChoice {
    message: ParseMessage,
}

#[derive(Debug, Deserialize)]
struct ParseMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ParsedBlock {
    text: String,
}

impl ParseResponse {
    /// Text of the first parsed block, if the payload has one.
    fn into_text(self) -> Option<String> {
        let call = self.choices.into_iter().next()?.message.tool_calls.into_iter().next()?;
        let blocks: Vec<ParsedBlock> = serde_json::from_str(&call.function.arguments).ok()?;
        blocks.into_iter().next().map(|b| b.text)
    }
}

/// Client for the image-parse model.
#[derive(Debug, Clone)]
pub struct ImageParser {
    http: Client,
    url: String,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
}

impl ImageParser {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            url: url.into(),
            api_key,
            api_key_env: "NVIDIA_API_KEY".into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &ImagesConfig) -> Result<Self> {
        let mut parser = Self::new(
            config.parse_url.clone(),
            read_secret(&config.api_key_env),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        parser.api_key_env = config.api_key_env.clone();
        Ok(parser)
    }

    async fn load(&self, image: &ImageRef) -> AdapterResult<Vec<u8>> {
        match image {
            ImageRef::Url(url) => {
                let response = self.http.get(url.clone()).send().await?;
                let response = http::ensure_success(response, "image download").await?;
                Ok(response.bytes().await?.to_vec())
            }
            ImageRef::File(path) => tokio::fs::read(path)
                .await
                .map_err(|e| AdapterError::from(RouterError::io(path.clone(), e))),
        }
    }

    /// Extracted text, or `None` when the model returned nothing usable.
    #[instrument(skip_all, fields(image = %image))]
    pub async fn parse(&self, image: &ImageRef) -> AdapterResult<Option<String>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AdapterError::hard(format!("image parser unavailable: {} is not set", self.api_key_env))
        })?;

        let bytes = self.load(image).await?;
        debug!(bytes = bytes.len(), "image loaded");

        let content = format!(
            r#"<img src="data:{};base64,{}" />"#,
            image.mime_type(),
            STANDARD.encode(&bytes)
        );
        let tool = json!({"type": "function", "function": {"name": PARSE_TASK}});
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "tools": [tool],
            "tool_choice": tool,
            "max_tokens": 1024,
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        let parsed: ParseResponse = http::read_json(response, "image parse").await?;

        let text = parsed.into_text();
        if text.is_none() {
            warn!("parse response carried no text");
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Image source adapter. Parses the image named in the query, or the
/// configured default image.
pub struct ImageAdapter {
    parser: Arc<ImageParser>,
    default_image: Option<String>,
}

impl ImageAdapter {
    pub fn new(parser: Arc<ImageParser>, default_image: Option<String>) -> Self {
        Self {
            parser,
            default_image,
        }
    }
}

#[async_trait]
impl SourceAdapter for ImageAdapter {
    fn source(&self) -> Source {
        Source::Images
    }

    fn name(&self) -> &str {
        "image-parse"
    }

    #[instrument(skip_all, fields(adapter = "image-parse"))]
    async fn fetch(&self, request: &FetchRequest) -> AdapterResult<String> {
        let reference = find_image_reference(&request.query)
            .or(self.default_image.as_deref())
            .ok_or_else(|| AdapterError::soft(NO_IMAGE_MESSAGE))?;

        self.parser
            .parse(&ImageRef::new(reference))
            .await?
            .ok_or_else(|| AdapterError::soft(NO_TEXT_MESSAGE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcerouter_shared::Mode;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parser(server: &MockServer, key: Option<&str>) -> Arc<ImageParser> {
        Arc::new(
            ImageParser::new(
                format!("{}/v1/chat/completions", server.uri()),
                key.map(String::from),
                "parse-model",
                Duration::from_secs(5),
            )
            .expect("parser"),
        )
    }

    fn parse_reply(text: &str) -> serde_json::Value {
        let arguments = serde_json::to_string(&json!([{"text": text}])).expect("args");
        json!({
            "choices": [{"message": {"tool_calls": [{"function": {"name": PARSE_TASK, "arguments": arguments}}]}}]
        })
    }

    #[test]
    fn image_references_in_queries() {
        assert_eq!(find_image_reference("what does chart.png say?"), Some("chart.png"));
        assert_eq!(
            find_image_reference("read (https://x.io/a/Receipt.JPG?size=2)."),
            Some("https://x.io/a/Receipt.JPG?size=2")
        );
        assert_eq!(find_image_reference("describe the image please"), None);
        assert_eq!(find_image_reference("the .png format"), None);
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(ImageRef::new("a/b.PNG").mime_type(), "image/png");
        assert_eq!(ImageRef::new("https://x.io/p.webp?v=1").mime_type(), "image/webp");
        assert_eq!(ImageRef::new("scan.jpeg").mime_type(), "image/jpeg");
        assert_eq!(ImageRef::new("noext").mime_type(), "image/jpeg");
        assert!(matches!(ImageRef::new("http://x/y.gif"), ImageRef::Url(_)));
    }

    #[tokio::test]
    async fn parses_local_file() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("receipt.png");
        std::fs::write(&file, b"PNGDATA").expect("write");

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains(&format!(
                "data:image/png;base64,{}",
                STANDARD.encode(b"PNGDATA")
            )))
            .and(body_partial_json(json!({
                "model": "parse-model",
                "tool_choice": {"type": "function", "function": {"name": "markdown_no_bbox"}},
                "max_tokens": 1024
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(parse_reply("Total: $12.50")))
            .mount(&server)
            .await;

        let adapter = ImageAdapter::new(parser(&server, Some("k")), None);
        let query = format!("what is the total on {}", file.display());
        let text = adapter
            .fetch(&FetchRequest::new(query, Mode::Summary))
            .await
            .expect("text");
        assert_eq!(text, "Total: $12.50");
    }

    #[tokio::test]
    async fn downloads_remote_image_and_uses_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/chart.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"GIF89a".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("data:image/gif;base64,"))
            .respond_with(ResponseTemplate::new(200).set_body_json(parse_reply("Q1 chart")))
            .mount(&server)
            .await;

        let default = format!("{}/img/chart.gif", server.uri());
        let adapter = ImageAdapter::new(parser(&server, Some("k")), Some(default));
        let text = adapter
            .fetch(&FetchRequest::new("describe the image", Mode::Summary))
            .await
            .expect("text");
        assert_eq!(text, "Q1 chart");
    }

    #[tokio::test]
    async fn no_reference_is_soft_error() {
        let server = MockServer::start().await;
        let adapter = ImageAdapter::new(parser(&server, Some("k")), None);
        let err = adapter
            .fetch(&FetchRequest::new("describe the image", Mode::Summary))
            .await
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.message(), NO_IMAGE_MESSAGE);
    }

    #[tokio::test]
    async fn unusable_parse_reply_is_soft_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("blank.jpg");
        std::fs::write(&file, b"JPEG").expect("write");

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"choices": [{"message": {"content": "no tools"}}]})),
            )
            .mount(&server)
            .await;

        let adapter = ImageAdapter::new(parser(&server, Some("k")), None);
        let err = adapter
            .fetch(&FetchRequest::new(file.display().to_string(), Mode::Summary))
            .await
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.message(), NO_TEXT_MESSAGE);
    }

    #[tokio::test]
    async fn unreadable_file_is_hard_error() {
        let server = MockServer::start().await;
        let adapter = ImageAdapter::new(parser(&server, Some("k")), None);
        let err = adapter
            .fetch(&FetchRequest::new("/definitely/missing/photo.png", Mode::Summary))
            .await
            .unwrap_err();
        assert!(!err.is_soft());
        assert!(err.message().contains("photo.png"));
    }

    #[tokio::test]
    async fn parse_service_error_is_hard() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("x.png");
        std::fs::write(&file, b"P").expect("write");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = parser(&server, Some("k"))
            .parse(&ImageRef::File(file))
            .await
            .unwrap_err();
        assert!(!err.is_soft());
        assert!(err.message().contains("500"));
    }
}
