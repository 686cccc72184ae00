//! Application configuration for SourceRouter.
//!
//! User config lives at `~/.sourcerouter/sourcerouter.toml`.
//! CLI flags override config file values, which override defaults.
//! Credentials are never stored here, only the names of the env vars
//! that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::types::SlideTarget;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sourcerouter.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sourcerouter";

// ---------------------------------------------------------------------------
// Config structs (matching sourcerouter.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Chat-completion endpoint shared by the wiki and slides adapters.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Shared adapter settings.
    #[serde(default)]
    pub adapters: AdaptersConfig,

    /// Workspace wiki (Notion API).
    #[serde(default)]
    pub wiki: WikiConfig,

    /// Code host (GitHub REST API).
    #[serde(default)]
    pub code_host: CodeHostConfig,

    /// Slide decks (Google Slides API).
    #[serde(default)]
    pub slides: SlidesConfig,

    /// Image-to-text extraction.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Classifier tuning.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory the result logger writes into.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "outputs".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root (the client appends `/chat/completions`).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_nvidia_key_env")]
    pub api_key_env: String,

    /// Model used for wiki and slide analysis.
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_nvidia_key_env(),
            model: default_llm_model(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".into()
}
fn default_nvidia_key_env() -> String {
    "NVIDIA_API_KEY".into()
}
fn default_llm_model() -> String {
    "nvidia/llama-3.3-nemotron-super-49b-v1.5".into()
}

/// `[adapters]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptersConfig {
    /// HTTP timeout for each upstream call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

/// `[wiki]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    #[serde(default = "default_wiki_base_url")]
    pub base_url: String,

    /// Name of the env var holding the integration token.
    #[serde(default = "default_wiki_token_env")]
    pub token_env: String,

    /// Maximum pages pulled per query.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            base_url: default_wiki_base_url(),
            token_env: default_wiki_token_env(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_wiki_base_url() -> String {
    "https://api.notion.com".into()
}
fn default_wiki_token_env() -> String {
    "NOTION_TOKEN".into()
}
fn default_max_pages() -> u32 {
    5
}

/// `[code_host]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeHostConfig {
    #[serde(default = "default_code_host_api")]
    pub api_base: String,

    /// Name of the env var holding an optional access token.
    #[serde(default = "default_code_host_token_env")]
    pub token_env: String,
}

impl Default for CodeHostConfig {
    fn default() -> Self {
        Self {
            api_base: default_code_host_api(),
            token_env: default_code_host_token_env(),
        }
    }
}

fn default_code_host_api() -> String {
    "https://api.github.com".into()
}
fn default_code_host_token_env() -> String {
    "GITHUB_TOKEN".into()
}

/// `[slides]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidesConfig {
    #[serde(default = "default_slides_api")]
    pub api_base: String,

    /// Name of the env var holding an OAuth access token.
    #[serde(default = "default_slides_token_env")]
    pub access_token_env: String,

    /// Deck analysed when the query names no slide target.
    #[serde(default = "default_deck")]
    pub default_deck: String,

    /// `[[slides.decks]]` — deck aliases addressable as "slide N".
    #[serde(default = "default_decks")]
    pub decks: Vec<DeckEntry>,
}

impl Default for SlidesConfig {
    fn default() -> Self {
        Self {
            api_base: default_slides_api(),
            access_token_env: default_slides_token_env(),
            default_deck: default_deck(),
            decks: default_decks(),
        }
    }
}

impl SlidesConfig {
    /// Deck mapped to `target`, if any.
    pub fn deck_for(&self, target: SlideTarget) -> Option<&str> {
        self.decks
            .iter()
            .find(|d| d.slot == target.get())
            .map(|d| d.url.as_str())
    }
}

/// A `[[slides.decks]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckEntry {
    /// Alias number used in queries ("slide 2" → slot 2).
    pub slot: u8,
    /// Full presentation link.
    pub url: String,
}

const DECK_1: &str =
    "https://docs.google.com/presentation/d/1nW35OzCsJxcnu64AvHJA1QnCg_aYOJyTqbhYljrcEmI/edit";
const DECK_2: &str =
    "https://docs.google.com/presentation/d/1Y7-tt8vv8_xSoGpOcPsGNNmmB2Gg1YzUdqy6xzQK1cU/edit?usp=sharing";
const DECK_3: &str =
    "https://docs.google.com/presentation/d/1p2QUOoSGbm0gVPrmFqGg5eikJBJSMIH5TFQW_wdJgdU/edit?usp=sharing";

fn default_slides_api() -> String {
    "https://slides.googleapis.com".into()
}
fn default_slides_token_env() -> String {
    "GOOGLE_SLIDES_TOKEN".into()
}
fn default_deck() -> String {
    DECK_1.into()
}
fn default_decks() -> Vec<DeckEntry> {
    [(1, DECK_1), (2, DECK_2), (3, DECK_3), (4, DECK_3)]
        .into_iter()
        .map(|(slot, url)| DeckEntry {
            slot,
            url: url.to_string(),
        })
        .collect()
}

/// `[images]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Full chat-completions URL of the parse model.
    #[serde(default = "default_parse_url")]
    pub parse_url: String,

    #[serde(default = "default_nvidia_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_parse_model")]
    pub model: String,

    /// Image used when the query does not reference one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,

    /// Parsing is slow; it gets its own timeout.
    #[serde(default = "default_parse_timeout")]
    pub timeout_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            parse_url: default_parse_url(),
            api_key_env: default_nvidia_key_env(),
            model: default_parse_model(),
            default_image: None,
            timeout_secs: default_parse_timeout(),
        }
    }
}

fn default_parse_url() -> String {
    "https://integrate.api.nvidia.com/v1/chat/completions".into()
}
fn default_parse_model() -> String {
    "nvidia/nemotron-parse".into()
}
fn default_parse_timeout() -> u64 {
    120
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Project or organisation names that imply the code host.
    #[serde(default = "default_project_identifiers")]
    pub project_identifiers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            project_identifiers: default_project_identifiers(),
        }
    }
}

fn default_project_identifiers() -> Vec<String> {
    vec!["dshah1003".into(), "utdallasepics".into(), "epics".into()]
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Read a credential from the env var named `var_name`.
/// Empty values count as missing.
pub fn read_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sourcerouter/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RouterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sourcerouter/sourcerouter.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RouterError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        RouterError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject deck slots the classifier can never produce.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for deck in &config.slides.decks {
        if SlideTarget::new(u64::from(deck.slot)).is_none() {
            return Err(RouterError::config(format!(
                "[[slides.decks]] slot {} is outside the supported range",
                deck.slot
            )));
        }
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RouterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RouterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RouterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
