//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use sourcerouter_classifier::Classifier;
use sourcerouter_core::{DispatchObserver, Router};
use sourcerouter_shared::{
    AppConfig, CombinedResult, Source, SourceResult, init_config, load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SourceRouter: ask one question, query every relevant source.
#[derive(Parser)]
#[command(
    name = "sourcerouter",
    version,
    about = "Route a question to Notion, GitHub, Google Slides and image parsing, then combine the answers.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.sourcerouter/sourcerouter.toml).
    #[arg(long, global = true, env = "SOURCEROUTER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ask a question and dispatch it to every relevant source.
    Ask {
        /// The question. Prompted for on stdin when omitted.
        query: Vec<String>,

        /// Directory for the combined result log.
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Show how a question would be routed without dispatching it.
    Classify {
        /// The question to classify.
        #[arg(required = true)]
        query: Vec<String>,

        /// Also list the rules that fired.
        #[arg(long)]
        explain: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// the answer.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sourcerouter=info",
        1 => "sourcerouter=debug",
        _ => "sourcerouter=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Ask { query, out } => cmd_ask(config_path, &query, out.as_deref()).await,
        Command::Classify { query, explain } => cmd_classify(config_path, &query, explain),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

async fn cmd_ask(config_path: Option<&Path>, words: &[String], out: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path)?;

    let query = if words.is_empty() {
        prompt_query()?
    } else {
        words.join(" ")
    };
    let query = query.trim();
    if query.is_empty() {
        return Err(eyre!("no question given"));
    }

    let router = Router::from_config(&config, out.map(PathBuf::from))?;
    info!(output_dir = %router.orchestrator().logger().output_dir().display(), "dispatching query");

    let progress = CliProgress::new();
    let cancel = async {
        // Without a signal handler the dispatch just runs to completion.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let combined = router.ask_until(query, cancel, &progress).await;
    progress.finish();

    print_result(&combined);
    Ok(())
}

fn prompt_query() -> Result<String> {
    print!("Enter your question: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

fn print_result(combined: &CombinedResult) {
    println!();
    if combined.is_cancelled() {
        println!("  Cancelled; showing partial results.");
        println!();
    }
    println!("SOURCE SUMMARY:");
    for line in combined.summary_log() {
        println!("  {line}");
    }
    println!();
    println!("{}", combined.primary_content());
    if let Some(path) = combined.log_path() {
        println!();
        println!("Full log saved to: {}", path.display());
    }
}

fn cmd_classify(config_path: Option<&Path>, words: &[String], explain: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let classifier = Classifier::with_project_identifiers(&config.classifier.project_identifiers)?;

    let (classification, fired) = classifier.explain(&words.join(" "));
    println!("{}", serde_json::to_string_pretty(&classification)?);
    if explain {
        println!("rules: {}", fired.join(", "));
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner naming the sources still in flight.
struct CliProgress {
    spinner: ProgressBar,
    pending: Mutex<BTreeSet<Source>>,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner.set_message("Classifying");
        Self {
            spinner,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    fn refresh(&self, pending: &BTreeSet<Source>) {
        if pending.is_empty() {
            self.spinner.set_message("Assembling results");
            return;
        }
        let names: Vec<_> = pending.iter().map(|s| s.display_name()).collect();
        self.spinner
            .set_message(format!("Waiting on {} (Ctrl-C to stop)", names.join(", ")));
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl DispatchObserver for CliProgress {
    fn source_started(&self, source: Source) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(source);
            self.refresh(&pending);
        }
    }

    fn source_finished(&self, result: &SourceResult) {
        self.spinner.println(format!("  {}", result.summary_line()));
        if let (Ok(mut pending), Some(source)) = (self.pending.lock(), result.source()) {
            pending.remove(&source);
            self.refresh(&pending);
        }
    }
}
