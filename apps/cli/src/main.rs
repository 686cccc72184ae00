//! SourceRouter CLI: ask one question across several knowledge sources.
//!
//! Classifies the question, fans it out to Notion, GitHub, Google Slides
//! and image parsing concurrently, and prints the combined answer.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
