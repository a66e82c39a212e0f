mod cli;
mod config;
mod run;

use anyhow::bail;
use clap::Parser;
use parcel_upload::scan_items;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use config::CliConfig;
use run::{Target, run_batch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let (items, target) = match cli.command {
        Commands::Upload {
            paths,
            into,
            create,
        } => {
            let target = if create {
                Target::CreateContainer(into)
            } else {
                Target::Container(into)
            };
            (scan_items(&paths)?, target)
        }
        Commands::Replace { file, target } => {
            let items = scan_items(std::slice::from_ref(&file))?;
            if items.len() != 1 {
                bail!("{} is not a single file", file.display());
            }
            (items, Target::File(target))
        }
    };

    let done = run_batch(&config, items, target).await?;
    println!("{}", serde_json::to_string_pretty(&done)?);
    Ok(())
}
