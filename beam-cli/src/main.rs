mod page_file;

use beam_common::config::{MAX_KEY_SIZE, MAX_VALUE_SIZE, PAGE_SIZE};
use beam_common::StoreConfig;
use beam_store::save_data;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "beam")]
#[command(about = "Write and inspect BeamDB node pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Page size in bytes
    #[arg(long, default_value_t = PAGE_SIZE)]
    page_size: usize,

    /// Largest accepted key in bytes
    #[arg(long, default_value_t = MAX_KEY_SIZE)]
    max_key_size: usize,

    /// Largest accepted value in bytes
    #[arg(long, default_value_t = MAX_VALUE_SIZE)]
    max_value_size: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Atomically write DATA to PATH, then read it back
    Save { path: PathBuf, data: String },
    /// Insert or replace KEY=VALUE pairs in the leaf page at PATH
    Put {
        path: PathBuf,
        #[arg(required = true, value_parser = page_file::parse_pair)]
        pairs: Vec<(String, String)>,
    },
    /// Print the header and entries of the page at PATH
    Inspect {
        path: PathBuf,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn config(&self) -> StoreConfig {
        StoreConfig {
            page_size: self.page_size,
            max_key_size: self.max_key_size,
            max_value_size: self.max_value_size,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = cli.config();
    config.validate()?;

    match &cli.command {
        Commands::Save { path, data } => {
            save_data(path, data.as_bytes())?;
            info!(path = %path.display(), "data saved");
            let read_back = std::fs::read(path)?;
            println!(
                "{} {}",
                "Data read:".green().bold(),
                String::from_utf8_lossy(&read_back)
            );
        }
        Commands::Put { path, pairs } => {
            let node = page_file::put_pairs(&config, path, pairs)?;
            println!(
                "{} {} key(s), {} bytes used",
                "Saved leaf:".green().bold(),
                node.key_count(),
                node.used_bytes()?
            );
        }
        Commands::Inspect { path, json } => {
            let node = page_file::load(&config, path)?
                .ok_or_else(|| anyhow::anyhow!("no page at {}", path.display()))?;
            let summary = page_file::summarize(&node)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                page_file::print_summary(&summary);
            }
        }
    }

    Ok(())
}
