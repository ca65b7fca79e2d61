mod candidates;
mod checkpoint;
mod classifier;
mod columnar;
mod config;
mod coordinator;
mod dbscan;
mod errors;
mod grid;
mod merge;
mod partition;
mod pipeline;
mod projection;
mod records;
mod source;
mod stops;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(about = "Infer home and work stops for transit cards")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every enabled pipeline stage
    Run {
        #[clap(long)]
        config: PathBuf,
        /// Only cluster this batch id
        #[clap(long)]
        batch: Option<u32>,
    },
    /// Grid code utilities
    Grid {
        #[clap(subcommand)]
        command: GridCommand,
    },
}

#[derive(Subcommand)]
enum GridCommand {
    Encode {
        #[clap(long)]
        x: f64,
        #[clap(long)]
        y: f64,
    },
    Decode {
        #[clap(required = true)]
        codes: Vec<String>,
        #[clap(long)]
        wkt: bool,
        #[clap(long)]
        korean: bool,
    },
}

const NO_VALUE: &str = "no value";

fn run_grid(command: GridCommand) {
    match command {
        GridCommand::Encode { x, y } => match grid::encode(x, y) {
            Some(code) => println!("{code}"),
            None => println!("{NO_VALUE}"),
        },
        GridCommand::Decode { codes, wkt, korean } => {
            let decoded: Vec<String> = if wkt {
                grid::decode_wkt_many(&codes)
                    .into_iter()
                    .map(|w| w.unwrap_or_else(|| NO_VALUE.to_string()))
                    .collect()
            } else {
                grid::decode_many(&codes)
                    .into_iter()
                    .map(|p| p.map_or_else(|| NO_VALUE.to_string(), |p| format!("{} {}", p.x, p.y)))
                    .collect()
            };
            for (code, line) in codes.iter().zip(decoded) {
                if korean {
                    let hangul = grid::to_korean(code).unwrap_or_else(|| NO_VALUE.to_string());
                    println!("{code}\t{hangul}\t{line}");
                } else {
                    println!("{code}\t{line}");
                }
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run { config: config_path, batch } => {
            let config = config::Config::from_toml_file(&config_path)
                .with_context(|| format!("Loading config from {}", config_path.display()))?;

            let interrupt = utils::Interrupt::new();
            interrupt
                .install_ctrlc_handler()
                .context("Installing Ctrl-C handler")?;

            let options = pipeline::RunOptions { only_batch: batch };
            pipeline::run(&config, &options, &interrupt).context("Pipeline run failed")?;
        }
        Command::Grid { command } => run_grid(command),
    }
    Ok(())
}
