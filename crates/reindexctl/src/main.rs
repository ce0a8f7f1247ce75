/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::{ConfigLoader, CONFIG_ENV_VAR};

/// reindexctl - drive a reindex job against an in-memory datastore
#[derive(Parser)]
#[command(name = "reindexctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./reindex.toml, then the user config directory)
    #[arg(long, short = 'c', env = CONFIG_ENV_VAR, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single worker polling the job store
    Scheduler,
    /// Orchestrator and processing jobs on a job queue
    Distributed,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the datastore and run one reindex job to completion
    Run {
        #[arg(long, value_enum, default_value = "scheduler")]
        mode: Mode,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,

        /// Hosts to start in distributed mode
        #[arg(long, default_value_t = 1)]
        hosts: usize,

        /// Concurrent processing jobs per host in distributed mode
        /// (defaults to engine.host_max_concurrent_jobs)
        #[arg(long)]
        jobs_per_host: Option<usize>,
    },
    /// Print the resolved configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            mode,
            timeout_secs,
            hosts,
            jobs_per_host,
        } => {
            let options = commands::run::RunOptions {
                mode,
                timeout: Duration::from_secs(timeout_secs),
                hosts: hosts.max(1),
                jobs_per_host,
            };
            let report = commands::run::run(&config, options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
