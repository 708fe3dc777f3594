use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "job-agent")]
#[command(about = "Run one job at a time on behalf of a control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file (default: ~/.config/job-agent/agent.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show or initialize the agent config
    Config {
        /// Print the default config path
        #[arg(long)]
        path: bool,

        /// Write a sample config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, config } => {
            commands::serve(config.as_deref(), host, port).await?;
        }
        Commands::Config { path, init } => {
            commands::config(path, init)?;
        }
    }

    Ok(())
}
