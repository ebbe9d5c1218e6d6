use anyhow::Result;
use backtest_engine::{
    commands::{run_task, show_result},
    context::AppContext,
};
use clap::{Parser, Subcommand};
use std::env;

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Signal-driven daily backtest engine for stored prediction results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest task to completion and persist its outputs
    Run {
        /// Task row id to execute
        task_id: i64,
    },
    /// Print the stored result summary of a finished task as JSON
    ShowResult {
        /// Task row id to look up
        task_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let app_context = AppContext::initialize(env::var("DATABASE_URL").ok());

    match cli.command {
        Commands::Run { task_id } => run_task::run(&app_context, task_id).await,
        Commands::ShowResult { task_id } => show_result::run(&app_context, task_id).await,
    }
}
