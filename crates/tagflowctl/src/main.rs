mod cli;
mod commands;
mod engine;
mod output;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = cli::Cli::parse();

    let config_dir = engine::config_dir_from_env(cli.config_dir.as_deref());
    let history_db = engine::history_db_from_env(cli.history_db.as_deref());
    let format = OutputFormat::parse(&cli.output);

    match cli.command {
        cli::Commands::Serve => commands::serve::run(&config_dir, &history_db).await,
        cli::Commands::Config { action } => match action {
            cli::ConfigAction::Validate => commands::config::validate(&config_dir).await,
            cli::ConfigAction::Reload => commands::config::reload(&config_dir).await,
        },
        cli::Commands::Flow { action } => match action {
            cli::FlowAction::List => commands::flow::list(&config_dir, &format).await,
            cli::FlowAction::Deploy { file } => commands::flow::deploy(&config_dir, &file).await,
            cli::FlowAction::Run { flow_id, payload } => commands::flow::run(&config_dir, &history_db, &flow_id, payload).await,
        },
        cli::Commands::History { action } => match action {
            cli::HistoryAction::Query { connection_id, tag_id, start, end, limit } => {
                commands::history::query(&history_db, &connection_id, &tag_id, start, end, limit, &format).await
            }
            cli::HistoryAction::Cleanup { retention_days } => commands::history::cleanup(&history_db, retention_days).await,
        },
        cli::Commands::Status => commands::status::run(&config_dir, &format).await,
        cli::Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut cli::Cli::command(), "tagflowctl", &mut std::io::stdout());
            Ok(())
        }
    }
}
