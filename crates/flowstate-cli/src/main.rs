mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{config::ConfigAction, daemon::DaemonAction, session::ReportAction};
use flowstate_core::config::get_data_dir;
use flowstate_storage::Decision;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flowstate")]
#[command(about = "Flow state tracking with gamified distraction control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Start a focus session
    Start {
        /// What you are working on
        #[arg(short, long)]
        task: Option<String>,
    },
    /// Stop the current session and show its XP
    Stop,
    /// Show the live session status
    Status {
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report an activity sample to the daemon
    Report {
        #[command(subcommand)]
        sample: ReportAction,
    },
    /// Resolve the pending intervention
    Resolve {
        /// Intervention id (defaults to the pending one)
        #[arg(long)]
        id: Option<Uuid>,
        /// open-anyway or wait-for-break
        decision: Decision,
    },
    /// Set the externally measured focus score (0-100)
    Focus { score: f64 },
    /// Take the queued requests to close distracting content
    CloseRequests,
    /// Show recent sessions
    History {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
    /// Show level, XP and cognitive profile
    Profile,
    /// Show the hours of the day with the best flow
    Hours {
        /// Look back this many days
        #[arg(long, default_value = "30")]
        days: u32,
        /// Minimum logged sessions for an hour to count
        #[arg(long, default_value = "2")]
        min_samples: u32,
    },
    /// Show the sources that keep breaking flow and the tuned flow threshold
    Patterns,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(
        cli.command,
        Commands::DaemonInternalStart
            | Commands::Daemon {
                action: DaemonAction::Run
            }
    ) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Daemon { action } => {
            commands::daemon::handle_daemon_command(action, &data_dir).await
        }
        Commands::DaemonInternalStart => commands::daemon::run_daemon_process(&data_dir).await,
        Commands::Start { task } => commands::session::start_session(&data_dir, task).await,
        Commands::Stop => commands::session::stop_session(&data_dir).await,
        Commands::Status { json } => commands::session::show_status(&data_dir, json).await,
        Commands::Report { sample } => commands::session::report_activity(&data_dir, sample).await,
        Commands::Resolve { id, decision } => {
            commands::session::resolve_intervention(&data_dir, id, decision).await
        }
        Commands::Focus { score } => commands::session::set_focus_score(&data_dir, score).await,
        Commands::CloseRequests => commands::session::drain_close_requests(&data_dir).await,
        Commands::History { limit } => commands::history::handle_history_command(limit),
        Commands::Profile => commands::history::handle_profile_command(),
        Commands::Hours { days, min_samples } => {
            commands::history::handle_hours_command(days, min_samples)
        }
        Commands::Patterns => commands::history::handle_patterns_command(),
        Commands::Config { action } => commands::config::handle_config_command(action),
    }
}
