//! Background daemon lifecycle: spawn, stop and foreground run
use anyhow::{Context, Result};
use clap::Subcommand;
use flowstate_core::{
    config::default_config_path,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon, EngineConfig,
};
use flowstate_storage::Database;
use std::{
    env,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};
use sysinfo::{Pid, System};

/// Grace period between the shutdown request and a forced kill
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the daemon in the background
    Start,
    /// Stop the background daemon, closing the open session
    Stop,
    /// Run the daemon in the foreground, logging to stderr
    Run,
}

/// Files the daemon keeps in the data directory
struct DaemonFiles {
    pid: PathBuf,
    socket: PathBuf,
    log: PathBuf,
}

impl DaemonFiles {
    fn in_dir(data_dir: &Path) -> Self {
        Self {
            pid: data_dir.join("flowstate.pid"),
            socket: data_dir.join("flowstate.sock"),
            log: data_dir.join("flowstate.log"),
        }
    }

    /// PID recorded by the last `daemon start`, if the file is readable
    fn recorded_pid(&self) -> Option<usize> {
        fs::read_to_string(&self.pid).ok()?.trim().parse().ok()
    }

    fn remove_socket(&self) -> Result<()> {
        if self.socket.exists() {
            fs::remove_file(&self.socket)
                .with_context(|| format!("Failed to remove {}", self.socket.display()))?;
        }
        Ok(())
    }
}

pub async fn handle_daemon_command(action: DaemonAction, data_dir: &Path) -> Result<()> {
    let files = DaemonFiles::in_dir(data_dir);
    match action {
        DaemonAction::Start => start_daemon(data_dir, &files),
        DaemonAction::Stop => stop_daemon(&files).await,
        DaemonAction::Run => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
                .format_timestamp_secs()
                .init();
            run_engine().await
        }
    }
}

fn process_alive(pid: usize) -> bool {
    System::new().refresh_process(Pid::from(pid))
}

/// Returns `true` if the process was still alive and got killed
fn kill_if_running(pid: usize) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from(pid))
        && sys.process(Pid::from(pid)).is_some_and(sysinfo::Process::kill)
}

fn start_daemon(data_dir: &Path, files: &DaemonFiles) -> Result<()> {
    fs::create_dir_all(data_dir)?;

    match files.recorded_pid() {
        Some(pid) if process_alive(pid) => {
            println!("flowstate daemon already running (PID {pid})");
            return Ok(());
        }
        Some(_) => {
            log::warn!("Clearing PID file left by a daemon that is gone");
            fs::remove_file(&files.pid)?;
        }
        None => {}
    }
    files.remove_socket()?;

    let child = Command::new(env::current_exe()?)
        .arg("daemon-internal-start")
        .current_dir(env::current_dir()?)
        .spawn()
        .context("Failed to spawn the daemon process")?;
    fs::write(&files.pid, child.id().to_string())?;

    println!("flowstate daemon started (PID {})", child.id());
    println!("Logs: {}", files.log.display());
    Ok(())
}

/// Entry point of the hidden `daemon-internal-start` command
pub async fn run_daemon_process(data_dir: &Path) -> Result<()> {
    let files = DaemonFiles::in_dir(data_dir);
    if let Err(e) = log_to_file(&files.log) {
        eprintln!("Cannot write daemon log {}: {e:#}", files.log.display());
        return Err(e);
    }

    log::info!("Daemon process {} up", std::process::id());
    let result = run_engine().await;
    if let Err(e) = &result {
        log::error!("Daemon exited with a fatal error: {e:#}");
    }
    result
}

async fn run_engine() -> Result<()> {
    let config_path = default_config_path()?;
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let database = Database::new(None).context("Failed to open the session database")?;

    Daemon::new(config, Arc::new(database))?
        .run_with_signals()
        .await
}

async fn stop_daemon(files: &DaemonFiles) -> Result<()> {
    let Some(pid) = files.recorded_pid() else {
        println!("flowstate daemon is not running");
        if files.pid.exists() {
            fs::remove_file(&files.pid)?;
        }
        return files.remove_socket();
    };

    log::info!("Asking daemon {pid} to shut down");
    match IpcClient::new(&files.socket)
        .send_command(IpcRequest::Shutdown)
        .await
    {
        Ok(IpcResponse::Shutdown) => {
            // The open session is finalized during this window
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            if kill_if_running(pid) {
                log::warn!("Daemon {pid} ignored the shutdown request and was killed");
            }
        }
        Ok(other) => log::error!("Daemon answered shutdown with {other:?}"),
        Err(e) => {
            log::error!("Daemon unreachable ({e}), killing PID {pid}");
            kill_if_running(pid);
        }
    }

    fs::remove_file(&files.pid)?;
    files.remove_socket()?;
    println!("flowstate daemon stopped");
    Ok(())
}

fn log_to_file(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}
