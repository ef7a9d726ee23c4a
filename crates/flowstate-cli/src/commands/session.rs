//! Session control through the running daemon
//!
//! Every command here is a single IPC round trip; the daemon applies it at its
//! next tick and answers with the outcome.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use flowstate_core::{
    ipc::{IpcClient, IpcRequest, IpcResponse},
    RawSample, StatusSnapshot,
};
use flowstate_storage::{Decision, Session};
use std::path::Path;
use uuid::Uuid;

use super::helpers::{format_duration, print_rule};

#[derive(Subcommand, Debug)]
pub enum ReportAction {
    /// A browser navigation
    Url { url: String },
    /// Focus moved to a window
    Window {
        /// Application name
        #[arg(long)]
        app: String,
        /// Window title
        title: String,
    },
    /// Keyboard/mouse input since the last report
    Input {
        #[arg(default_value = "1")]
        count: u32,
    },
}

async fn send(data_dir: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let sock_path = data_dir.join("flowstate.sock");
    if !sock_path.exists() {
        anyhow::bail!("Daemon is not running. Start it with `flowstate daemon start`.");
    }
    let response = IpcClient::new(&sock_path)
        .send_command(request)
        .await
        .context("Daemon is not responding")?;

    match response {
        IpcResponse::Rejected(e) => anyhow::bail!("{e}"),
        IpcResponse::Error(e) => anyhow::bail!("Daemon error: {e}"),
        other => Ok(other),
    }
}

fn unexpected(response: &IpcResponse) -> anyhow::Error {
    anyhow::anyhow!("Unexpected response from daemon: {response:?}")
}

pub async fn start_session(data_dir: &Path, task: Option<String>) -> Result<()> {
    match send(data_dir, IpcRequest::Start { task }).await? {
        IpcResponse::Started(session) => {
            println!("Started session {}", session.id);
            if let Some(task) = session.current_task {
                println!("Task: {task}");
            }
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

pub async fn stop_session(data_dir: &Path) -> Result<()> {
    match send(data_dir, IpcRequest::Stop).await? {
        IpcResponse::Stopped(Some(session)) => {
            print_session_summary(&session);
            Ok(())
        }
        IpcResponse::Stopped(None) => {
            println!("No session has been recorded yet.");
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

fn print_session_summary(session: &Session) {
    let xp = &session.xp_breakdown;
    println!("\nSession {}", session.id);
    print_rule(40);
    println!(
        "Duration:     {}",
        format_duration(u64::from(session.duration_seconds))
    );
    println!(
        "Flow time:    {}",
        format_duration(u64::from(session.flow_seconds))
    );
    println!("Distractions: {}", session.distraction_count);
    println!("Resilience:   {}", session.resilience_score);
    println!("\nXP earned: {}", session.xp_earned);
    println!("  base        +{}", xp.base);
    println!("  resilience  +{}", xp.resilience);
    println!("  stamina     +{}", xp.stamina);
    println!("  focus       +{}", xp.focus);
    println!("  penalty     -{}", xp.penalty);
}

pub async fn show_status(data_dir: &Path, json: bool) -> Result<()> {
    let sock_path = data_dir.join("flowstate.sock");
    if !sock_path.exists() {
        println!("Daemon Status: Not running");
        return Ok(());
    }

    match IpcClient::new(&sock_path)
        .send_command(IpcRequest::Status)
        .await
    {
        Ok(IpcResponse::Status(snapshot)) if json => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Ok(IpcResponse::Status(snapshot)) => print_status(&snapshot),
        Ok(other) => return Err(unexpected(&other)),
        Err(e) => {
            log::error!("Failed to get status: {e}");
            println!("Daemon Status: Not running (or not responding)");
        }
    }
    Ok(())
}

fn print_status(snapshot: &StatusSnapshot) {
    println!("Daemon Status: Running");
    if !snapshot.is_running {
        println!(
            "\nNo active session ({:.0} APM, {})",
            snapshot.apm, snapshot.activity_pattern
        );
        return;
    }

    println!("\nSession: {}", snapshot.state);
    print_rule(40);
    if let Some(task) = &snapshot.current_task {
        println!("Task:       {task}");
    }
    println!("Duration:   {}", format_duration(snapshot.session_duration));
    println!("Flow time:  {}", format_duration(snapshot.flow_seconds));
    println!("Energy:     {:.0}/100", snapshot.energy);
    println!(
        "Fatigue:    {:.0}/100{}",
        snapshot.fatigue_score,
        if snapshot.fatigue_alert { "  (take a break)" } else { "" }
    );
    println!("Resilience: {}", snapshot.resilience);
    println!("Focus:      {:.0}", snapshot.focus_score);
    println!("XP so far:  {}", snapshot.xp);
    println!(
        "Activity:   {} ({:.0} APM)",
        snapshot.activity_pattern, snapshot.apm
    );
    if let Some(content) = &snapshot.current_content {
        println!("Looking at: {content}");
    }
    if let Some(pending) = &snapshot.pending_intervention {
        println!(
            "\nIntervention pending for {} (id {})",
            pending.trigger_content_ref, pending.id
        );
        println!("Resolve with `flowstate resolve wait-for-break` or `open-anyway`.");
    }
    if snapshot.dropped_samples > 0 {
        println!("\nDropped samples: {}", snapshot.dropped_samples);
    }
}

pub async fn report_activity(data_dir: &Path, sample: ReportAction) -> Result<()> {
    let now = Utc::now();
    let sample = match sample {
        ReportAction::Url { url } => RawSample::browser_nav(now, &url),
        ReportAction::Window { app, title } => RawSample::window_focus(now, &app, &title),
        ReportAction::Input { count } => RawSample::input(now, count),
    };

    match send(data_dir, IpcRequest::ReportActivity(sample)).await? {
        IpcResponse::Accepted => Ok(()),
        other => Err(unexpected(&other)),
    }
}

pub async fn resolve_intervention(
    data_dir: &Path,
    id: Option<Uuid>,
    decision: Decision,
) -> Result<()> {
    let event_id = match id {
        Some(id) => id,
        None => match send(data_dir, IpcRequest::Status).await? {
            IpcResponse::Status(snapshot) => snapshot
                .pending_intervention
                .map(|pending| pending.id)
                .context("No intervention is pending")?,
            other => return Err(unexpected(&other)),
        },
    };

    match send(data_dir, IpcRequest::ResolveIntervention { event_id, decision }).await? {
        IpcResponse::Resolved(event) => {
            println!(
                "{}: resilience {:+}, XP {:+}",
                event.decision, event.resilience_delta, event.xp_delta
            );
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

pub async fn set_focus_score(data_dir: &Path, score: f64) -> Result<()> {
    match send(data_dir, IpcRequest::SetFocusScore(score)).await? {
        IpcResponse::Accepted => {
            println!("Focus score set to {score}");
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

pub async fn drain_close_requests(data_dir: &Path) -> Result<()> {
    match send(data_dir, IpcRequest::DrainCloseRequests).await? {
        IpcResponse::CloseRequests(requests) => {
            for request in requests {
                println!("{}\t{}", request.event_id, request.content_ref);
            }
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}
