use anyhow::Result;
use flowstate_storage::{Decision, InterventionEvent, Session};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};
use uuid::Uuid;

use crate::config::get_data_dir;
use crate::daemon::EngineHandle;
use crate::engine::{Command, CommandOutcome, StatusSnapshot};
use crate::error::EngineError;
use crate::intervention::CloseRequest;
use crate::signal_bus::RawSample;

/// Socket the daemon listens on
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined
pub fn socket_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("flowstate.sock"))
}

/// IPC request from a client (CLI, browser bridge) to the daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcRequest {
    Status,
    Start { task: Option<String> },
    Stop,
    ReportActivity(RawSample),
    ResolveIntervention { event_id: Uuid, decision: Decision },
    SetFocusScore(f64),
    DrainCloseRequests,
    Shutdown,
}

/// IPC response from daemon to client
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcResponse {
    Status(StatusSnapshot),
    Started(Session),
    Stopped(Option<Session>),
    Accepted,
    Resolved(InterventionEvent),
    CloseRequests(Vec<CloseRequest>),
    Rejected(EngineError),
    Shutdown,
    Error(String),
}

impl From<CommandOutcome> for IpcResponse {
    fn from(outcome: CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::Accepted => Self::Accepted,
            CommandOutcome::Started(session) => Self::Started(session),
            CommandOutcome::Stopped(session) => Self::Stopped(session),
            CommandOutcome::Resolved(event) => Self::Resolved(event),
            CommandOutcome::CloseRequests(requests) => Self::CloseRequests(requests),
            CommandOutcome::Rejected(e) => Self::Rejected(e),
        }
    }
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Send one request and wait for the daemon's answer
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or the reply is garbled
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

pub struct DaemonIpcHandler {
    engine: EngineHandle,
    shutdown_signal: Arc<AtomicBool>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(engine: EngineHandle, shutdown_signal: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            shutdown_signal,
        }
    }

    /// Answer one request; commands are queued for the next tick
    pub async fn respond(&self, request: IpcRequest) -> IpcResponse {
        let command = match request {
            IpcRequest::Status => return IpcResponse::Status(self.engine.status()),
            IpcRequest::Shutdown => {
                self.shutdown_signal.store(true, Ordering::SeqCst);
                return IpcResponse::Shutdown;
            }
            IpcRequest::Start { task } => Command::Start { task },
            IpcRequest::Stop => Command::Stop,
            IpcRequest::ReportActivity(sample) => {
                // Ingress never waits for the tick
                return match self.engine.post(Command::Report(sample)) {
                    Ok(()) => IpcResponse::Accepted,
                    Err(e) => IpcResponse::Error(e.to_string()),
                };
            }
            IpcRequest::ResolveIntervention { event_id, decision } => {
                Command::Resolve { event_id, decision }
            }
            IpcRequest::SetFocusScore(score) => Command::SetFocusScore(score),
            IpcRequest::DrainCloseRequests => Command::DrainCloseRequests,
        };

        match self.engine.send(command).await {
            Ok(outcome) => outcome.into(),
            Err(e) => IpcResponse::Error(e.to_string()),
        }
    }

    async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

/// Accept connections forever, one task per client
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    // Clients shut down their write half after the request
                    let mut buf = Vec::new();
                    match stream.read_to_end(&mut buf).await {
                        Ok(n) if n > 0 => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Ok(_) => {} // Connection closed
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
