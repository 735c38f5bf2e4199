//! IPC interface for Clusterplug

use crate::controller::ControllerStatus;
use crate::params::{Parameter, ParameterValue};
use crate::policy::DisplayEvent;
use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// IPC request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Get full daemon status
    GetStatus,

    /// Read one parameter
    GetParameter { name: Parameter },

    /// Write one parameter
    SetParameter { name: Parameter, value: ParameterValue },

    /// Read every parameter
    ListParameters,

    /// Deliver a display power transition
    DisplayEvent { event: DisplayEvent },
}

/// IPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    Success { data: serde_json::Value },
    Error { message: String },
}

impl IpcResponse {
    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result.and_then(|v| Ok(serde_json::to_value(v)?)) {
            Ok(data) => IpcResponse::Success { data },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        }
    }

    fn into_data(self) -> Result<serde_json::Value> {
        match self {
            IpcResponse::Success { data } => Ok(data),
            IpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
        }
    }
}

/// Full daemon status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub started_at: DateTime<Local>,
    pub controller: ControllerStatus,
}

/// One entry of a parameter listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: Parameter,
    pub value: ParameterValue,
}

/// IPC handler trait
pub trait IpcHandler: Send + Sync {
    fn get_daemon_status(&self) -> Result<DaemonStatus>;
    fn get_parameter(&self, name: Parameter) -> ParameterValue;
    fn set_parameter(&self, name: Parameter, value: ParameterValue) -> Result<()>;
    fn display_event(&self, event: DisplayEvent) -> Result<()>;

    fn list_parameters(&self) -> Vec<ParameterEntry> {
        Parameter::ALL
            .into_iter()
            .map(|name| ParameterEntry {
                name,
                value: self.get_parameter(name),
            })
            .collect()
    }
}

/// IPC server
pub struct IpcServer<H: IpcHandler> {
    socket_path: String,
    handler: Arc<H>,
}

impl<H: IpcHandler + 'static> IpcServer<H> {
    pub fn new(socket_path: impl Into<String>, handler: Arc<H>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.socket_path);

        if let Some(parent) = std::path::Path::new(&self.socket_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Clusterplug IPC listening on {}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            tracing::error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_client<H: IpcHandler + 'static>(stream: UnixStream, handler: Arc<H>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            // handlers may wait on the controller lock held by a tick
            Ok(request) => {
                let handler = Arc::clone(&handler);
                tokio::task::spawn_blocking(move || process_request(request, handler.as_ref()))
                    .await?
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

fn process_request<H: IpcHandler>(request: IpcRequest, handler: &H) -> IpcResponse {
    match request {
        IpcRequest::GetStatus => IpcResponse::from_result(handler.get_daemon_status()),

        IpcRequest::GetParameter { name } => IpcResponse::from_result(Ok(ParameterEntry {
            name,
            value: handler.get_parameter(name),
        })),

        IpcRequest::SetParameter { name, value } => {
            tracing::debug!("IPC set {} = {}", name, value);
            let result = handler.set_parameter(name, value).map(|()| ParameterEntry {
                name,
                value: handler.get_parameter(name),
            });
            IpcResponse::from_result(result)
        }

        IpcRequest::ListParameters => IpcResponse::from_result(Ok(handler.list_parameters())),

        IpcRequest::DisplayEvent { event } => {
            let result = handler
                .display_event(event)
                .map(|()| serde_json::json!({ "event": event }));
            IpcResponse::from_result(result)
        }
    }
}

/// IPC client
pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub async fn send(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let request_json = serde_json::to_string(&request)?;
        stream.write_all(request_json.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        Ok(serde_json::from_str(&line)?)
    }

    pub async fn get_status(&self) -> Result<DaemonStatus> {
        let data = self.send(IpcRequest::GetStatus).await?.into_data()?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn get_parameter(&self, name: Parameter) -> Result<ParameterValue> {
        let data = self
            .send(IpcRequest::GetParameter { name })
            .await?
            .into_data()?;
        let entry: ParameterEntry = serde_json::from_value(data)?;
        Ok(entry.value)
    }

    pub async fn set_parameter(&self, name: Parameter, value: ParameterValue) -> Result<()> {
        self.send(IpcRequest::SetParameter { name, value })
            .await?
            .into_data()?;
        Ok(())
    }

    pub async fn list_parameters(&self) -> Result<Vec<ParameterEntry>> {
        let data = self.send(IpcRequest::ListParameters).await?.into_data()?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn display_event(&self, event: DisplayEvent) -> Result<()> {
        self.send(IpcRequest::DisplayEvent { event })
            .await?
            .into_data()?;
        Ok(())
    }
}
