//! The only path from the webview to the privileged side.
//!
//! Channels are a closed set of capabilities. A channel name that does not
//! parse into [`Capability`] is refused before any payload is looked at, so
//! nothing outside the allow-list reaches the executor or the relay. The
//! bridge decides which operations exist; it does not judge arguments.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::executor::{CommandExecutor, CommandRequest};
use crate::models::error::VpnError;
use crate::relay::{ApiRelay, ApiRequest, ApiResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    RunCommand,
    CallApi,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::RunCommand, Capability::CallApi];

    pub fn channel(&self) -> &'static str {
        match self {
            Capability::RunCommand => "run-command",
            Capability::CallApi => "call-api",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.channel())
    }
}

impl FromStr for Capability {
    type Err = VpnError;

    fn from_str(channel: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.channel() == channel)
            .ok_or_else(|| VpnError::CapabilityDenied(channel.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandRequest {
    pub command_line: String,
}

/// A decoded request for one capability
#[derive(Debug, Clone)]
pub enum BridgeRequest {
    RunCommand(RunCommandRequest),
    CallApi(ApiRequest),
}

impl BridgeRequest {
    pub fn capability(&self) -> Capability {
        match self {
            BridgeRequest::RunCommand(_) => Capability::RunCommand,
            BridgeRequest::CallApi(_) => Capability::CallApi,
        }
    }

    /// Decode an untyped payload into the request type of `capability`
    pub fn decode(capability: Capability, payload: serde_json::Value) -> Result<Self, VpnError> {
        let invalid =
            |e: serde_json::Error| VpnError::InvalidArgument(format!("{} payload: {}", capability, e));
        match capability {
            Capability::RunCommand => {
                // A bare string is accepted as the command line
                let request = match payload {
                    serde_json::Value::String(command_line) => RunCommandRequest { command_line },
                    other => serde_json::from_value(other).map_err(invalid)?,
                };
                Ok(BridgeRequest::RunCommand(request))
            }
            Capability::CallApi => Ok(BridgeRequest::CallApi(
                serde_json::from_value(payload).map_err(invalid)?,
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeResponse {
    Stdout(String),
    Api(ApiResponse),
}

pub struct Bridge {
    executor: Arc<dyn CommandExecutor>,
    relay: Arc<dyn ApiRelay>,
}

impl Bridge {
    pub fn new(executor: Arc<dyn CommandExecutor>, relay: Arc<dyn ApiRelay>) -> Self {
        Self { executor, relay }
    }

    /// Dispatch by channel name, refusing anything off the allow-list
    pub async fn dispatch(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<BridgeResponse, VpnError> {
        let capability = channel.parse::<Capability>().map_err(|e| {
            warn!("Bridge refused channel {:?}", channel);
            e
        })?;
        self.handle(BridgeRequest::decode(capability, payload)?).await
    }

    pub async fn handle(&self, request: BridgeRequest) -> Result<BridgeResponse, VpnError> {
        match request {
            BridgeRequest::RunCommand(req) => self.run_command(&req).await.map(BridgeResponse::Stdout),
            BridgeRequest::CallApi(req) => self.call_api(&req).await.map(BridgeResponse::Api),
        }
    }

    pub async fn run_command(&self, request: &RunCommandRequest) -> Result<String, VpnError> {
        let command = CommandRequest::parse(&request.command_line)?;
        debug!("Bridge running {}", command.program);
        self.executor.execute(&command).await
    }

    pub async fn call_api(&self, request: &ApiRequest) -> Result<ApiResponse, VpnError> {
        debug!("Bridge relaying {} {}", request.method, request.path);
        self.relay.send(request).await
    }
}
