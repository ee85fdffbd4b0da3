//! Wire payloads for the request/response surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{JobId, Time};

/// `resource.match` request.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchRequest {
    pub cmd: String,
    pub jobid: JobId,
    /// Either an embedded jobspec object or its JSON text.
    pub jobspec: Value,
    /// Requested earliest start; defaults to the current time.
    #[serde(default)]
    pub at: Option<Time>,
}

impl MatchRequest {
    pub fn jobspec_text(&self) -> String {
        match &self.jobspec {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One job of a streaming `resource.match_multi` request.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchMultiJob {
    pub jobid: JobId,
    pub jobspec: Value,
    #[serde(default)]
    pub at: Option<Time>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchMultiRequest {
    pub cmd: String,
    pub jobs: Vec<MatchMultiJob>,
}

/// `resource.match` / `resource.update` response.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub jobid: JobId,
    pub status: String,
    pub overhead: f64,
    #[serde(rename = "R")]
    pub r: String,
    pub at: Time,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub jobid: JobId,
    #[serde(rename = "R")]
    pub r: Value,
}

impl UpdateRequest {
    pub fn r_text(&self) -> String {
        match &self.r {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    pub jobid: JobId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialCancelRequest {
    pub jobid: JobId,
    #[serde(rename = "R")]
    pub r: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartialCancelResponse {
    #[serde(rename = "full-removal")]
    pub full_removal: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfoRequest {
    pub jobid: JobId,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResponse {
    pub jobid: JobId,
    pub status: String,
    pub at: Time,
    pub overhead: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindRequest {
    pub criteria: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyRequest {
    pub path: String,
    /// `name` or `name=value`.
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetStatusRequest {
    pub path: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub all: String,
    pub down: String,
    pub allocated: String,
}

/// One message of the resource-acquire input stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcquireUpdate {
    /// Full resource description; arrives once initially.
    #[serde(default)]
    pub resources: Option<Value>,
    /// Absolute UP rank set.
    #[serde(default)]
    pub up: Option<String>,
    /// Absolute DOWN rank set.
    #[serde(default)]
    pub down: Option<String>,
    /// Ranks leaving the instance; wins over up/down.
    #[serde(default)]
    pub shrink: Option<String>,
    /// Wall-clock expiration; 0 means none.
    #[serde(default)]
    pub expiration: Option<f64>,
}

/// Pushed to notify subscribers after a state change.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyUpdate {
    pub up: String,
    pub down: String,
    pub shrink: String,
    pub expiration: Time,
}
