//! Wire messages and framing
//!
//! One JSON document per line, framed with [`LinesCodec`]. Clients send
//! [`Request`]s; the server answers every request with exactly one
//! `response` frame, in request order, and interleaves `report` frames for
//! the session's subscriptions.
//!
//! ```text
//! -> {"id":1,"op":"read","reference":"Battery/ZBAT.Vol.mag.f","fc":"MX"}
//! <- {"type":"response","id":1,"status":"ok","value":{"type":"float32","value":0.0}}
//! ```

use errors::{IedError, IedResult};
use iec61850_model::{DataAccessError, FunctionalConstraint, Value};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{LinesCodec, LinesCodecError};

use crate::report::{DataSet, Report, ReportTriggers, SubscriptionHandle};

/// Longest accepted frame in bytes, newline excluded
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)
}

pub(crate) fn codec_error(err: LinesCodecError) -> IedError {
    match err {
        LinesCodecError::Io(e) => IedError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => IedError::protocol(format!(
            "frame exceeds {} bytes",
            MAX_FRAME_LENGTH
        )),
    }
}

// ============================================================================
// Client -> server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Read {
        reference: String,
        fc: FunctionalConstraint,
    },
    Write {
        reference: String,
        fc: FunctionalConstraint,
        value: Value,
    },
    Subscribe {
        data_set: DataSet,
        #[serde(default)]
        triggers: ReportTriggers,
    },
    Unsubscribe {
        subscription: SubscriptionHandle,
    },
    Interrogate {
        subscription: SubscriptionHandle,
    },
    /// Logical devices when `reference` is absent, otherwise child names
    GetDirectory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Interrogate { .. } => "interrogate",
            Self::GetDirectory { .. } => "get_directory",
        }
    }
}

/// Parse one inbound line
///
/// On failure the request id is returned when it could still be recovered,
/// so the error response can be correlated.
pub fn decode_request(line: &str) -> Result<Request, (Option<u64>, IedError)> {
    let raw: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| (None, IedError::protocol(format!("invalid JSON: {}", e))))?;
    let id = raw.get("id").and_then(serde_json::Value::as_u64);
    serde_json::from_value(raw)
        .map_err(|e| (id, IedError::protocol(format!("invalid request: {}", e))))
}

// ============================================================================
// Server -> client
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

/// Answer to one request
///
/// Failed requests carry `status: error` and a `DataAccessError` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<u64>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(id: u64) -> Self {
        Self {
            id: Some(id),
            status: Status::Ok,
            value: None,
            subscription: None,
            names: None,
            message: None,
        }
    }

    pub fn with_value(id: u64, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::ok(id)
        }
    }

    pub fn subscribed(id: u64, handle: SubscriptionHandle) -> Self {
        Self {
            subscription: Some(handle),
            ..Self::ok(id)
        }
    }

    pub fn directory(id: u64, names: Vec<String>) -> Self {
        Self {
            names: Some(names),
            ..Self::ok(id)
        }
    }

    pub fn error(id: Option<u64>, err: &IedError) -> Self {
        Self {
            id,
            status: Status::Error,
            value: Some(Value::DataAccessError(err.into())),
            subscription: None,
            names: None,
            message: Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Data access error code of a failed response
    pub fn access_error(&self) -> Option<DataAccessError> {
        match (&self.status, &self.value) {
            (Status::Error, Some(Value::DataAccessError(code))) => Some(*code),
            (Status::Error, _) => Some(DataAccessError::ObjectInvalidated),
            _ => None,
        }
    }
}

/// Any frame sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Response(Response),
    Report(Report),
}

pub fn encode<T: Serialize>(frame: &T) -> IedResult<String> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_frame(line: &str) -> IedResult<ServerFrame> {
    serde_json::from_str(line).map_err(|e| IedError::protocol(format!("invalid frame: {}", e)))
}
