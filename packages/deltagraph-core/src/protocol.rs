//! Transport-facing request and response bodies.
//!
//! Bodies are JSON objects keyed by single-character field tags. Framing and sockets are
//! left to the transport.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::delta::Delta;
use crate::error::{Error, Result};

/// Field tags of a request or response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferField {
    AppName,
    Data,
    RequestType,
    StartVersion,
    EndVersion,
    Wait,
    WaitTimeout,
    Status,
    Types,
}

impl TransferField {
    pub const fn key(self) -> &'static str {
        match self {
            TransferField::AppName => "0",
            TransferField::Data => "1",
            TransferField::RequestType => "2",
            TransferField::StartVersion => "3",
            TransferField::EndVersion => "4",
            TransferField::Wait => "5",
            TransferField::WaitTimeout => "6",
            TransferField::Status => "7",
            TransferField::Types => "8",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "0" => TransferField::AppName,
            "1" => TransferField::Data,
            "2" => TransferField::RequestType,
            "3" => TransferField::StartVersion,
            "4" => TransferField::EndVersion,
            "5" => TransferField::Wait,
            "6" => TransferField::WaitTimeout,
            "7" => TransferField::Status,
            "8" => TransferField::Types,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    Pull = 0,
    Push = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 200,
    GeneralException = 400,
    Timeout = 401,
}

impl Status {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            200 => Some(Status::Success),
            400 => Some(Status::GeneralException),
            401 => Some(Status::Timeout),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PushRequest {
    pub app_name: String,
    pub start: String,
    pub end: String,
    pub delta: Delta,
    /// Acknowledge only after the push is committed.
    pub wait: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PullRequest {
    pub app_name: String,
    pub start: String,
    /// Requester's types mapped to their type chains.
    pub types: BTreeMap<String, Vec<String>>,
    /// Hold the response until there is something newer than `start`.
    pub wait: bool,
    /// Bound on the wait. Zero waits indefinitely.
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Push(PushRequest),
    Pull(PullRequest),
}

#[derive(Default)]
struct Fields {
    app_name: Option<String>,
    data: Option<Value>,
    kind: Option<RequestKind>,
    start: Option<String>,
    end: Option<String>,
    wait: bool,
    timeout: Duration,
    types: Option<Value>,
}

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedRequest(message.into())
}

fn string_field(field: TransferField, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(malformed(format!("field {field:?} must be a string, got {other}"))),
    }
}

impl Request {
    /// Validates a field-tagged request body.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(body) = value else {
            return Err(malformed("request body must be an object"));
        };
        let mut fields = Fields::default();
        for (key, value) in body {
            let field =
                TransferField::from_key(&key).ok_or_else(|| malformed(format!("unknown field {key:?}")))?;
            match field {
                TransferField::AppName => fields.app_name = Some(string_field(field, value)?),
                TransferField::Data => fields.data = Some(value),
                TransferField::RequestType => {
                    fields.kind = Some(match value.as_u64() {
                        Some(0) => RequestKind::Pull,
                        Some(1) => RequestKind::Push,
                        _ => return Err(malformed(format!("unknown request type {value}"))),
                    })
                }
                TransferField::StartVersion => fields.start = Some(string_field(field, value)?),
                TransferField::EndVersion => fields.end = Some(string_field(field, value)?),
                TransferField::Wait => {
                    fields.wait = value
                        .as_bool()
                        .ok_or_else(|| malformed("wait flag must be a boolean"))?
                }
                TransferField::WaitTimeout => {
                    fields.timeout = value
                        .as_f64()
                        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                        .ok_or_else(|| malformed("wait timeout must be a non-negative number"))?
                }
                TransferField::Types => fields.types = Some(value),
                TransferField::Status => return Err(malformed("status is not a request field")),
            }
        }

        let app_name = fields.app_name.ok_or_else(|| malformed("no app name in request"))?;
        let kind = fields.kind.ok_or_else(|| malformed("no request type"))?;
        let start = fields
            .start
            .filter(|start| !start.is_empty())
            .ok_or_else(|| malformed("start version is needed in any request"))?;

        match kind {
            RequestKind::Push => {
                let end = fields
                    .end
                    .filter(|end| !end.is_empty())
                    .ok_or_else(|| malformed("end version is needed in a push"))?;
                let data = fields
                    .data
                    .filter(|data| !data.is_null())
                    .ok_or_else(|| malformed("no data in push"))?;
                let delta: Delta = serde_json::from_value(data)
                    .map_err(|e| malformed(format!("push data is not a delta: {e}")))?;
                Ok(Request::Push(PushRequest {
                    app_name,
                    start,
                    end,
                    delta,
                    wait: fields.wait,
                }))
            }
            RequestKind::Pull => {
                let types = fields
                    .types
                    .filter(|types| !types.is_null())
                    .ok_or_else(|| malformed("no requested types in pull"))?;
                let types: BTreeMap<String, Vec<String>> = serde_json::from_value(types)
                    .map_err(|e| malformed(format!("requested types are malformed: {e}")))?;
                Ok(Request::Pull(PullRequest {
                    app_name,
                    start,
                    types,
                    wait: fields.wait,
                    timeout: fields.timeout,
                }))
            }
        }
    }

    /// Field-tagged body of this request.
    pub fn to_value(&self) -> Result<Value> {
        let mut body = Map::new();
        match self {
            Request::Push(push) => {
                body.insert(TransferField::AppName.key().into(), push.app_name.clone().into());
                body.insert(TransferField::Data.key().into(), serde_json::to_value(&push.delta)?);
                body.insert(
                    TransferField::RequestType.key().into(),
                    (RequestKind::Push as u8).into(),
                );
                body.insert(TransferField::StartVersion.key().into(), push.start.clone().into());
                body.insert(TransferField::EndVersion.key().into(), push.end.clone().into());
                body.insert(TransferField::Wait.key().into(), push.wait.into());
            }
            Request::Pull(pull) => {
                body.insert(TransferField::AppName.key().into(), pull.app_name.clone().into());
                body.insert(
                    TransferField::RequestType.key().into(),
                    (RequestKind::Pull as u8).into(),
                );
                body.insert(TransferField::StartVersion.key().into(), pull.start.clone().into());
                body.insert(TransferField::Wait.key().into(), pull.wait.into());
                body.insert(
                    TransferField::WaitTimeout.key().into(),
                    pull.timeout.as_secs_f64().into(),
                );
                body.insert(TransferField::Types.key().into(), serde_json::to_value(&pull.types)?);
            }
        }
        Ok(Value::Object(body))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub app_name: String,
    pub status: Status,
    pub start: Option<String>,
    pub end: Option<String>,
    pub data: Option<Delta>,
}

impl Response {
    pub fn success(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            status: Status::Success,
            start: None,
            end: None,
            data: None,
        }
    }

    pub fn timeout(app_name: impl Into<String>) -> Self {
        Self {
            status: Status::Timeout,
            ..Self::success(app_name)
        }
    }

    pub fn with_data(mut self, start: String, end: String, data: Delta) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self.data = Some(data);
        self
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut body = Map::new();
        body.insert(TransferField::AppName.key().into(), self.app_name.clone().into());
        body.insert(TransferField::Status.key().into(), self.status.code().into());
        if let Some(data) = &self.data {
            body.insert(TransferField::Data.key().into(), serde_json::to_value(data)?);
        }
        if let Some(start) = &self.start {
            body.insert(TransferField::StartVersion.key().into(), start.clone().into());
        }
        if let Some(end) = &self.end {
            body.insert(TransferField::EndVersion.key().into(), end.clone().into());
        }
        Ok(Value::Object(body))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(body) = value else {
            return Err(malformed("response body must be an object"));
        };
        let mut response = Response::success(String::new());
        let mut status = None;
        for (key, value) in body {
            let field =
                TransferField::from_key(&key).ok_or_else(|| malformed(format!("unknown field {key:?}")))?;
            match field {
                TransferField::AppName => response.app_name = string_field(field, value)?,
                TransferField::Status => {
                    status = value.as_u64().and_then(Status::from_code);
                    if status.is_none() {
                        return Err(malformed(format!("unknown status {value}")));
                    }
                }
                TransferField::Data => response.data = Some(serde_json::from_value(value)?),
                TransferField::StartVersion => response.start = Some(string_field(field, value)?),
                TransferField::EndVersion => response.end = Some(string_field(field, value)?),
                other => return Err(malformed(format!("{other:?} is not a response field"))),
            }
        }
        response.status = status.ok_or_else(|| malformed("no status in response"))?;
        Ok(response)
    }
}
