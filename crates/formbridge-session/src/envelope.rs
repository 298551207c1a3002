//! Wire envelopes multiplexed on a session's message stream.
//!
//! Two message shapes share the stream: JSON-RPC 2.0 requests and replies
//! used for correlated calls to the peer, and work items sent by the peer
//! for the reasoning engine to process. [`Frame::decode`] tells them apart.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;

/// Protocol version carried by every JSON-RPC envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request sent to the peer.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always "2.0".
    pub jsonrpc: &'static str,
    /// Correlation identifier.
    pub id: i64,
    /// The method to invoke.
    pub method: String,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with a specific ID.
    #[must_use]
    pub fn with_id(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 reply received from the peer.
///
/// `error` is kept as an arbitrary value: peers are not required to send a
/// structured `{code, message}` object.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Reply {
    /// Protocol version. Peers that omit it are read as `2.0`.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Identifier of the request this reply answers.
    #[serde(default)]
    pub id: Option<Value>,
    /// The result on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// The error on failure.
    #[serde(default)]
    pub error: Option<Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

impl Reply {
    /// Builds a successful reply, mostly useful to peers and tests.
    #[must_use]
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(Value::from(id)),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error-shaped reply.
    #[must_use]
    pub fn failure(id: i64, error: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(Value::from(id)),
            result: None,
            error: Some(error),
        }
    }

    /// The correlation id when it is an integer.
    #[must_use]
    pub fn numeric_id(&self) -> Option<i64> {
        self.id.as_ref().and_then(Value::as_i64)
    }

    /// Whether the peer reported a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Splits the reply into its result or its error.
    ///
    /// A reply without either field is treated as a successful `null`.
    ///
    /// # Errors
    ///
    /// Returns the peer's error value when the reply is error-shaped.
    pub fn into_outcome(self) -> Result<Value, Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// An inbound unit of application work.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkItem {
    message: String,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    message_id: Option<Value>,
}

impl WorkItem {
    /// Creates a work item.
    #[must_use]
    pub fn new(message: impl Into<String>, message_id: Option<Value>) -> Self {
        Self {
            message: message.into(),
            message_id,
        }
    }

    /// Text handed to the reasoning engine.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Caller-supplied token echoed on the reply.
    #[must_use]
    pub const fn message_id(&self) -> Option<&Value> {
        self.message_id.as_ref()
    }
}

/// The single reply produced for an accepted work item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    message_id: Option<Value>,
}

impl WorkReply {
    /// Reply carrying the engine's output.
    #[must_use]
    pub fn success(output: impl Into<String>, message_id: Option<Value>) -> Self {
        Self {
            result: Some(output.into()),
            error: None,
            message_id,
        }
    }

    /// Reply carrying a failure description.
    #[must_use]
    pub fn failure(error: impl Into<String>, message_id: Option<Value>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
            message_id,
        }
    }

    /// The output on success.
    #[must_use]
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// The failure description.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The echoed correlation token.
    #[must_use]
    pub const fn message_id(&self) -> Option<&Value> {
        self.message_id.as_ref()
    }
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A reply to a request this side issued.
    Reply(Reply),
    /// New work for the reasoning engine.
    Work(WorkItem),
    /// A request initiated by the peer, which this bridge does not serve.
    PeerRequest {
        /// Method the peer asked for.
        method: String,
        /// Identifier of the peer's request, if any.
        id: Option<Value>,
    },
    /// A JSON object of no recognised shape, such as a work item with an
    /// empty message.
    Unrecognised,
}

impl Frame {
    /// Decodes and classifies a text frame.
    ///
    /// An object without `method` is a reply when it carries `jsonrpc`, or
    /// an integer `id` together with `result` or `error`. An object
    /// carrying `method` is a peer request. An object carrying a non-empty
    /// string `message` is a work item.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the text is not a JSON object or a
    /// reply-shaped object does not decode as a reply.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Json)?;
        let Value::Object(object) = value else {
            return Err(FrameError::NotAnObject);
        };

        if !object.contains_key("method") && is_reply_shaped(&object) {
            let reply = serde_json::from_value(Value::Object(object)).map_err(FrameError::Reply)?;
            return Ok(Self::Reply(reply));
        }

        if let Some(method) = object.get("method") {
            return Ok(Self::PeerRequest {
                method: method.as_str().unwrap_or_default().to_owned(),
                id: object.get("id").cloned(),
            });
        }

        Ok(work_item_from(object).map_or(Self::Unrecognised, Self::Work))
    }
}

fn is_reply_shaped(object: &Map<String, Value>) -> bool {
    object.contains_key("jsonrpc")
        || (object.get("id").is_some_and(Value::is_i64)
            && (object.contains_key("result") || object.contains_key("error")))
}

fn work_item_from(mut object: Map<String, Value>) -> Option<WorkItem> {
    let message = match object.remove("message") {
        Some(Value::String(message)) if !message.is_empty() => message,
        _ => return None,
    };
    let message_id = object.remove("messageId").filter(|id| !id.is_null());
    Some(WorkItem::new(message, message_id))
}
