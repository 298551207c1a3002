//! Shared doubles for unit tests.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::capability::CapabilitySet;
use crate::engine::ReasoningEngine;
use crate::envelope::Reply;
use crate::error::{EngineError, TransportError};
use crate::transport::FrameSink;

/// Sink that keeps every frame it is given.
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<String>>,
    count: watch::Sender<usize>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            frames: Mutex::new(Vec::new()),
            count,
        }
    }
}

impl RecordingSink {
    pub(crate) fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn json_frames(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("recorded frame is JSON"))
            .collect()
    }

    pub(crate) async fn wait_for(&self, count: usize) {
        let mut receiver = self.count.subscribe();
        receiver
            .wait_for(|recorded| *recorded >= count)
            .await
            .expect("sink dropped while waiting");
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let len = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            frames.push(frame);
            frames.len()
        };
        self.count.send_replace(len);
        Ok(())
    }
}

/// Builds a successful reply to a recorded request frame.
pub(crate) fn reply_to(frame: &str, result: Value) -> Reply {
    let request: Value = serde_json::from_str(frame).expect("request is JSON");
    let id = request["id"].as_i64().expect("request has an integer id");
    Reply::success(id, result)
}

/// Engine that echoes its input and the names of the tools it was given.
pub(crate) struct EchoEngine;

#[async_trait]
impl ReasoningEngine for EchoEngine {
    async fn respond(&self, tools: &CapabilitySet, input: &str) -> Result<String, EngineError> {
        Ok(format!("{input} [{}]", tools.names().join(",")))
    }
}

/// Engine that passes its input to the first tool as `{"query": input}`.
pub(crate) struct FirstToolEngine;

#[async_trait]
impl ReasoningEngine for FirstToolEngine {
    async fn respond(&self, tools: &CapabilitySet, input: &str) -> Result<String, EngineError> {
        let tool = tools
            .iter()
            .next()
            .ok_or_else(|| EngineError::new("no tools available"))?;
        let output = tool.invoke(serde_json::json!({ "query": input })).await;
        Ok(crate::capability::render_output(&output))
    }
}
