//! Incremental `text/event-stream` decoding.
//!
//! Chunks arrive at arbitrary byte boundaries, so the decoder buffers raw
//! bytes and only decodes complete lines. A frame is dispatched on the blank
//! line that terminates it:
//!
//! ```text
//! event: task_completed
//! data: {"task_id":"t-1","status":"completed","model_name":"gemini"}
//!
//! : heartbeat comment
//! ```

use serde_json::Value;

use dsa_protocol::{DashboardError, TaskEvent, TaskEventKind, TaskInfo};

use crate::casing::normalize_keys;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Event name; `message` when the frame did not name one.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

/// Stateful decoder fed with raw response chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

/// Decode a frame into a task lifecycle event.
///
/// Returns `Ok(None)` for frames that are not task transitions
/// (`connected`, `heartbeat`, anything unknown).
pub fn decode_task_event(frame: &SseFrame) -> Result<Option<TaskEvent>, DashboardError> {
    let Some(kind) = TaskEventKind::from_event_name(&frame.event) else {
        return Ok(None);
    };

    let raw: Value = serde_json::from_str(&frame.data)
        .map_err(|e| DashboardError::Decode(format!("{} payload: {e}", frame.event)))?;
    let raw = match raw {
        Value::Object(mut map) if map.get("task").is_some_and(Value::is_object) => {
            map.remove("task").unwrap_or_default()
        }
        other => other,
    };

    let task: TaskInfo = serde_json::from_value(normalize_keys(raw))
        .map_err(|e| DashboardError::Decode(format!("{} payload: {e}", frame.event)))?;
    Ok(Some(TaskEvent::new(kind, task)))
}
