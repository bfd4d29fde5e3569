//! NDJSON progress events for streamed evaluations.

use std::io::{BufWriter, Write};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::types::EvaluationResult;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One line of a streamed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Start {
        total: usize,
        max_concurrent: usize,
        batch_size: usize,
    },
    Result {
        /// Position of the profile in the submitted list.
        index: usize,
        profile_id: String,
        profile_name: String,
        evaluation_time: u64,
        completed: usize,
        total: usize,
        result: EvaluationResult,
    },
    Done {
        total_time: u64,
        max_concurrent: usize,
        actual_speedup: f64,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Serialize as a single NDJSON line, newline included.
    pub fn to_line(&self) -> Result<String, StreamError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| StreamError::Serde(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("event stream closed")]
    Closed,
}

/// Destination for stream events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent) -> Result<(), StreamError>;
}

/// Sink that forwards serialized lines over a channel, e.g. into an HTTP body.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: StreamEvent) -> Result<(), StreamError> {
        let line = event.to_line()?;
        self.sender.send(line).map_err(|_| StreamError::Closed)
    }
}

/// Sink that writes lines to any writer, flushing after each event.
pub struct WriterEventSink<W: Write + Send> {
    writer: Mutex<BufWriter<W>>,
}

impl<W: Write + Send> WriterEventSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    pub fn into_inner(self) -> Result<W, StreamError> {
        let writer = self
            .writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .into_inner()
            .map_err(|e| StreamError::Io(e.into_error()))
    }
}

impl<W: Write + Send> EventSink for WriterEventSink<W> {
    fn emit(&self, event: StreamEvent) -> Result<(), StreamError> {
        let line = event.to_line()?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_type_tag_and_camel_case_fields() {
        let line = StreamEvent::Start {
            total: 3,
            max_concurrent: 200,
            batch_size: 5,
        }
        .to_line()
        .unwrap();
        assert_eq!(
            line,
            "{\"type\":\"start\",\"total\":3,\"maxConcurrent\":200,\"batchSize\":5}\n"
        );

        let done: serde_json::Value = serde_json::from_str(
            &StreamEvent::Done {
                total_time: 10,
                max_concurrent: 2,
                actual_speedup: 1.5,
            }
            .to_line()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["totalTime"], 10);
        assert_eq!(done["actualSpeedup"], 1.5);
    }

    #[test]
    fn writer_sink_writes_one_line_per_event() {
        let sink = WriterEventSink::new(Vec::new());
        sink.emit(StreamEvent::Error {
            message: "boom".into(),
        })
        .unwrap();
        sink.emit(StreamEvent::Error {
            message: "again".into(),
        })
        .unwrap();
        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("{\"type\":\"error\",\"message\":\"boom\"}"));
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(StreamEvent::Error {
            message: "x".into(),
        })
        .unwrap();
        assert!(rx.recv().await.unwrap().contains("\"error\""));
        drop(rx);
        assert!(matches!(
            sink.emit(StreamEvent::Error {
                message: "y".into()
            }),
            Err(StreamError::Closed)
        ));
    }
}
