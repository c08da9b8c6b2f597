//! Incremental consumption of `stream: true` generation responses.
//!
//! The server sends one `data:` line per update, each carrying the cumulative
//! text generated so far. [`GenerateStream`] turns those snapshots back into
//! deltas using a [`StreamCursor`]; frames must be processed in arrival order.

use std::io::{BufRead, ErrorKind, Lines};

use serde::Deserialize;

use crate::types::deserialize_text_or_number;
use crate::{MetaInfo, SrtClientError};

pub const STREAM_DATA_PREFIX: &str = "data:";
pub const STREAM_DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Classification of one line of a streaming body.
pub enum StreamFrame<'a> {
    Data(&'a str),
    Done,
    Ignored,
}

pub fn classify_stream_line(line: &str) -> StreamFrame<'_> {
    let Some(payload) = line.strip_prefix(STREAM_DATA_PREFIX) else {
        return StreamFrame::Ignored;
    };
    let payload = payload.trim();
    if payload == STREAM_DONE_SENTINEL {
        StreamFrame::Done
    } else {
        StreamFrame::Data(payload)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Byte offset into the cumulative text already handed to the consumer.
pub struct StreamCursor {
    offset: usize,
}

impl StreamCursor {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the unseen suffix of `snapshot` and moves past it.
    pub fn advance(&mut self, snapshot: &str) -> Result<String, SrtClientError> {
        if snapshot.len() <= self.offset {
            return Ok(String::new());
        }
        let delta = snapshot.get(self.offset..).ok_or_else(|| {
            SrtClientError::InvalidResponse(format!(
                "stream snapshot splits a character at byte offset {}",
                self.offset
            ))
        })?;
        self.offset += delta.len();
        Ok(delta.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `StreamDelta` used across srt client components.
pub struct StreamDelta {
    pub text: String,
    pub meta_info: MetaInfo,
}

#[derive(Deserialize)]
struct StreamSnapshot {
    #[serde(deserialize_with = "deserialize_text_or_number")]
    text: String,
    #[serde(default)]
    meta_info: MetaInfo,
}

/// Lazy, non-restartable sequence of deltas read from a streaming body.
///
/// Dropping the stream drops the underlying reader, which closes the
/// connection. After the sentinel, end of body, or an error, it yields nothing.
pub struct GenerateStream<R> {
    lines: Lines<R>,
    cursor: StreamCursor,
    finished: bool,
}

impl<R: BufRead> GenerateStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            cursor: StreamCursor::default(),
            finished: false,
        }
    }

    pub fn cursor(&self) -> StreamCursor {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn apply_snapshot(&mut self, payload: &str) -> Result<StreamDelta, SrtClientError> {
        let snapshot: StreamSnapshot = serde_json::from_str(payload).map_err(|error| {
            SrtClientError::InvalidResponse(format!("failed to parse stream frame: {error}"))
        })?;
        let text = self.cursor.advance(&snapshot.text)?;
        Ok(StreamDelta {
            text,
            meta_info: snapshot.meta_info,
        })
    }
}

impl<R: BufRead> Iterator for GenerateStream<R> {
    type Item = Result<StreamDelta, SrtClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                None => {
                    self.finished = true;
                    tracing::debug!(bytes = self.cursor.offset(), "stream body ended");
                    return None;
                }
                Some(Err(error)) => {
                    self.finished = true;
                    let error = if error.kind() == ErrorKind::InvalidData {
                        SrtClientError::InvalidResponse(format!(
                            "invalid UTF-8 in streaming response: {error}"
                        ))
                    } else {
                        SrtClientError::StreamRead(error)
                    };
                    return Some(Err(error));
                }
                Some(Ok(line)) => line,
            };

            match classify_stream_line(&line) {
                StreamFrame::Ignored => continue,
                StreamFrame::Done => {
                    self.finished = true;
                    tracing::debug!(bytes = self.cursor.offset(), "stream completed");
                    return None;
                }
                StreamFrame::Data(payload) => {
                    let result = self.apply_snapshot(payload);
                    if result.is_err() {
                        self.finished = true;
                    }
                    return Some(result);
                }
            }
        }
    }
}

impl<R: BufRead> std::iter::FusedIterator for GenerateStream<R> {}
