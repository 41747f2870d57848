//! Streaming reader for preprocessed sorted-JSONL captures: one JSON object
//! per line, `now` monotonically non-decreasing, gzip-compressed or plain.
//!
//! Gaps in the timeline produce synthetic heartbeat entries
//! (`{"flight": "N/A", "now": t}`) at a fixed cadence so ingested-time
//! checkpointing keeps advancing while no aircraft are seen.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use serde_json::{json, Value};
use tracing::{error, info};

/// Seconds of silence between synthesized heartbeats.
pub const HEARTBEAT_INTERVAL: f64 = 20.0;

pub struct ReplayReader {
    lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send>,
    pending: VecDeque<Value>,
    last_ts: Option<f64>,
    insert_heartbeats: bool,
    line_count: u64,
}

impl ReplayReader {
    /// Open a capture file. Compression is detected from the gzip magic
    /// bytes, not the file name.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ReplayReader> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;

        let mut magic = [0u8; 2];
        let n = file.read(&mut magic).context("failed to read file header")?;
        use std::io::Seek;
        file.rewind()?;

        let lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send> =
            if n == 2 && magic == [0x1f, 0x8b] {
                Box::new(BufReader::new(MultiGzDecoder::new(file)).lines())
            } else {
                Box::new(BufReader::new(file).lines())
            };

        info!("replaying {}", path.display());
        Ok(ReplayReader {
            lines,
            pending: VecDeque::new(),
            last_ts: None,
            insert_heartbeats: true,
            line_count: 0,
        })
    }

    /// Build a reader over in-memory lines; used by tests and callers that
    /// already have the data.
    pub fn from_lines<I>(lines: I, insert_heartbeats: bool) -> ReplayReader
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        ReplayReader {
            lines: Box::new(lines.into_iter().map(Ok)),
            pending: VecDeque::new(),
            last_ts: None,
            insert_heartbeats,
            line_count: 0,
        }
    }

    pub fn without_heartbeats(mut self) -> ReplayReader {
        self.insert_heartbeats = false;
        self
    }

    pub fn lines_read(&self) -> u64 {
        self.line_count
    }

    /// Queue heartbeats covering the silence between `last` and `next_ts`.
    fn fill_gap(&mut self, last: f64, next_ts: f64) {
        let mut t = last + HEARTBEAT_INTERVAL;
        while t < next_ts {
            self.pending.push_back(json!({"flight": "N/A", "now": t}));
            t += HEARTBEAT_INTERVAL;
        }
    }
}

impl Iterator for ReplayReader {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        loop {
            if let Some(queued) = self.pending.pop_front() {
                return Some(queued);
            }

            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    error!("replay read error: {e}");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            self.line_count += 1;

            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    error!("replay JSON parse fail ({e}): {line}");
                    continue;
                }
            };

            let ts = value.get("now").and_then(Value::as_f64);
            if let (true, Some(last), Some(ts)) = (self.insert_heartbeats, self.last_ts, ts) {
                if ts - last > HEARTBEAT_INTERVAL {
                    self.fill_gap(last, ts);
                }
            }
            if let Some(ts) = ts {
                self.last_ts = Some(self.last_ts.map_or(ts, |l: f64| l.max(ts)));
            }

            self.pending.push_back(value);
        }
    }
}
