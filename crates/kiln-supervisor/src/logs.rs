use std::{collections::VecDeque, sync::Arc};

use tokio::sync::{Mutex, mpsc};

const DEFAULT_LOG_MAX_LINES: usize = 1000;

fn log_max_lines() -> usize {
    std::env::var("KILN_LOG_MAX_LINES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .map(|v| v.clamp(100, 50_000))
        .unwrap_or(DEFAULT_LOG_MAX_LINES)
}

/// Bounded in-memory history of delivered lines, in strict arrival order.
///
/// Each line carries a monotonically increasing sequence number so a
/// collaborator can poll with a cursor instead of holding a subscription.
#[derive(Debug)]
pub struct LogBuffer {
    next_seq: u64,
    max_lines: usize,
    lines: VecDeque<(u64, String)>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_max_lines(log_max_lines())
    }
}

impl LogBuffer {
    pub fn with_max_lines(max_lines: usize) -> Self {
        Self {
            next_seq: 1,
            max_lines,
            lines: VecDeque::new(),
        }
    }

    pub fn push_line(&mut self, line: String) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back((seq, line));
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Lines after `cursor`, up to `limit`, plus the new cursor. A cursor of
    /// 0 means "give me the most recent lines".
    pub fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        if cursor == 0 {
            let start = self.lines.len().saturating_sub(limit);
            let mut out = Vec::new();
            let mut last = 0;
            for (seq, line) in self.lines.iter().skip(start) {
                out.push(line.clone());
                last = *seq;
            }
            return (out, last);
        }

        let mut out = Vec::new();
        let mut last = cursor;
        for (seq, line) in self.lines.iter() {
            if *seq > cursor {
                out.push(line.clone());
                last = *seq;
                if out.len() >= limit {
                    break;
                }
            }
        }
        (out, last)
    }
}

/// Fan-out for delivered lines: always into the ring buffer, and to the
/// subscriber channel when one is attached.
#[derive(Clone, Default)]
pub struct LogSink {
    buffer: Arc<Mutex<LogBuffer>>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl LogSink {
    pub async fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        self.buffer.lock().await.push_line(line.clone());
        if let Some(tx) = self.tx.lock().await.as_ref() {
            let _ = tx.send(line);
        }
    }

    /// Attaches the single subscriber, replacing any previous one. Lines are
    /// delivered in arrival order; the channel is unbounded so the pump
    /// never blocks on a slow reader.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock().await = Some(tx);
        rx
    }

    pub async fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        self.buffer.lock().await.tail_after(cursor, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_after_cursor_semantics() {
        let mut buf = LogBuffer::with_max_lines(100);
        for i in 1..=5 {
            buf.push_line(format!("line {i}"));
        }

        let (recent, cursor) = buf.tail_after(0, 3);
        assert_eq!(recent, vec!["line 3", "line 4", "line 5"]);
        assert_eq!(cursor, 5);

        let (rest, cursor) = buf.tail_after(2, 10);
        assert_eq!(rest, vec!["line 3", "line 4", "line 5"]);
        assert_eq!(cursor, 5);

        let (none, cursor) = buf.tail_after(5, 10);
        assert!(none.is_empty());
        assert_eq!(cursor, 5);
    }

    #[test]
    fn buffer_drops_oldest_lines_past_the_cap() {
        let mut buf = LogBuffer::with_max_lines(2);
        buf.push_line("a".into());
        buf.push_line("b".into());
        buf.push_line("c".into());

        let (lines, cursor) = buf.tail_after(0, 10);
        assert_eq!(lines, vec!["b", "c"]);
        assert_eq!(cursor, 3);
    }

    #[tokio::test]
    async fn subscriber_sees_lines_in_arrival_order() {
        let sink = LogSink::default();
        let mut rx = sink.subscribe().await;

        sink.emit("first").await;
        sink.emit("second").await;

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
    }
}
