use std::{collections::VecDeque, time::SystemTime};

/// Author used for entries produced by the server itself.
pub const SYSTEM_AUTHOR: &str = "server";
/// Color used for entries produced by the server itself.
pub const SYSTEM_COLOR: &str = "#aaaaaa";

/// One chat or system message.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Monotonic insertion sequence number.
    pub seq: u64,
    /// Display name of the author.
    pub author: String,
    /// Message text, already sanitized.
    pub text: String,
    /// Author color at the time of writing.
    pub color: String,
    /// Wall-clock creation time.
    pub created_at: SystemTime,
}

/// Bounded FIFO of recent messages, replayed to new connections.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

impl EventLog {
    /// Create an empty log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Append an entry, evicting the oldest ones beyond capacity.
    pub fn push(&mut self, author: String, text: String, color: String) -> LogEntry {
        let entry = LogEntry {
            seq: self.next_seq,
            author,
            text,
            color,
            created_at: SystemTime::now(),
        };
        self.next_seq += 1;

        self.entries.push_back(entry.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        entry
    }

    /// Append a server notice.
    pub fn push_system(&mut self, text: String) -> LogEntry {
        self.push(SYSTEM_AUTHOR.into(), text, SYSTEM_COLOR.into())
    }

    /// Entries oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}
