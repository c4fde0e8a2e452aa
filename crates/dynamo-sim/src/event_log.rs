//! Append-only simulation history.
//!
//! The event log is the only observability channel of a run: every
//! membership change, timer transition and message movement is recorded
//! with a sequence number. Logs can be exported as JSON lines for external
//! renderers or saved in a compact binary form for replay comparison.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use dynamo_types::NodeId;

use crate::message::Message;
use crate::timer::{TimerId, TimerReason};

// ============================================================================
// Events
// ============================================================================

/// A recorded event with its position in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub seq: u64,
    pub event: SimEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    /// Participant created.
    Add { participant: NodeId },
    Fail { node: NodeId },
    Recover { node: NodeId },
    /// Node taken out of the ring.
    Remove { node: NodeId },
    /// Node put back into the ring.
    Restore { node: NodeId },
    /// Free-form operator note, e.g. a partition being installed.
    Announce { text: String },

    TimerStart {
        timer: TimerId,
        owner: NodeId,
        reason: TimerReason,
    },
    TimerCancel {
        timer: TimerId,
        owner: NodeId,
        reason: TimerReason,
    },
    TimerPop {
        timer: TimerId,
        owner: NodeId,
        reason: TimerReason,
    },

    Send { message: Message },
    Forward { message: Message },
    /// Dropped because the destination was failed.
    Drop { message: Message },
    /// Dropped because the route was partitioned.
    Cut { message: Message },
    Deliver { message: Message },
}

impl SimEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SimEvent::Add { .. } => "add",
            SimEvent::Fail { .. } => "fail",
            SimEvent::Recover { .. } => "recover",
            SimEvent::Remove { .. } => "remove",
            SimEvent::Restore { .. } => "restore",
            SimEvent::Announce { .. } => "announce",
            SimEvent::TimerStart { .. } => "start",
            SimEvent::TimerCancel { .. } => "cancel",
            SimEvent::TimerPop { .. } => "pop",
            SimEvent::Send { .. } => "send",
            SimEvent::Forward { .. } => "forward",
            SimEvent::Drop { .. } => "drop",
            SimEvent::Cut { .. } => "cut",
            SimEvent::Deliver { .. } => "deliver",
        }
    }

    /// The message this event is about, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            SimEvent::Send { message }
            | SimEvent::Forward { message }
            | SimEvent::Drop { message }
            | SimEvent::Cut { message }
            | SimEvent::Deliver { message } => Some(message),
            _ => None,
        }
    }
}

impl Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            SimEvent::Add { participant: node }
            | SimEvent::Fail { node }
            | SimEvent::Recover { node }
            | SimEvent::Remove { node }
            | SimEvent::Restore { node } => write!(f, "{name} {node}"),
            SimEvent::Announce { text } => write!(f, "{name} {text}"),
            SimEvent::TimerStart {
                timer,
                owner,
                reason,
            }
            | SimEvent::TimerCancel {
                timer,
                owner,
                reason,
            }
            | SimEvent::TimerPop {
                timer,
                owner,
                reason,
            } => write!(f, "{name} {owner} {timer} {reason}"),
            SimEvent::Send { message }
            | SimEvent::Forward { message }
            | SimEvent::Drop { message }
            | SimEvent::Cut { message }
            | SimEvent::Deliver { message } => {
                write!(f, "{name} {}->{}: ", message.from, message.to)?;
                if f.alternate() {
                    write!(f, "{message:#}")
                } else {
                    write!(f, "{message}")
                }
            }
        }
    }
}

// ============================================================================
// Event Log
// ============================================================================

#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<LoggedEvent>,
    next_seq: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event, returning its sequence number.
    pub fn log(&mut self, event: SimEvent) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(LoggedEvent { seq, event });
        seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoggedEvent> {
        self.events.iter()
    }

    /// Events with sequence number `>= seq`.
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &LoggedEvent> {
        let start = self.events.partition_point(|e| e.seq < seq);
        self.events[start..].iter()
    }

    /// Sequence number the next event will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.next_seq = 0;
    }

    /// Writes one JSON object per event.
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for event in &self.events {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Writes the log to a file in a compact binary form.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let count_bytes =
            postcard::to_allocvec(&(self.events.len() as u64)).map_err(io::Error::other)?;
        writer.write_all(&count_bytes)?;

        for event in &self.events {
            let event_bytes = postcard::to_allocvec(event).map_err(io::Error::other)?;
            writer.write_all(&event_bytes)?;
        }

        writer.flush()
    }

    /// Reads events written by [`EventLog::save_to_file`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Vec<LoggedEvent>> {
        let bytes = std::fs::read(path)?;
        let (count, mut rest) = postcard::take_from_bytes::<u64>(&bytes).map_err(io::Error::other)?;
        let mut events = Vec::new();
        for _ in 0..count {
            let (event, tail) =
                postcard::take_from_bytes::<LoggedEvent>(rest).map_err(io::Error::other)?;
            events.push(event);
            rest = tail;
        }
        Ok(events)
    }
}

impl Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for logged in &self.events {
            if f.alternate() {
                writeln!(f, "{:>6} {:#}", logged.seq, logged.event)?;
            } else {
                writeln!(f, "{:>6} {}", logged.seq, logged.event)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use dynamo_types::Key;

    fn sample() -> EventLog {
        let mut log = EventLog::new();
        log.log(SimEvent::Add {
            participant: NodeId::from("A"),
        });
        log.log(SimEvent::Send {
            message: Message::new(
                NodeId::from("a"),
                NodeId::from("A"),
                Payload::ClientGetRequest { key: Key::from("K1") },
            ),
        });
        log.log(SimEvent::Announce {
            text: "Cut [A] -> [B]".to_string(),
        });
        log
    }

    #[test]
    fn event_log_basic() {
        let log = sample();
        assert_eq!(log.len(), 3);
        assert_eq!(log.next_seq(), 3);
        assert_eq!(log.since(1).count(), 2);
        assert_eq!(
            log.iter().map(|e| e.event.name()).collect::<Vec<_>>(),
            vec!["add", "send", "announce"]
        );
    }

    #[test]
    fn display_renders_one_line_per_event() {
        let text = sample().to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("send a->A: ClientGet(K1=?)"));
    }

    #[test]
    fn json_lines_export() {
        let mut out = Vec::new();
        sample().write_json_lines(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        for line in text.lines() {
            let parsed: LoggedEvent = serde_json::from_str(line).unwrap();
            assert!(parsed.seq < 3);
        }
    }

    #[test]
    fn binary_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");
        let log = sample();
        log.save_to_file(&path).unwrap();
        let loaded = EventLog::load_from_file(&path).unwrap();
        assert_eq!(loaded, log.iter().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn clear_restarts_numbering() {
        let mut log = sample();
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.log(SimEvent::Fail { node: NodeId::from("A") }), 0);
    }
}
