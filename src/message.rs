//! Message contracts between nodes.
//!
//! In-core, every message is a variant of the tagged [`Message`] union with
//! typed fields. The wire form is a case-sensitive type tag plus a
//! newline-delimited payload; encoding and decoding happen only at the
//! transport boundary, and a malformed inbound payload is a decode error
//! the receiver logs and drops.

use crate::artifact::Artifact;
use crate::bitmap::TaskBitmap;
use crate::error::{MapredError, Result};
use crate::NodeId;

/// The two job phases. Map strictly precedes reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Map,
    Reduce,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Map => write!(f, "MAP"),
            TaskPhase::Reduce => write!(f, "REDUCE"),
        }
    }
}

/// What a `REQUESTFILES` message is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRequest {
    /// The job's base input set, payload `-1`. Answered with `STARTINGFILES`.
    BaseInputs,
    /// Specific task output groups, payload a newline-joined token list.
    /// Answered with a `FILETRANSFER` bundle.
    Tokens(Vec<FileToken>),
}

/// One `m{i}` / `r{i}` token in a file request. `Map(i)` names all of map
/// task `i`'s intermediates, `Reduce(i)` the single `output{i}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileToken {
    Map(usize),
    Reduce(usize),
}

impl FileToken {
    pub fn encode(&self) -> String {
        match self {
            FileToken::Map(i) => format!("m{}", i),
            FileToken::Reduce(i) => format!("r{}", i),
        }
    }

    pub fn decode(s: &str) -> Result<Self> {
        let index = s
            .get(1..)
            .and_then(|rest| rest.parse::<usize>().ok())
            .ok_or_else(|| {
                MapredError::malformed("REQUESTFILES", format!("bad file token {:?}", s))
            })?;
        match s.as_bytes().first() {
            Some(b'm') => Ok(FileToken::Map(index)),
            Some(b'r') => Ok(FileToken::Reduce(index)),
            _ => Err(MapredError::malformed(
                "REQUESTFILES",
                format!("bad file token {:?}", s),
            )),
        }
    }
}

/// Every message exchanged in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Candidate campaigning for leadership. `completed` is `None` while
    /// the sender has not yet received the base inputs (wire value `-1`).
    RequestVote {
        term: u64,
        completed: Option<u32>,
    },
    /// Vote response.
    Voted { granted: bool },
    /// Leader liveness plus completion-state gossip.
    Heartbeat {
        term: u64,
        completed: Option<u32>,
        map_bits: TaskBitmap,
        reduce_bits: TaskBitmap,
    },
    /// Worker reporting a finished task and asking for the next one.
    /// `finished` is `None` for the initial "no prior task" request
    /// (wire form `NONE\n-1`).
    TaskFinished {
        finished: Option<(TaskPhase, usize)>,
    },
    /// Task assignment. Map assignments name their input artifact.
    GiveTask {
        phase: TaskPhase,
        index: usize,
        input: Option<String>,
    },
    /// Nothing assignable right now; retry later.
    Wait,
    /// Job fully done; the worker retires.
    Exit,
    /// Ask the leader to replicate artifacts.
    RequestFiles(FileRequest),
    /// Base input delivery; the artifacts ride in the envelope in
    /// map-index order.
    StartingFiles,
    /// Requested artifact bundle; content rides in the envelope.
    FileTransfer,
}

impl Message {
    /// The wire type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVote { .. } => "REQUESTVOTE",
            Message::Voted { .. } => "VOTED",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::TaskFinished { .. } => "TASKFINISHED",
            Message::GiveTask { .. } => "GIVETASK",
            Message::Wait => "WAIT",
            Message::Exit => "EXIT",
            Message::RequestFiles(_) => "REQUESTFILES",
            Message::StartingFiles => "STARTINGFILES",
            Message::FileTransfer => "FILETRANSFER",
        }
    }

    /// Encode the payload (everything after the type tag).
    pub fn encode(&self) -> String {
        match self {
            Message::RequestVote { term, completed } => {
                format!("{}\n{}", term, progress_to_wire(*completed))
            }
            Message::Voted { granted } => {
                if *granted { "TRUE" } else { "FALSE" }.to_string()
            }
            Message::Heartbeat {
                term,
                completed,
                map_bits,
                reduce_bits,
            } => format!(
                "{}\n{}\n{}\n{}",
                term,
                progress_to_wire(*completed),
                map_bits.encode(),
                reduce_bits.encode()
            ),
            Message::TaskFinished { finished } => match finished {
                Some((phase, index)) => format!("{}\n{}", phase, index),
                None => "NONE\n-1".to_string(),
            },
            Message::GiveTask {
                phase,
                index,
                input,
            } => match input {
                Some(name) => format!("{}\n{}\n{}", phase, index, name),
                None => format!("{}\n{}", phase, index),
            },
            Message::Wait | Message::Exit | Message::StartingFiles | Message::FileTransfer => {
                String::new()
            }
            Message::RequestFiles(FileRequest::BaseInputs) => "-1".to_string(),
            Message::RequestFiles(FileRequest::Tokens(tokens)) => tokens
                .iter()
                .map(FileToken::encode)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Decode a payload for the given type tag.
    pub fn decode(kind: &str, payload: &str) -> Result<Self> {
        match kind {
            "REQUESTVOTE" => {
                let mut fields = payload.split('\n');
                let term = parse_field(kind, fields.next(), "term")?;
                let completed = progress_from_wire(parse_field(kind, fields.next(), "completed")?);
                Ok(Message::RequestVote { term, completed })
            }
            "VOTED" => match payload {
                "TRUE" => Ok(Message::Voted { granted: true }),
                "FALSE" => Ok(Message::Voted { granted: false }),
                other => Err(MapredError::malformed(
                    kind,
                    format!("expected TRUE or FALSE, got {:?}", other),
                )),
            },
            "HEARTBEAT" => {
                let mut fields = payload.split('\n');
                let term = parse_field(kind, fields.next(), "term")?;
                let completed = progress_from_wire(parse_field(kind, fields.next(), "completed")?);
                let map_bits = TaskBitmap::decode(fields.next().ok_or_else(|| {
                    MapredError::malformed(kind, "missing map bitmap")
                })?)?;
                let reduce_bits = TaskBitmap::decode(fields.next().ok_or_else(|| {
                    MapredError::malformed(kind, "missing reduce bitmap")
                })?)?;
                Ok(Message::Heartbeat {
                    term,
                    completed,
                    map_bits,
                    reduce_bits,
                })
            }
            "TASKFINISHED" => {
                let mut fields = payload.split('\n');
                let phase = fields
                    .next()
                    .ok_or_else(|| MapredError::malformed(kind, "missing phase"))?;
                let index: i64 = parse_field(kind, fields.next(), "index")?;
                let finished = match (phase, index) {
                    ("NONE", _) => None,
                    ("MAP", i) if i >= 0 => Some((TaskPhase::Map, i as usize)),
                    ("REDUCE", i) if i >= 0 => Some((TaskPhase::Reduce, i as usize)),
                    _ => {
                        return Err(MapredError::malformed(
                            kind,
                            format!("bad phase/index pair {:?}/{}", phase, index),
                        ))
                    }
                };
                Ok(Message::TaskFinished { finished })
            }
            "GIVETASK" => {
                let mut fields = payload.split('\n');
                let phase = match fields.next() {
                    Some("MAP") => TaskPhase::Map,
                    Some("REDUCE") => TaskPhase::Reduce,
                    other => {
                        return Err(MapredError::malformed(
                            kind,
                            format!("bad phase {:?}", other),
                        ))
                    }
                };
                let index = parse_field(kind, fields.next(), "index")?;
                let input = fields.next().map(str::to_string);
                Ok(Message::GiveTask {
                    phase,
                    index,
                    input,
                })
            }
            "WAIT" => Ok(Message::Wait),
            "EXIT" => Ok(Message::Exit),
            "REQUESTFILES" => {
                if payload == "-1" {
                    return Ok(Message::RequestFiles(FileRequest::BaseInputs));
                }
                let tokens = payload
                    .split('\n')
                    .map(FileToken::decode)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Message::RequestFiles(FileRequest::Tokens(tokens)))
            }
            "STARTINGFILES" => Ok(Message::StartingFiles),
            "FILETRANSFER" => Ok(Message::FileTransfer),
            other => Err(MapredError::UnknownMessageType(other.to_string())),
        }
    }
}

/// `completedCount` wire form: `-1` means "base inputs not yet received".
pub fn progress_to_wire(completed: Option<u32>) -> i64 {
    match completed {
        Some(n) => n as i64,
        None => -1,
    }
}

pub fn progress_from_wire(value: i64) -> Option<u32> {
    if value < 0 {
        None
    } else {
        Some(value as u32)
    }
}

fn parse_field<T: std::str::FromStr>(
    kind: &str,
    field: Option<&str>,
    name: &str,
) -> Result<T> {
    field
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| MapredError::malformed(kind, format!("missing or bad {} field", name)))
}

/// A message in flight: addressing plus any artifacts carried alongside.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
    pub artifacts: Vec<Artifact>,
}

impl Envelope {
    pub fn new(from: NodeId, to: NodeId, message: Message) -> Self {
        Self {
            from,
            to,
            message,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }
}
