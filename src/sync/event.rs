//! 下载进程输出协议：每行一个 JSON 对象，按 `type` 区分。

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start {
        slug: String,
        download_path: PathBuf,
        download_url: String,
    },
    Done {
        slug: String,
    },
    Fail {
        slug: String,
    },
    FatalError {
        details: String,
    },
}

impl Event {
    pub fn slug(&self) -> Option<&str> {
        match self {
            Event::Start { slug, .. } | Event::Done { slug } | Event::Fail { slug } => Some(slug),
            Event::FatalError { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done { .. } | Event::Fail { .. })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid progress update message: {line}")]
    Malformed { line: String },
    #[error("unrecognized update type {kind:?}: {line}")]
    UnknownKind { kind: String, line: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Start {
        slug: String,
        download_path: PathBuf,
        download_url: String,
    },
    Done {
        slug: String,
    },
    Fail {
        slug: String,
    },
    Error {
        details: String,
    },
}

const KNOWN_KINDS: [&str; 4] = ["start", "done", "fail", "error"];

/// 解码一行原始输出；非 UTF-8 内容视为格式错误。
pub fn decode_raw(raw: &[u8]) -> Result<Event, DecodeError> {
    match std::str::from_utf8(raw) {
        Ok(line) => decode_line(line),
        Err(_) => Err(DecodeError::Malformed {
            line: String::from_utf8_lossy(raw).into_owned(),
        }),
    }
}

pub fn decode_line(line: &str) -> Result<Event, DecodeError> {
    let line = line.trim();
    let malformed = || DecodeError::Malformed {
        line: line.to_string(),
    };

    let value: Value = serde_json::from_str(line).map_err(|_| malformed())?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(malformed)?;
    if !KNOWN_KINDS.contains(&kind) {
        return Err(DecodeError::UnknownKind {
            kind: kind.to_string(),
            line: line.to_string(),
        });
    }

    let wire: WireEvent = serde_json::from_value(value).map_err(|_| malformed())?;
    let event = match wire {
        WireEvent::Start {
            slug,
            download_path,
            download_url,
        } => Event::Start {
            slug,
            download_path,
            download_url,
        },
        WireEvent::Done { slug } => Event::Done { slug },
        WireEvent::Fail { slug } => Event::Fail { slug },
        WireEvent::Error { details } => Event::FatalError { details },
    };

    match event.slug() {
        Some(slug) if slug.is_empty() => Err(malformed()),
        _ => Ok(event),
    }
}
