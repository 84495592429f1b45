//! Transcript files fed to `recollect ingest`.
//!
//! One turn per line, either JSON (`{"source": "user", "content": "..."}`)
//! or plain `role: text`. Blank lines and `#` comments are skipped; a line
//! with no recognised role prefix is treated as a user turn.

use recollect_core::Source;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Turn {
    pub source: Source,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct TranscriptError {
    pub line: usize,
    pub reason: String,
}

pub fn parse(input: &str) -> Result<Vec<Turn>, TranscriptError> {
    let mut turns = Vec::new();
    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let turn = if line.starts_with('{') {
            serde_json::from_str::<Turn>(line).map_err(|e| TranscriptError {
                line: index + 1,
                reason: e.to_string(),
            })?
        } else {
            plain(line)
        };
        turns.push(turn);
    }
    Ok(turns)
}

fn plain(line: &str) -> Turn {
    if let Some((role, text)) = line.split_once(':') {
        if let Ok(source) = role.parse::<Source>() {
            return Turn {
                source,
                content: text.trim().to_string(),
                session_id: None,
            };
        }
    }
    Turn {
        source: Source::User,
        content: line.to_string(),
        session_id: None,
    }
}
