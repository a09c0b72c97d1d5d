//! Line commands read from stdin.
//!
//! ```text
//! open <path>                  send the file's current text to the server
//! cursor <path> <line> <col>   move the cursor (1-based line and column)
//! pin | unpin <n>
//! pause [view] | refresh [view] | copy [view] | reveal [view] | show [view]
//! quit
//! ```
//!
//! `view` is `cursor` (the default) or the index of a pinned view.

use std::path::PathBuf;

use proofview_engine::ViewId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open { path: PathBuf },
    Cursor { path: PathBuf, line: u32, character: u32 },
    Pin,
    Unpin(usize),
    Pause(ViewId),
    Refresh(ViewId),
    Copy(ViewId),
    Reveal(ViewId),
    Show(ViewId),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {what} `{value}`")]
    Invalid { what: &'static str, value: String },
    #[error("unexpected argument `{0}`")]
    Trailing(String),
}

pub fn parse(line: &str) -> Result<Command, ParseError> {
    let mut words = line.split_whitespace();
    let name = words.next().ok_or(ParseError::Empty)?;

    let command = match name {
        "open" => Command::Open {
            path: PathBuf::from(words.next().ok_or(ParseError::Missing("path"))?),
        },
        "cursor" => {
            let path = PathBuf::from(words.next().ok_or(ParseError::Missing("path"))?);
            let line = one_based(words.next(), "line")?;
            let character = one_based(words.next(), "column")?;
            Command::Cursor {
                path,
                line,
                character,
            }
        }
        "pin" => Command::Pin,
        "unpin" => {
            let raw = words.next().ok_or(ParseError::Missing("pin index"))?;
            Command::Unpin(raw.parse().map_err(|_| ParseError::Invalid {
                what: "pin index",
                value: raw.to_string(),
            })?)
        }
        "pause" => Command::Pause(view(words.next())?),
        "refresh" => Command::Refresh(view(words.next())?),
        "copy" => Command::Copy(view(words.next())?),
        "reveal" => Command::Reveal(view(words.next())?),
        "show" => Command::Show(view(words.next())?),
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };

    match words.next() {
        Some(extra) => Err(ParseError::Trailing(extra.to_string())),
        None => Ok(command),
    }
}

/// Editors count from 1; positions count from 0.
fn one_based(raw: Option<&str>, what: &'static str) -> Result<u32, ParseError> {
    let raw = raw.ok_or(ParseError::Missing(what))?;
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(ParseError::Invalid {
            what,
            value: raw.to_string(),
        }),
    }
}

fn view(raw: Option<&str>) -> Result<ViewId, ParseError> {
    match raw {
        None | Some("cursor") => Ok(ViewId::Cursor),
        Some(raw) => raw.parse().map(ViewId::Pinned).map_err(|_| ParseError::Invalid {
            what: "view",
            value: raw.to_string(),
        }),
    }
}
