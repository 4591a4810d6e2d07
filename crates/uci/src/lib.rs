//! UCI (Universal Chess Interface) protocol codec.
//!
//! This crate encodes the commands a GUI sends to an engine and decodes the
//! messages an engine sends back. Both directions can also be handled the
//! other way around, which is what scripted test engines use.
//!
//! # GUI to engine
//!
//! - `uci` - Initialize engine, get id and options
//! - `isready` / `readyok` - Synchronization
//! - `ucinewgame` - Reset engine state between games
//! - `setoption name <name> [value <value>]` - Configure the engine
//! - `position fen <fen> [moves <move>...]` - Set position
//! - `go [movetime <ms>] [depth <d>]` - Start search
//! - `stop` - Stop search
//! - `quit` - Exit engine
//!
//! # Engine to GUI
//!
//! - `id name|author <text>`
//! - `option name <name> type <type> ...`
//! - `uciok`, `readyok`
//! - `info ...` (see [`EngineInfo`])
//! - `bestmove <move> [ponder <move>]`

mod command;
mod info;
mod option;

pub use command::{GoOptions, GuiCommand};
pub use info::{Bound, EngineInfo, InfoBuilder, Score, Wdl};
pub use option::OptionDecl;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UciError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification.
    Id { name: Option<String>, author: Option<String> },
    /// Option the engine supports.
    Option(OptionDecl),
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Search information.
    Info(EngineInfo),
    /// Best move found. `mv` is `None` for `bestmove (none)`.
    BestMove { mv: Option<String>, ponder: Option<String> },
}

impl EngineMessage {
    /// Format message for output.
    pub fn to_uci(&self) -> String {
        match self {
            EngineMessage::Id { name, author } => {
                let mut parts = Vec::new();
                if let Some(n) = name {
                    parts.push(format!("id name {}", n));
                }
                if let Some(a) = author {
                    parts.push(format!("id author {}", a));
                }
                parts.join("\n")
            }
            EngineMessage::Option(decl) => decl.to_uci(),
            EngineMessage::UciOk => "uciok".to_string(),
            EngineMessage::ReadyOk => "readyok".to_string(),
            EngineMessage::Info(info) => info.to_uci(),
            EngineMessage::BestMove { mv, ponder } => {
                let mv = mv.as_deref().unwrap_or("(none)");
                match ponder {
                    Some(p) => format!("bestmove {} ponder {}", mv, p),
                    None => format!("bestmove {}", mv),
                }
            }
        }
    }

    /// Parse one line of engine output.
    ///
    /// Lines whose first token is outside the protocol grammar are rejected
    /// with [`UciError::InvalidCommand`]; callers decide whether that matters in
    /// their current state (start-up banners are common, for instance).
    pub fn parse(line: &str) -> Result<Self, UciError> {
        let line = line.trim();
        let mut parts = line.split_whitespace();

        match parts.next() {
            Some("id") => match parts.next() {
                Some("name") => Ok(EngineMessage::Id {
                    name: Some(rest_of(parts)),
                    author: None,
                }),
                Some("author") => Ok(EngineMessage::Id {
                    name: None,
                    author: Some(rest_of(parts)),
                }),
                _ => Err(UciError::ParseError(format!("Malformed id line: '{}'", line))),
            },
            Some("option") => OptionDecl::parse(line).map(EngineMessage::Option),
            Some("uciok") => Ok(EngineMessage::UciOk),
            Some("readyok") => Ok(EngineMessage::ReadyOk),
            Some("info") => EngineInfo::parse(line)
                .map(EngineMessage::Info)
                .ok_or_else(|| UciError::ParseError(format!("Malformed info line: '{}'", line))),
            Some("bestmove") => {
                let mv = match parts.next() {
                    Some("(none)") | Some("0000") => None,
                    Some(mv) => Some(mv.to_string()),
                    None => {
                        return Err(UciError::ParseError(
                            "bestmove without a move".to_string(),
                        ))
                    }
                };
                let ponder = match parts.next() {
                    Some("ponder") => parts.next().map(str::to_string),
                    _ => None,
                };
                Ok(EngineMessage::BestMove { mv, ponder })
            }
            Some(other) => Err(UciError::InvalidCommand(other.to_string())),
            None => Err(UciError::ParseError("Empty line".to_string())),
        }
    }
}

fn rest_of<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}
