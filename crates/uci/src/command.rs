//! Commands a GUI sends to an engine.

use crate::UciError;

/// One GUI-to-engine command line.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiCommand {
    /// `uci`: switch the engine to UCI mode.
    Uci,
    /// `isready`: ping, answered with `readyok`.
    IsReady,
    /// The next search belongs to a different game.
    UciNewGame,
    /// Set an engine option. Buttons carry no value.
    SetOption { name: String, value: Option<String> },
    /// Position to search. `fen: None` means the standard start position.
    Position {
        fen: Option<String>,
        moves: Vec<String>,
    },
    Go(GoOptions),
    Stop,
    Quit,
    /// Anything else, kept verbatim.
    Unknown(String),
}

/// Search limits of a `go` command. Unset fields are not rendered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoOptions {
    /// Milliseconds to search.
    pub movetime: Option<u64>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    /// Clock times and increments in milliseconds.
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub movestogo: Option<u32>,
    /// Search until `stop`.
    pub infinite: bool,
}

impl GoOptions {
    fn numeric_fields(&self) -> [(&'static str, Option<u64>); 8] {
        [
            ("movetime", self.movetime),
            ("depth", self.depth.map(u64::from)),
            ("nodes", self.nodes),
            ("wtime", self.wtime),
            ("btime", self.btime),
            ("winc", self.winc),
            ("binc", self.binc),
            ("movestogo", self.movestogo.map(u64::from)),
        ]
    }

    fn render(&self) -> String {
        let mut line = String::from("go");
        for (key, value) in self.numeric_fields() {
            if let Some(value) = value {
                line.push_str(&format!(" {} {}", key, value));
            }
        }
        if self.infinite {
            line.push_str(" infinite");
        }
        line
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), UciError> {
        let bad = || UciError::ParseError(format!("Invalid value '{}' for go {}", value, key));
        match key {
            "movetime" => self.movetime = Some(value.parse().map_err(|_| bad())?),
            "depth" => self.depth = Some(value.parse().map_err(|_| bad())?),
            "nodes" => self.nodes = Some(value.parse().map_err(|_| bad())?),
            "wtime" => self.wtime = Some(value.parse().map_err(|_| bad())?),
            "btime" => self.btime = Some(value.parse().map_err(|_| bad())?),
            "winc" => self.winc = Some(value.parse().map_err(|_| bad())?),
            "binc" => self.binc = Some(value.parse().map_err(|_| bad())?),
            "movestogo" => self.movestogo = Some(value.parse().map_err(|_| bad())?),
            _ => {}
        }
        Ok(())
    }
}

impl GuiCommand {
    /// Render as a protocol line, without the trailing newline.
    pub fn to_uci(&self) -> String {
        match self {
            GuiCommand::Uci => "uci".into(),
            GuiCommand::IsReady => "isready".into(),
            GuiCommand::UciNewGame => "ucinewgame".into(),
            GuiCommand::SetOption { name, value: None } => format!("setoption name {}", name),
            GuiCommand::SetOption {
                name,
                value: Some(value),
            } => format!("setoption name {} value {}", name, value),
            GuiCommand::Position { fen, moves } => {
                let mut line = match fen {
                    Some(fen) => format!("position fen {}", fen),
                    None => "position startpos".into(),
                };
                if !moves.is_empty() {
                    line = format!("{} moves {}", line, moves.join(" "));
                }
                line
            }
            GuiCommand::Go(opts) => opts.render(),
            GuiCommand::Stop => "stop".into(),
            GuiCommand::Quit => "quit".into(),
            GuiCommand::Unknown(raw) => raw.clone(),
        }
    }

    /// Parse one GUI command line. Unrecognized commands become
    /// [`GuiCommand::Unknown`] rather than errors.
    pub fn parse(input: &str) -> Result<Self, UciError> {
        let input = input.trim();
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let Some((&head, rest)) = tokens.split_first() else {
            return Ok(GuiCommand::Unknown(String::new()));
        };

        Ok(match head {
            "uci" => GuiCommand::Uci,
            "isready" => GuiCommand::IsReady,
            "ucinewgame" => GuiCommand::UciNewGame,
            "setoption" => parse_setoption(rest)?,
            "position" => parse_position(rest)?,
            "go" => parse_go(rest)?,
            "stop" => GuiCommand::Stop,
            "quit" => GuiCommand::Quit,
            _ => GuiCommand::Unknown(input.to_string()),
        })
    }
}

fn parse_setoption(tokens: &[&str]) -> Result<GuiCommand, UciError> {
    let Some(("name", rest)) = tokens.split_first().map(|(h, r)| (*h, r)) else {
        return Err(UciError::ParseError("setoption without 'name'".into()));
    };
    let (name, value) = match rest.iter().position(|&t| t == "value") {
        Some(idx) => (&rest[..idx], Some(rest[idx + 1..].join(" "))),
        None => (rest, None),
    };
    if name.is_empty() {
        return Err(UciError::ParseError("setoption with an empty name".into()));
    }
    Ok(GuiCommand::SetOption {
        name: name.join(" "),
        value,
    })
}

fn parse_position(tokens: &[&str]) -> Result<GuiCommand, UciError> {
    let moves_at = tokens.iter().position(|&t| t == "moves");
    let (setup, moves) = match moves_at {
        Some(idx) => (&tokens[..idx], &tokens[idx + 1..]),
        None => (tokens, &[][..]),
    };

    let fen = match setup.split_first() {
        Some((&"startpos", _)) => None,
        Some((&"fen", fields)) if !fields.is_empty() => Some(fields.join(" ")),
        Some((&"fen", _)) => return Err(UciError::ParseError("position fen without a FEN".into())),
        Some((other, _)) => {
            return Err(UciError::ParseError(format!(
                "position expects 'startpos' or 'fen', got '{}'",
                other
            )))
        }
        None => return Err(UciError::ParseError("position without a setup".into())),
    };

    Ok(GuiCommand::Position {
        fen,
        moves: moves.iter().map(|m| m.to_string()).collect(),
    })
}

fn parse_go(tokens: &[&str]) -> Result<GuiCommand, UciError> {
    let mut opts = GoOptions::default();
    let mut tokens = tokens.iter();
    while let Some(&key) = tokens.next() {
        if key == "infinite" {
            opts.infinite = true;
            continue;
        }
        let is_numeric = opts.numeric_fields().iter().any(|(name, _)| *name == key);
        if is_numeric {
            let value = tokens
                .next()
                .ok_or_else(|| UciError::ParseError(format!("go {} without a value", key)))?;
            opts.set(key, value)?;
        }
    }
    Ok(GuiCommand::Go(opts))
}
