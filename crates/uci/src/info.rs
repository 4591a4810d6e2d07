//! The `info` line an engine streams while searching.

use serde::{Deserialize, Serialize};

/// Score in centipawns or mate distance, from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Score {
    /// Centipawn score (100 = 1 pawn advantage).
    Cp(i32),
    /// Mate in N moves (positive = engine winning, negative = engine losing).
    Mate(i32),
}

/// Marks a score reported while the search window failed high or low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    Lower,
    Upper,
}

/// Win/draw/loss statistics in per mille, from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}

impl Wdl {
    pub fn new(win: u32, draw: u32, loss: u32) -> Self {
        Self { win, draw, loss }
    }

    /// Expected score in `[0, 1]`, or `None` when all counts are zero.
    pub fn expected_score(&self) -> Option<f64> {
        let total = u64::from(self.win) + u64::from(self.draw) + u64::from(self.loss);
        if total == 0 {
            return None;
        }
        Some((f64::from(self.win) + 0.5 * f64::from(self.draw)) / total as f64)
    }

    /// The same statistics seen from the other side.
    pub fn flip(&self) -> Self {
        Self {
            win: self.loss,
            draw: self.draw,
            loss: self.win,
        }
    }
}

/// One `info` line. Every field is optional; engines send what they have.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineInfo {
    /// Search depth in plies.
    pub depth: Option<u32>,
    /// Selective search depth.
    pub seldepth: Option<u32>,
    /// Rank of this line when several principal variations are searched.
    pub multipv: Option<u32>,
    /// Score evaluation.
    pub score: Option<Score>,
    /// Set when `score` is only a bound.
    pub bound: Option<Bound>,
    /// Win/draw/loss statistics (`UCI_ShowWDL`).
    pub wdl: Option<Wdl>,
    /// Nodes searched.
    pub nodes: Option<u64>,
    /// Nodes per second.
    pub nps: Option<u64>,
    /// Time spent in milliseconds.
    pub time: Option<u64>,
    /// Principal variation (best line found).
    pub pv: Vec<String>,
    /// Current move being searched.
    pub currmove: Option<String>,
    /// Current move number.
    pub currmovenumber: Option<u32>,
    /// Hash table usage (per mille).
    pub hashfull: Option<u32>,
    /// Arbitrary string info.
    pub string: Option<String>,
}

impl EngineInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render as an `info` line. Fields that are unset are left out.
    pub fn to_uci(&self) -> String {
        let mut out = String::from("info");
        let mut field = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                out.push(' ');
                out.push_str(key);
                out.push(' ');
                out.push_str(&value);
            }
        };

        field("depth", self.depth.map(|v| v.to_string()));
        field("seldepth", self.seldepth.map(|v| v.to_string()));
        field("multipv", self.multipv.map(|v| v.to_string()));
        field(
            "score",
            self.score.map(|score| {
                let bound = match self.bound {
                    Some(Bound::Lower) => " lowerbound",
                    Some(Bound::Upper) => " upperbound",
                    None => "",
                };
                match score {
                    Score::Cp(cp) => format!("cp {}{}", cp, bound),
                    Score::Mate(n) => format!("mate {}{}", n, bound),
                }
            }),
        );
        field(
            "wdl",
            self.wdl.map(|w| format!("{} {} {}", w.win, w.draw, w.loss)),
        );
        field("nodes", self.nodes.map(|v| v.to_string()));
        field("nps", self.nps.map(|v| v.to_string()));
        field("hashfull", self.hashfull.map(|v| v.to_string()));
        field("time", self.time.map(|v| v.to_string()));
        field("currmove", self.currmove.clone());
        field("currmovenumber", self.currmovenumber.map(|v| v.to_string()));
        field(
            "pv",
            (!self.pv.is_empty()).then(|| self.pv.join(" ")),
        );
        // `string` swallows the rest of the line, so it goes last.
        field("string", self.string.clone());
        out
    }

    /// Parse an `info` line.
    ///
    /// Unknown tokens are skipped so newer engine fields do not break
    /// decoding. Returns `None` only when the line is not an info line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().peekable();
        if tokens.next() != Some("info") {
            return None;
        }

        let mut info = EngineInfo::new();
        while let Some(key) = tokens.next() {
            match key {
                "depth" => info.depth = number(tokens.next()),
                "seldepth" => info.seldepth = number(tokens.next()),
                "multipv" => info.multipv = number(tokens.next()),
                "nodes" => info.nodes = number(tokens.next()),
                "nps" => info.nps = number(tokens.next()),
                "time" => info.time = number(tokens.next()),
                "hashfull" => info.hashfull = number(tokens.next()),
                "currmovenumber" => info.currmovenumber = number(tokens.next()),
                "currmove" => info.currmove = tokens.next().map(str::to_string),
                "score" => {
                    info.score = match tokens.next() {
                        Some("cp") => number(tokens.next()).map(Score::Cp),
                        Some("mate") => number(tokens.next()).map(Score::Mate),
                        _ => None,
                    }
                }
                "lowerbound" => info.bound = Some(Bound::Lower),
                "upperbound" => info.bound = Some(Bound::Upper),
                "wdl" => {
                    let win = number(tokens.next());
                    let draw = number(tokens.next());
                    let loss = number(tokens.next());
                    if let (Some(w), Some(d), Some(l)) = (win, draw, loss) {
                        info.wdl = Some(Wdl::new(w, d, l));
                    }
                }
                "pv" => {
                    while let Some(mv) = tokens.next_if(|t| !is_info_keyword(t)) {
                        info.pv.push(mv.to_string());
                    }
                }
                "string" => {
                    info.string = Some(tokens.by_ref().collect::<Vec<_>>().join(" "));
                }
                _ => {}
            }
        }

        Some(info)
    }
}

fn number<T: std::str::FromStr>(token: Option<&str>) -> Option<T> {
    token?.parse().ok()
}

/// Keywords that end a `pv` move list.
fn is_info_keyword(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "multipv"
            | "score"
            | "lowerbound"
            | "upperbound"
            | "wdl"
            | "nodes"
            | "nps"
            | "time"
            | "pv"
            | "currmove"
            | "currmovenumber"
            | "hashfull"
            | "tbhits"
            | "sbhits"
            | "cpuload"
            | "refutation"
            | "currline"
            | "string"
    )
}

/// Fluent construction of [`EngineInfo`], mostly for scripted engines.
#[derive(Default)]
pub struct InfoBuilder {
    info: EngineInfo,
}

impl InfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(mut self, d: u32) -> Self {
        self.info.depth = Some(d);
        self
    }

    pub fn seldepth(mut self, d: u32) -> Self {
        self.info.seldepth = Some(d);
        self
    }

    pub fn multipv(mut self, rank: u32) -> Self {
        self.info.multipv = Some(rank);
        self
    }

    pub fn score_cp(mut self, cp: i32) -> Self {
        self.info.score = Some(Score::Cp(cp));
        self
    }

    pub fn score_mate(mut self, moves: i32) -> Self {
        self.info.score = Some(Score::Mate(moves));
        self
    }

    pub fn bound(mut self, bound: Bound) -> Self {
        self.info.bound = Some(bound);
        self
    }

    pub fn wdl(mut self, win: u32, draw: u32, loss: u32) -> Self {
        self.info.wdl = Some(Wdl::new(win, draw, loss));
        self
    }

    pub fn nodes(mut self, n: u64) -> Self {
        self.info.nodes = Some(n);
        self
    }

    pub fn nps(mut self, n: u64) -> Self {
        self.info.nps = Some(n);
        self
    }

    pub fn time(mut self, ms: u64) -> Self {
        self.info.time = Some(ms);
        self
    }

    pub fn pv(mut self, moves: Vec<String>) -> Self {
        self.info.pv = moves;
        self
    }

    pub fn currmove(mut self, mv: &str) -> Self {
        self.info.currmove = Some(mv.to_string());
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.info.string = Some(s.to_string());
        self
    }

    pub fn build(self) -> EngineInfo {
        self.info
    }
}
