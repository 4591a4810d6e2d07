//! Principal variations in standard algebraic notation.

use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{Color, Position};

use crate::position::GamePosition;

/// Plies of a principal variation shown to a reader.
pub const PV_DISPLAY_PLIES: usize = 16;

/// Renders `pv`, a list of UCI moves played from `position`, as numbered
/// SAN: `1. e4 e5 2. Nf3`, or `3... Nf6 4. Qxf7#` when Black moves first.
///
/// At most `max_plies` moves are rendered. Rendering stops at the first
/// move that is malformed or illegal in the position reached so far.
pub fn format_pv(position: &GamePosition, pv: &[String], max_plies: usize) -> String {
    let Ok(mut board) = position.board() else {
        return pv.iter().take(max_plies).cloned().collect::<Vec<_>>().join(" ");
    };

    let mut parts = Vec::new();
    for (idx, uci) in pv.iter().take(max_plies).enumerate() {
        let Some(mv) = uci
            .parse::<UciMove>()
            .ok()
            .and_then(|m| m.to_move(&board).ok())
        else {
            break;
        };
        let number = board.fullmoves();
        let white_moves = board.turn() == Color::White;
        let san = SanPlus::from_move_and_play_unchecked(&mut board, mv);
        parts.push(match (white_moves, idx) {
            (true, _) => format!("{}. {}", number, san),
            (false, 0) => format!("{}... {}", number, san),
            (false, _) => san.to_string(),
        });
    }
    parts.join(" ")
}
