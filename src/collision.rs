//! Collision resolver (spec component: Collision resolver, §4.3).
//!
//! Computes, for the current tick, the real-valued position of every piece
//! and the set of captures to apply. Grounded in `kfchess/game/collision.py`
//! (no teacher counterpart — this rule system does not exist in turn-based
//! chess).

use crate::model::{GameState, Move, Piece, PieceKind, CAPTURE_DISTANCE, KNIGHT_AIRBORNE_THRESHOLD};

/// A capture event produced during collision resolution. `capturing_piece_id
/// == None` denotes mutual destruction (spec §4.3: "pair of nulls means
/// mutual destruction").
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub capturing_piece_id: Option<String>,
    pub captured_piece_id: String,
    pub position: (f64, f64),
}

/// Interpolated position of a piece with an active (non-knight) move, or its
/// resting position if it has none (spec §4.3 "Interpolated position").
pub fn interpolated_position(piece: &Piece, active_move: Option<&Move>, current_tick: u64, ticks_per_square: u64) -> (f64, f64) {
    let Some(mv) = active_move else {
        return (piece.row, piece.col);
    };
    if current_tick < mv.start_tick {
        return (piece.row, piece.col);
    }
    let elapsed = current_tick - mv.start_tick;
    let total_squares = mv.num_squares();
    if total_squares == 0 {
        return mv.path[0];
    }
    let total_ticks = total_squares as u64 * ticks_per_square;
    if elapsed >= total_ticks {
        return mv.end_position();
    }

    let progress = elapsed as f64 / ticks_per_square as f64;
    let segment = progress.floor() as usize;
    let fraction = progress - segment as f64;

    if segment >= total_squares {
        return mv.end_position();
    }

    let (start_row, start_col) = mv.path[segment];
    let (end_row, end_col) = mv.path[segment + 1];
    (
        start_row + (end_row - start_row) * fraction,
        start_col + (end_col - start_col) * fraction,
    )
}

/// Knight position for collision purposes: `None` while airborne (first 85%
/// of motion), otherwise a straight-line interpolation from start to end
/// over the *whole* move duration (not segment-by-segment) (spec §4.3
/// "Knight visibility").
pub fn knight_position(piece: &Piece, active_move: Option<&Move>, current_tick: u64, ticks_per_square: u64) -> Option<(f64, f64)> {
    let Some(mv) = active_move else {
        return Some((piece.row, piece.col));
    };
    if current_tick < mv.start_tick {
        return Some((piece.row, piece.col));
    }
    let elapsed = current_tick - mv.start_tick;
    let total_ticks = 2 * ticks_per_square;

    if (elapsed as f64) < total_ticks as f64 * KNIGHT_AIRBORNE_THRESHOLD {
        return None;
    }
    if elapsed >= total_ticks {
        return Some(mv.end_position());
    }

    let progress = elapsed as f64 / total_ticks as f64;
    let (start_row, start_col) = mv.start_position();
    let (end_row, end_col) = mv.end_position();
    Some((
        start_row + (end_row - start_row) * progress,
        start_col + (end_col - start_col) * progress,
    ))
}

/// Whether a knight in motion has progressed far enough to capture (spec
/// §4.3: symmetric with the visibility threshold).
pub fn can_knight_capture(mv: &Move, current_tick: u64, ticks_per_square: u64) -> bool {
    let elapsed = current_tick.saturating_sub(mv.start_tick);
    let total_ticks = 2 * ticks_per_square;
    let progress = elapsed as f64 / total_ticks as f64;
    progress >= KNIGHT_AIRBORNE_THRESHOLD
}

/// A pawn whose active move is a purely straight (same-file/rank) advance
/// cannot capture (spec §4.3 cascade rule 1).
fn is_pawn_moving_straight(piece: &Piece, mv: Option<&Move>) -> bool {
    let Some(mv) = mv else { return false };
    if piece.kind != PieceKind::Pawn || mv.path.len() < 2 {
        return false;
    }
    let (start_row, start_col) = mv.path[0];
    let (end_row, end_col) = mv.path[mv.path.len() - 1];
    // Straight = unchanged lateral coordinate; distinguishing row-axis vs
    // col-axis orientation isn't needed here because a diagonal pawn move
    // changes *both* coordinates while a straight one changes only one.
    start_row == end_row || start_col == end_col
}

fn can_piece_capture(piece: &Piece, mv: Option<&Move>) -> bool {
    !is_pawn_moving_straight(piece, mv)
}

/// Full capture-arbitration cascade (spec §4.3). Returns `(winner, loser)`;
/// `(None, None)` denotes mutual destruction.
fn determine_capture_winner<'a>(
    piece_a: &'a Piece,
    piece_b: &'a Piece,
    move_a: Option<&Move>,
    move_b: Option<&Move>,
) -> (Option<&'a Piece>, Option<&'a Piece>) {
    let a_can_capture = can_piece_capture(piece_a, move_a);
    let b_can_capture = can_piece_capture(piece_b, move_b);

    if !a_can_capture && !b_can_capture {
        return match (move_a, move_b) {
            (Some(a), Some(b)) if a.start_tick < b.start_tick => (Some(piece_a), Some(piece_b)),
            (Some(a), Some(b)) if b.start_tick < a.start_tick => (Some(piece_b), Some(piece_a)),
            _ => (None, None),
        };
    }

    if a_can_capture && !b_can_capture {
        return (Some(piece_a), Some(piece_b));
    }
    if b_can_capture && !a_can_capture {
        return (Some(piece_b), Some(piece_a));
    }

    let a_moving = move_a.is_some();
    let b_moving = move_b.is_some();

    if a_moving && !b_moving {
        return (Some(piece_a), Some(piece_b));
    }
    if b_moving && !a_moving {
        return (Some(piece_b), Some(piece_a));
    }
    if !a_moving && !b_moving {
        return (None, None);
    }

    let (move_a, move_b) = (move_a.unwrap(), move_b.unwrap());
    if move_a.start_tick < move_b.start_tick {
        (Some(piece_a), Some(piece_b))
    } else if move_b.start_tick < move_a.start_tick {
        (Some(piece_b), Some(piece_a))
    } else {
        (None, None)
    }
}

/// Detects all collisions/captures at `state.current_tick`. Pieces are
/// enumerated in board order and compared pairwise `i < j`; this is the
/// pairing order spec §9's open question asks implementations to document
/// (grounded in `collision.py::detect_collisions`'s nested-loop order).
pub fn detect_collisions(state: &GameState) -> Vec<Capture> {
    let ticks_per_square = state.config().ticks_per_square();
    let current_tick = state.current_tick;

    let active: Vec<&Piece> = state.board.active_pieces().collect();

    let positions: Vec<Option<(f64, f64)>> = active
        .iter()
        .map(|piece| {
            let mv = state.active_move_for(&piece.id);
            if piece.kind == PieceKind::Knight {
                knight_position(piece, mv, current_tick, ticks_per_square)
            } else {
                Some(interpolated_position(piece, mv, current_tick, ticks_per_square))
            }
        })
        .collect();

    let mut captures = Vec::new();

    for i in 0..active.len() {
        let Some(pos_a) = positions[i] else { continue };
        let piece_a = active[i];
        for j in (i + 1)..active.len() {
            let piece_b = active[j];
            if piece_a.player == piece_b.player {
                continue;
            }
            let Some(pos_b) = positions[j] else { continue };

            let dist = ((pos_a.0 - pos_b.0).powi(2) + (pos_a.1 - pos_b.1).powi(2)).sqrt();
            if dist >= CAPTURE_DISTANCE {
                continue;
            }

            let move_a = state.active_move_for(&piece_a.id);
            let move_b = state.active_move_for(&piece_b.id);

            if piece_a.kind == PieceKind::Knight {
                if let Some(m) = move_a {
                    if !can_knight_capture(m, current_tick, ticks_per_square) {
                        continue;
                    }
                }
            }
            if piece_b.kind == PieceKind::Knight {
                if let Some(m) = move_b {
                    if !can_knight_capture(m, current_tick, ticks_per_square) {
                        continue;
                    }
                }
            }

            let (winner, loser) = determine_capture_winner(piece_a, piece_b, move_a, move_b);
            let midpoint = ((pos_a.0 + pos_b.0) / 2.0, (pos_a.1 + pos_b.1) / 2.0);

            match (winner, loser) {
                (Some(w), Some(l)) => captures.push(Capture {
                    capturing_piece_id: Some(w.id.clone()),
                    captured_piece_id: l.id.clone(),
                    position: midpoint,
                }),
                (None, None) => {
                    captures.push(Capture {
                        capturing_piece_id: None,
                        captured_piece_id: piece_a.id.clone(),
                        position: midpoint,
                    });
                    captures.push(Capture {
                        capturing_piece_id: None,
                        captured_piece_id: piece_b.id.clone(),
                        position: midpoint,
                    });
                }
                _ => unreachable!("determine_capture_winner returns either both Some or both None"),
            }
        }
    }

    captures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Board, BoardType, GameStatus, Piece, PieceKind, Speed};
    use std::collections::{HashMap, HashSet};

    fn state_with_pieces(pieces: Vec<Piece>, active_moves: Vec<Move>, current_tick: u64) -> GameState {
        let mut board = Board::create(BoardType::Standard);
        board.pieces = pieces;
        GameState {
            game_id: "t".into(),
            board,
            speed: Speed::Standard,
            tick_rate_hz: 30,
            players: HashMap::new(),
            active_moves,
            cooldowns: vec![],
            current_tick,
            status: GameStatus::Playing,
            started_at: None,
            finished_at: None,
            winner: None,
            win_reason: None,
            last_move_tick: 0,
            last_capture_tick: 0,
            replay_moves: vec![],
            ready_players: HashSet::new(),
        }
    }

    #[test]
    fn knight_is_invisible_before_85_percent() {
        let knight = Piece::new(PieceKind::Knight, 1, 0, 0);
        let mv = Move {
            piece_id: knight.id.clone(),
            path: vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)],
            start_tick: 0,
            extra_move: None,
            linked_to: None,
        };
        // total_ticks = 2*30 = 60, 85% = 51
        assert!(knight_position(&knight, Some(&mv), 50, 30).is_none());
        assert!(knight_position(&knight, Some(&mv), 51, 30).is_some());
    }

    #[test]
    fn simple_capture_detected_within_distance() {
        let mut wq = Piece::new(PieceKind::Queen, 1, 4, 0);
        let bp = Piece::new(PieceKind::Pawn, 2, 4, 3);
        wq.row = 4.0;
        wq.col = 2.9; // within 0.4 of bp at (4,3)
        let captures = detect_collisions(&state_with_pieces(vec![wq.clone(), bp.clone()], vec![], 0));
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].captured_piece_id, bp.id);
        assert_eq!(captures[0].capturing_piece_id.as_deref(), Some(wq.id.as_str()));
    }

    #[test]
    fn mutual_destruction_on_equal_start_tick() {
        let mut rook_a = Piece::new(PieceKind::Rook, 1, 4, 0);
        let mut rook_b = Piece::new(PieceKind::Rook, 2, 4, 7);
        rook_a.row = 4.0;
        rook_a.col = 3.5;
        rook_b.row = 4.0;
        rook_b.col = 3.6;
        let move_a = Move {
            piece_id: rook_a.id.clone(),
            path: vec![(4.0, 0.0), (4.0, 7.0)],
            start_tick: 5,
            extra_move: None,
            linked_to: None,
        };
        let move_b = Move {
            piece_id: rook_b.id.clone(),
            path: vec![(4.0, 7.0), (4.0, 0.0)],
            start_tick: 5,
            extra_move: None,
            linked_to: None,
        };
        rook_a.row = 4.0;
        let captures = detect_collisions(&state_with_pieces(
            vec![rook_a.clone(), rook_b.clone()],
            vec![move_a, move_b],
            20,
        ));
        assert_eq!(captures.len(), 2);
        assert!(captures.iter().all(|c| c.capturing_piece_id.is_none()));
    }

    #[test]
    fn straight_moving_pawn_cannot_capture_but_can_be_captured() {
        let mut pawn = Piece::new(PieceKind::Pawn, 1, 6, 4);
        let mut blocker = Piece::new(PieceKind::Knight, 2, 5, 4);
        pawn.row = 5.5;
        pawn.col = 4.0;
        blocker.row = 5.3;
        blocker.col = 4.0;
        let move_pawn = Move {
            piece_id: pawn.id.clone(),
            path: vec![(6.0, 4.0), (5.0, 4.0)],
            start_tick: 0,
            extra_move: None,
            linked_to: None,
        };
        let captures = detect_collisions(&state_with_pieces(vec![pawn.clone(), blocker.clone()], vec![move_pawn], 15));
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].captured_piece_id, pawn.id);
        assert_eq!(captures[0].capturing_piece_id.as_deref(), Some(blocker.id.as_str()));
    }
}
