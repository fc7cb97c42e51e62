//! Move geometry (spec component: Move geometry, §4.2).
//!
//! Given a piece, a board, a destination, and the current set of active
//! moves, produces either a path or a refusal. Pure: no cooldown checks, no
//! mutation. Grounded in `kfchess/game/moves.py`.

use crate::model::{Axis, Board, GameState, Move, Orientation, Piece, PieceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    SameSquare,
    OffBoard,
    NoSuchVector,
    Blocked,
    PawnDiagonalRequiresCapturableEnemy,
}

pub type GeometryResult = Result<Move, GeometryError>;

/// Computes the path for a non-castling move, or a refusal. Mirrors
/// `moves.py::compute_move_path`'s dispatch-by-piece-type structure.
pub fn compute_move_path(
    state: &GameState,
    piece: &Piece,
    to_row: i32,
    to_col: i32,
) -> GeometryResult {
    let board = &state.board;
    let (from_row, from_col) = piece.grid_position();

    if from_row == to_row && from_col == to_col {
        return Err(GeometryError::SameSquare);
    }
    if !board.square_valid(to_row, to_col) {
        return Err(GeometryError::OffBoard);
    }

    let orientation = state.orientation(piece.player);

    let path = match piece.kind {
        PieceKind::Pawn => compute_pawn_path(state, piece, orientation, to_row, to_col)?,
        PieceKind::Knight => compute_knight_path(piece, to_row, to_col)?,
        PieceKind::Bishop => compute_bishop_path(piece, to_row, to_col)?,
        PieceKind::Rook => compute_rook_path(piece, to_row, to_col)?,
        PieceKind::Queen => compute_queen_path(piece, to_row, to_col)?,
        PieceKind::King => compute_king_path(piece, to_row, to_col)?,
    };

    if piece.kind == PieceKind::Knight {
        if !is_knight_destination_valid(board, &state.active_moves, piece, to_row, to_col) {
            return Err(GeometryError::Blocked);
        }
    } else if !is_path_clear(board, &state.active_moves, piece, &path) {
        return Err(GeometryError::Blocked);
    }

    Ok(Move {
        piece_id: piece.id.clone(),
        path,
        start_tick: 0, // overwritten by the engine to current_tick + 1
        extra_move: None,
        linked_to: None,
    })
}

fn build_linear_path(from_row: i32, from_col: i32, to_row: i32, to_col: i32) -> Vec<(f64, f64)> {
    let row_step = (to_row - from_row).signum();
    let col_step = (to_col - from_col).signum();
    let steps = (to_row - from_row).abs().max((to_col - from_col).abs());
    let mut path = Vec::with_capacity(steps as usize + 1);
    for i in 0..=steps {
        path.push(((from_row + row_step * i) as f64, (from_col + col_step * i) as f64));
    }
    path
}

fn compute_bishop_path(piece: &Piece, to_row: i32, to_col: i32) -> GeometryResult {
    let (from_row, from_col) = piece.grid_position();
    let row_diff = to_row - from_row;
    let col_diff = to_col - from_col;
    if row_diff == 0 || row_diff.abs() != col_diff.abs() {
        return Err(GeometryError::NoSuchVector);
    }
    Ok(Move {
        piece_id: piece.id.clone(),
        path: build_linear_path(from_row, from_col, to_row, to_col),
        start_tick: 0,
        extra_move: None,
        linked_to: None,
    })
}

fn compute_rook_path(piece: &Piece, to_row: i32, to_col: i32) -> GeometryResult {
    let (from_row, from_col) = piece.grid_position();
    let row_diff = to_row - from_row;
    let col_diff = to_col - from_col;
    if (row_diff == 0) == (col_diff == 0) {
        return Err(GeometryError::NoSuchVector);
    }
    Ok(Move {
        piece_id: piece.id.clone(),
        path: build_linear_path(from_row, from_col, to_row, to_col),
        start_tick: 0,
        extra_move: None,
        linked_to: None,
    })
}

fn compute_queen_path(piece: &Piece, to_row: i32, to_col: i32) -> GeometryResult {
    compute_bishop_path(piece, to_row, to_col).or_else(|_| compute_rook_path(piece, to_row, to_col))
}

fn compute_king_path(piece: &Piece, to_row: i32, to_col: i32) -> GeometryResult {
    let (from_row, from_col) = piece.grid_position();
    let row_diff = (to_row - from_row).abs();
    let col_diff = (to_col - from_col).abs();
    if row_diff > 1 || col_diff > 1 {
        return Err(GeometryError::NoSuchVector);
    }
    Ok(Move {
        piece_id: piece.id.clone(),
        path: vec![(from_row as f64, from_col as f64), (to_row as f64, to_col as f64)],
        start_tick: 0,
        extra_move: None,
        linked_to: None,
    })
}

fn compute_knight_path(piece: &Piece, to_row: i32, to_col: i32) -> GeometryResult {
    let (from_row, from_col) = piece.grid_position();
    let row_diff = (to_row - from_row).abs();
    let col_diff = (to_col - from_col).abs();
    if !((row_diff == 2 && col_diff == 1) || (row_diff == 1 && col_diff == 2)) {
        return Err(GeometryError::NoSuchVector);
    }
    let mid_row = (from_row as f64 + to_row as f64) / 2.0;
    let mid_col = (from_col as f64 + to_col as f64) / 2.0;
    Ok(Move {
        piece_id: piece.id.clone(),
        path: vec![
            (from_row as f64, from_col as f64),
            (mid_row, mid_col),
            (to_row as f64, to_col as f64),
        ],
        start_tick: 0,
        extra_move: None,
        linked_to: None,
    })
}

fn compute_pawn_path(
    state: &GameState,
    piece: &Piece,
    orientation: Orientation,
    to_row: i32,
    to_col: i32,
) -> Result<Vec<(f64, f64)>, GeometryError> {
    let (from_row, from_col) = piece.grid_position();
    let (fwd_row, fwd_col) = orientation.forward;

    let one_step_row = from_row + fwd_row;
    let one_step_col = from_col + fwd_col;

    // Straight moves (forward 1, or forward 2 from the home rank): the
    // lateral coordinate is unchanged, longitudinal moves along `forward`.
    let is_home_rank = match orientation.axis {
        Axis::Row => from_row == orientation.pawn_home_axis,
        Axis::Col => from_col == orientation.pawn_home_axis,
    };

    if to_row == one_step_row && to_col == one_step_col {
        if state.board.piece_at(to_row, to_col).is_some() {
            return Err(GeometryError::Blocked);
        }
        return Ok(vec![(from_row as f64, from_col as f64), (to_row as f64, to_col as f64)]);
    }

    if is_home_rank {
        let two_step_row = from_row + 2 * fwd_row;
        let two_step_col = from_col + 2 * fwd_col;
        if to_row == two_step_row && to_col == two_step_col {
            if state.board.piece_at(one_step_row, one_step_col).is_some()
                || state.board.piece_at(to_row, to_col).is_some()
            {
                return Err(GeometryError::Blocked);
            }
            return Ok(vec![
                (from_row as f64, from_col as f64),
                (one_step_row as f64, one_step_col as f64),
                (to_row as f64, to_col as f64),
            ]);
        }
    }

    // Diagonal capture: exactly one lateral step plus one forward step.
    let diag_candidates = [
        (from_row + fwd_row + fwd_col, from_col + fwd_col + fwd_row),
        (from_row + fwd_row - fwd_col, from_col + fwd_col - fwd_row),
    ];
    if diag_candidates.contains(&(to_row, to_col)) {
        match state.board.piece_at(to_row, to_col) {
            Some(target) if target.player != piece.player && !state.is_moving(&target.id) => {
                return Ok(vec![(from_row as f64, from_col as f64), (to_row as f64, to_col as f64)]);
            }
            _ => return Err(GeometryError::PawnDiagonalRequiresCapturableEnemy),
        }
    }

    Err(GeometryError::NoSuchVector)
}

/// Blocking rule for sliding/straight pieces (spec §4.2): every square in
/// the path after the start must not be occupied by an at-rest friendly
/// piece, and must not be the destination of an active friendly move.
/// Enemy-occupied squares never block.
fn is_path_clear(board: &Board, active_moves: &[Move], piece: &Piece, path: &[(f64, f64)]) -> bool {
    for &(r, c) in &path[1..] {
        let row = r.round() as i32;
        let col = c.round() as i32;
        if let Some(occupant) = board.piece_at(row, col) {
            if occupant.player == piece.player {
                return false;
            }
        }
        for mv in active_moves {
            if mv.piece_id == piece.id {
                continue;
            }
            let (end_row, end_col) = mv.end_position();
            if end_row.round() as i32 == row && end_col.round() as i32 == col {
                if let Some(mover) = board.get_piece_by_id(&mv.piece_id) {
                    if mover.player == piece.player {
                        return false;
                    }
                }
            }
        }
    }
    true
}

fn is_knight_destination_valid(
    board: &Board,
    active_moves: &[Move],
    piece: &Piece,
    to_row: i32,
    to_col: i32,
) -> bool {
    if let Some(occupant) = board.piece_at(to_row, to_col) {
        if occupant.player == piece.player {
            return false;
        }
    }
    for mv in active_moves {
        if mv.piece_id == piece.id {
            continue;
        }
        let (end_row, end_col) = mv.end_position();
        if end_row.round() as i32 == to_row && end_col.round() as i32 == to_col {
            if let Some(mover) = board.get_piece_by_id(&mv.piece_id) {
                if mover.player == piece.player {
                    return false;
                }
            }
        }
    }
    true
}

/// Whether a pawn landing on `(to_row, to_col)` should promote (spec §4.2
/// "Promotion"), per its orientation's promotion axis.
pub fn should_promote_pawn(orientation: Orientation, to_row: i32, to_col: i32) -> bool {
    match orientation.axis {
        Axis::Row => to_row == orientation.promotion_axis,
        Axis::Col => to_col == orientation.promotion_axis,
    }
}

/// Attempts to recognize and build a castling move pair (spec §4.2
/// "Castling"). Returns `Some(king_move)` with `extra_move` set to the
/// rook's move when all preconditions hold. `to_row`/`to_col` is the king's
/// requested destination (must be a lateral displacement of exactly two
/// squares along the orientation axis).
pub fn check_castling(state: &GameState, piece: &Piece, to_row: i32, to_col: i32) -> Option<Move> {
    if piece.kind != PieceKind::King || piece.moved {
        return None;
    }
    let orientation = state.orientation(piece.player);
    let (from_row, from_col) = piece.grid_position();

    match orientation.axis {
        Axis::Row => {
            if to_row != from_row || (to_col - from_col).abs() != 2 {
                return None;
            }
            check_castling_horizontal(state, piece, from_row, from_col, to_col)
        }
        Axis::Col => {
            if to_col != from_col || (to_row - from_row).abs() != 2 {
                return None;
            }
            check_castling_vertical(state, piece, from_row, from_col, to_row)
        }
    }
}

fn rook_not_moved_and_idle(state: &GameState, rook: &Piece) -> bool {
    rook.kind == PieceKind::Rook
        && !rook.moved
        && !state.is_moving(&rook.id)
        && !state.is_on_cooldown(&rook.id)
}

fn check_castling_horizontal(
    state: &GameState,
    king: &Piece,
    row: i32,
    from_col: i32,
    to_col: i32,
) -> Option<Move> {
    let board = &state.board;
    let going_right = to_col > from_col;
    let rook_col = if going_right { board.width - 1 } else { 0 };
    let rook = board.piece_at(row, rook_col)?;
    if !rook_not_moved_and_idle(state, rook) {
        return None;
    }

    let step = if going_right { 1 } else { -1 };
    let mut col = from_col + step;
    while col != rook_col {
        if square_occupied_or_targeted(state, row, col, king) {
            return None;
        }
        col += step;
    }
    if square_occupied_or_targeted(state, row, to_col, king) {
        return None;
    }

    let rook_landing_col = to_col - step;
    Some(Move {
        piece_id: king.id.clone(),
        path: vec![(row as f64, from_col as f64), (row as f64, to_col as f64)],
        start_tick: 0,
        linked_to: None,
        extra_move: Some(Box::new(Move {
            piece_id: rook.id.clone(),
            path: vec![(row as f64, rook_col as f64), (row as f64, rook_landing_col as f64)],
            start_tick: 0,
            extra_move: None,
            linked_to: Some(king.id.clone()),
        })),
    })
}

fn check_castling_vertical(
    state: &GameState,
    king: &Piece,
    from_row: i32,
    col: i32,
    to_row: i32,
) -> Option<Move> {
    let board = &state.board;
    let going_down = to_row > from_row;
    let rook_row = if going_down { board.height - 1 } else { 0 };
    let rook = board.piece_at(rook_row, col)?;
    if !rook_not_moved_and_idle(state, rook) {
        return None;
    }

    let step = if going_down { 1 } else { -1 };
    let mut row = from_row + step;
    while row != rook_row {
        if square_occupied_or_targeted(state, row, col, king) {
            return None;
        }
        row += step;
    }
    if square_occupied_or_targeted(state, to_row, col, king) {
        return None;
    }

    let rook_landing_row = to_row - step;
    Some(Move {
        piece_id: king.id.clone(),
        path: vec![(from_row as f64, col as f64), (to_row as f64, col as f64)],
        start_tick: 0,
        linked_to: None,
        extra_move: Some(Box::new(Move {
            piece_id: rook.id.clone(),
            path: vec![(rook_row as f64, col as f64), (rook_landing_row as f64, col as f64)],
            start_tick: 0,
            extra_move: None,
            linked_to: Some(king.id.clone()),
        })),
    })
}

fn square_occupied_or_targeted(state: &GameState, row: i32, col: i32, king: &Piece) -> bool {
    if state.board.piece_at(row, col).is_some() {
        return true;
    }
    state.active_moves.iter().any(|mv| {
        if mv.piece_id == king.id {
            return false;
        }
        let (end_row, end_col) = mv.end_position();
        end_row.round() as i32 == row && end_col.round() as i32 == col
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::{HashMap, HashSet};

    fn empty_state(board_type: BoardType) -> GameState {
        GameState {
            game_id: "t".into(),
            board: Board::create(board_type),
            speed: Speed::Standard,
            tick_rate_hz: 30,
            players: HashMap::new(),
            active_moves: vec![],
            cooldowns: vec![],
            current_tick: 0,
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
    fn rook_path_is_rejected_off_axis() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let rook = Piece::new(PieceKind::Rook, 1, 4, 0);
        state.board.pieces.push(rook.clone());
        let result = compute_move_path(&state, &rook, 5, 1);
        assert_eq!(result, Err(GeometryError::NoSuchVector));
    }

    #[test]
    fn rook_path_along_rank_is_linear() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let rook = Piece::new(PieceKind::Rook, 1, 4, 0);
        state.board.pieces.push(rook.clone());
        let mv = compute_move_path(&state, &rook, 4, 7).unwrap();
        assert_eq!(mv.path.len(), 8);
        assert_eq!(mv.path[0], (4.0, 0.0));
        assert_eq!(mv.path[7], (4.0, 7.0));
    }

    #[test]
    fn knight_path_has_half_integer_midpoint() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let knight = Piece::new(PieceKind::Knight, 1, 0, 1);
        state.board.pieces.push(knight.clone());
        let mv = compute_move_path(&state, &knight, 2, 2).unwrap();
        assert_eq!(mv.path, vec![(0.0, 1.0), (1.0, 1.5), (2.0, 2.0)]);
    }

    #[test]
    fn pawn_cannot_move_diagonally_without_enemy() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let pawn = Piece::new(PieceKind::Pawn, 1, 6, 4);
        state.board.pieces.push(pawn.clone());
        let result = compute_move_path(&state, &pawn, 5, 5);
        assert_eq!(result, Err(GeometryError::PawnDiagonalRequiresCapturableEnemy));
    }

    #[test]
    fn pawn_double_step_only_from_home_rank() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let pawn = Piece::new(PieceKind::Pawn, 1, 5, 4);
        state.board.pieces.push(pawn.clone());
        let result = compute_move_path(&state, &pawn, 3, 4);
        assert_eq!(result, Err(GeometryError::NoSuchVector));
    }

    #[test]
    fn castling_builds_linked_rook_move() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let king = Piece::new(PieceKind::King, 1, 7, 4);
        let rook = Piece::new(PieceKind::Rook, 1, 7, 7);
        state.board.pieces.push(king.clone());
        state.board.pieces.push(rook);
        let mv = check_castling(&state, &king, 7, 6).expect("should allow castling");
        assert_eq!(mv.path, vec![(7.0, 4.0), (7.0, 6.0)]);
        let rook_move = mv.extra_move.expect("rook move should be present");
        assert_eq!(rook_move.path, vec![(7.0, 7.0), (7.0, 5.0)]);
    }

    #[test]
    fn castling_blocked_by_intervening_piece() {
        let mut state = empty_state(BoardType::Standard);
        state.board.pieces.clear();
        let king = Piece::new(PieceKind::King, 1, 7, 4);
        let rook = Piece::new(PieceKind::Rook, 1, 7, 7);
        let bishop = Piece::new(PieceKind::Bishop, 1, 7, 5);
        state.board.pieces.push(king.clone());
        state.board.pieces.push(rook);
        state.board.pieces.push(bishop);
        assert!(check_castling(&state, &king, 7, 6).is_none());
    }

    #[test]
    fn promotion_axis_is_orientation_driven() {
        let o = standard_orientation(1);
        assert!(should_promote_pawn(o, 0, 4));
        assert!(!should_promote_pawn(o, 1, 4));
    }
}
