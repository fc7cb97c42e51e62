//! Simulation engine (spec component: Simulation engine, §4.4).
//!
//! The `tick()` and `apply_move()` transitions, plus `set_ready`/
//! `validate_move`. Grounded in `kfchess/game/engine.py`; the teacher's
//! `game.rs` contributes the "engine functions take `&mut GameState` and
//! return events/errors as values, never unwind" idiom, generalized here
//! from FIDE turn alternation to tick-driven simultaneous motion.

use serde::{Deserialize, Serialize};

use crate::collision::detect_collisions;
use crate::model::{is_ai_identity, Board, GameState, GameStatus, Move, PieceKind, ReplayMove, WinReason};
use crate::movegen::{check_castling, compute_move_path, should_promote_pawn, GeometryError};

/// One observable thing that happened during a `tick()` or `apply_move()`
/// call (spec §4.4: "events emitted within a single tick carry that tick
/// number"). Grounded in `engine.py`'s `GameEventType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    MoveStarted { piece_id: String, path: Vec<(f64, f64)>, start_tick: u64 },
    MoveCompleted { piece_id: String },
    Capture { capturing_piece_id: String, captured_piece_id: String },
    Promotion { piece_id: String },
    CooldownStarted { piece_id: String, duration: u64 },
    CooldownEnded { piece_id: String },
    GameStarted,
    GameOver { winner: Option<u8>, win_reason: WinReason },
}

/// Domain-refusal / state-guard error taxonomy for game-session operations
/// (spec §7). Carries a stable machine code, mirroring the original's
/// `LobbyError(code, message)` shape applied to the game side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    NotPlaying,
    PieceNotFound,
    NotYourPiece,
    PieceCaptured,
    AlreadyMoving,
    OnCooldown,
    IllegalGeometry(String),
    Invariant(String),
}

impl GameError {
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotPlaying => "not_playing",
            GameError::PieceNotFound => "piece_not_found",
            GameError::NotYourPiece => "not_your_piece",
            GameError::PieceCaptured => "piece_captured",
            GameError::AlreadyMoving => "already_moving",
            GameError::OnCooldown => "on_cooldown",
            GameError::IllegalGeometry(_) => "illegal_geometry",
            GameError::Invariant(_) => "invariant_violation",
        }
    }
}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameError::IllegalGeometry(reason) => write!(f, "{}: {reason}", self.code()),
            GameError::Invariant(reason) => write!(f, "{}: {reason}", self.code()),
            other => write!(f, "{}", other.code()),
        }
    }
}

impl std::error::Error for GameError {}

impl From<GeometryError> for GameError {
    fn from(e: GeometryError) -> Self {
        GameError::IllegalGeometry(format!("{e:?}"))
    }
}

/// Builds a fresh `GameState` in `Waiting` status for `player_count` slots on
/// the given board/speed, with slot `n` occupied by `players[&n]`.
pub fn create_game(
    game_id: String,
    speed: crate::model::Speed,
    tick_rate_hz: u32,
    board_type: crate::model::BoardType,
    players: std::collections::HashMap<u8, String>,
) -> GameState {
    GameState {
        game_id,
        board: Board::create(board_type),
        speed,
        tick_rate_hz,
        players,
        active_moves: Vec::new(),
        cooldowns: Vec::new(),
        current_tick: 0,
        status: GameStatus::Waiting,
        started_at: None,
        finished_at: None,
        winner: None,
        win_reason: None,
        last_move_tick: 0,
        last_capture_tick: 0,
        replay_moves: Vec::new(),
        ready_players: std::collections::HashSet::new(),
    }
}

/// Marks `slot` ready; AI/bot slots auto-ready the first time readiness is
/// touched at all. Transitions `Waiting -> Playing` once every slot is ready
/// and at least two slots exist (spec §4.4 `set_ready`). Idempotent once
/// already `Playing`.
pub fn set_ready(state: &mut GameState, slot: u8, now: i64) -> Vec<GameEvent> {
    if state.status == GameStatus::Playing {
        return Vec::new();
    }
    state.ready_players.insert(slot);

    for (&player_slot, identity) in state.players.clone().iter() {
        if is_ai_identity(identity) {
            state.ready_players.insert(player_slot);
        }
    }

    if state.players.len() >= 2 && state.players.keys().all(|s| state.ready_players.contains(s)) {
        state.status = GameStatus::Playing;
        state.started_at = Some(now);
        state.current_tick = 0;
        state.last_move_tick = 0;
        state.last_capture_tick = 0;
        return vec![GameEvent::GameStarted];
    }
    Vec::new()
}

/// Validates a move request without mutating state (spec §4.4
/// `validate_move`). `start_tick` on the returned `Move` (and its
/// `extra_move`, if any) is `current_tick + 1`.
pub fn validate_move(state: &GameState, player: u8, piece_id: &str, to_row: i32, to_col: i32) -> Result<Move, GameError> {
    if !state.is_playing() {
        return Err(GameError::NotPlaying);
    }
    let piece = state.board.get_piece_by_id(piece_id).ok_or(GameError::PieceNotFound)?;
    if piece.player != player {
        return Err(GameError::NotYourPiece);
    }
    if piece.captured {
        return Err(GameError::PieceCaptured);
    }
    if state.is_moving(piece_id) {
        return Err(GameError::AlreadyMoving);
    }
    if state.is_on_cooldown(piece_id) {
        return Err(GameError::OnCooldown);
    }

    let next_tick = state.current_tick + 1;

    if let Some(mut king_move) = check_castling(state, piece, to_row, to_col) {
        king_move.start_tick = next_tick;
        if let Some(rook_move) = king_move.extra_move.as_mut() {
            rook_move.start_tick = next_tick;
        }
        return Ok(king_move);
    }

    let mut mv = compute_move_path(state, piece, to_row, to_col)?;
    mv.start_tick = next_tick;
    Ok(mv)
}

/// Appends `mv` (and its `extra_move`, if present) to `active_moves`,
/// records one `ReplayMove` per sub-move at the *current* tick, and returns
/// the `MoveStarted` events (spec §4.4 `apply_move`).
pub fn apply_move(state: &mut GameState, player: u8, mv: Move) -> Vec<GameEvent> {
    let mut events = Vec::new();
    state.last_move_tick = state.current_tick;

    let extra = mv.extra_move.clone();

    record_sub_move(state, &mv, player, &mut events);
    state.active_moves.push(strip_extra(mv));

    if let Some(extra) = extra {
        record_sub_move(state, &extra, player, &mut events);
        state.active_moves.push(*extra);
    }

    events
}

fn strip_extra(mut mv: Move) -> Move {
    mv.extra_move = None;
    mv
}

fn record_sub_move(state: &mut GameState, mv: &Move, player: u8, events: &mut Vec<GameEvent>) {
    let (to_row, to_col) = mv.end_position();
    state.replay_moves.push(ReplayMove {
        tick: state.current_tick,
        piece_id: mv.piece_id.clone(),
        to_row,
        to_col,
        player,
    });
    events.push(GameEvent::MoveStarted {
        piece_id: mv.piece_id.clone(),
        path: mv.path.clone(),
        start_tick: mv.start_tick,
    });
}

/// The central state transition (spec §4.4 `tick`). Runs only while
/// `Playing`; advances `current_tick` by exactly one and then, in order:
/// collisions, move completion, promotion, cooldown expiry, terminal check.
pub fn tick(state: &mut GameState, now: i64) -> Vec<GameEvent> {
    if state.status != GameStatus::Playing {
        return Vec::new();
    }

    state.current_tick += 1;
    let mut events = Vec::new();

    apply_collisions(state, &mut events);
    complete_moves_and_promote(state, &mut events);
    expire_cooldowns(state, &mut events);
    check_terminal(state, now, &mut events);

    events
}

fn apply_collisions(state: &mut GameState, events: &mut Vec<GameEvent>) {
    let captures = detect_collisions(state);
    for capture in captures {
        if let Some(loser) = state.board.get_piece_by_id_mut(&capture.captured_piece_id) {
            loser.captured = true;
        }
        state.last_capture_tick = state.current_tick;

        // Remove the loser's own active move, plus any move still linked to
        // it via `linked_to` (a castling rook whose king was just captured,
        // spec §9 "Castling atomicity" — the link survives even though the
        // pair was unlinked into two independent `active_moves` entries).
        state.active_moves.retain(|m| {
            m.piece_id != capture.captured_piece_id && m.linked_to.as_deref() != Some(capture.captured_piece_id.as_str())
        });
        state.cooldowns.retain(|c| c.piece_id != capture.captured_piece_id);

        events.push(GameEvent::Capture {
            capturing_piece_id: capture.capturing_piece_id.unwrap_or_default(),
            captured_piece_id: capture.captured_piece_id,
        });
    }
}

fn complete_moves_and_promote(state: &mut GameState, events: &mut Vec<GameEvent>) {
    let ticks_per_square = state.config().ticks_per_square();
    let cooldown_ticks = state.config().cooldown_ticks();
    let current_tick = state.current_tick;

    let mut completed = Vec::new();
    let mut still_active = Vec::new();
    for mv in state.active_moves.drain(..) {
        let total_ticks = mv.num_squares() as u64 * ticks_per_square;
        if current_tick - mv.start_tick >= total_ticks {
            completed.push(mv);
        } else {
            still_active.push(mv);
        }
    }
    state.active_moves = still_active;

    for mv in completed {
        let Some(piece) = state.board.get_piece_by_id_mut(&mv.piece_id) else {
            continue;
        };
        if piece.captured {
            continue;
        }
        let (end_row, end_col) = mv.end_position();
        piece.row = end_row;
        piece.col = end_col;
        piece.moved = true;
        let piece_id = piece.id.clone();
        let player = piece.player;
        let kind = piece.kind;

        state.cooldowns.push(crate::model::Cooldown {
            piece_id: piece_id.clone(),
            start_tick: current_tick,
            duration: cooldown_ticks,
        });
        events.push(GameEvent::MoveCompleted { piece_id: piece_id.clone() });
        events.push(GameEvent::CooldownStarted { piece_id: piece_id.clone(), duration: cooldown_ticks });

        if kind == PieceKind::Pawn {
            let orientation = crate::model::orientation_for(state.board.board_type, player);
            if should_promote_pawn(orientation, end_row.round() as i32, end_col.round() as i32) {
                if let Some(piece) = state.board.get_piece_by_id_mut(&piece_id) {
                    piece.kind = PieceKind::Queen;
                }
                events.push(GameEvent::Promotion { piece_id });
            }
        }
    }
}

fn expire_cooldowns(state: &mut GameState, events: &mut Vec<GameEvent>) {
    let current_tick = state.current_tick;
    let expired: Vec<String> = state
        .cooldowns
        .iter()
        .filter(|c| !c.is_active(current_tick))
        .map(|c| c.piece_id.clone())
        .collect();
    state.cooldowns.retain(|c| c.is_active(current_tick));
    for piece_id in expired {
        events.push(GameEvent::CooldownEnded { piece_id });
    }
}

fn check_terminal(state: &mut GameState, now: i64, events: &mut Vec<GameEvent>) {
    let players_with_king: Vec<u8> = state
        .players
        .keys()
        .copied()
        .filter(|p| state.board.king(*p).is_some())
        .collect();

    let outcome = if players_with_king.len() == 1 {
        Some((Some(players_with_king[0]), WinReason::KingCaptured))
    } else if players_with_king.is_empty() {
        Some((Some(0), WinReason::Draw))
    } else {
        let cfg = state.config();
        if state.current_tick >= cfg.min_draw_ticks()
            && state.current_tick - state.last_move_tick >= cfg.draw_no_move_ticks()
            && state.current_tick - state.last_capture_tick >= cfg.draw_no_capture_ticks()
        {
            Some((Some(0), WinReason::Draw))
        } else {
            None
        }
    };

    if let Some((winner, reason)) = outcome {
        state.status = GameStatus::Finished;
        state.finished_at = Some(now);
        state.winner = winner;
        state.win_reason = Some(reason);
        events.push(GameEvent::GameOver { winner, win_reason: reason });
    }
}

/// Declares the game `Invalid` (non-rated terminal) after an internal
/// invariant violation (spec §7), without attempting further simulation.
pub fn terminate_invalid(state: &mut GameState, now: i64) -> Vec<GameEvent> {
    state.status = GameStatus::Finished;
    state.finished_at = Some(now);
    state.winner = None;
    state.win_reason = Some(WinReason::Invalid);
    vec![GameEvent::GameOver { winner: None, win_reason: WinReason::Invalid }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::HashMap;

    fn two_player_game(mut board: Board) -> GameState {
        let mut players = HashMap::new();
        players.insert(1, "u:alice".to_string());
        players.insert(2, "u:bob".to_string());
        board.board_type = BoardType::Standard;
        GameState {
            game_id: "g1".into(),
            board,
            speed: Speed::Standard,
            tick_rate_hz: 30,
            players,
            active_moves: vec![],
            cooldowns: vec![],
            current_tick: 0,
            status: GameStatus::Playing,
            started_at: Some(0),
            finished_at: None,
            winner: None,
            win_reason: None,
            last_move_tick: 0,
            last_capture_tick: 0,
            replay_moves: vec![],
            ready_players: [1, 2].into_iter().collect(),
        }
    }

    #[test]
    fn set_ready_starts_game_when_all_ready() {
        let mut state = create_game(
            "g".into(),
            Speed::Standard,
            30,
            BoardType::Standard,
            HashMap::from([(1, "u:a".to_string()), (2, "u:b".to_string())]),
        );
        assert_eq!(state.status, GameStatus::Waiting);
        let events = set_ready(&mut state, 1, 1000);
        assert!(events.is_empty());
        let events = set_ready(&mut state, 2, 1000);
        assert!(matches!(events.as_slice(), [GameEvent::GameStarted]));
        assert_eq!(state.status, GameStatus::Playing);
    }

    #[test]
    fn ai_slot_auto_readies() {
        let mut state = create_game(
            "g".into(),
            Speed::Standard,
            30,
            BoardType::Standard,
            HashMap::from([(1, "u:a".to_string()), (2, "bot:dummy".to_string())]),
        );
        let events = set_ready(&mut state, 1, 1000);
        assert!(matches!(events.as_slice(), [GameEvent::GameStarted]));
    }

    #[test]
    fn simple_capture_scenario() {
        let mut board = Board::create_empty_for_test(BoardType::Standard);
        board.pieces.push(Piece::new(PieceKind::King, 1, 7, 4));
        board.pieces.push(Piece::new(PieceKind::King, 2, 0, 4));
        board.pieces.push(Piece::new(PieceKind::Queen, 1, 4, 0));
        board.pieces.push(Piece::new(PieceKind::Pawn, 2, 4, 3));
        let mut state = two_player_game(board);

        let mv = validate_move(&state, 1, "Q:1:4:0", 4, 3).expect("queen should be able to capture");
        apply_move(&mut state, 1, mv);

        let ticks_per_square = state.config().ticks_per_square();
        let mut captured = false;
        for _ in 0..(3 * ticks_per_square + 2) {
            let events = tick(&mut state, 0);
            if events.iter().any(|e| matches!(e, GameEvent::Capture { .. })) {
                captured = true;
            }
        }
        assert!(captured, "expected a capture event before the move finished");
        assert!(state.board.get_piece_by_id("P:2:4:3").unwrap().captured);
        assert!(state.last_capture_tick > 0);
    }

    #[test]
    fn mutual_destruction_scenario() {
        let mut board = Board::create_empty_for_test(BoardType::Standard);
        board.pieces.push(Piece::new(PieceKind::King, 1, 7, 4));
        board.pieces.push(Piece::new(PieceKind::King, 2, 0, 4));
        board.pieces.push(Piece::new(PieceKind::Rook, 1, 4, 0));
        board.pieces.push(Piece::new(PieceKind::Rook, 2, 4, 7));
        let mut state = two_player_game(board);

        let mv_a = validate_move(&state, 1, "R:1:4:0", 4, 7).unwrap();
        apply_move(&mut state, 1, mv_a);
        let mv_b = validate_move(&state, 2, "R:2:4:7", 4, 0).unwrap();
        apply_move(&mut state, 2, mv_b);

        let ticks_per_square = state.config().ticks_per_square();
        let mut capture_events = 0;
        for _ in 0..(7 * ticks_per_square) {
            let events = tick(&mut state, 0);
            capture_events += events.iter().filter(|e| matches!(e, GameEvent::Capture { .. })).count();
        }
        assert_eq!(capture_events, 2);
        assert!(state.board.get_piece_by_id("R:1:4:0").unwrap().captured);
        assert!(state.board.get_piece_by_id("R:2:4:7").unwrap().captured);
    }

    #[test]
    fn pawn_promotion_scenario() {
        let mut board = Board::create_empty_for_test(BoardType::Standard);
        board.pieces.push(Piece::new(PieceKind::Pawn, 1, 1, 4));
        board.pieces.push(Piece::new(PieceKind::King, 1, 7, 4));
        board.pieces.push(Piece::new(PieceKind::King, 2, 0, 0));
        let mut state = two_player_game(board);

        let mv = validate_move(&state, 1, "P:1:1:4", 0, 4).unwrap();
        apply_move(&mut state, 1, mv);

        let ticks_per_square = state.config().ticks_per_square();
        let mut promoted = false;
        for _ in 0..(ticks_per_square + 1) {
            let events = tick(&mut state, 0);
            if events.iter().any(|e| matches!(e, GameEvent::Promotion { .. })) {
                promoted = true;
            }
        }
        assert!(promoted);
        assert_eq!(state.board.get_piece_by_id("P:1:1:4").unwrap().kind, PieceKind::Queen);
    }

    #[test]
    fn castling_interrupted_scenario() {
        let mut board = Board::create_empty_for_test(BoardType::Standard);
        board.pieces.push(Piece::new(PieceKind::King, 1, 7, 4));
        board.pieces.push(Piece::new(PieceKind::Rook, 1, 7, 7));
        board.pieces.push(Piece::new(PieceKind::King, 2, 0, 4));
        board.pieces.push(Piece::new(PieceKind::Queen, 2, 0, 0));
        let mut state = two_player_game(board);

        let mv = validate_move(&state, 1, "K:1:7:4", 7, 6).expect("castling should be legal");
        assert!(mv.extra_move.is_some());
        let king_start_tick = mv.start_tick;
        apply_move(&mut state, 1, mv);
        assert_eq!(state.active_moves.len(), 2);

        // Player 2's queen crosses the same square at the same start tick, so
        // the cascade calls it mutual destruction and the king dies mid-castle.
        state.active_moves.push(Move {
            piece_id: "Q:2:0:0".into(),
            path: vec![(7.0, 6.0), (7.0, 4.0)],
            start_tick: king_start_tick,
            extra_move: None,
            linked_to: None,
        });

        let ticks_per_square = state.config().ticks_per_square();
        let mut captured_king = false;
        for _ in 0..(ticks_per_square + 1) {
            let events = tick(&mut state, 0);
            if events.iter().any(|e| matches!(e, GameEvent::Capture { captured_piece_id, .. } if captured_piece_id == "K:1:7:4")) {
                captured_king = true;
            }
        }
        assert!(captured_king, "expected the king to be captured mid-castle");
        assert!(
            !state.active_moves.iter().any(|m| m.piece_id == "R:1:7:7"),
            "rook's linked castling move must vanish when the king is captured"
        );
    }

    #[test]
    fn draw_by_inactivity_scenario() {
        let mut state = two_player_game(Board::create_standard());
        let cfg = state.config();
        let threshold = cfg.min_draw_ticks().max(cfg.draw_no_move_ticks()).max(cfg.draw_no_capture_ticks());
        for _ in 0..threshold {
            let events = tick(&mut state, 0);
            if !events.is_empty() {
                break;
            }
        }
        assert_eq!(state.status, GameStatus::Finished);
        assert_eq!(state.winner, Some(0));
        assert_eq!(state.win_reason, Some(WinReason::Draw));
    }
}
