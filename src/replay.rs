//! Replay record/engine (spec component: Replay record/engine, §4.5).
//!
//! Recording is a side effect of `apply_move` (see `engine.rs`). This module
//! assembles a `Replay` from a finished `GameState` and reconstructs
//! historical state from a recorded move list, with O(1) amortized
//! sequential advancement (spec §4.5). Grounded in
//! `kfchess/game/replay.py` and `kfchess/replay/session.py`; the caching
//! behavior is a deliberate improvement over the original's
//! `ReplayEngine.get_state_at_tick`, which always rebuilds from tick 0 (see
//! DESIGN.md).

use serde::{Deserialize, Serialize};

use crate::engine::{self, GameEvent};
use crate::model::{BoardType, GameState, ReplayMove, Speed};

pub const REPLAY_FORMAT_VERSION: u32 = 2;

/// An immutable, complete record of one finished game (spec §3 "Replay").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    pub version: u32,
    pub game_id: String,
    pub speed: Speed,
    pub board_type: BoardType,
    pub players: std::collections::HashMap<u8, String>,
    pub moves: Vec<ReplayMove>,
    pub total_ticks: u64,
    pub winner: Option<u8>,
    pub win_reason: Option<crate::model::WinReason>,
    pub tick_rate_hz: u32,
    pub created_at: i64,
}

impl Replay {
    /// Assembles a replay from a finished game's state (spec §4.5: "On
    /// termination, a Replay is assembled from ... and handed to the
    /// persistence port").
    pub fn from_game_state(state: &GameState, created_at: i64) -> Self {
        Replay {
            version: REPLAY_FORMAT_VERSION,
            game_id: state.game_id.clone(),
            speed: state.speed,
            board_type: state.board.board_type,
            players: state.players.clone(),
            moves: state.replay_moves.clone(),
            total_ticks: state.current_tick,
            winner: state.winner,
            win_reason: state.win_reason,
            tick_rate_hz: state.tick_rate_hz,
            created_at,
        }
    }

    pub fn moves_at_tick(&self, tick: u64) -> impl Iterator<Item = &ReplayMove> {
        self.moves.iter().filter(move |m| m.tick == tick)
    }
}

/// Legacy (version 1) replay shape: standard board only, no winner/win
/// reason, `pieceId`/`row`/`col` field names (spec §6 "Replay file format":
/// "version 1 (legacy, ...) is read-only and converted on load").
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayV1 {
    pub game_id: String,
    pub speed: Speed,
    pub players: std::collections::HashMap<u8, String>,
    pub moves: Vec<ReplayMoveV1>,
    pub total_ticks: u64,
    pub tick_rate_hz: u32,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayMoveV1 {
    pub tick: u64,
    #[serde(rename = "pieceId")]
    pub piece_id: String,
    pub row: f64,
    pub col: f64,
    pub player: u8,
}

pub fn upgrade_v1(old: ReplayV1) -> Replay {
    Replay {
        version: REPLAY_FORMAT_VERSION,
        game_id: old.game_id,
        speed: old.speed,
        board_type: BoardType::Standard,
        players: old.players,
        moves: old
            .moves
            .into_iter()
            .map(|m| ReplayMove { tick: m.tick, piece_id: m.piece_id, to_row: m.row, to_col: m.col, player: m.player })
            .collect(),
        total_ticks: old.total_ticks,
        winner: None,
        win_reason: None,
        tick_rate_hz: old.tick_rate_hz,
        created_at: old.created_at,
    }
}

/// Deterministic reconstruction of any historical tick of a recorded game
/// (spec §4.5). Maintains a single cached `(tick, state)` pair so sequential
/// advancement (the common case — a client stepping or playing a replay
/// forward) costs O(1) amortized instead of replaying from the start every
/// call.
pub struct ReplayEngine {
    replay: Replay,
    cache: Option<(u64, GameState)>,
}

impl ReplayEngine {
    pub fn new(replay: Replay) -> Self {
        ReplayEngine { replay, cache: None }
    }

    pub fn total_ticks(&self) -> u64 {
        self.replay.total_ticks
    }

    pub fn replay(&self) -> &Replay {
        &self.replay
    }

    /// A fresh `GameState` forced to `Playing` at tick 0 (spec §4.5
    /// `get_initial_state`).
    pub fn initial_state(&mut self) -> GameState {
        self.state_at_tick(0)
    }

    fn fresh_playing_state(&self) -> GameState {
        let mut state = engine::create_game(
            self.replay.game_id.clone(),
            self.replay.speed,
            self.replay.tick_rate_hz,
            self.replay.board_type,
            self.replay.players.clone(),
        );
        state.status = crate::model::GameStatus::Playing;
        state.started_at = Some(self.replay.created_at);
        for &slot in self.replay.players.keys() {
            state.ready_players.insert(slot);
        }
        state
    }

    /// Returns the reconstructed state at `target` (spec §4.5
    /// `get_state_at_tick`): cache hit returns immediately; `target ==
    /// cached + 1` advances the cache by exactly one tick; anything else
    /// rebuilds from tick 0.
    pub fn state_at_tick(&mut self, target: u64) -> GameState {
        if let Some((cached_tick, cached_state)) = &self.cache {
            if *cached_tick == target {
                return cached_state.clone();
            }
            if target == *cached_tick + 1 {
                let mut state = cached_state.clone();
                self.advance_one_tick(&mut state);
                let result = state.clone();
                self.cache = Some((target, state));
                return result;
            }
        }

        let mut state = self.fresh_playing_state();
        let mut current = 0u64;
        while current < target {
            self.advance_one_tick(&mut state);
            current += 1;
        }
        self.cache = Some((target, state.clone()));
        state
    }

    /// Applies any replay moves recorded at the state's current tick
    /// (re-validated through `validate_move`; failures are skipped, not
    /// fatal — spec §4.5 "Re-validation during playback is mandatory"), then
    /// runs one `tick()`.
    fn advance_one_tick(&self, state: &mut GameState) -> Vec<GameEvent> {
        let due: Vec<ReplayMove> = self.replay.moves_at_tick(state.current_tick).cloned().collect();
        for recorded in due {
            match engine::validate_move(state, recorded.player, &recorded.piece_id, recorded.to_row.round() as i32, recorded.to_col.round() as i32) {
                Ok(mv) => {
                    engine::apply_move(state, recorded.player, mv);
                }
                Err(err) => {
                    log::warn!(
                        "replay {}: move at tick {} for piece {} failed re-validation ({err}), skipping",
                        self.replay.game_id,
                        recorded.tick,
                        recorded.piece_id
                    );
                }
            }
        }
        engine::tick(state, self.replay.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::HashMap;

    fn simple_replay() -> Replay {
        let mut players = HashMap::new();
        players.insert(1, "u:a".to_string());
        players.insert(2, "u:b".to_string());
        Replay {
            version: REPLAY_FORMAT_VERSION,
            game_id: "g1".into(),
            speed: Speed::Standard,
            board_type: BoardType::Standard,
            players,
            moves: vec![ReplayMove { tick: 0, piece_id: "P:1:6:4".into(), to_row: 5.0, to_col: 4.0, player: 1 }],
            total_ticks: 40,
            winner: None,
            win_reason: None,
            tick_rate_hz: 30,
            created_at: 0,
        }
    }

    #[test]
    fn sequential_and_direct_reconstruction_agree() {
        let mut sequential = ReplayEngine::new(simple_replay());
        let mut last = None;
        for t in 0..=35 {
            last = Some(sequential.state_at_tick(t));
        }
        let sequential_final = last.unwrap();

        let mut direct = ReplayEngine::new(simple_replay());
        let direct_final = direct.state_at_tick(35);

        assert_eq!(sequential_final.current_tick, direct_final.current_tick);
        assert_eq!(
            sequential_final.board.get_piece_by_id("P:1:6:4").unwrap().row,
            direct_final.board.get_piece_by_id("P:1:6:4").unwrap().row
        );
    }

    #[test]
    fn cache_hit_returns_identical_state() {
        let mut engine = ReplayEngine::new(simple_replay());
        let a = engine.state_at_tick(10);
        let b = engine.state_at_tick(10);
        assert_eq!(a.current_tick, b.current_tick);
    }

    #[test]
    fn v1_upgrade_defaults_board_type_and_winner() {
        let v1 = ReplayV1 {
            game_id: "old".into(),
            speed: Speed::Standard,
            players: HashMap::from([(1, "u:a".to_string()), (2, "u:b".to_string())]),
            moves: vec![ReplayMoveV1 { tick: 0, piece_id: "P:1:6:4".into(), row: 5.0, col: 4.0, player: 1 }],
            total_ticks: 10,
            tick_rate_hz: 30,
            created_at: 0,
        };
        let upgraded = upgrade_v1(v1);
        assert_eq!(upgraded.board_type, BoardType::Standard);
        assert_eq!(upgraded.winner, None);
        assert_eq!(upgraded.moves[0].piece_id, "P:1:6:4");
    }
}
