//! AI driver contract (spec component: part of Game session runtime, §4.6).
//!
//! Grounded in `kfchess/ai/base.py`'s `AIPlayer` abstract base. Spec §9's
//! open question records that the source carries two divergent dummy-AI
//! implementations (never-moves vs. probabilistic); the probabilistic
//! variant is the one this spec adopts, so that is what is implemented here.
//! The never-moves variant (`ai/dummy.py` as found) is not ported.

use crate::model::GameState;

/// Contract an AI driver implements for one player slot. Both methods are
/// pure functions of the state they're given (spec §4.6: "Two pure-ish
/// methods").
pub trait AiPlayer: Send + Sync {
    fn should_move(&self, state: &GameState, player: u8, current_tick: u64) -> bool;
    fn get_move(&self, state: &GameState, player: u8) -> Option<(String, i32, i32)>;
}

/// A simple xorshift PRNG so the AI's randomness can be seeded for
/// reproducible tests (spec §9 "Deterministic randomness"), without pulling
/// in an external RNG crate the teacher doesn't already depend on.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Rng(if seed == 0 { 0x9E3779B97F4A7C15 } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = (self.next_u64() as usize) % items.len();
        items.get(idx)
    }
}

/// Moves with a fixed probability each tick, choosing uniformly among legal
/// destinations for an arbitrary uncaptured, unmoving, off-cooldown piece of
/// its player. This is the adopted dummy-AI variant (spec §9).
pub struct DummyAi {
    move_probability: f64,
    rng: std::sync::Mutex<Rng>,
}

impl DummyAi {
    pub fn new(move_probability: f64, seed: u64) -> Self {
        DummyAi { move_probability, rng: std::sync::Mutex::new(Rng::new(seed)) }
    }

    /// Every candidate `(piece_id, to_row, to_col)` reachable, by brute-force
    /// enumeration of board squares, that `validate_move` would currently
    /// accept for `player`. Mirrors the spirit of `engine.py::get_legal_moves`
    /// (which the original also computes by brute force), scoped to one
    /// player's pieces rather than the whole board.
    fn legal_moves_for(&self, state: &GameState, player: u8) -> Vec<(String, i32, i32)> {
        let mut moves = Vec::new();
        let piece_ids: Vec<String> = state
            .board
            .pieces_for_player(player)
            .filter(|p| !state.is_moving(&p.id) && !state.is_on_cooldown(&p.id))
            .map(|p| p.id.clone())
            .collect();

        for piece_id in piece_ids {
            for row in 0..state.board.height {
                for col in 0..state.board.width {
                    if !state.board.square_valid(row, col) {
                        continue;
                    }
                    if crate::engine::validate_move(state, player, &piece_id, row, col).is_ok() {
                        moves.push((piece_id.clone(), row, col));
                    }
                }
            }
        }
        moves
    }
}

impl AiPlayer for DummyAi {
    fn should_move(&self, _state: &GameState, _player: u8, _current_tick: u64) -> bool {
        let mut rng = self.rng.lock().expect("rng mutex poisoned");
        rng.next_f64() < self.move_probability
    }

    fn get_move(&self, state: &GameState, player: u8) -> Option<(String, i32, i32)> {
        let candidates = self.legal_moves_for(state, player);
        let mut rng = self.rng.lock().expect("rng mutex poisoned");
        rng.choose(&candidates).cloned()
    }
}

/// Resolves an opponent spec string (`bot:<name>`, spec §6 "Config") into a
/// driver instance. Unknown names fall back to the dummy driver, matching
/// the original's `GameService._create_ai` "default to dummy for MVP".
pub fn create_ai(_bot_name: &str, seed: u64) -> Box<dyn AiPlayer> {
    Box::new(DummyAi::new(0.02, seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::{HashMap, HashSet};

    fn playing_state() -> GameState {
        let mut players = HashMap::new();
        players.insert(1, "bot:dummy".to_string());
        players.insert(2, "u:human".to_string());
        GameState {
            game_id: "g".into(),
            board: Board::create_standard(),
            speed: Speed::Standard,
            tick_rate_hz: 30,
            players,
            active_moves: vec![],
            cooldowns: vec![],
            current_tick: 5,
            status: GameStatus::Playing,
            started_at: Some(0),
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
    fn dummy_ai_picks_only_from_legal_moves() {
        let state = playing_state();
        let ai = DummyAi::new(1.0, 42);
        let mv = ai.get_move(&state, 1).expect("standard opening has legal moves");
        let result = crate::engine::validate_move(&state, 1, &mv.0, mv.1, mv.2);
        assert!(result.is_ok(), "AI proposed an illegal move: {mv:?}");
    }

    #[test]
    fn should_move_respects_probability_bounds() {
        let state = playing_state();
        let never = DummyAi::new(0.0, 1);
        assert!(!never.should_move(&state, 1, 5));
        let always = DummyAi::new(1.0, 1);
        assert!(always.should_move(&state, 1, 5));
    }
}
