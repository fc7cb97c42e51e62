//! Wire JSON protocol for lobby and game WebSocket clients (spec component:
//! Wire protocol, §6). Tagged enums keep the shape close to `engine::GameEvent`
//! and the original's `ws/*.py` message dictionaries, grounded in the
//! teacher's `WsClientMessage`/event-envelope convention (`ws.rs`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::GameEvent;
use crate::lobby::{Lobby, LobbyError};
use crate::model::{BoardType, GameStatus, Speed};

/// Messages a client sends on the lobby WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LobbyClientMessage {
    CreateLobby { board_type: BoardType, speed: Speed, is_public: bool },
    JoinLobby { code: String },
    SetReady { ready: bool },
    UpdateSettings { board_type: Option<BoardType>, speed: Option<Speed> },
    AddAi { bot_name: String },
    RemoveAi { slot: u8 },
    Kick { slot: u8 },
    LeaveLobby,
    StartGame,
    Ping,
}

/// Messages a client sends on the game WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GameClientMessage {
    SubmitMove { piece_id: String, to_row: i32, to_col: i32 },
    Ready,
    Resign,
    Ping,
}

/// A server→client response or push, always JSON-tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LobbyState { lobby: LobbyView },
    LobbyError { code: String, message: String },
    GameEvent { game_id: String, event: GameEvent },
    GameSnapshot { game_id: String, snapshot: GameSnapshot },
    GameError { code: String, message: String },
    /// Sent privately to exactly one connection — the occupant of the slot
    /// `key` authorizes — right after `start_game` succeeds; never
    /// broadcast to the rest of the lobby (spec §4.7 "mint fresh per-slot
    /// keys ... return (game_id, {slot -> key})").
    GameStarted { game_id: String, key: String },
    Pong,
}

/// Client-facing rendering of a `Lobby` (spec §4.7: lobby state pushed to
/// every connected member on any change).
#[derive(Debug, Clone, Serialize)]
pub struct LobbyView {
    pub code: String,
    pub host_identity: String,
    pub board_type: BoardType,
    pub speed: Speed,
    pub is_public: bool,
    pub status: String,
    pub players: Vec<LobbyPlayerView>,
    pub game_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LobbyPlayerView {
    pub slot: u8,
    pub identity: String,
    pub is_ready: bool,
    pub is_ai: bool,
    pub is_connected: bool,
}

impl From<&Lobby> for LobbyView {
    fn from(lobby: &Lobby) -> Self {
        LobbyView {
            code: lobby.code.clone(),
            host_identity: lobby.host_identity.clone(),
            board_type: lobby.settings.board_type,
            speed: lobby.settings.speed,
            is_public: lobby.settings.is_public,
            status: format!("{:?}", lobby.status).to_lowercase(),
            players: lobby
                .players
                .iter()
                .map(|p| LobbyPlayerView {
                    slot: p.slot,
                    identity: p.identity.clone(),
                    is_ready: p.is_ready,
                    is_ai: crate::model::is_ai_identity(&p.identity),
                    is_connected: p.is_connected,
                })
                .collect(),
            game_id: lobby.game_id.clone(),
        }
    }
}

impl From<LobbyError> for ServerMessage {
    fn from(e: LobbyError) -> Self {
        ServerMessage::LobbyError { code: e.code().to_string(), message: e.to_string() }
    }
}

/// A point-in-time rendering of `GameState` for the client (spec §6 "state
/// snapshot"). Positions are always the collision resolver's interpolated
/// real-valued positions, never grid-snapped (spec §9).
#[derive(Debug, Clone, Serialize)]
pub struct GameSnapshot {
    pub current_tick: u64,
    pub status: GameStatus,
    pub players: HashMap<u8, String>,
    pub pieces: Vec<PieceView>,
    pub cooldowns: Vec<CooldownView>,
    pub winner: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PieceView {
    pub id: String,
    pub kind: String,
    pub player: u8,
    pub row: f64,
    pub col: f64,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CooldownView {
    pub piece_id: String,
    pub remaining_ticks: u64,
}

/// Builds a `GameSnapshot` from authoritative state, resolving every piece's
/// *current* real-valued position through the collision resolver's
/// interpolation math rather than its resting grid square (spec §9: "wire
/// snapshots must always carry the interpolated position while a piece is
/// moving").
pub fn build_snapshot(state: &crate::model::GameState) -> GameSnapshot {
    let ticks_per_square = state.config().ticks_per_square();
    let pieces = state
        .board
        .active_pieces()
        .map(|piece| {
            let mv = state.active_move_for(&piece.id);
            let (pos, visible) = if piece.kind == crate::model::PieceKind::Knight {
                match crate::collision::knight_position(piece, mv, state.current_tick, ticks_per_square) {
                    Some(p) => (p, true),
                    None => ((piece.row, piece.col), false),
                }
            } else {
                (crate::collision::interpolated_position(piece, mv, state.current_tick, ticks_per_square), true)
            };
            PieceView {
                id: piece.id.clone(),
                kind: piece.kind.code().to_string(),
                player: piece.player,
                row: pos.0,
                col: pos.1,
                visible,
            }
        })
        .collect();

    let cooldowns = state
        .cooldowns
        .iter()
        .filter(|c| c.is_active(state.current_tick))
        .map(|c| CooldownView {
            piece_id: c.piece_id.clone(),
            remaining_ticks: c.start_tick + c.duration - state.current_tick,
        })
        .collect();

    GameSnapshot {
        current_tick: state.current_tick,
        status: state.status,
        players: state.players.clone(),
        pieces,
        cooldowns,
        winner: state.winner,
    }
}
