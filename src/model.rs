//! Piece/board model and core game data types (spec component: Piece/Board model, §3 data model).
//!
//! Grounded in `kfchess/game/pieces.py`, `kfchess/game/board.py`, and
//! `kfchess/game/state.py` of the original implementation.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Global tick rate, ticks per second. Single source of truth for all
/// real-time-to-tick conversions (spec §3 "Speed config").
pub const DEFAULT_TICK_RATE_HZ: u32 = 30;

/// Distance, in board squares, within which two pieces of different players
/// collide (spec §4.3).
pub const CAPTURE_DISTANCE: f64 = 0.4;

/// Fraction of a knight's total move duration during which it is airborne
/// (absent from collision, cannot capture) (spec §4.3).
pub const KNIGHT_AIRBORNE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    pub fn code(self) -> &'static str {
        match self {
            PieceKind::Pawn => "P",
            PieceKind::Knight => "N",
            PieceKind::Bishop => "B",
            PieceKind::Rook => "R",
            PieceKind::Queen => "Q",
            PieceKind::King => "K",
        }
    }
}

/// Board layout variant (spec §3 "Board").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardType {
    Standard,
    FourPlayer,
}

/// A player's forward direction and rank/axis conventions on a four-player
/// board. Standard boards only ever use players 1 and 2 with implicit
/// north/south orientation; four-player boards use all four.
///
/// This is the *only* place piece-direction knowledge lives (spec §4.1);
/// movement and promotion code reads these fields and never hardcodes a
/// direction.
#[derive(Debug, Clone, Copy)]
pub struct Orientation {
    /// (row_delta, col_delta) a pawn of this orientation advances by.
    pub forward: (i32, i32),
    /// The row (if axis == Row) or col (if axis == Col) pawns start on.
    pub pawn_home_axis: i32,
    /// The row/col of this player's back rank.
    pub back_row_axis: i32,
    /// The row/col a pawn must reach to promote.
    pub promotion_axis: i32,
    pub axis: Axis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Col,
}

/// Orientation for the two standard-board players. Player 1 ("south") moves
/// toward decreasing rows; player 2 ("north") toward increasing rows.
pub fn standard_orientation(player: u8) -> Orientation {
    match player {
        1 => Orientation {
            forward: (-1, 0),
            pawn_home_axis: 6,
            back_row_axis: 7,
            promotion_axis: 0,
            axis: Axis::Row,
        },
        2 => Orientation {
            forward: (1, 0),
            pawn_home_axis: 1,
            back_row_axis: 0,
            promotion_axis: 7,
            axis: Axis::Row,
        },
        _ => unreachable!("standard board has exactly 2 players"),
    }
}

/// Orientation table for the four-player board (spec §4.1), grounded in
/// `moves.py`'s `FOUR_PLAYER_ORIENTATIONS`. Player 1 = East, 2 = South,
/// 3 = West, 4 = North.
pub fn four_player_orientation(player: u8) -> Orientation {
    match player {
        1 => Orientation {
            forward: (0, -1),
            pawn_home_axis: 10,
            back_row_axis: 11,
            promotion_axis: 2,
            axis: Axis::Col,
        },
        2 => Orientation {
            forward: (-1, 0),
            pawn_home_axis: 10,
            back_row_axis: 11,
            promotion_axis: 2,
            axis: Axis::Row,
        },
        3 => Orientation {
            forward: (0, 1),
            pawn_home_axis: 1,
            back_row_axis: 0,
            promotion_axis: 9,
            axis: Axis::Col,
        },
        4 => Orientation {
            forward: (1, 0),
            pawn_home_axis: 1,
            back_row_axis: 0,
            promotion_axis: 9,
            axis: Axis::Row,
        },
        _ => unreachable!("four-player board has exactly 4 players"),
    }
}

pub fn orientation_for(board_type: BoardType, player: u8) -> Orientation {
    match board_type {
        BoardType::Standard => standard_orientation(player),
        BoardType::FourPlayer => four_player_orientation(player),
    }
}

/// A piece on the board. Identity is `(kind, player, origin_row, origin_col)`
/// — the id is the starting square, which makes ids stable across a replay
/// (spec §3 "Piece"). Position is real-valued; integral while at rest,
/// fractional only when read through interpolation by the collision
/// resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub id: String,
    pub kind: PieceKind,
    pub player: u8,
    pub row: f64,
    pub col: f64,
    pub captured: bool,
    pub moved: bool,
}

impl Piece {
    pub fn new(kind: PieceKind, player: u8, row: i32, col: i32) -> Self {
        let id = format!("{}:{}:{}:{}", kind.code(), player, row, col);
        Piece {
            id,
            kind,
            player,
            row: row as f64,
            col: col as f64,
            captured: false,
            moved: false,
        }
    }

    pub fn grid_position(&self) -> (i32, i32) {
        (self.row.round() as i32, self.col.round() as i32)
    }
}

/// A rectangular board holding the set of all pieces, including captured
/// ones (kept for replay/history purposes) (spec §3 "Board").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub pieces: Vec<Piece>,
    pub board_type: BoardType,
    pub width: i32,
    pub height: i32,
}

const STANDARD_BACK_ROW: [PieceKind; 8] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

impl Board {
    pub fn create_standard() -> Self {
        let mut pieces = Vec::with_capacity(32);
        for (col, kind) in STANDARD_BACK_ROW.iter().enumerate() {
            pieces.push(Piece::new(*kind, 2, 0, col as i32));
        }
        for col in 0..8 {
            pieces.push(Piece::new(PieceKind::Pawn, 2, 1, col));
        }
        for col in 0..8 {
            pieces.push(Piece::new(PieceKind::Pawn, 1, 6, col));
        }
        for (col, kind) in STANDARD_BACK_ROW.iter().enumerate() {
            pieces.push(Piece::new(*kind, 1, 7, col as i32));
        }
        Board {
            pieces,
            board_type: BoardType::Standard,
            width: 8,
            height: 8,
        }
    }

    /// 12x12 board, four 2x2 corners invalid. Layout grounded in
    /// `board.py::create_4player` (kings kept toward the board center on the
    /// vertical sides by swapping king/queen order relative to the
    /// horizontal back ranks).
    pub fn create_four_player() -> Self {
        let mut pieces = Vec::with_capacity(4 * 16);

        let horizontal_back_row = STANDARD_BACK_ROW;
        let south_back_row = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::King,
            PieceKind::Queen,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        let vertical_back_row_west = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::King,
            PieceKind::Queen,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        let vertical_back_row_east = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];

        // Player 4 (North): row 0 back row, row 1 pawns, cols 2..10
        for (i, kind) in horizontal_back_row.iter().enumerate() {
            pieces.push(Piece::new(*kind, 4, 0, 2 + i as i32));
        }
        for col in 2..10 {
            pieces.push(Piece::new(PieceKind::Pawn, 4, 1, col));
        }

        // Player 2 (South): row 11 back row, row 10 pawns, cols 2..10
        for (i, kind) in south_back_row.iter().enumerate() {
            pieces.push(Piece::new(*kind, 2, 11, 2 + i as i32));
        }
        for col in 2..10 {
            pieces.push(Piece::new(PieceKind::Pawn, 2, 10, col));
        }

        // Player 3 (West): col 0 back row, col 1 pawns, rows 2..10
        for (i, kind) in vertical_back_row_west.iter().enumerate() {
            pieces.push(Piece::new(*kind, 3, 2 + i as i32, 0));
        }
        for row in 2..10 {
            pieces.push(Piece::new(PieceKind::Pawn, 3, row, 1));
        }

        // Player 1 (East): col 11 back row, col 10 pawns, rows 2..10
        for (i, kind) in vertical_back_row_east.iter().enumerate() {
            pieces.push(Piece::new(*kind, 1, 2 + i as i32, 11));
        }
        for row in 2..10 {
            pieces.push(Piece::new(PieceKind::Pawn, 1, row, 10));
        }

        Board {
            pieces,
            board_type: BoardType::FourPlayer,
            width: 12,
            height: 12,
        }
    }

    pub fn create(board_type: BoardType) -> Self {
        match board_type {
            BoardType::Standard => Board::create_standard(),
            BoardType::FourPlayer => Board::create_four_player(),
        }
    }

    /// An empty board of the given type and dimensions, useful for tests and
    /// constructing scripted scenarios (original's `Board.create_empty`).
    pub fn create_empty_for_test(board_type: BoardType) -> Self {
        let (width, height) = match board_type {
            BoardType::Standard => (8, 8),
            BoardType::FourPlayer => (12, 12),
        };
        Board { pieces: Vec::new(), board_type, width, height }
    }

    pub fn get_piece_by_id(&self, id: &str) -> Option<&Piece> {
        self.pieces.iter().find(|p| p.id == id)
    }

    pub fn get_piece_by_id_mut(&mut self, id: &str) -> Option<&mut Piece> {
        self.pieces.iter_mut().find(|p| p.id == id)
    }

    /// Returns the uncaptured piece whose grid-rounded position is `(row, col)`.
    pub fn piece_at(&self, row: i32, col: i32) -> Option<&Piece> {
        self.pieces.iter().find(|p| {
            if p.captured {
                return false;
            }
            let (r, c) = p.grid_position();
            r == row && c == col
        })
    }

    pub fn pieces_for_player(&self, player: u8) -> impl Iterator<Item = &Piece> {
        self.pieces
            .iter()
            .filter(move |p| p.player == player && !p.captured)
    }

    pub fn active_pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter().filter(|p| !p.captured)
    }

    pub fn king(&self, player: u8) -> Option<&Piece> {
        self.pieces
            .iter()
            .find(|p| p.kind == PieceKind::King && p.player == player && !p.captured)
    }

    /// Enforces board bounds and (for four-player boards) corner exclusion
    /// (spec §4.1 `square_valid`).
    pub fn square_valid(&self, row: i32, col: i32) -> bool {
        if row < 0 || row >= self.height || col < 0 || col >= self.width {
            return false;
        }
        if self.board_type == BoardType::FourPlayer {
            let corner = 2;
            if row < corner && col < corner {
                return false;
            }
            if row < corner && col >= self.width - corner {
                return false;
            }
            if row >= self.height - corner && col < corner {
                return false;
            }
            if row >= self.height - corner && col >= self.width - corner {
                return false;
            }
        }
        true
    }
}

/// One piece's in-flight motion (spec §3 "Move (active)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Move {
    pub piece_id: String,
    pub path: Vec<(f64, f64)>,
    pub start_tick: u64,
    /// Paired rook move during castling (spec §9 "extra_move"). Never
    /// recursive: a move's `extra_move` itself has `extra_move = None`.
    pub extra_move: Option<Box<Move>>,
    /// Set on a castling rook's move to the king's piece id once the pair is
    /// unlinked into two independent `active_moves` entries (spec §9:
    /// capturing the king must vanish the rook's move in the same tick, even
    /// though the two moves are no longer connected by a pointer).
    pub linked_to: Option<String>,
}

impl Move {
    pub fn num_squares(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    pub fn start_position(&self) -> (f64, f64) {
        self.path[0]
    }

    pub fn end_position(&self) -> (f64, f64) {
        self.path[self.path.len() - 1]
    }
}

/// Post-motion period during which a piece may not move (spec §3 "Cooldown").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cooldown {
    pub piece_id: String,
    pub start_tick: u64,
    pub duration: u64,
}

impl Cooldown {
    pub fn is_active(&self, current_tick: u64) -> bool {
        current_tick >= self.start_tick && current_tick < self.start_tick + self.duration
    }
}

/// Named real-time preset (spec §3 "Speed config").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    Standard,
    Lightning,
}

/// Real-time constants for a speed preset, from which tick counts are
/// derived via the global tick rate `H`. Values are the original's
/// `SPEED_CONFIGS` (`kfchess/game/state.py`).
#[derive(Debug, Clone, Copy)]
pub struct SpeedConstants {
    pub seconds_per_square: f64,
    pub cooldown_seconds: f64,
    pub draw_no_move_seconds: f64,
    pub draw_no_capture_seconds: f64,
    pub min_draw_seconds: f64,
}

pub fn speed_constants(speed: Speed) -> SpeedConstants {
    match speed {
        Speed::Standard => SpeedConstants {
            seconds_per_square: 1.0,
            cooldown_seconds: 10.0,
            draw_no_move_seconds: 120.0,
            draw_no_capture_seconds: 180.0,
            min_draw_seconds: 360.0,
        },
        Speed::Lightning => SpeedConstants {
            seconds_per_square: 0.2,
            cooldown_seconds: 2.0,
            draw_no_move_seconds: 30.0,
            draw_no_capture_seconds: 45.0,
            min_draw_seconds: 90.0,
        },
    }
}

/// A speed preset resolved against a concrete tick rate `H` (spec §3 "all
/// timing references in the core use tick counts derived from these
/// values"). `ticks_per_square = round(seconds_per_square * H)`, etc.
#[derive(Debug, Clone, Copy)]
pub struct SpeedConfig {
    pub speed: Speed,
    pub tick_rate_hz: u32,
}

impl SpeedConfig {
    pub fn new(speed: Speed, tick_rate_hz: u32) -> Self {
        SpeedConfig { speed, tick_rate_hz }
    }

    fn constants(&self) -> SpeedConstants {
        speed_constants(self.speed)
    }

    fn to_ticks(&self, seconds: f64) -> u64 {
        (seconds * self.tick_rate_hz as f64).round() as u64
    }

    pub fn tick_period_ms(&self) -> u64 {
        1000 / self.tick_rate_hz as u64
    }

    pub fn ticks_per_square(&self) -> u64 {
        self.to_ticks(self.constants().seconds_per_square)
    }

    pub fn cooldown_ticks(&self) -> u64 {
        self.to_ticks(self.constants().cooldown_seconds)
    }

    pub fn draw_no_move_ticks(&self) -> u64 {
        self.to_ticks(self.constants().draw_no_move_seconds)
    }

    pub fn draw_no_capture_ticks(&self) -> u64 {
        self.to_ticks(self.constants().draw_no_capture_seconds)
    }

    pub fn min_draw_ticks(&self) -> u64 {
        self.to_ticks(self.constants().min_draw_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    KingCaptured,
    Draw,
    Resignation,
    Invalid,
}

impl WinReason {
    /// Whether this outcome should count toward ranked statistics (original's
    /// `WinReason.is_rated`).
    pub fn is_rated(self) -> bool {
        !matches!(self, WinReason::Invalid)
    }
}

/// One accepted move intent, recorded for replay (spec §3 "ReplayMove").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayMove {
    pub tick: u64,
    pub piece_id: String,
    pub to_row: f64,
    pub to_col: f64,
    pub player: u8,
}

/// A player identity occupying a game slot: a user/guest id, or an AI spec
/// of the form `bot:<name>`. Not secret — safe to include in broadcast
/// views (spec §3 `LobbyPlayer`/game snapshots carry it openly).
pub type PlayerIdentity = String;

/// An opaque per-slot secret minted by the lobby/session and handed only to
/// the connection that owns that slot (spec §4.6/§4.7 "player key"). Never
/// included in any broadcast view; the sole thing intents are authorized
/// against.
pub type PlayerKey = String;

pub fn is_ai_identity(identity: &str) -> bool {
    identity.starts_with("bot:") || identity.starts_with("c:")
}

/// Full authoritative state of one in-progress or finished game (spec §3
/// "GameState"). Owned exclusively by its game session for mutation
/// (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub game_id: String,
    pub board: Board,
    pub speed: Speed,
    pub tick_rate_hz: u32,
    pub players: HashMap<u8, PlayerIdentity>,
    pub active_moves: Vec<Move>,
    pub cooldowns: Vec<Cooldown>,
    pub current_tick: u64,
    pub status: GameStatus,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    /// `None` = not finished, `Some(0)` = draw, `Some(n)` = player n won.
    pub winner: Option<u8>,
    pub win_reason: Option<WinReason>,
    pub last_move_tick: u64,
    pub last_capture_tick: u64,
    pub replay_moves: Vec<ReplayMove>,
    pub ready_players: HashSet<u8>,
}

impl GameState {
    pub fn config(&self) -> SpeedConfig {
        SpeedConfig::new(self.speed, self.tick_rate_hz)
    }

    pub fn is_playing(&self) -> bool {
        self.status == GameStatus::Playing
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    pub fn orientation(&self, player: u8) -> Orientation {
        orientation_for(self.board.board_type, player)
    }

    pub fn active_move_for(&self, piece_id: &str) -> Option<&Move> {
        self.active_moves.iter().find(|m| m.piece_id == piece_id)
    }

    pub fn cooldown_for(&self, piece_id: &str) -> Option<&Cooldown> {
        self.cooldowns.iter().find(|c| c.piece_id == piece_id)
    }

    pub fn is_on_cooldown(&self, piece_id: &str) -> bool {
        self.cooldowns
            .iter()
            .any(|c| c.piece_id == piece_id && c.is_active(self.current_tick))
    }

    pub fn is_moving(&self, piece_id: &str) -> bool {
        self.active_moves.iter().any(|m| m.piece_id == piece_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_board_has_32_pieces_and_two_kings() {
        let board = Board::create_standard();
        assert_eq!(board.pieces.len(), 32);
        assert!(board.king(1).is_some());
        assert!(board.king(2).is_some());
    }

    #[test]
    fn four_player_board_excludes_corners() {
        let board = Board::create_four_player();
        assert_eq!(board.width, 12);
        assert!(!board.square_valid(0, 0));
        assert!(!board.square_valid(1, 1));
        assert!(board.square_valid(0, 2));
        assert!(board.square_valid(5, 5));
    }

    #[test]
    fn four_player_board_has_four_kings() {
        let board = Board::create_four_player();
        for player in 1..=4 {
            assert!(board.king(player).is_some(), "player {player} has no king");
        }
    }

    #[test]
    fn piece_id_is_stable_starting_square() {
        let p = Piece::new(PieceKind::Queen, 1, 4, 0);
        assert_eq!(p.id, "Q:1:4:0");
    }

    #[test]
    fn speed_config_derives_ticks_from_rate() {
        let cfg = SpeedConfig::new(Speed::Standard, 30);
        assert_eq!(cfg.ticks_per_square(), 30);
        assert_eq!(cfg.cooldown_ticks(), 300);

        let cfg2 = SpeedConfig::new(Speed::Standard, 60);
        assert_eq!(cfg2.ticks_per_square(), 60);
        assert_eq!(cfg2.cooldown_ticks(), 600);
    }

    #[test]
    fn lightning_is_faster_than_standard() {
        let standard = SpeedConfig::new(Speed::Standard, 30);
        let lightning = SpeedConfig::new(Speed::Lightning, 30);
        assert!(lightning.ticks_per_square() < standard.ticks_per_square());
        assert!(lightning.cooldown_ticks() < standard.cooldown_ticks());
    }
}
