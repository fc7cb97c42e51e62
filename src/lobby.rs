//! Lobby state machine (spec component: Lobby state machine, §4.7).
//!
//! Grounded in `kfchess/lobby/manager.py` and `kfchess/ws/lobby_handler.py`.
//! A lobby is addressed by a short, human-typeable code; membership is
//! locked to one lobby per player identity; disconnects while `Waiting` are
//! marked but not evicted until the next lazy sweep (mirroring
//! `_cleanup_and_broadcast` being invoked on every lobby connect and every
//! non-ping client message, never on a timer of its own).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::model::{is_ai_identity, BoardType, PlayerIdentity, PlayerKey, Speed};

/// Codes are drawn from an alphabet without visually ambiguous characters
/// (`0`/`O`, `1`/`I`/`L`), matching `manager.py::_generate_code`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

/// How long a disconnected player's slot is held open while `Waiting`
/// before the next sweep evicts them (spec §4.7 "reconnection grace").
pub const RECONNECT_GRACE_SECONDS: u64 = 30;

pub const MAX_PLAYERS_STANDARD: u8 = 2;
pub const MAX_PLAYERS_FOUR_PLAYER: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyStatus {
    Waiting,
    InGame,
    Closed,
}

#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub board_type: BoardType,
    pub speed: Speed,
    pub is_public: bool,
}

impl LobbySettings {
    pub fn max_players(&self) -> u8 {
        match self.board_type {
            BoardType::Standard => MAX_PLAYERS_STANDARD,
            BoardType::FourPlayer => MAX_PLAYERS_FOUR_PLAYER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LobbyPlayer {
    pub slot: u8,
    pub identity: PlayerIdentity,
    /// Opaque secret minted on join, handed only to the connection that
    /// claimed this slot; never part of any broadcast view (spec §4.7
    /// "mint a player key"). Every lobby operation past join/create is
    /// authorized by matching this, not by the (publicly visible) identity.
    pub key: PlayerKey,
    pub is_ready: bool,
    pub is_connected: bool,
    /// Set the moment a player disconnects while the lobby is `Waiting`;
    /// cleared on reconnect. `None` while connected (spec §4.7).
    pub disconnected_at: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Lobby {
    pub code: String,
    pub host_identity: PlayerIdentity,
    pub settings: LobbySettings,
    pub status: LobbyStatus,
    pub players: Vec<LobbyPlayer>,
    pub game_id: Option<String>,
    pub created_at: u64,
    /// Fresh per-slot keys minted on `start_game` (spec §4.7: "mint fresh
    /// per-slot keys for the forthcoming game, return (game_id, {slot ->
    /// key})"). Held here only long enough for each occupant's own session
    /// to privately collect its own entry; never broadcast.
    pub game_keys: HashMap<u8, PlayerKey>,
}

impl Lobby {
    fn player_mut(&mut self, identity: &str) -> Option<&mut LobbyPlayer> {
        self.players.iter_mut().find(|p| p.identity == identity)
    }

    /// Looks a player up by identity. Only safe to drive with a value the
    /// caller already knows is its own (e.g. right after `create`/`join`
    /// with the identity it just supplied) — never with an identity read
    /// off another connection's broadcast view.
    pub fn player(&self, identity: &str) -> Option<&LobbyPlayer> {
        self.players.iter().find(|p| p.identity == identity)
    }

    /// Resolves the caller authorized to act as a given secret key (spec
    /// §4.7 "authorized by key -> slot"). This, not `player`/`player_mut`,
    /// is the only lookup a client-supplied credential should ever drive.
    pub fn player_by_key(&self, key: &str) -> Option<&LobbyPlayer> {
        self.players.iter().find(|p| p.key == key)
    }

    fn next_free_slot(&self) -> Option<u8> {
        (1..=self.settings.max_players()).find(|slot| !self.players.iter().any(|p| p.slot == *slot))
    }

    pub fn is_host(&self, identity: &str) -> bool {
        self.host_identity == identity
    }

    pub fn all_ready(&self) -> bool {
        self.players.len() >= 2 && self.players.iter().all(|p| p.is_ready || is_ai_identity(&p.identity))
    }
}

/// Domain-refusal error taxonomy for lobby operations (spec §7), mirroring
/// the original's `LobbyError(code, message)` dataclass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    NotFound,
    AlreadyInLobby,
    LobbyFull,
    NotAuthorized,
    NotHost,
    InvalidSettings,
    AlreadyInGame,
    NotEnoughPlayers,
    PlayerNotFound,
}

impl LobbyError {
    pub fn code(&self) -> &'static str {
        match self {
            LobbyError::NotFound => "lobby_not_found",
            LobbyError::AlreadyInLobby => "already_in_lobby",
            LobbyError::LobbyFull => "lobby_full",
            LobbyError::NotAuthorized => "not_authorized",
            LobbyError::NotHost => "not_host",
            LobbyError::InvalidSettings => "invalid_settings",
            LobbyError::AlreadyInGame => "already_in_game",
            LobbyError::NotEnoughPlayers => "not_enough_players",
            LobbyError::PlayerNotFound => "player_not_found",
        }
    }
}

impl std::fmt::Display for LobbyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for LobbyError {}

fn now_secs(now: u64) -> u64 {
    now
}

fn real_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// In-memory registry of all lobbies, keyed by code, plus the reverse
/// player→lobby lock (spec §4.7 "one lobby per identity"). Not persisted:
/// lobbies are ephemeral pre-game state, grounded in `manager.py`'s
/// `LobbyManager` which never writes lobbies to disk either.
#[derive(Default)]
pub struct LobbyManager {
    lobbies: HashMap<String, Lobby>,
    player_lock: HashMap<PlayerIdentity, String>,
    rng_state: u64,
}

impl LobbyManager {
    pub fn new() -> Self {
        LobbyManager { lobbies: HashMap::new(), player_lock: HashMap::new(), rng_state: 0x853C49E6748FEA9B }
    }

    fn mint_key() -> PlayerKey {
        Uuid::new_v4().to_string()
    }

    fn next_code(&mut self) -> String {
        loop {
            let mut code = String::with_capacity(CODE_LENGTH);
            for _ in 0..CODE_LENGTH {
                self.rng_state ^= self.rng_state << 13;
                self.rng_state ^= self.rng_state >> 7;
                self.rng_state ^= self.rng_state << 17;
                let idx = (self.rng_state as usize) % CODE_ALPHABET.len();
                code.push(CODE_ALPHABET[idx] as char);
            }
            if !self.lobbies.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<&Lobby> {
        self.lobbies.get(code)
    }

    pub fn lobby_for_player(&self, identity: &str) -> Option<&Lobby> {
        self.player_lock.get(identity).and_then(|code| self.lobbies.get(code))
    }

    /// Creates a new lobby, with `host` as its sole player in slot 1 (spec
    /// §4.7 `create`).
    pub fn create(&mut self, host: PlayerIdentity, board_type: BoardType, speed: Speed, is_public: bool, now: u64) -> Result<&Lobby, LobbyError> {
        if self.player_lock.contains_key(&host) {
            return Err(LobbyError::AlreadyInLobby);
        }
        let code = self.next_code();
        let lobby = Lobby {
            code: code.clone(),
            host_identity: host.clone(),
            settings: LobbySettings { board_type, speed, is_public },
            status: LobbyStatus::Waiting,
            players: vec![LobbyPlayer {
                slot: 1,
                identity: host.clone(),
                key: Self::mint_key(),
                is_ready: false,
                is_connected: true,
                disconnected_at: None,
            }],
            game_id: None,
            created_at: now_secs(now),
            game_keys: HashMap::new(),
        };
        self.player_lock.insert(host, code.clone());
        self.lobbies.insert(code.clone(), lobby);
        Ok(self.lobbies.get(&code).unwrap())
    }

    /// Adds `identity` to `code`'s lobby, or reconnects them if they were
    /// already a (disconnected) member (spec §4.7 `join`). Reconnection
    /// re-associates the player's existing key rather than minting a new
    /// one. Callers read the resulting key back via `Lobby::player`, keyed
    /// by the same `identity` they just joined under — never from a
    /// broadcast view.
    pub fn join(&mut self, code: &str, identity: PlayerIdentity) -> Result<&Lobby, LobbyError> {
        if let Some(existing) = self.player_lock.get(&identity) {
            if existing != code {
                return Err(LobbyError::AlreadyInLobby);
            }
        }
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        if lobby.status == LobbyStatus::Closed {
            return Err(LobbyError::NotFound);
        }

        if let Some(player) = lobby.player_mut(&identity) {
            player.is_connected = true;
            player.disconnected_at = None;
        } else {
            if lobby.status != LobbyStatus::Waiting {
                return Err(LobbyError::AlreadyInGame);
            }
            let slot = lobby.next_free_slot().ok_or(LobbyError::LobbyFull)?;
            lobby.players.push(LobbyPlayer {
                slot,
                identity: identity.clone(),
                key: Self::mint_key(),
                is_ready: false,
                is_connected: true,
                disconnected_at: None,
            });
            self.player_lock.insert(identity, code.to_string());
        }
        Ok(self.lobbies.get(code).unwrap())
    }

    /// Resolves the human caller behind `key` as the lobby's host, or
    /// refuses (spec §4.7: every host-only operation is `host_key`-gated,
    /// never identity-gated).
    fn require_host<'a>(lobby: &'a Lobby, host_key: &str) -> Result<&'a LobbyPlayer, LobbyError> {
        let player = lobby.player_by_key(host_key).ok_or(LobbyError::NotAuthorized)?;
        if player.identity != lobby.host_identity {
            return Err(LobbyError::NotHost);
        }
        Ok(player)
    }

    /// Marks the caller behind `key` ready/not-ready (spec §4.7
    /// `set_ready(key, ready)`).
    pub fn set_ready(&mut self, code: &str, key: &str, ready: bool) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        let identity = lobby.player_by_key(key).ok_or(LobbyError::NotAuthorized)?.identity.clone();
        lobby.player_mut(&identity).ok_or(LobbyError::PlayerNotFound)?.is_ready = ready;
        Ok(self.lobbies.get(code).unwrap())
    }

    /// Host-only settings update, refused once a game has started (spec
    /// §4.7 `update_settings(host_key, settings)`).
    pub fn update_settings(&mut self, code: &str, host_key: &str, board_type: Option<BoardType>, speed: Option<Speed>) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        Self::require_host(lobby, host_key)?;
        if lobby.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyInGame);
        }
        if let Some(bt) = board_type {
            lobby.settings.board_type = bt;
            let max = lobby.settings.max_players();
            lobby.players.retain(|p| p.slot <= max);
        }
        if let Some(sp) = speed {
            lobby.settings.speed = sp;
        }
        Ok(self.lobbies.get(code).unwrap())
    }

    /// Host-only seat fill with an AI driver (spec §4.7 `add_ai(host_key,
    /// ai_type)`).
    pub fn add_ai(&mut self, code: &str, host_key: &str, bot_name: &str) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        Self::require_host(lobby, host_key)?;
        if lobby.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyInGame);
        }
        let slot = lobby.next_free_slot().ok_or(LobbyError::LobbyFull)?;
        let bot_identity = format!("bot:{bot_name}");
        lobby.players.push(LobbyPlayer {
            slot,
            identity: bot_identity,
            key: Self::mint_key(),
            is_ready: true,
            is_connected: true,
            disconnected_at: None,
        });
        Ok(self.lobbies.get(code).unwrap())
    }

    pub fn remove_ai(&mut self, code: &str, host_key: &str, slot: u8) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        Self::require_host(lobby, host_key)?;
        lobby.players.retain(|p| !(p.slot == slot && is_ai_identity(&p.identity)));
        Ok(self.lobbies.get(code).unwrap())
    }

    /// Host-only ejection of a human player (spec §4.7 `kick(host_key,
    /// slot)`).
    pub fn kick(&mut self, code: &str, host_key: &str, slot: u8) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        Self::require_host(lobby, host_key)?;
        let kicked = lobby.players.iter().find(|p| p.slot == slot).map(|p| (p.identity.clone(), p.key.clone()));
        lobby.players.retain(|p| p.slot != slot);
        if let Some((identity, _key)) = kicked {
            self.player_lock.remove(&identity);
        }
        Ok(self.lobbies.get(code).unwrap())
    }

    /// Removes the caller behind `key` from `code`'s lobby (spec §4.7
    /// `leave(code, key)`). While `Waiting` this frees the slot outright;
    /// an in-game departure is recorded as a disconnect instead (handled by
    /// the game session, not here).
    pub fn leave(&mut self, code: &str, key: &str) {
        let Some(lobby) = self.lobbies.get_mut(code) else { return };
        let Some(identity) = lobby.player_by_key(key).map(|p| p.identity.clone()) else { return };
        self.player_lock.remove(&identity);
        if lobby.status == LobbyStatus::Waiting {
            lobby.players.retain(|p| p.identity != identity);
            if lobby.is_host(&identity) {
                let new_host = lobby
                    .players
                    .iter()
                    .filter(|p| !is_ai_identity(&p.identity))
                    .min_by_key(|p| p.slot)
                    .map(|p| p.identity.clone());
                if let Some(new_host) = new_host {
                    lobby.host_identity = new_host;
                } else {
                    lobby.status = LobbyStatus::Closed;
                }
            }
        }
    }

    /// Marks `identity` disconnected without freeing their slot yet (spec
    /// §4.7: the slot is reclaimed only on the next grace sweep).
    pub fn mark_disconnected(&mut self, code: &str, identity: &str, now: u64) {
        if let Some(lobby) = self.lobbies.get_mut(code) {
            if lobby.status == LobbyStatus::Waiting {
                if let Some(player) = lobby.player_mut(identity) {
                    player.is_connected = false;
                    player.disconnected_at = Some(now_secs(now));
                }
            }
        }
    }

    /// Lazily evicts any `Waiting`-lobby player who has been disconnected
    /// longer than the grace window (spec §4.7). Called on every lobby
    /// connect and every non-ping client message, never on its own timer —
    /// grounded in `lobby_handler.py::_cleanup_and_broadcast`.
    pub fn sweep(&mut self, code: &str, now: u64) {
        let Some(lobby) = self.lobbies.get_mut(code) else { return };
        if lobby.status != LobbyStatus::Waiting {
            return;
        }
        let now = now_secs(now);
        let mut evicted = Vec::new();
        lobby.players.retain(|p| {
            let expired = p
                .disconnected_at
                .map(|at| now.saturating_sub(at) >= RECONNECT_GRACE_SECONDS)
                .unwrap_or(false);
            if expired {
                evicted.push(p.identity.clone());
            }
            !expired
        });
        for identity in evicted {
            self.player_lock.remove(&identity);
        }
        if lobby.players.is_empty() {
            lobby.status = LobbyStatus::Closed;
        } else if !lobby.players.iter().any(|p| p.identity == lobby.host_identity) {
            let new_host = lobby
                .players
                .iter()
                .filter(|p| !is_ai_identity(&p.identity))
                .min_by_key(|p| p.slot)
                .map(|p| p.identity.clone());
            if let Some(new_host) = new_host {
                lobby.host_identity = new_host;
            } else {
                lobby.status = LobbyStatus::Closed;
            }
        }
    }

    pub fn sweep_now(&mut self, code: &str) {
        self.sweep(code, real_now());
    }

    /// Transitions a lobby to `InGame` once a session has been created for
    /// it (spec §4.7 `start_game`). The caller is responsible for actually
    /// constructing the `GameState`/session; this just records the link.
    pub fn start_game(&mut self, code: &str, host_key: &str, game_id: String) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        Self::require_host(lobby, host_key)?;
        if lobby.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyInGame);
        }
        if !lobby.all_ready() {
            return Err(LobbyError::NotEnoughPlayers);
        }
        lobby.status = LobbyStatus::InGame;
        lobby.game_id = Some(game_id);
        lobby.game_keys = lobby.players.iter().map(|p| (p.slot, Self::mint_key())).collect();
        Ok(self.lobbies.get(code).unwrap())
    }

    /// Called by the game session when the match terminates (spec §4.7
    /// `end_game`): the lobby is closed rather than returned to `Waiting`,
    /// matching the original's one-shot lobby lifetime.
    pub fn end_game(&mut self, code: &str) {
        if let Some(lobby) = self.lobbies.get_mut(code) {
            lobby.status = LobbyStatus::Closed;
            for player in &lobby.players {
                self.player_lock.remove(&player.identity);
            }
        }
    }

    /// Resets a lobby back to `Waiting` with everyone un-readied, for
    /// "play again" flows (spec §4.7 `return_to_lobby`).
    pub fn return_to_lobby(&mut self, code: &str) -> Result<&Lobby, LobbyError> {
        let lobby = self.lobbies.get_mut(code).ok_or(LobbyError::NotFound)?;
        lobby.status = LobbyStatus::Waiting;
        lobby.game_id = None;
        for player in &mut lobby.players {
            player.is_ready = is_ai_identity(&player.identity);
        }
        Ok(self.lobbies.get(code).unwrap())
    }

    pub fn list_public_waiting(&self) -> Vec<&Lobby> {
        self.lobbies.values().filter(|l| l.settings.is_public && l.status == LobbyStatus::Waiting).collect()
    }
}

/// `LobbyManager` is a plain struct guarded by a `Mutex` everywhere it's
/// touched from request/response WS handlers; `GameSession` (`session.rs`)
/// instead needs to reach it from inside `ctx.run_interval` without blocking
/// the actor system on a lock a slow HTTP handler might be holding.
/// Wrapping it in its own tiny actor gives the session a fire-and-forget
/// `do_send` instead of a cross-thread mutex acquisition on every tick.
pub struct LobbyManagerActor(pub std::sync::Arc<std::sync::Mutex<LobbyManager>>);

impl actix::Actor for LobbyManagerActor {
    type Context = actix::Context<Self>;
}

#[derive(actix::Message)]
#[rtype(result = "()")]
pub struct EndGame(pub String);

impl actix::Handler<EndGame> for LobbyManagerActor {
    type Result = ();
    fn handle(&mut self, msg: EndGame, _ctx: &mut actix::Context<Self>) {
        self.0.lock().expect("lobby manager mutex poisoned").end_game(&msg.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_join_fills_second_slot() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        let lobby = mgr.join(&code, "u:b".into()).unwrap();
        assert_eq!(lobby.players.len(), 2);
        assert_eq!(lobby.players[1].slot, 2);
    }

    #[test]
    fn cannot_join_two_lobbies_at_once() {
        let mut mgr = LobbyManager::new();
        let code_a = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        mgr.create("u:b".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap();
        assert_eq!(mgr.join(&code_a, "u:b".into()), Err(LobbyError::AlreadyInLobby));
    }

    #[test]
    fn start_game_requires_all_ready() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        let host_key = mgr.get(&code).unwrap().player("u:a").unwrap().key.clone();
        let lobby = mgr.join(&code, "u:b".into()).unwrap();
        let guest_key = lobby.player("u:b").unwrap().key.clone();

        assert_eq!(mgr.start_game(&code, &host_key, "g1".into()), Err(LobbyError::NotEnoughPlayers));
        mgr.set_ready(&code, &host_key, true).unwrap();
        mgr.set_ready(&code, &guest_key, true).unwrap();
        let lobby = mgr.start_game(&code, &host_key, "g1".into()).unwrap();
        assert_eq!(lobby.status, LobbyStatus::InGame);
        assert_eq!(lobby.game_keys.len(), 2);
    }

    #[test]
    fn set_ready_is_refused_without_a_valid_key() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        assert_eq!(mgr.set_ready(&code, "not-a-real-key", true), Err(LobbyError::NotAuthorized));
    }

    #[test]
    fn non_host_key_cannot_kick() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        let lobby = mgr.join(&code, "u:b".into()).unwrap();
        let guest_key = lobby.player("u:b").unwrap().key.clone();
        assert_eq!(mgr.kick(&code, &guest_key, 1), Err(LobbyError::NotHost));
    }

    #[test]
    fn disconnect_grace_sweep_evicts_after_window() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        mgr.join(&code, "u:b".into()).unwrap();
        mgr.mark_disconnected(&code, "u:b", 0);

        mgr.sweep(&code, RECONNECT_GRACE_SECONDS - 1);
        assert_eq!(mgr.get(&code).unwrap().players.len(), 2, "still within grace window");

        mgr.sweep(&code, RECONNECT_GRACE_SECONDS + 1);
        assert_eq!(mgr.get(&code).unwrap().players.len(), 1, "evicted after grace window");
        assert!(mgr.lobby_for_player("u:b").is_none());
    }

    #[test]
    fn leave_transfers_host_to_remaining_player() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::Standard, Speed::Standard, false, 0).unwrap().code.clone();
        let host_key = mgr.get(&code).unwrap().player("u:a").unwrap().key.clone();
        mgr.join(&code, "u:b".into()).unwrap();
        mgr.leave(&code, &host_key);
        assert_eq!(mgr.get(&code).unwrap().host_identity, "u:b");
    }

    #[test]
    fn leave_skips_ai_when_transferring_host() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create("u:a".into(), BoardType::FourPlayer, Speed::Standard, false, 0).unwrap().code.clone();
        let host_key = mgr.get(&code).unwrap().player("u:a").unwrap().key.clone();
        mgr.add_ai(&code, &host_key, "dummy").unwrap();
        mgr.join(&code, "u:c".into()).unwrap();
        mgr.leave(&code, &host_key);
        let lobby = mgr.get(&code).unwrap();
        assert_eq!(lobby.host_identity, "u:c", "host transfer must skip the AI seat");
    }
}
