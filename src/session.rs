//! Game session runtime (spec component: Game session runtime, §4.6).
//!
//! One `GameSession` actor owns exactly one `GameState` and is the sole
//! mutator of it — the "actor-per-session" concurrency contract (spec §4.6):
//! intents arrive as actor messages and are drained one at a time between
//! ticks, and `tick()` itself never suspends. Grounded in the teacher's
//! actor idiom (`ws.rs`'s `GameBroadcaster`/`WsSession`), generalized from a
//! request/response singleton to a per-game periodic actor.

use actix::prelude::*;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ai::{create_ai, AiPlayer};
use crate::engine::{self, GameEvent};
use crate::lobby::{EndGame, LobbyManagerActor};
use crate::model::{is_ai_identity, BoardType, GameState, GameStatus, Speed};
use crate::protocol::{build_snapshot, ServerMessage};
use crate::replay::Replay;
use crate::storage::ReplayStorage;
use crate::transport::{Broadcast, ChannelId, Hub};

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// How often a full state snapshot (not just deltas) is pushed to clients,
/// in ticks, so reconnecting clients converge quickly without every tick
/// paying JSON-serialization cost for the whole board (spec §4.6).
const SNAPSHOT_EVERY_TICKS: u64 = 6;

pub struct GameSession {
    pub game_id: String,
    pub lobby_code: Option<String>,
    state: GameState,
    /// Per-slot opaque secrets minted by the lobby on `start_game` (or by
    /// standalone game creation), the sole thing `SubmitMove`/`SetReady`/
    /// `Resign` intents are authorized against (spec §4.6 "authorized by
    /// key"). Never exposed through `GetSnapshot`.
    keys: std::collections::HashMap<u8, String>,
    ai_drivers: std::collections::HashMap<u8, Box<dyn AiPlayer>>,
    hub: Addr<Hub>,
    lobby_manager: Addr<LobbyManagerActor>,
    storage: Arc<ReplayStorage>,
    ticks_since_snapshot: u64,
}

impl GameSession {
    pub fn new(
        game_id: String,
        lobby_code: Option<String>,
        speed: Speed,
        board_type: BoardType,
        players: std::collections::HashMap<u8, String>,
        keys: std::collections::HashMap<u8, String>,
        hub: Addr<Hub>,
        lobby_manager: Addr<LobbyManagerActor>,
        storage: Arc<ReplayStorage>,
    ) -> Self {
        let tick_rate_hz = crate::model::DEFAULT_TICK_RATE_HZ;
        let mut ai_drivers = std::collections::HashMap::new();
        for (&slot, identity) in &players {
            if is_ai_identity(identity) {
                let seed = slot as u64 ^ 0x1234_5678;
                ai_drivers.insert(slot, create_ai(identity, seed));
            }
        }
        let state = engine::create_game(game_id.clone(), speed, tick_rate_hz, board_type, players);
        GameSession { game_id, lobby_code, state, keys, ai_drivers, hub, lobby_manager, storage, ticks_since_snapshot: 0 }
    }

    fn channel(&self) -> ChannelId {
        ChannelId::game(&self.game_id)
    }

    fn broadcast_event(&self, event: GameEvent) {
        let msg = ServerMessage::GameEvent { game_id: self.game_id.clone(), event };
        if let Ok(text) = serde_json::to_string(&msg) {
            self.hub.do_send(Broadcast { channel: self.channel(), text, except: None });
        }
    }

    fn broadcast_snapshot(&self) {
        let snapshot = build_snapshot(&self.state);
        let msg = ServerMessage::GameSnapshot { game_id: self.game_id.clone(), snapshot };
        if let Ok(text) = serde_json::to_string(&msg) {
            self.hub.do_send(Broadcast { channel: self.channel(), text, except: None });
        }
    }

    /// Runs every bot driver once, applying any move it decides to make
    /// (spec §4.6 "AI driver invocation"). A driver that proposes an
    /// illegal move (stale state between `should_move`/`get_move` and
    /// application) is simply skipped for this tick, not fatal.
    fn run_ai_drivers(&mut self) {
        if !self.state.is_playing() {
            return;
        }
        let current_tick = self.state.current_tick;
        let slots: Vec<u8> = self.ai_drivers.keys().copied().collect();
        for slot in slots {
            let driver = &self.ai_drivers[&slot];
            if !driver.should_move(&self.state, slot, current_tick) {
                continue;
            }
            let Some((piece_id, to_row, to_col)) = driver.get_move(&self.state, slot) else {
                continue;
            };
            if let Ok(mv) = engine::validate_move(&self.state, slot, &piece_id, to_row, to_col) {
                for event in engine::apply_move(&mut self.state, slot, mv) {
                    self.broadcast_event(event);
                }
            }
        }
    }

    fn persist_and_notify_terminal(&self) {
        let replay = Replay::from_game_state(&self.state, now_millis());
        if let Err(err) = self.storage.save_replay(&replay) {
            log::error!("game {}: failed to persist replay: {err}", self.game_id);
        }
        if let Some(code) = &self.lobby_code {
            self.lobby_manager.do_send(EndGame(code.clone()));
        }
    }
}

impl Actor for GameSession {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("game {} session started ({:?} players)", self.game_id, self.state.players.len());
        let period = self.state.config().tick_period_ms();
        ctx.run_interval(std::time::Duration::from_millis(period), |act, ctx| {
            if act.state.status != GameStatus::Playing {
                if act.state.status == GameStatus::Finished {
                    ctx.stop();
                }
                return;
            }
            act.run_ai_drivers();
            let events = engine::tick(&mut act.state, now_millis());
            for event in &events {
                act.broadcast_event(event.clone());
            }
            act.ticks_since_snapshot += 1;
            if act.ticks_since_snapshot >= SNAPSHOT_EVERY_TICKS || events.iter().any(|e| matches!(e, GameEvent::GameOver { .. })) {
                act.broadcast_snapshot();
                act.ticks_since_snapshot = 0;
            }
            if act.state.status == GameStatus::Finished {
                act.persist_and_notify_terminal();
            }
        });
    }
}

/// Marks a slot ready; starts the match once every slot is (spec §4.4
/// `set_ready`, driven here rather than in `engine.rs` directly since the
/// session also needs to broadcast the resulting events).
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetReady {
    pub slot: u8,
}

impl Handler<SetReady> for GameSession {
    type Result = ();
    fn handle(&mut self, msg: SetReady, _ctx: &mut Context<Self>) {
        let events = engine::set_ready(&mut self.state, msg.slot, now_millis());
        for event in events {
            self.broadcast_event(event);
        }
        if self.state.is_playing() {
            self.broadcast_snapshot();
        }
    }
}

/// A human player's move intent, queued and applied between ticks (spec
/// §4.6 "intent queue").
#[derive(Message)]
#[rtype(result = "Result<(), crate::engine::GameError>")]
pub struct SubmitMove {
    pub slot: u8,
    pub piece_id: String,
    pub to_row: i32,
    pub to_col: i32,
}

impl Handler<SubmitMove> for GameSession {
    type Result = Result<(), crate::engine::GameError>;
    fn handle(&mut self, msg: SubmitMove, _ctx: &mut Context<Self>) -> Self::Result {
        let mv = engine::validate_move(&self.state, msg.slot, &msg.piece_id, msg.to_row, msg.to_col)?;
        for event in engine::apply_move(&mut self.state, msg.slot, mv) {
            self.broadcast_event(event);
        }
        Ok(())
    }
}

/// A player resigning (spec §4.6: treated as an immediate loss, not a
/// draw — grounded in `engine.py`'s resignation handling).
#[derive(Message)]
#[rtype(result = "()")]
pub struct Resign {
    pub slot: u8,
}

impl Handler<Resign> for GameSession {
    type Result = ();
    fn handle(&mut self, msg: Resign, _ctx: &mut Context<Self>) {
        if !self.state.is_playing() {
            return;
        }
        let winner = self.state.players.keys().copied().find(|&slot| slot != msg.slot);
        self.state.status = GameStatus::Finished;
        self.state.finished_at = Some(now_millis());
        self.state.winner = winner;
        self.state.win_reason = Some(crate::model::WinReason::Resignation);
        self.broadcast_event(GameEvent::GameOver { winner, win_reason: crate::model::WinReason::Resignation });
        self.broadcast_snapshot();
        self.persist_and_notify_terminal();
    }
}

/// Returns a fresh client-ready snapshot (spec §4.6, used when a session is
/// fetched on demand for a newly attached WS client).
#[derive(Message)]
#[rtype(result = "crate::protocol::GameSnapshot")]
pub struct GetSnapshot;

impl Handler<GetSnapshot> for GameSession {
    type Result = MessageResult<GetSnapshot>;
    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(build_snapshot(&self.state))
    }
}

/// Resolves which slot (if any) a secret key is authorized for, so the
/// transport layer can gate intents without ever trusting the (public,
/// broadcast) player identity for authorization (spec §6 "authorized by
/// key -> slot"). An unrecognized key resolves to `None`, the same
/// treatment spectators get.
#[derive(Message)]
#[rtype(result = "Option<u8>")]
pub struct ResolveSlot {
    pub key: String,
}

impl Handler<ResolveSlot> for GameSession {
    type Result = MessageResult<ResolveSlot>;
    fn handle(&mut self, msg: ResolveSlot, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(self.keys.iter().find(|(_, k)| **k == msg.key).map(|(&slot, _)| slot))
    }
}
