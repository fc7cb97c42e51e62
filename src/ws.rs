//! WebSocket transport entry points (spec component: Transport layer, §4.8).
//!
//! Two connection kinds, each its own session actor — `LobbySession` for
//! `/ws/lobby` and `GameWsSession` for `/ws/game/{game_id}` — replacing the
//! teacher's single `WsSession`/`GameBroadcaster` pairing (`ws.rs`) with a
//! pair that talks to `lobby::LobbyManager` and `session::GameSession`
//! instead of a chess `GameManager`. The heartbeat loop and the
//! register/dispatch/respond shape are kept as-is from the teacher.
//!
//! Client identity is resolved once per connection from a query string
//! (`?identity=...`), standing in for the identity port the spec leaves as
//! an external collaborator (§4.1 "Non-goals"). Identity is never treated
//! as secret — it is exactly the thing `LobbyPlayerView`/`GameSnapshot`
//! broadcast to every other participant — so it is used only for the
//! join-time correlation `join`/`create` themselves need (matching a
//! reconnect to its existing seat) and for logging. Every lobby/game intent
//! past that point is authorized by an opaque per-slot key the lobby/session
//! mints and hands only to the connection that owns the slot, exactly as
//! spec §4.6/§4.7/§6 describe: `LobbySession` collects its own lobby key
//! from `create`/`join`, and collects its own game key privately (never
//! broadcast) the moment the lobby it's in starts a match.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::lobby::LobbyError;
use crate::protocol::{GameClientMessage, LobbyClientMessage, LobbyView, ServerMessage};
use crate::session::{GameSession, GetSnapshot, Resign, ResolveSlot, SetReady, SubmitMove};
use crate::transport::{Attach, Broadcast, ChannelId, Deliver, Detach, Hub, Register, SendTo, Unregister};
use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Pulls `identity` off the query string, or mints a throwaway guest id.
/// Stands in for the identity-resolution port the spec deliberately leaves
/// external (§4.1 Non-goals: "user/identity management and OAuth"). Not
/// secret and not an authorization credential — see module docs.
fn resolve_identity(req: &HttpRequest) -> String {
    req.query_string()
        .split('&')
        .find_map(|kv| kv.strip_prefix("identity="))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| format!("guest:{}", Uuid::new_v4()))
}

/// Pulls the per-game secret `key` off the query string. Absent or unknown
/// means spectator (spec §4.6/§6: "spectators have no key and may only
/// observe").
fn resolve_key(req: &HttpRequest) -> Option<String> {
    req.query_string().split('&').find_map(|kv| kv.strip_prefix("key=")).filter(|v| !v.is_empty()).map(|v| v.to_string())
}

fn send_json<A>(ctx: &mut ws::WebsocketContext<A>, msg: &ServerMessage)
where
    A: Actor<Context = ws::WebsocketContext<A>>,
{
    if let Ok(text) = serde_json::to_string(msg) {
        ctx.text(text);
    }
}

// ---------------------------------------------------------------------------
// LobbySession — one actor per WebSocket connected to a lobby
// ---------------------------------------------------------------------------

pub struct LobbySession {
    id: Uuid,
    identity: String,
    /// The opaque per-slot secret this connection collected from `create`/
    /// `join`'s own response (never from a broadcast view). `None` until
    /// one of those succeeds; every later lobby intent is authorized
    /// against it, never against `identity`.
    lobby_key: Option<String>,
    code: Option<String>,
    last_heartbeat: Instant,
    app_state: web::Data<AppState>,
}

impl LobbySession {
    pub fn new(identity: String, app_state: web::Data<AppState>) -> Self {
        LobbySession { id: Uuid::new_v4(), identity, lobby_key: None, code: None, last_heartbeat: Instant::now(), app_state }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                log::warn!("lobby session {} heartbeat timeout, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn broadcast_view(&self, code: &str, view: LobbyView) {
        let msg = ServerMessage::LobbyState { lobby: view };
        if let Ok(text) = serde_json::to_string(&msg) {
            self.app_state.hub.do_send(Broadcast { channel: ChannelId::lobby(code), text, except: None });
        }
    }

    fn attach(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str) {
        self.app_state.hub.do_send(Register { session_id: self.id, addr: ctx.address().recipient() });
        self.app_state.hub.do_send(Attach { session_id: self.id, channel: ChannelId::lobby(code) });
        self.app_state
            .lobby_session_ids
            .lock()
            .expect("lobby session registry mutex poisoned")
            .entry(code.to_string())
            .or_default()
            .insert(self.identity.clone(), self.id);
    }

    fn detach_session_id(&self, code: &str) {
        if let Some(sessions) = self.app_state.lobby_session_ids.lock().expect("lobby session registry mutex poisoned").get_mut(code) {
            sessions.remove(&self.identity);
        }
    }

    fn handle_message(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let msg: LobbyClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                send_json(ctx, &ServerMessage::LobbyError { code: "bad_request".into(), message: e.to_string() });
                return;
            }
        };

        if let Some(code) = self.code.clone() {
            if !matches!(msg, LobbyClientMessage::Ping) {
                let mut mgr = self.app_state.lobby_manager.lock().expect("lobby manager mutex poisoned");
                mgr.sweep(&code, now_secs());
            }
        }

        match msg {
            LobbyClientMessage::CreateLobby { board_type, speed, is_public } => {
                if self.code.is_some() {
                    send_json(ctx, &LobbyError::AlreadyInLobby.into());
                    return;
                }
                let mut mgr = self.app_state.lobby_manager.lock().expect("lobby manager mutex poisoned");
                match mgr.create(self.identity.clone(), board_type, speed, is_public, now_secs()) {
                    Ok(lobby) => {
                        let code = lobby.code.clone();
                        let key = lobby.player(&self.identity).map(|p| p.key.clone());
                        let view = LobbyView::from(lobby);
                        drop(mgr);
                        self.code = Some(code.clone());
                        self.lobby_key = key;
                        self.attach(ctx, &code);
                        self.broadcast_view(&code, view);
                    }
                    Err(e) => send_json(ctx, &e.into()),
                }
            }
            LobbyClientMessage::JoinLobby { code } => {
                if self.code.is_some() {
                    send_json(ctx, &LobbyError::AlreadyInLobby.into());
                    return;
                }
                let mut mgr = self.app_state.lobby_manager.lock().expect("lobby manager mutex poisoned");
                match mgr.join(&code, self.identity.clone()) {
                    Ok(lobby) => {
                        let key = lobby.player(&self.identity).map(|p| p.key.clone());
                        let view = LobbyView::from(lobby);
                        drop(mgr);
                        self.code = Some(code.clone());
                        self.lobby_key = key;
                        self.attach(ctx, &code);
                        self.broadcast_view(&code, view);
                    }
                    Err(e) => send_json(ctx, &e.into()),
                }
            }
            LobbyClientMessage::Ping => ctx.text(r#"{"type":"pong"}"#),
            other => self.handle_in_lobby(other, ctx),
        }
    }

    fn handle_in_lobby(&mut self, msg: LobbyClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(code) = self.code.clone() else {
            send_json(ctx, &LobbyError::NotFound.into());
            return;
        };
        let Some(key) = self.lobby_key.clone() else {
            send_json(ctx, &LobbyError::NotAuthorized.into());
            return;
        };
        let mut mgr = self.app_state.lobby_manager.lock().expect("lobby manager mutex poisoned");

        let result = match msg {
            LobbyClientMessage::SetReady { ready } => mgr.set_ready(&code, &key, ready).map(LobbyView::from),
            LobbyClientMessage::UpdateSettings { board_type, speed } => {
                mgr.update_settings(&code, &key, board_type, speed).map(LobbyView::from)
            }
            LobbyClientMessage::AddAi { bot_name } => mgr.add_ai(&code, &key, &bot_name).map(LobbyView::from),
            LobbyClientMessage::RemoveAi { slot } => mgr.remove_ai(&code, &key, slot).map(LobbyView::from),
            LobbyClientMessage::Kick { slot } => mgr.kick(&code, &key, slot).map(LobbyView::from),
            LobbyClientMessage::LeaveLobby => {
                mgr.leave(&code, &key);
                let remaining = mgr.get(&code).map(LobbyView::from);
                drop(mgr);
                self.app_state.hub.do_send(Detach { session_id: self.id, channel: ChannelId::lobby(&code) });
                self.detach_session_id(&code);
                self.code = None;
                self.lobby_key = None;
                if let Some(view) = remaining {
                    self.broadcast_view(&code, view);
                }
                return;
            }
            LobbyClientMessage::StartGame => {
                let game_id = Uuid::new_v4().to_string();
                match mgr.start_game(&code, &key, game_id.clone()) {
                    Ok(lobby) => {
                        let players: std::collections::HashMap<u8, String> =
                            lobby.players.iter().map(|p| (p.slot, p.identity.clone())).collect();
                        let keys: std::collections::HashMap<u8, String> = lobby.game_keys.clone();
                        let occupant_game_keys: Vec<(String, String)> = lobby
                            .players
                            .iter()
                            .filter_map(|p| keys.get(&p.slot).map(|k| (p.identity.clone(), k.clone())))
                            .collect();
                        let board_type = lobby.settings.board_type;
                        let speed = lobby.settings.speed;
                        let view = LobbyView::from(lobby);
                        drop(mgr);

                        let game_session = GameSession::new(
                            game_id.clone(),
                            Some(code.clone()),
                            speed,
                            board_type,
                            players,
                            keys,
                            self.app_state.hub.clone(),
                            self.app_state.lobby_manager_actor.clone(),
                            self.app_state.storage.clone(),
                        )
                        .start();
                        self.app_state.games.lock().expect("games registry mutex poisoned").insert(game_id.clone(), game_session);

                        // Deliver each occupant's own game key privately over their
                        // own lobby session, never through the shared lobby channel
                        // (spec §4.7: "never echoed" to the rest of the lobby).
                        if let Some(sessions) = self.app_state.lobby_session_ids.lock().expect("lobby session registry mutex poisoned").get(&code)
                        {
                            for (identity, game_key) in &occupant_game_keys {
                                if let Some(session_id) = sessions.get(identity) {
                                    let started = ServerMessage::GameStarted { game_id: game_id.clone(), key: game_key.clone() };
                                    if let Ok(text) = serde_json::to_string(&started) {
                                        self.app_state.hub.do_send(SendTo { session_id: *session_id, text });
                                    }
                                }
                            }
                        }

                        self.broadcast_view(&code, view);
                        return;
                    }
                    Err(e) => Err(e),
                }
            }
            LobbyClientMessage::CreateLobby { .. } | LobbyClientMessage::JoinLobby { .. } | LobbyClientMessage::Ping => {
                unreachable!("handled by the caller")
            }
        };

        match result {
            Ok(view) => {
                drop(mgr);
                self.broadcast_view(&code, view);
            }
            Err(e) => send_json(ctx, &e.into()),
        }
    }
}

impl Actor for LobbySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("lobby session {} started ({})", self.id, self.identity);
        self.start_heartbeat(ctx);
        self.app_state.hub.do_send(Register { session_id: self.id, addr: ctx.address().recipient() });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("lobby session {} stopped", self.id);
        self.app_state.hub.do_send(Unregister { session_id: self.id });
        if let Some(code) = &self.code {
            self.detach_session_id(code);
            let mut mgr = self.app_state.lobby_manager.lock().expect("lobby manager mutex poisoned");
            mgr.mark_disconnected(code, &self.identity, now_secs());
            if let Some(lobby) = mgr.get(code) {
                let view = LobbyView::from(lobby);
                drop(mgr);
                self.broadcast_view(code, view);
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LobbySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_message(&text, ctx),
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => self.last_heartbeat = Instant::now(),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) | Ok(ws::Message::Binary(_)) => {}
            Err(e) => {
                log::error!("lobby session {} protocol error: {}", self.id, e);
                ctx.stop();
            }
        }
    }
}

impl Handler<Deliver> for LobbySession {
    type Result = ();
    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// ---------------------------------------------------------------------------
// GameWsSession — one actor per WebSocket connected to a running game
// ---------------------------------------------------------------------------

pub struct GameWsSession {
    id: Uuid,
    identity: String,
    /// The per-slot secret this connection presented (`?key=...`), or `None`
    /// for a spectator. Resolved to a slot once via `ResolveSlot`; never the
    /// thing that grants the slot itself — an unrecognized key resolves to
    /// no slot at all, same as a spectator.
    key: Option<String>,
    game_id: String,
    slot: Option<u8>,
    game_addr: Addr<GameSession>,
    last_heartbeat: Instant,
    hub: Addr<Hub>,
}

impl GameWsSession {
    pub fn new(identity: String, key: Option<String>, game_id: String, game_addr: Addr<GameSession>, hub: Addr<Hub>) -> Self {
        GameWsSession { id: Uuid::new_v4(), identity, key, game_id, slot: None, game_addr, last_heartbeat: Instant::now(), hub }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                log::warn!("game session {} heartbeat timeout, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_message(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let msg: GameClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                send_json(ctx, &ServerMessage::GameError { code: "bad_request".into(), message: e.to_string() });
                return;
            }
        };

        let Some(slot) = self.slot else {
            if matches!(msg, GameClientMessage::Ping) {
                ctx.text(r#"{"type":"pong"}"#);
            } else {
                send_json(ctx, &ServerMessage::GameError { code: "not_authorized".into(), message: "spectators cannot act".into() });
            }
            return;
        };

        match msg {
            GameClientMessage::Ping => ctx.text(r#"{"type":"pong"}"#),
            GameClientMessage::Ready => self.game_addr.do_send(SetReady { slot }),
            GameClientMessage::Resign => self.game_addr.do_send(Resign { slot }),
            GameClientMessage::SubmitMove { piece_id, to_row, to_col } => {
                self.game_addr
                    .send(SubmitMove { slot, piece_id, to_row, to_col })
                    .into_actor(self)
                    .then(|res, _act, ctx| {
                        if let Ok(Err(err)) = res {
                            send_json(ctx, &ServerMessage::GameError { code: err.code().to_string(), message: err.to_string() });
                        }
                        fut::ready(())
                    })
                    .wait(ctx);
            }
        }
    }
}

impl Actor for GameWsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("game session {} started for game {}", self.id, self.game_id);
        self.start_heartbeat(ctx);
        self.hub.do_send(Register { session_id: self.id, addr: ctx.address().recipient() });
        self.hub.do_send(Attach { session_id: self.id, channel: ChannelId::game(&self.game_id) });

        self.game_addr
            .send(ResolveSlot { key: self.key.clone().unwrap_or_default() })
            .into_actor(self)
            .then(|res, act, ctx| {
                if let Ok(slot) = res {
                    act.slot = slot;
                }
                act.game_addr
                    .send(GetSnapshot)
                    .into_actor(act)
                    .then(|snap, act, ctx| {
                        if let Ok(snapshot) = snap {
                            send_json(ctx, &ServerMessage::GameSnapshot { game_id: act.game_id.clone(), snapshot });
                        }
                        fut::ready(())
                    })
                    .wait(ctx);
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.hub.do_send(Unregister { session_id: self.id });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GameWsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_message(&text, ctx),
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => self.last_heartbeat = Instant::now(),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) | Ok(ws::Message::Binary(_)) => {}
            Err(e) => {
                log::error!("game session {} protocol error: {}", self.id, e);
                ctx.stop();
            }
        }
    }
}

impl Handler<Deliver> for GameWsSession {
    type Result = ();
    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// ---------------------------------------------------------------------------
// HTTP -> WebSocket upgrade handlers
// ---------------------------------------------------------------------------

pub async fn lobby_ws(req: HttpRequest, stream: web::Payload, app_state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    let identity = resolve_identity(&req);
    let session = LobbySession::new(identity, app_state);
    ws::start(session, &req, stream)
}

pub async fn game_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let game_id = path.into_inner();
    let identity = resolve_identity(&req);
    let key = resolve_key(&req);
    let game_addr = {
        let games = app_state.games.lock().expect("games registry mutex poisoned");
        games.get(&game_id).cloned()
    };
    let Some(game_addr) = game_addr else {
        return Ok(HttpResponse::NotFound().body("game not found"));
    };
    let session = GameWsSession::new(identity, key, game_id, game_addr, app_state.hub.clone());
    ws::start(session, &req, stream)
}
