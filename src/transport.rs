//! Transport layer (spec component: Transport layer, §4.8).
//!
//! A single actor manages subscriber sets for both game channels and lobby
//! channels, generalizing the teacher's `GameBroadcaster` (`ws.rs`) — which
//! only ever tracked one kind of channel (`game_id`) — to the two distinct
//! channel kinds this spec needs. The per-channel fan-out logic is
//! otherwise identical to the original's `LobbyConnectionManager`
//! (`ws/lobby_handler.py`).

use actix::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Which kind of room a subscription names. Game and lobby codes never
/// collide with each other because they're tracked in separate maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Game,
    Lobby,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub kind: ChannelKind,
    pub key: String,
}

impl ChannelId {
    pub fn game(game_id: &str) -> Self {
        ChannelId { kind: ChannelKind::Game, key: game_id.to_string() }
    }

    pub fn lobby(code: &str) -> Self {
        ChannelId { kind: ChannelKind::Lobby, key: code.to_string() }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub session_id: Uuid,
    pub addr: Recipient<Deliver>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unregister {
    pub session_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Attach {
    pub session_id: Uuid,
    pub channel: ChannelId,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Detach {
    pub session_id: Uuid,
    pub channel: ChannelId,
}

/// A text frame pushed to every subscriber of a channel.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Broadcast {
    pub channel: ChannelId,
    pub text: String,
    /// Session to skip, if any (spec §4.8 `broadcast_except`).
    pub except: Option<Uuid>,
}

/// A text frame handed straight to one session, bypassing channel lookup.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct SendTo {
    pub session_id: Uuid,
    pub text: String,
}

/// Message delivered to a session actor's mailbox by the hub.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Deliver(pub String);

/// Central fan-out actor: every `WsSession` registers itself once on
/// connect, then attaches to whichever game/lobby channels it cares about.
#[derive(Default)]
pub struct Hub {
    sessions: HashMap<Uuid, Recipient<Deliver>>,
    channels: HashMap<ChannelId, HashSet<Uuid>>,
}

impl Hub {
    pub fn new() -> Self {
        Hub::default()
    }
}

impl Actor for Hub {
    type Context = Context<Self>;
}

impl Handler<Register> for Hub {
    type Result = ();
    fn handle(&mut self, msg: Register, _ctx: &mut Context<Self>) {
        self.sessions.insert(msg.session_id, msg.addr);
    }
}

impl Handler<Unregister> for Hub {
    type Result = ();
    fn handle(&mut self, msg: Unregister, _ctx: &mut Context<Self>) {
        self.sessions.remove(&msg.session_id);
        for subs in self.channels.values_mut() {
            subs.remove(&msg.session_id);
        }
        self.channels.retain(|_, subs| !subs.is_empty());
    }
}

impl Handler<Attach> for Hub {
    type Result = ();
    fn handle(&mut self, msg: Attach, _ctx: &mut Context<Self>) {
        self.channels.entry(msg.channel).or_default().insert(msg.session_id);
    }
}

impl Handler<Detach> for Hub {
    type Result = ();
    fn handle(&mut self, msg: Detach, _ctx: &mut Context<Self>) {
        if let Some(subs) = self.channels.get_mut(&msg.channel) {
            subs.remove(&msg.session_id);
            if subs.is_empty() {
                self.channels.remove(&msg.channel);
            }
        }
    }
}

impl Handler<Broadcast> for Hub {
    type Result = ();
    fn handle(&mut self, msg: Broadcast, _ctx: &mut Context<Self>) {
        let Some(subs) = self.channels.get(&msg.channel) else { return };
        for session_id in subs {
            if msg.except == Some(*session_id) {
                continue;
            }
            if let Some(recipient) = self.sessions.get(session_id) {
                recipient.do_send(Deliver(msg.text.clone()));
            }
        }
    }
}

impl Handler<SendTo> for Hub {
    type Result = ();
    fn handle(&mut self, msg: SendTo, _ctx: &mut Context<Self>) {
        if let Some(recipient) = self.sessions.get(&msg.session_id) {
            recipient.do_send(Deliver(msg.text));
        }
    }
}
