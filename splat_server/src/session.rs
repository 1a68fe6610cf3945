//! Session records.
//!
//! One [`Session`] per connection. Network handlers only touch their own
//! session's subscription, intent and debug fields; world changes go
//! through the simulation.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    net::SocketAddr,
};

use splat_shared::{
    ecs::EntityId,
    net::{DebugOptions, InputIntent, SessionId},
};

/// Per-connection state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub peer: Option<SocketAddr>,
    /// Receives per-tick `update` snapshots.
    pub subscribed: bool,
    /// The player entity, present exactly while in game.
    pub entity: Option<EntityId>,
    /// Latest intent; reset to neutral after every tick.
    pub intent: InputIntent,
    pub debug: DebugOptions,
}

impl Session {
    pub fn new(id: SessionId, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer,
            subscribed: false,
            entity: None,
            intent: InputIntent::default(),
            debug: DebugOptions::default(),
        }
    }

    pub fn in_game(&self) -> bool {
        self.entity.is_some()
    }
}

/// Rejected session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    UnknownSession(SessionId),
    AlreadyInGame { session: SessionId, entity: EntityId },
    NotInGame(SessionId),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownSession(id) => write!(f, "unknown session {}", id.0),
            SessionError::AlreadyInGame { session, entity } => write!(
                f,
                "session {} is already in game as entity {}",
                session.0, entity.0
            ),
            SessionError::NotInGame(id) => write!(f, "session {} is not in game", id.0),
        }
    }
}

impl std::error::Error for SessionError {}

/// All live sessions, ordered by id.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: BTreeMap<SessionId, Session>,
}

impl SessionManager {
    /// Registers a new connection. Re-registering an id resets it.
    pub fn connect(&mut self, id: SessionId, peer: Option<SocketAddr>) -> &mut Session {
        let session = Session::new(id, peer);
        match self.sessions.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(session);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(session),
        }
    }

    /// Drops the record. The caller must release the owned entity first.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Result<&Session, SessionError> {
        self.sessions.get(&id).ok_or(SessionError::UnknownSession(id))
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut Session, SessionError> {
        self.sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))
    }

    pub fn set_subscribed(&mut self, id: SessionId, subscribed: bool) -> Result<(), SessionError> {
        self.get_mut(id)?.subscribed = subscribed;
        Ok(())
    }

    /// Replaces the pending intent wholesale.
    pub fn set_intent(&mut self, id: SessionId, intent: InputIntent) -> Result<(), SessionError> {
        self.get_mut(id)?.intent = intent;
        Ok(())
    }

    /// Resets every session's intent to neutral.
    pub fn reset_intents(&mut self) {
        for session in self.sessions.values_mut() {
            session.intent = InputIntent::default();
        }
    }

    /// Sessions that receive `update` broadcasts.
    pub fn subscribers(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions
            .values()
            .filter(|s| s.subscribed)
            .map(|s| s.id)
    }

    /// `(entity, intent)` for every in-game session, by session id.
    pub fn player_intents(&self) -> Vec<(EntityId, InputIntent)> {
        self.sessions
            .values()
            .filter_map(|s| s.entity.map(|e| (e, s.intent)))
            .collect()
    }

    /// Session owning `entity`, if any.
    pub fn owner_of(&self, entity: EntityId) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.entity == Some(entity))
            .map(|s| s.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_is_reported() {
        let mut sessions = SessionManager::default();
        let id = SessionId(77);
        assert_eq!(
            sessions.set_subscribed(id, true),
            Err(SessionError::UnknownSession(id))
        );
        assert_eq!(
            SessionError::UnknownSession(id).to_string(),
            "unknown session 77"
        );
    }

    #[test]
    fn intents_are_replaced_then_reset() {
        let mut sessions = SessionManager::default();
        let id = SessionId(1);
        sessions.connect(id, None).entity = Some(EntityId(4));

        let intent = InputIntent {
            move_x: 1.0,
            jump: true,
            ..InputIntent::default()
        };
        sessions.set_intent(id, intent).unwrap();
        sessions
            .set_intent(
                id,
                InputIntent {
                    primary: true,
                    ..InputIntent::default()
                },
            )
            .unwrap();
        let pending = sessions.player_intents();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].1.primary);
        assert!(!pending[0].1.jump, "replaced, not merged");

        sessions.reset_intents();
        assert!(sessions.get(id).unwrap().intent.is_neutral());
    }

    #[test]
    fn only_subscribed_sessions_receive_updates() {
        let mut sessions = SessionManager::default();
        sessions.connect(SessionId(1), None);
        sessions.connect(SessionId(2), None);
        sessions.set_subscribed(SessionId(2), true).unwrap();
        assert_eq!(sessions.subscribers().collect::<Vec<_>>(), vec![SessionId(2)]);
    }
}
