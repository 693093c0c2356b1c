use std::collections::HashMap;

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Handle used to push messages to one connected participant.
#[derive(Clone)]
pub struct ParticipantConnection {
    /// Identifier of this particular connection, not of the participant.
    ///
    /// A reconnect creates a new id, which lets teardown paths ignore
    /// notifications about connections that were already replaced.
    pub id: Uuid,
    /// Writer-task channel of the WebSocket.
    pub tx: mpsc::UnboundedSender<Message>,
}

impl ParticipantConnection {
    /// Wrap a writer channel with a fresh connection id.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }
}

#[derive(Default)]
struct SessionConnections {
    host: Option<ParticipantConnection>,
    players: HashMap<String, ParticipantConnection>,
}

/// Registry of live connections per session.
///
/// Holds exactly one host slot and one player slot per display name for each
/// PIN. Pure connection bookkeeping: role admission decisions are made by the
/// session engine, which is this registry's only writer.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, SessionConnections>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the host connection for `pin`, returning the replaced one.
    pub fn install_host(
        &self,
        pin: &str,
        connection: ParticipantConnection,
    ) -> Option<ParticipantConnection> {
        let mut entry = self.sessions.entry(pin.to_owned()).or_default();
        entry.host.replace(connection)
    }

    /// Whether a host connection is currently installed for `pin`.
    pub fn has_host(&self, pin: &str) -> bool {
        self.sessions
            .get(pin)
            .is_some_and(|entry| entry.host.is_some())
    }

    /// Remove the host connection if it still is the one identified by `conn_id`.
    pub fn remove_host(&self, pin: &str, conn_id: Uuid) -> bool {
        let Some(mut entry) = self.sessions.get_mut(pin) else {
            return false;
        };
        if entry.host.as_ref().is_some_and(|host| host.id == conn_id) {
            entry.host = None;
            true
        } else {
            false
        }
    }

    /// Install (or re-associate) the connection for player `name`.
    pub fn install_player(
        &self,
        pin: &str,
        name: &str,
        connection: ParticipantConnection,
    ) -> Option<ParticipantConnection> {
        let mut entry = self.sessions.entry(pin.to_owned()).or_default();
        entry.players.insert(name.to_owned(), connection)
    }

    /// Whether player `name` currently has a live connection.
    pub fn has_player(&self, pin: &str, name: &str) -> bool {
        self.sessions
            .get(pin)
            .is_some_and(|entry| entry.players.contains_key(name))
    }

    /// Remove the player connection if it still is the one identified by `conn_id`.
    pub fn remove_player(&self, pin: &str, name: &str, conn_id: Uuid) -> bool {
        let Some(mut entry) = self.sessions.get_mut(pin) else {
            return false;
        };
        if entry
            .players
            .get(name)
            .is_some_and(|player| player.id == conn_id)
        {
            entry.players.remove(name);
            true
        } else {
            false
        }
    }

    /// Forcibly remove player `name`'s connection regardless of its id.
    ///
    /// Used for kicks, where the engine evicts whatever connection the player
    /// currently holds. Returns the evicted connection so a goodbye message
    /// can still be pushed onto it.
    pub fn evict_player(&self, pin: &str, name: &str) -> Option<ParticipantConnection> {
        self.sessions
            .get_mut(pin)
            .and_then(|mut entry| entry.players.remove(name))
    }

    /// Drop every connection of a session, closing the sockets via channel drop.
    pub fn drop_session(&self, pin: &str) {
        self.sessions.remove(pin);
    }

    /// Send a payload to the host connection. Returns `false` if there is
    /// no live host or the writer channel is closed.
    pub fn send_to_host<T>(&self, pin: &str, payload: &T) -> bool
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let Some(tx) = self
            .sessions
            .get(pin)
            .and_then(|entry| entry.host.as_ref().map(|host| host.tx.clone()))
        else {
            return false;
        };
        send_json(&tx, payload)
    }

    /// Send a payload to one player connection.
    pub fn send_to_player<T>(&self, pin: &str, name: &str, payload: &T) -> bool
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let Some(tx) = self
            .sessions
            .get(pin)
            .and_then(|entry| entry.players.get(name).map(|player| player.tx.clone()))
        else {
            return false;
        };
        send_json(&tx, payload)
    }

    /// Deliver a payload to every player connection of a session.
    ///
    /// Delivery is best-effort per connection: a dead player socket is logged,
    /// torn out of the registry, and reported back, but never blocks or fails
    /// delivery to the others.
    pub fn broadcast_to_players<T>(&self, pin: &str, payload: &T) -> Vec<String>
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let targets: Vec<(String, mpsc::UnboundedSender<Message>)> = match self.sessions.get(pin) {
            Some(entry) => entry
                .players
                .iter()
                .map(|(name, connection)| (name.clone(), connection.tx.clone()))
                .collect(),
            None => return Vec::new(),
        };

        let mut failed = Vec::new();
        for (name, tx) in targets {
            if !send_json(&tx, payload) {
                warn!(%pin, player = %name, "broadcast send failed; dropping connection");
                failed.push(name);
            }
        }

        if !failed.is_empty()
            && let Some(mut entry) = self.sessions.get_mut(pin)
        {
            for name in &failed {
                entry.players.remove(name);
            }
        }

        failed
    }
}

/// Serialize a payload and push it onto the provided WebSocket writer channel.
///
/// Serialization failures are permanent (a bug in the payload type), so they
/// are logged and swallowed; a closed writer channel reports `false` so the
/// caller can tear the connection down.
pub fn send_json<T>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> bool
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return true;
        }
    };

    tx.send(Message::Text(payload.into())).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (ParticipantConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ParticipantConnection::new(tx), rx)
    }

    #[derive(Debug, Serialize)]
    struct Ping {
        value: u32,
    }

    #[test]
    fn broadcast_skips_dead_connections_without_failing_others() {
        let registry = ConnectionRegistry::new();
        let (alive, mut alive_rx) = connection();
        let (dead, dead_rx) = connection();
        drop(dead_rx);

        registry.install_player("111111", "Ada", alive);
        registry.install_player("111111", "Bea", dead);

        let failed = registry.broadcast_to_players("111111", &Ping { value: 7 });
        assert_eq!(failed, vec!["Bea".to_owned()]);
        assert!(alive_rx.try_recv().is_ok());
        assert!(!registry.has_player("111111", "Bea"));
        assert!(registry.has_player("111111", "Ada"));
    }

    #[test]
    fn stale_connection_ids_cannot_unregister_a_replacement() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = connection();
        let first_id = first.id;
        registry.install_player("222222", "Ada", first);

        let (second, _second_rx) = connection();
        let replaced = registry.install_player("222222", "Ada", second);
        assert_eq!(replaced.map(|c| c.id), Some(first_id));

        // The old socket's teardown must not evict the new connection.
        assert!(!registry.remove_player("222222", "Ada", first_id));
        assert!(registry.has_player("222222", "Ada"));
    }

    #[test]
    fn host_slot_holds_a_single_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connection();
        let (second, _rx2) = connection();
        let second_id = second.id;

        assert!(registry.install_host("333333", first).is_none());
        assert!(registry.install_host("333333", second).is_some());
        assert!(registry.has_host("333333"));
        assert!(registry.remove_host("333333", second_id));
        assert!(!registry.has_host("333333"));
    }
}
