use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::backplane::{Backplane, Envelope};
use super::events::{Room, ServerEvent};

struct Connection {
    user_id: String,
    announced: bool,
    sender: mpsc::UnboundedSender<String>,
}

struct Inner {
    worker_id: String,
    backplane: Arc<dyn Backplane>,
    connections: DashMap<String, Connection>,
    rooms: DashMap<String, HashSet<String>>,
    online: DashMap<String, usize>,
}

/// Socket registry and room membership for this process.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

impl Hub {
    pub fn new(backplane: Arc<dyn Backplane>) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker_id: format!("{}-{}", std::process::id(), Uuid::new_v4().simple()),
                backplane,
                connections: DashMap::new(),
                rooms: DashMap::new(),
                online: DashMap::new(),
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Starts delivering backplane envelopes to local sockets.
    pub fn start(&self) {
        let mut receiver = self.inner.backplane.subscribe();
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => hub.deliver(&envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Realtime hub lagging, skipped {} envelopes.", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::info!("Realtime backplane closed.");
                        break;
                    }
                }
            }
        });
    }

    /// Adds a socket for `user_id`; it is placed in the global room. Frames
    /// for it arrive on the returned receiver.
    pub fn register(&self, user_id: &str) -> (String, mpsc::UnboundedReceiver<String>) {
        let socket_id = Uuid::new_v4().simple().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inner.connections.insert(
            socket_id.clone(),
            Connection {
                user_id: user_id.to_string(),
                announced: false,
                sender,
            },
        );
        self.join(&socket_id, &Room::Global);

        (socket_id, receiver)
    }

    /// Drops the socket from every room. Returns true when it was the user's
    /// last announced connection on this process.
    pub fn unregister(&self, socket_id: &str) -> bool {
        let Some((_, connection)) = self.inner.connections.remove(socket_id) else {
            return false;
        };

        self.inner.rooms.retain(|_, members| {
            members.remove(socket_id);
            !members.is_empty()
        });

        if !connection.announced {
            return false;
        }

        let mut last = false;
        self.inner.online.remove_if_mut(&connection.user_id, |_, count| {
            *count = count.saturating_sub(1);
            last = *count == 0;
            last
        });
        last
    }

    pub fn join(&self, socket_id: &str, room: &Room) {
        self.inner
            .rooms
            .entry(room.key())
            .or_default()
            .insert(socket_id.to_string());
    }

    pub fn leave(&self, socket_id: &str, room: &Room) {
        let key = room.key();
        if let Some(mut members) = self.inner.rooms.get_mut(&key) {
            members.remove(socket_id);
        }
        self.inner.rooms.remove_if(&key, |_, members| members.is_empty());
    }

    pub fn is_member(&self, socket_id: &str, room: &Room) -> bool {
        self.inner
            .rooms
            .get(&room.key())
            .map(|members| members.contains(socket_id))
            .unwrap_or(false)
    }

    /// Counts the socket's user as online until the socket goes away.
    pub fn mark_online(&self, socket_id: &str) -> Option<String> {
        let user_id = {
            let mut connection = self.inner.connections.get_mut(socket_id)?;
            if connection.announced {
                return Some(connection.user_id.clone());
            }
            connection.announced = true;
            connection.user_id.clone()
        };
        *self.inner.online.entry(user_id.clone()).or_insert(0) += 1;
        Some(user_id)
    }

    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .inner
            .online
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }

    /// Sends straight to one local socket, bypassing the backplane.
    pub fn send_to(&self, socket_id: &str, event: &ServerEvent) {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Could not encode realtime event: {}", e);
                return;
            }
        };
        if let Some(connection) = self.inner.connections.get(socket_id) {
            let _ = connection.sender.send(frame);
        }
    }

    pub async fn emit(&self, room: Room, event: &ServerEvent) {
        self.publish(room, None, event).await;
    }

    /// Like [`Hub::emit`] but skips `socket_id`.
    pub async fn emit_except(&self, room: Room, socket_id: &str, event: &ServerEvent) {
        self.publish(room, Some(socket_id.to_string()), event).await;
    }

    async fn publish(&self, room: Room, except: Option<String>, event: &ServerEvent) {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Could not encode realtime event: {}", e);
                return;
            }
        };

        let envelope = Envelope {
            room: room.key(),
            except,
            frame,
        };
        if let Err(e) = self.inner.backplane.publish(envelope).await {
            log::error!("Could not publish realtime event to {}: {:#}", room.key(), e);
        }
    }

    fn deliver(&self, envelope: &Envelope) {
        let Some(members) = self.inner.rooms.get(&envelope.room) else {
            return;
        };
        let targets: Vec<String> = members
            .iter()
            .filter(|socket_id| envelope.except.as_deref() != Some(socket_id.as_str()))
            .cloned()
            .collect();
        drop(members);

        for socket_id in targets {
            if let Some(connection) = self.inner.connections.get(&socket_id) {
                let _ = connection.sender.send(envelope.frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::realtime::backplane::LocalBackplane;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub() -> Hub {
        let hub = Hub::new(Arc::new(LocalBackplane::new()));
        hub.start();
        hub
    }

    async fn next_event(receiver: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let frame = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("frame in time")
            .expect("open channel");
        serde_json::from_str(&frame).unwrap()
    }

    fn deleted(message_id: &str) -> ServerEvent {
        ServerEvent::MessageDeleted {
            message_id: message_id.into(),
            chat_id: "c1".into(),
        }
    }

    #[tokio::test]
    async fn room_members_receive_emits() {
        let hub = hub();
        let (alice, mut alice_rx) = hub.register("alice");
        let (_bob, mut bob_rx) = hub.register("bob");
        hub.join(&alice, &Room::Chat("c1".into()));

        hub.emit(Room::Chat("c1".into()), &deleted("m1")).await;
        hub.emit(Room::Global, &deleted("m2")).await;

        assert_eq!(next_event(&mut alice_rx).await["data"]["messageId"], "m1");
        assert_eq!(next_event(&mut alice_rx).await["data"]["messageId"], "m2");
        assert_eq!(next_event(&mut bob_rx).await["data"]["messageId"], "m2");
    }

    #[tokio::test]
    async fn emit_except_skips_the_sender() {
        let hub = hub();
        let (alice, mut alice_rx) = hub.register("alice");
        let (bob, mut bob_rx) = hub.register("bob");
        let room = Room::Chat("c1".into());
        hub.join(&alice, &room);
        hub.join(&bob, &room);

        hub.emit_except(room.clone(), &alice, &deleted("m1")).await;
        hub.emit(room, &deleted("m2")).await;

        assert_eq!(next_event(&mut bob_rx).await["data"]["messageId"], "m1");
        assert_eq!(next_event(&mut alice_rx).await["data"]["messageId"], "m2");
    }

    #[tokio::test]
    async fn leaving_and_unregistering_stop_delivery() {
        let hub = hub();
        let (alice, mut alice_rx) = hub.register("alice");
        let room = Room::User("alice".into());
        hub.join(&alice, &room);
        assert!(hub.is_member(&alice, &room));

        hub.leave(&alice, &room);
        assert!(!hub.is_member(&alice, &room));
        hub.emit(room, &deleted("m1")).await;
        hub.emit(Room::Global, &deleted("m2")).await;
        assert_eq!(next_event(&mut alice_rx).await["data"]["messageId"], "m2");

        hub.mark_online(&alice);
        assert_eq!(hub.online_users(), vec!["alice".to_string()]);
        assert!(hub.unregister(&alice));
        assert!(hub.online_users().is_empty());
        assert!(!hub.is_member(&alice, &Room::Global));
    }

    #[tokio::test]
    async fn direct_sends_reach_only_one_socket() {
        let hub = hub();
        let (alice, mut alice_rx) = hub.register("alice");
        let (_bob, mut bob_rx) = hub.register("bob");

        hub.send_to(&alice, &ServerEvent::error("nope"));

        assert_eq!(next_event(&mut alice_rx).await["event"], "error");
        assert!(bob_rx.try_recv().is_err());
    }
}
