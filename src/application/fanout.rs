//! Live distribution of server status transitions.
//!
//! Subscriber sets are kept per server id in a sharded [`DashMap`], so fanout
//! for one server never waits on another server's lock for longer than a
//! shard operation. Sends go to unbounded channels and never await; each
//! connection drains its channel onto the wire on its own task.

use crate::domain::ports::LedgerStoreRef;
use crate::domain::server::{ServerId, ServerStatus};
use crate::error::StoreResult;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnectionId = u64;

/// Outbound message: `{"type":"status","serverId":…,"status":…}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "status", rename_all = "camelCase")]
pub struct StatusMessage {
    pub server_id: ServerId,
    pub status: ServerStatus,
}

struct Subscriber {
    connection: ConnectionId,
    sender: mpsc::UnboundedSender<StatusMessage>,
    last_sent: Option<ServerStatus>,
}

struct Connection {
    sender: mpsc::UnboundedSender<StatusMessage>,
    servers: HashSet<ServerId>,
}

pub struct StatusFanout {
    store: LedgerStoreRef,
    subscribers: DashMap<ServerId, Vec<Subscriber>>,
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
}

impl StatusFanout {
    pub fn new(store: LedgerStoreRef) -> Arc<Self> {
        Arc::new(Self {
            store,
            subscribers: DashMap::new(),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a live connection.
    ///
    /// Messages for it arrive on the returned receiver. Dropping the guard
    /// removes every subscription the connection holds.
    pub fn connect(
        self: &Arc<Self>,
    ) -> (ConnectionGuard, mpsc::UnboundedReceiver<StatusMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Connection {
                sender,
                servers: HashSet::new(),
            },
        );
        debug!(connection = id, "Connection registered");

        let guard = ConnectionGuard {
            id,
            fanout: Arc::clone(self),
        };
        (guard, receiver)
    }

    /// Subscribes `connection` to `server_id` and sends it the current status.
    ///
    /// Returns the snapshot status, or `None` if the server is unknown or the
    /// connection is already gone. A new subscription is only kept once its
    /// snapshot was read.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        server_id: ServerId,
    ) -> StoreResult<Option<ServerStatus>> {
        let (sender, added) = match self.connections.get_mut(&connection) {
            Some(mut conn) => {
                let added = conn.servers.insert(server_id);
                (conn.sender.clone(), added)
            }
            None => return Ok(None),
        };

        {
            let mut subs = self.subscribers.entry(server_id).or_default();
            // Checked under the entry lock so a concurrent teardown either sees
            // this subscriber or prevents it from being added.
            if !self.connections.contains_key(&connection) {
                drop(subs);
                self.subscribers.remove_if(&server_id, |_, subs| subs.is_empty());
                return Ok(None);
            }
            if !subs.iter().any(|s| s.connection == connection) {
                subs.push(Subscriber {
                    connection,
                    sender,
                    last_sent: None,
                });
            }
        }
        debug!(connection, server_id = %server_id, "Subscribed");

        match self.store.get_server_status(server_id).await {
            Ok(Some(status)) => {
                self.deliver_snapshot(connection, server_id, status);
                Ok(Some(status))
            }
            result => {
                if added {
                    self.unsubscribe(connection, server_id);
                }
                result
            }
        }
    }

    /// Removes one subscription. Unknown pairs are ignored.
    pub fn unsubscribe(&self, connection: ConnectionId, server_id: ServerId) {
        if let Some(mut conn) = self.connections.get_mut(&connection) {
            conn.servers.remove(&server_id);
        }
        self.remove_subscriber(connection, server_id);
    }

    /// Sends `status` to every subscriber of `server_id`, dropping subscribers
    /// whose connection has gone away. Returns the number of deliveries.
    pub fn publish(&self, server_id: ServerId, status: ServerStatus) -> usize {
        let message = StatusMessage { server_id, status };
        let delivered = match self.subscribers.get_mut(&server_id) {
            Some(mut subs) => {
                subs.retain_mut(|sub| match sub.sender.send(message.clone()) {
                    Ok(()) => {
                        sub.last_sent = Some(status);
                        true
                    }
                    Err(_) => {
                        debug!(connection = sub.connection, server_id = %server_id, "Dropping closed subscriber");
                        false
                    }
                });
                subs.len()
            }
            None => 0,
        };
        self.subscribers.remove_if(&server_id, |_, subs| subs.is_empty());
        delivered
    }

    /// Answers an on-demand status query from the ledger.
    pub async fn snapshot(&self, server_id: ServerId) -> StoreResult<Option<ServerStatus>> {
        self.store.get_server_status(server_id).await
    }

    /// Removes a connection and all of its subscriptions.
    pub fn disconnect(&self, connection: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&connection) else {
            return;
        };
        for server_id in conn.servers {
            self.remove_subscriber(connection, server_id);
        }
        debug!(connection, "Connection torn down");
    }

    pub fn subscriber_count(&self, server_id: ServerId) -> usize {
        self.subscribers.get(&server_id).map_or(0, |subs| subs.len())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn deliver_snapshot(&self, connection: ConnectionId, server_id: ServerId, status: ServerStatus) {
        let Some(mut subs) = self.subscribers.get_mut(&server_id) else {
            return;
        };
        let Some(index) = subs.iter().position(|s| s.connection == connection) else {
            return;
        };

        let sub = &mut subs[index];
        // A publish may have overtaken the snapshot read; never move a
        // subscriber back to a non-terminal status.
        if sub.last_sent.is_some_and(|sent| sent.is_terminal()) && !status.is_terminal() {
            return;
        }
        if sub.sender.send(StatusMessage { server_id, status }).is_ok() {
            sub.last_sent = Some(status);
        } else {
            subs.swap_remove(index);
        }
    }

    fn remove_subscriber(&self, connection: ConnectionId, server_id: ServerId) {
        if let Some(mut subs) = self.subscribers.get_mut(&server_id) {
            subs.retain(|s| s.connection != connection);
        }
        self.subscribers.remove_if(&server_id, |_, subs| subs.is_empty());
    }
}

/// Owns one registered connection; dropping it tears the connection down.
pub struct ConnectionGuard {
    id: ConnectionId,
    fanout: Arc<StatusFanout>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn subscribe(&self, server_id: ServerId) -> StoreResult<Option<ServerStatus>> {
        self.fanout.subscribe(self.id, server_id).await
    }

    pub fn unsubscribe(&self, server_id: ServerId) {
        self.fanout.unsubscribe(self.id, server_id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.fanout.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Amount, Payment, PaymentIntentRef, PaymentStatus};
    use crate::domain::ports::LedgerStore;
    use crate::domain::server::{GameType, PackageTier, Region, Server};
    use crate::infrastructure::in_memory::InMemoryLedgerStore;

    async fn store_with_server() -> (Arc<InMemoryLedgerStore>, ServerId) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let server = Server::new(
            "user-1".into(),
            GameType::Factorio,
            Region::Nyc,
            PackageTier::new(1).unwrap(),
        );
        let payment = Payment::new(server.id, Amount::new(300).unwrap(), "eur");
        let server_id = server.id;
        store.create_server_and_payment(server, payment.clone()).await.unwrap();
        store
            .attach_intent_reference(payment.id, PaymentIntentRef::new("pi_fan"))
            .await
            .unwrap();
        (store, server_id)
    }

    #[tokio::test]
    async fn test_subscribe_sends_snapshot_first() {
        let (store, server_id) = store_with_server().await;
        let fanout = StatusFanout::new(store);
        let (conn, mut rx) = fanout.connect();

        let snapshot = conn.subscribe(server_id).await.unwrap();
        assert_eq!(snapshot, Some(ServerStatus::Installing));
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusMessage {
                server_id,
                status: ServerStatus::Installing
            }
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_post_transition_status() {
        let (store, server_id) = store_with_server().await;
        store
            .conditional_update_payment_status(
                &PaymentIntentRef::new("pi_fan"),
                PaymentStatus::RequiresPaymentMethod,
                PaymentStatus::Succeeded,
            )
            .await
            .unwrap();

        let fanout = StatusFanout::new(store);
        let (conn, mut rx) = fanout.connect();
        conn.subscribe(server_id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().status, ServerStatus::Active);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let (store, server_id) = store_with_server().await;
        let fanout = StatusFanout::new(store);
        let (a, mut rx_a) = fanout.connect();
        let (b, mut rx_b) = fanout.connect();
        a.subscribe(server_id).await.unwrap();
        b.subscribe(server_id).await.unwrap();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        assert_eq!(fanout.publish(server_id, ServerStatus::Active), 2);
        assert_eq!(fanout.publish(server_id, ServerStatus::Active), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap().status, ServerStatus::Active);
            assert_eq!(rx.recv().await.unwrap().status, ServerStatus::Active);
        }
    }

    #[tokio::test]
    async fn test_snapshot_never_regresses_after_publish() {
        let (store, server_id) = store_with_server().await;
        let fanout = StatusFanout::new(store);
        let (conn, mut rx) = fanout.connect();
        conn.subscribe(server_id).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().status, ServerStatus::Installing);

        fanout.publish(server_id, ServerStatus::Active);
        // A stale snapshot arriving after the transition is suppressed.
        fanout.deliver_snapshot(conn.id(), server_id, ServerStatus::Installing);

        assert_eq!(rx.recv().await.unwrap().status, ServerStatus::Active);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (store, server_id) = store_with_server().await;
        let fanout = StatusFanout::new(store);
        let (conn, _rx) = fanout.connect();

        conn.unsubscribe(server_id);
        conn.subscribe(server_id).await.unwrap();
        assert_eq!(fanout.subscriber_count(server_id), 1);

        conn.unsubscribe(server_id);
        conn.unsubscribe(server_id);
        fanout.unsubscribe(999, ServerId::new());
        assert_eq!(fanout.subscriber_count(server_id), 0);
    }

    #[tokio::test]
    async fn test_dropping_guard_tears_down_all_subscriptions() {
        let (store, server_id) = store_with_server().await;
        let other = ServerId::new();
        let fanout = StatusFanout::new(store);
        let (conn, rx) = fanout.connect();
        conn.subscribe(server_id).await.unwrap();
        conn.subscribe(other).await.unwrap();
        assert_eq!(fanout.connection_count(), 1);

        drop(conn);
        drop(rx);

        assert_eq!(fanout.connection_count(), 0);
        assert_eq!(fanout.subscriber_count(server_id), 0);
        assert_eq!(fanout.subscriber_count(other), 0);
        assert_eq!(fanout.publish(server_id, ServerStatus::Active), 0);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_pruned_on_publish() {
        let (store, server_id) = store_with_server().await;
        let fanout = StatusFanout::new(store);
        let (conn, rx) = fanout.connect();
        conn.subscribe(server_id).await.unwrap();
        drop(rx);

        assert_eq!(fanout.publish(server_id, ServerStatus::Failed), 0);
        assert_eq!(fanout.subscriber_count(server_id), 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_disconnect_is_ignored() {
        let (store, server_id) = store_with_server().await;
        let fanout = StatusFanout::new(store);
        let (conn, _rx) = fanout.connect();
        let id = conn.id();
        drop(conn);

        assert_eq!(fanout.subscribe(id, server_id).await.unwrap(), None);
        assert_eq!(fanout.subscriber_count(server_id), 0);
    }

    #[tokio::test]
    async fn test_subscribe_to_unknown_server_leaves_nothing_behind() {
        let (store, server_id) = store_with_server().await;
        let unknown = ServerId::new();
        let fanout = StatusFanout::new(store);
        let (conn, mut rx) = fanout.connect();
        conn.subscribe(server_id).await.unwrap();
        rx.recv().await.unwrap();

        assert_eq!(conn.subscribe(unknown).await.unwrap(), None);
        assert_eq!(fanout.subscriber_count(unknown), 0);
        assert!(!fanout.subscribers.contains_key(&unknown));
        assert!(!fanout.connections.get(&conn.id()).unwrap().servers.contains(&unknown));
        assert_eq!(fanout.publish(unknown, ServerStatus::Active), 0);

        assert_eq!(fanout.subscriber_count(server_id), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_message_shape() {
        let server_id = ServerId::new();
        let json = serde_json::to_value(StatusMessage {
            server_id,
            status: ServerStatus::Active,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "status",
                "serverId": server_id.to_string(),
                "status": "active"
            })
        );
    }
}
