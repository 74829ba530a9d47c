//! Broadcast hub that owns every live connection
//!
//! All membership changes and fan-outs are commands on one queue, applied in
//! order by a single task. Nothing else touches the connection set, so a
//! broadcast always sees exactly the connections registered before it was
//! enqueued, and a connection never receives anything after its removal.

use futures_util::future::join_all;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use crate::core::connection::{Connection, ConnectionId, Delivery, OutboundQueue};
use crate::core::envelope::NotificationEnvelope;
use crate::error::{MurmurError, Result};

/// Counters reported by the hub loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub evictions: u64,
    /// Evicted connections whose writer has not released its socket yet
    pub evicting: usize,
}

enum HubCommand {
    Register(Connection),
    Unregister(ConnectionId),
    Broadcast {
        kind: &'static str,
        payload: Arc<str>,
    },
    Stats(oneshot::Sender<HubStats>),
    Shutdown(oneshot::Sender<Vec<oneshot::Receiver<()>>>),
}

/// Handle to the hub loop. Cheap to clone, every clone feeds the same loop.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
    outbound_capacity: usize,
}

impl Hub {
    /// Start the hub loop. Each connection gets an outbound queue of
    /// `outbound_capacity` payloads; overflowing it evicts the connection.
    pub fn spawn(outbound_capacity: usize) -> Self {
        let outbound_capacity = outbound_capacity.max(1);
        let (commands, intake) = mpsc::unbounded_channel();
        tokio::spawn(HubLoop::default().run(intake));
        info!(
            "Broadcast hub started (outbound queue capacity {})",
            outbound_capacity
        );

        Self {
            commands,
            outbound_capacity,
        }
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// Create a connection sized for this hub and register it
    pub fn connect(&self, client_ip: Option<IpAddr>) -> Result<OutboundQueue> {
        let (connection, queue) = Connection::new(client_ip, self.outbound_capacity);
        self.register(connection)?;
        Ok(queue)
    }

    /// Add a connection to the live set. It receives broadcasts enqueued
    /// after this call, never earlier ones.
    pub fn register(&self, connection: Connection) -> Result<()> {
        self.commands
            .send(HubCommand::Register(connection))
            .map_err(|_| MurmurError::HubClosed)
    }

    /// Remove a connection and close its queue. Unknown IDs are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        if self.commands.send(HubCommand::Unregister(id)).is_err() {
            trace!("Hub already stopped, nothing to unregister for {}", id);
        }
    }

    /// Queue a notification for every currently registered connection.
    /// Never waits on consumers.
    pub fn broadcast(&self, envelope: &NotificationEnvelope) -> Result<()> {
        let payload = envelope.to_payload()?;
        self.commands
            .send(HubCommand::Broadcast {
                kind: envelope.kind(),
                payload,
            })
            .map_err(|_| {
                debug!("Dropping {} broadcast, hub is shut down", envelope.kind());
                MurmurError::HubClosed
            })
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Stats(reply))
            .map_err(|_| MurmurError::HubClosed)?;
        response.await.map_err(|_| MurmurError::HubClosed)
    }

    pub async fn connection_count(&self) -> Result<usize> {
        Ok(self.stats().await?.connections)
    }

    /// Stop the hub: close every outbound queue, then give writers up to
    /// `drain_timeout` to flush what they already hold. Returns how many
    /// connections were open.
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Shutdown(reply))
            .map_err(|_| MurmurError::HubClosed)?;
        let pending = response.await.map_err(|_| MurmurError::HubClosed)?;

        let count = pending.len();
        info!("Draining {} connections (timeout {:?})", count, drain_timeout);
        match tokio::time::timeout(drain_timeout, join_all(pending)).await {
            Ok(_) => info!("All connections drained"),
            Err(_) => warn!(
                "Drain timeout reached, abandoning connections that are still flushing"
            ),
        }
        Ok(count)
    }
}

#[derive(Default)]
struct HubLoop {
    connections: HashMap<ConnectionId, Connection>,
    broadcasts: u64,
    deliveries: u64,
    evictions: u64,
    evicted: Vec<oneshot::Receiver<()>>,
}

impl HubLoop {
    async fn run(mut self, mut intake: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = intake.recv().await {
            match command {
                HubCommand::Register(connection) => self.register(connection),
                HubCommand::Unregister(id) => self.unregister(id),
                HubCommand::Broadcast { kind, payload } => self.fan_out(kind, &payload),
                HubCommand::Stats(reply) => {
                    self.reap_evicted();
                    let _ = reply.send(self.stats());
                }
                HubCommand::Shutdown(reply) => {
                    // Refuse new commands before anyone learns we stopped
                    intake.close();
                    let pending = self
                        .connections
                        .drain()
                        .map(|(_, connection)| connection.close())
                        .collect();
                    let _ = reply.send(pending);
                    break;
                }
            }
        }
        info!("Broadcast hub stopped");
    }

    fn register(&mut self, connection: Connection) {
        info!(
            "Client connected: {} ({})",
            connection.id,
            connection
                .client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown address".to_string())
        );
        self.connections.insert(connection.id, connection);
        info!("Current connections: {}", self.connections.len());
    }

    fn unregister(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            info!(
                "Client disconnected: {} after {:?}",
                id,
                connection.connection_duration()
            );
            info!("Current connections: {}", self.connections.len());
        }
    }

    fn fan_out(&mut self, kind: &str, payload: &Arc<str>) {
        self.broadcasts += 1;

        let mut delivered = 0u64;
        let mut dropped = Vec::new();
        for (id, connection) in &self.connections {
            match connection.try_deliver(payload) {
                Delivery::Queued => delivered += 1,
                Delivery::Saturated => {
                    warn!("{}", MurmurError::SlowConsumer(id.to_string()));
                    self.evictions += 1;
                    dropped.push((*id, true));
                }
                Delivery::Closed => {
                    debug!("Connection {} writer already gone, removing", id);
                    dropped.push((*id, false));
                }
            }
        }

        // Dropping the connection closes its queue and ends its writer.
        // Evicted writers are told to let go of the socket without flushing.
        for (id, saturated) in dropped {
            if let Some(connection) = self.connections.remove(&id) {
                if saturated {
                    self.evicted.push(connection.evict());
                }
            }
        }

        self.deliveries += delivered;
        debug!("Broadcast {} to {} clients", kind, delivered);
    }

    // Forget evicted writers that have finished tearing down
    fn reap_evicted(&mut self) {
        self.evicted
            .retain_mut(|finished| matches!(finished.try_recv(), Err(TryRecvError::Empty)));
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            broadcasts: self.broadcasts,
            deliveries: self.deliveries,
            evictions: self.evictions,
            evicting: self.evicted.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::NotificationEnvelope;

    fn update(score: i64) -> NotificationEnvelope {
        NotificationEnvelope::vote_update(1, score)
    }

    fn payload(score: i64) -> Arc<str> {
        update(score).to_payload().unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_registered_connection() {
        let hub = Hub::spawn(8);
        let mut queues: Vec<_> = (0..3).map(|_| hub.connect(None).unwrap()).collect();

        hub.broadcast(&update(5)).unwrap();

        for queue in &mut queues {
            assert_eq!(queue.next().await, Some(payload(5)));
        }
        assert_eq!(hub.connection_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_late_registration_misses_earlier_broadcast() {
        let hub = Hub::spawn(8);
        let mut early = hub.connect(None).unwrap();

        hub.broadcast(&update(1)).unwrap();
        let mut late = hub.connect(None).unwrap();
        hub.broadcast(&update(2)).unwrap();

        assert_eq!(early.next().await, Some(payload(1)));
        assert_eq!(early.next().await, Some(payload(2)));
        assert_eq!(late.next().await, Some(payload(2)));
        assert!(late.try_next().is_none());
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_others_unaffected() {
        let hub = Hub::spawn(2);
        let mut slow = hub.connect(None).unwrap();
        let mut fast = hub.connect(None).unwrap();

        for score in 0..5 {
            hub.broadcast(&update(score)).unwrap();
            assert_eq!(fast.next().await, Some(payload(score)));
        }

        // The slow client keeps what was queued before eviction, then its
        // queue ends
        assert_eq!(slow.next().await, Some(payload(0)));
        assert_eq!(slow.next().await, Some(payload(1)));
        assert!(slow.next().await.is_none());

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.broadcasts, 5);
    }

    #[tokio::test]
    async fn test_eviction_signals_writer_and_tracks_teardown() {
        let hub = Hub::spawn(1);
        let slow = hub.connect(None).unwrap();
        let eviction = slow.eviction();

        hub.broadcast(&update(1)).unwrap();
        hub.broadcast(&update(2)).unwrap();

        tokio::time::timeout(Duration::from_secs(1), eviction.notified())
            .await
            .expect("evicted writer was not signalled");
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.evicting, 1);

        drop(slow);
        assert_eq!(hub.stats().await.unwrap().evicting, 0);
    }

    #[tokio::test]
    async fn test_spawn_clamps_zero_capacity() {
        let hub = Hub::spawn(0);
        assert_eq!(hub.outbound_capacity(), 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = Hub::spawn(4);
        let (connection, mut queue) = Connection::new(None, 4);
        let id = connection.id;
        hub.register(connection).unwrap();

        hub.unregister(id);
        hub.unregister(id);
        hub.unregister(ConnectionId::new_v4());

        assert_eq!(hub.connection_count().await.unwrap(), 0);
        assert!(queue.next().await.is_none());

        hub.broadcast(&update(3)).unwrap();
        assert_eq!(hub.stats().await.unwrap().deliveries, 0);
    }

    #[tokio::test]
    async fn test_per_connection_order_matches_broadcast_order() {
        let hub = Hub::spawn(64);
        let mut queue = hub.connect(None).unwrap();

        for score in 0..50 {
            hub.broadcast(&update(score)).unwrap();
        }
        for score in 0..50 {
            assert_eq!(queue.next().await, Some(payload(score)));
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_refuses_work() {
        let hub = Hub::spawn(4);
        let mut queue = hub.connect(None).unwrap();
        hub.broadcast(&update(7)).unwrap();

        let writer = tokio::spawn(async move {
            let mut flushed = Vec::new();
            while let Some(payload) = queue.next().await {
                flushed.push(payload);
            }
            flushed
        });

        let closed = hub.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(closed, 1);
        assert_eq!(writer.await.unwrap(), vec![payload(7)]);

        assert!(matches!(hub.connect(None), Err(MurmurError::HubClosed)));
        assert!(matches!(
            hub.broadcast(&update(8)),
            Err(MurmurError::HubClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_on_stuck_writer() {
        let hub = Hub::spawn(4);
        // Held but never read, so the writer never finishes
        let _stuck = hub.connect(None).unwrap();

        let closed = hub.shutdown(Duration::from_millis(20)).await.unwrap();
        assert_eq!(closed, 1);
    }
}
