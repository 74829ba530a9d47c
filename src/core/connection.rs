//! WebSocket connection management
//! Handles the hub-facing half and the writer-facing half of a client link

use log::trace;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outcome of offering a payload to a connection's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue at capacity, the client is not keeping up
    Saturated,
    /// Writer side is gone
    Closed,
}

/// Hub-side state of a single live connection.
///
/// Owned by the hub's membership set. Dropping it closes the outbound queue,
/// which lets the writer flush what is already queued and then close the link.
pub struct Connection {
    pub id: ConnectionId,
    pub client_ip: Option<IpAddr>,
    pub connected_at: Instant,
    sender: mpsc::Sender<Arc<str>>,
    finished: oneshot::Receiver<()>,
    eviction: Arc<Notify>,
}

/// Writer-side half of a connection: the private bounded queue
pub struct OutboundQueue {
    pub id: ConnectionId,
    receiver: mpsc::Receiver<Arc<str>>,
    eviction: Arc<Notify>,
    // Dropped together with the queue, tells the hub the writer is done
    _finished: oneshot::Sender<()>,
}

impl Connection {
    /// Create a connection with a unique ID and an outbound queue holding at
    /// most `capacity` payloads
    pub fn new(client_ip: Option<IpAddr>, capacity: usize) -> (Self, OutboundQueue) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (finished_tx, finished_rx) = oneshot::channel();
        let eviction = Arc::new(Notify::new());

        let connection = Self {
            id,
            client_ip,
            connected_at: Instant::now(),
            sender,
            finished: finished_rx,
            eviction: eviction.clone(),
        };
        let queue = OutboundQueue {
            id,
            receiver,
            eviction,
            _finished: finished_tx,
        };
        (connection, queue)
    }

    /// Offer a payload without waiting
    pub fn try_deliver(&self, payload: &Arc<str>) -> Delivery {
        match self.sender.try_send(payload.clone()) {
            Ok(()) => {
                trace!("Queued message for connection {}", self.id);
                Delivery::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Saturated,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Close the outbound queue and return a signal that resolves once the
    /// writer has dropped its half
    pub(crate) fn close(self) -> oneshot::Receiver<()> {
        self.finished
    }

    /// Like [`Connection::close`], but also tells the writer to drop its
    /// socket at once instead of flushing to a client that stopped reading
    pub(crate) fn evict(self) -> oneshot::Receiver<()> {
        self.eviction.notify_one();
        self.finished
    }
}

impl OutboundQueue {
    /// Next payload in enqueue order, None once the hub has let go of the
    /// connection and the queue is drained
    pub async fn next(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`OutboundQueue::next`]
    pub fn try_next(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }

    /// Signal fired when the hub evicts this connection. A permit is stored,
    /// so waiting after the eviction still completes.
    pub fn eviction(&self) -> Arc<Notify> {
        self.eviction.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let (connection, mut queue) = Connection::new(None, 4);
        for text in ["a", "b", "c"] {
            assert_eq!(connection.try_deliver(&Arc::from(text)), Delivery::Queued);
        }
        assert_eq!(queue.next().await.as_deref(), Some("a"));
        assert_eq!(queue.next().await.as_deref(), Some("b"));
        assert_eq!(queue.next().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_full_queue_reports_saturation() {
        let (connection, _queue) = Connection::new(None, 1);
        let payload: Arc<str> = Arc::from("x");
        assert_eq!(connection.try_deliver(&payload), Delivery::Queued);
        assert_eq!(connection.try_deliver(&payload), Delivery::Saturated);
    }

    #[tokio::test]
    async fn test_dropped_writer_reports_closed() {
        let (connection, queue) = Connection::new(None, 1);
        drop(queue);
        assert_eq!(connection.try_deliver(&Arc::from("x")), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_evict_signals_writer() {
        let (connection, queue) = Connection::new(None, 1);
        let eviction = queue.eviction();
        let finished = connection.evict();

        tokio::time::timeout(Duration::from_secs(1), eviction.notified())
            .await
            .expect("eviction signal not delivered");
        drop(queue);
        assert!(finished.await.is_err());
    }

    #[tokio::test]
    async fn test_close_does_not_signal_eviction() {
        let (connection, queue) = Connection::new(None, 1);
        let eviction = queue.eviction();
        let _finished = connection.close();

        assert!(
            tokio::time::timeout(Duration::from_millis(20), eviction.notified())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_close_drains_then_ends_queue() {
        let (connection, mut queue) = Connection::new(None, 2);
        connection.try_deliver(&Arc::from("last"));
        let finished = connection.close();

        assert_eq!(queue.next().await.as_deref(), Some("last"));
        assert!(queue.next().await.is_none());
        drop(queue);
        assert!(finished.await.is_err());
    }
}
