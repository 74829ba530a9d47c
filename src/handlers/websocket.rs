use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, trace, warn};
use std::net::IpAddr;
use warp::ws::{Message, WebSocket};

use crate::core::hub::Hub;

// Handle a WebSocket connection
//
// The hub owns the connection from here on. This task only reads, to notice
// when the client goes away; a spawned writer drains the outbound queue.
pub async fn handle_ws_client(ws: WebSocket, hub: Hub, client_ip: Option<IpAddr>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut queue = match hub.connect(client_ip) {
        Ok(queue) => queue,
        Err(e) => {
            warn!("Refusing WebSocket client: {}", e);
            let _ = ws_tx.send(Message::close()).await;
            return;
        }
    };
    let connection_id = queue.id;

    // Forward queued notifications to the socket in enqueue order
    let eviction = queue.eviction();
    let writer_hub = hub.clone();
    let mut writer = tokio::spawn(async move {
        let forward = async {
            while let Some(payload) = queue.next().await {
                if let Err(e) = ws_tx.send(Message::text(payload.as_ref())).await {
                    debug!("Write to connection {} failed: {}", connection_id, e);
                    writer_hub.unregister(connection_id);
                    return;
                }
            }
            if let Err(e) = ws_tx.close().await {
                trace!("Closing connection {} failed: {}", connection_id, e);
            }
        };

        // An evicted client is not reading, so a pending send may never
        // complete. Abandon it and release the socket.
        tokio::select! {
            _ = eviction.notified() => {
                debug!("Connection {} evicted, dropping its socket", connection_id);
            }
            _ = forward => {}
        }

        drop(ws_tx);
        // The queue is dropped last, after the socket is released
        drop(queue);
    });

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(msg)) if msg.is_close() => {
                    debug!("Connection {} sent close", connection_id);
                    break;
                }
                Some(Ok(_)) => trace!("Ignoring inbound frame from {}", connection_id),
                Some(Err(e)) => {
                    debug!("Read from connection {} failed: {}", connection_id, e);
                    break;
                }
                None => break,
            },
            // Writer finished first: evicted, shut down or failed to write.
            // Leaving drops the read half too, which closes the socket.
            _ = &mut writer => break,
        }
    }

    hub.unregister(connection_id);
}
