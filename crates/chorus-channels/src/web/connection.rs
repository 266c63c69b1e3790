//! Per-connection workers: one reader, one writer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chorus_core::config::HubConfig;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hub::{ConnectionId, Frame, HubHandle};
use super::protocol::Envelope;

/// Application-level consumer of client events.
///
/// Called from the connection's reader, so events from one client are
/// handled in order.
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    async fn handle(&self, conn: ConnectionId, event: Envelope);
}

/// Keepalive and size limits for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_interval: Duration,
    pub max_message_bytes: usize,
}

impl Deadlines {
    /// Hard cap for the socket layer.
    ///
    /// Text frames over `max_message_bytes` are skipped by the reader; this
    /// bound keeps a client from making the transport buffer anything much
    /// larger before that check runs. Exceeding it is a protocol error and
    /// closes the socket.
    pub fn socket_limit(&self) -> usize {
        self.max_message_bytes.saturating_mul(4).max(16 * 1024)
    }
}

impl From<&HubConfig> for Deadlines {
    fn from(config: &HubConfig) -> Self {
        Self {
            write_wait: Duration::from_secs(config.write_wait_secs),
            pong_wait: Duration::from_secs(config.pong_wait_secs),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            max_message_bytes: config.max_message_bytes,
        }
    }
}

/// Drive one upgraded socket until it closes or `shutdown` fires.
///
/// `user_id` is the authenticated identity; it overrides whatever the
/// client puts in its envelopes.
pub async fn serve(
    socket: WebSocket,
    user_id: String,
    hub: HubHandle,
    handler: Arc<dyn ClientEventHandler>,
    deadlines: Deadlines,
    shutdown: CancellationToken,
) {
    let (sink, stream) = socket.split();
    drive(sink, stream, user_id, hub, handler, deadlines, shutdown).await;
}

/// Reader and writer over any message transport.
pub(super) async fn drive<Si, St, E>(
    sink: Si,
    mut stream: St,
    user_id: String,
    hub: HubHandle,
    handler: Arc<dyn ClientEventHandler>,
    deadlines: Deadlines,
    shutdown: CancellationToken,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let (conn, outbound) = match hub.register().await {
        Ok(registered) => registered,
        Err(e) => {
            warn!("web: cannot register {user_id}: {e}");
            return;
        }
    };
    info!("web: {user_id} connected as {conn}");

    let cancel = shutdown.child_token();

    let writer = tokio::spawn(write_loop(sink, outbound, deadlines, cancel.clone()));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(deadlines.pong_wait, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!("web: {conn} missed its keepalive deadline");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("web: read error on {conn}: {e}");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if text.len() > deadlines.max_message_bytes {
                    warn!("web: {conn} sent {} bytes, frame ignored", text.len());
                    continue;
                }
                match Envelope::decode(text.as_str()) {
                    Ok(mut event) => {
                        event.user_id = user_id.clone();
                        handler.handle(conn, event).await;
                    }
                    Err(e) => warn!("web: malformed frame from {conn}: {e}"),
                }
            }
            Message::Close(_) => break,
            // Pings and pongs only refresh the read deadline.
            _ => {}
        }
    }

    cancel.cancel();
    if let Err(e) = hub.unregister(conn).await {
        debug!("web: unregister {conn}: {e}");
    }
    let _ = writer.await;
    info!("web: {conn} disconnected");
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Frame>,
    deadlines: Deadlines,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping = interval_at(
        Instant::now() + deadlines.ping_interval,
        deadlines.ping_interval,
    );

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => None,
            frame = outbound.recv() => match frame {
                Some(frame) => Some(Message::Text(frame.to_string().into())),
                // The hub dropped us: unregistered, evicted, or shutting down.
                None => None,
            },
            _ = ping.tick() => Some(Message::Ping(Default::default())),
        };

        let Some(msg) = msg else {
            let _ = timeout(deadlines.write_wait, sink.send(Message::Close(None))).await;
            break;
        };

        match timeout(deadlines.write_wait, sink.send(msg)).await {
            Ok(Ok(())) => {}
            _ => break,
        }
    }

    cancel.cancel();
}
