//! Broadcast hub actor.
//!
//! The hub task is the only owner of the client registry. Callers talk to it
//! through [`HubHandle`], which turns every operation into a command on the
//! hub's control channel. Each client gets a bounded outbound buffer; a
//! client whose buffer is full when a broadcast arrives is dropped instead
//! of stalling the broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chorus_core::config::HubConfig;
use chorus_core::error::ChorusError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::Envelope;

/// Identifies one live connection.
pub type ConnectionId = Uuid;

/// An encoded frame, shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

const CONTROL_CAPACITY: usize = 1024;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Clients dropped because their buffer was full or closed.
    pub evicted: usize,
}

/// Registry snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub clients: usize,
    pub subscriptions: usize,
}

enum Command {
    Register {
        conn: ConnectionId,
        outbound: mpsc::Sender<Frame>,
    },
    Unregister {
        conn: ConnectionId,
    },
    Subscribe {
        conn: ConnectionId,
        channel: String,
    },
    Broadcast {
        channel: String,
        frame: Frame,
        except: Option<ConnectionId>,
        done: oneshot::Sender<BroadcastReport>,
    },
    Direct {
        conn: ConnectionId,
        frame: Frame,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

struct Client {
    outbound: mpsc::Sender<Frame>,
    channels: HashSet<String>,
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
    buffer: usize,
}

/// The hub actor state. Lives inside the task started by [`Hub::spawn`].
pub struct Hub {
    clients: HashMap<ConnectionId, Client>,
    rx: mpsc::Receiver<Command>,
}

impl Hub {
    /// Start the hub. It runs until `shutdown` fires or every handle is dropped,
    /// then drains its clients.
    pub fn spawn(config: &HubConfig, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
        let hub = Hub {
            clients: HashMap::new(),
            rx,
        };
        let handle = HubHandle {
            tx,
            buffer: config.outbound_buffer.max(1),
        };
        (handle, tokio::spawn(hub.run(shutdown)))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }
        self.drain();
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { conn, outbound } => {
                self.clients.insert(
                    conn,
                    Client {
                        outbound,
                        channels: HashSet::new(),
                    },
                );
                debug!("hub: registered {conn} ({} clients)", self.clients.len());
            }
            Command::Unregister { conn } => {
                if self.clients.remove(&conn).is_some() {
                    debug!("hub: unregistered {conn} ({} clients)", self.clients.len());
                }
            }
            Command::Subscribe { conn, channel } => match self.clients.get_mut(&conn) {
                Some(client) => {
                    client.channels.insert(channel);
                }
                None => debug!("hub: subscribe from unknown connection {conn}"),
            },
            Command::Broadcast {
                channel,
                frame,
                except,
                done,
            } => {
                let report = self.broadcast(&channel, frame, except);
                let _ = done.send(report);
            }
            Command::Direct { conn, frame } => {
                let Some(client) = self.clients.get(&conn) else {
                    return;
                };
                if let Err(e) = client.outbound.try_send(frame) {
                    self.evict(conn, &e);
                }
            }
            Command::Stats { reply } => {
                let _ = reply.send(HubStats {
                    clients: self.clients.len(),
                    subscriptions: self.clients.values().map(|c| c.channels.len()).sum(),
                });
            }
        }
    }

    fn broadcast(
        &mut self,
        channel: &str,
        frame: Frame,
        except: Option<ConnectionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (conn, client) in &self.clients {
            if Some(*conn) == except || !client.channels.contains(channel) {
                continue;
            }
            match client.outbound.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => failed.push((*conn, e)),
            }
        }

        for (conn, err) in failed {
            self.evict(conn, &err);
            report.evicted += 1;
        }
        report
    }

    /// Drop a client. Its writer sees the closed buffer and closes the socket.
    fn evict(&mut self, conn: ConnectionId, reason: &TrySendError<Frame>) {
        if self.clients.remove(&conn).is_none() {
            return;
        }
        match reason {
            TrySendError::Full(_) => warn!("hub: {conn} is not keeping up, disconnecting"),
            TrySendError::Closed(_) => debug!("hub: {conn} already gone"),
        }
    }

    fn drain(&mut self) {
        let count = self.clients.len();
        self.clients.clear();
        info!("hub: stopped, drained {count} clients");
    }
}

impl HubHandle {
    async fn command(&self, cmd: Command) -> Result<(), ChorusError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ChorusError::Channel("hub stopped".to_string()))
    }

    /// Admit a new client. The receiver is its outbound buffer.
    pub async fn register(&self) -> Result<(ConnectionId, mpsc::Receiver<Frame>), ChorusError> {
        let conn = Uuid::new_v4();
        let (outbound, rx) = mpsc::channel(self.buffer);
        self.command(Command::Register { conn, outbound }).await?;
        Ok((conn, rx))
    }

    /// Remove a client. Unknown or already removed clients are ignored.
    pub async fn unregister(&self, conn: ConnectionId) -> Result<(), ChorusError> {
        self.command(Command::Unregister { conn }).await
    }

    pub async fn subscribe(&self, conn: ConnectionId, channel: &str) -> Result<(), ChorusError> {
        self.command(Command::Subscribe {
            conn,
            channel: channel.to_string(),
        })
        .await
    }

    /// Deliver to every subscriber of `channel`.
    pub async fn broadcast(
        &self,
        channel: &str,
        envelope: &Envelope,
    ) -> Result<BroadcastReport, ChorusError> {
        self.broadcast_frame(channel, envelope, None).await
    }

    /// Deliver to every subscriber of `channel` except `conn`.
    pub async fn broadcast_except(
        &self,
        channel: &str,
        envelope: &Envelope,
        conn: ConnectionId,
    ) -> Result<BroadcastReport, ChorusError> {
        self.broadcast_frame(channel, envelope, Some(conn)).await
    }

    async fn broadcast_frame(
        &self,
        channel: &str,
        envelope: &Envelope,
        except: Option<ConnectionId>,
    ) -> Result<BroadcastReport, ChorusError> {
        let frame: Frame = Arc::from(envelope.encode()?);
        let (done, report) = oneshot::channel();
        self.command(Command::Broadcast {
            channel: channel.to_string(),
            frame,
            except,
            done,
        })
        .await?;
        report
            .await
            .map_err(|_| ChorusError::Channel("hub stopped".to_string()))
    }

    /// Deliver to a single client, with the same slow-consumer policy.
    pub async fn send_to(&self, conn: ConnectionId, envelope: &Envelope) -> Result<(), ChorusError> {
        let frame: Frame = Arc::from(envelope.encode()?);
        self.command(Command::Direct { conn, frame }).await
    }

    pub async fn stats(&self) -> Result<HubStats, ChorusError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Stats { reply }).await?;
        rx.await
            .map_err(|_| ChorusError::Channel("hub stopped".to_string()))
    }
}
