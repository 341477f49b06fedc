//! Scripted in-process peer standing in for a chat server.

use crate::error::SocklineError;
use crate::Result;
use sockline_types::{ClientFrame, ServerFrame};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Channel depth for each direction of a link.
const LINK_CHANNEL_DEPTH: usize = 64;

#[derive(Debug)]
struct PeerInner {
    /// Delay in microseconds before accepting a connect and before each ack.
    latency_us: AtomicU64,
    /// Connect attempts left to refuse.
    refuse_connects: AtomicU32,
    /// Publishes left to swallow (no ack, no fan-out).
    drop_publishes: AtomicU32,
    /// Whether publishes are fanned back as `Message` frames.
    echo: AtomicBool,
    /// Next sequence number; keeps increasing across links, the way a real
    /// channel's history does across reconnects.
    next_seq: AtomicU64,
}

/// The far end of the wire, entirely in-process.
///
/// Each accepted connect attempt gets its own frame channels and a spawned
/// link task. Script knobs may be adjusted at any time, including while a
/// link is live.
#[derive(Debug, Clone)]
pub struct SimulatedPeer {
    inner: Arc<PeerInner>,
}

impl Default for SimulatedPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPeer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PeerInner {
                latency_us: AtomicU64::new(0),
                refuse_connects: AtomicU32::new(0),
                drop_publishes: AtomicU32::new(0),
                echo: AtomicBool::new(true),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Delay applied before accepting a connect and before each ack.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_us
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next_connects(&self, n: u32) {
        self.inner.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Swallow the next `n` publishes: no receipt, no fan-out.
    pub fn drop_next_publishes(&self, n: u32) {
        self.inner.drop_publishes.store(n, Ordering::SeqCst);
    }

    /// Whether publishes are fanned back to the sender as `Message` frames.
    /// On by default.
    pub fn set_echo(&self, echo: bool) {
        self.inner.echo.store(echo, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        Duration::from_micros(self.inner.latency_us.load(Ordering::SeqCst))
    }

    /// One connect attempt. Applies scripted latency and refusals; on accept,
    /// spawns the link task serving the returned channels.
    pub(crate) async fn open_link(&self) -> Result<PeerLink> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if take_one(&self.inner.refuse_connects) {
            debug!(target: "sockline::peer", "Refusing connect (scripted)");
            return Err(SocklineError::ConnectRefused("scripted refusal".to_string()));
        }

        let (client_tx, client_rx) = mpsc::channel(LINK_CHANNEL_DEPTH);
        let (server_tx, server_rx) = mpsc::channel(LINK_CHANNEL_DEPTH);
        tokio::spawn(run_link(self.inner.clone(), client_rx, server_tx));
        debug!(target: "sockline::peer", "Link accepted");

        Ok(PeerLink {
            tx: client_tx,
            rx: server_rx,
        })
    }
}

/// Frame channels for one accepted link: client frames in, server frames out.
#[derive(Debug)]
pub(crate) struct PeerLink {
    pub(crate) tx: mpsc::Sender<ClientFrame>,
    pub(crate) rx: mpsc::Receiver<ServerFrame>,
}

/// Decrement `counter` if positive. True when a unit was consumed.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn run_link(
    peer: Arc<PeerInner>,
    mut rx: mpsc::Receiver<ClientFrame>,
    tx: mpsc::Sender<ServerFrame>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            ClientFrame::Publish { id, body } => {
                if take_one(&peer.drop_publishes) {
                    trace!(target: "sockline::peer", "Dropping publish {} (scripted)", id);
                    continue;
                }
                let latency = Duration::from_micros(peer.latency_us.load(Ordering::SeqCst));
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                let seq = peer.next_seq.fetch_add(1, Ordering::SeqCst);
                if tx.send(ServerFrame::Delivered { id, seq }).await.is_err() {
                    break;
                }
                if peer.echo.load(Ordering::SeqCst)
                    && tx.send(ServerFrame::Message { seq, body }).await.is_err()
                {
                    break;
                }
            }
            ClientFrame::Ping { nonce } => {
                if tx.send(ServerFrame::Pong { nonce }).await.is_err() {
                    break;
                }
            }
            ClientFrame::Close { code, reason } => {
                // Confirm and end the link; the drop closes the channel
                let _ = tx.send(ServerFrame::Closed { code, reason }).await;
                break;
            }
        }
    }
    trace!(target: "sockline::peer", "Link task ended");
}
