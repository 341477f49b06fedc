//! Message fan-out hub.
//!
//! The hub owns the registry of connected clients, assigns the global
//! sequence number to every published message, and replays retained
//! history to clients that join late.

use dashmap::DashMap;
use sockline_types::ServerFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Shared fan-out state for all WebSocket sessions.
pub struct Hub {
    /// Maps client_id -> outgoing frame channel
    clients: DashMap<Uuid, mpsc::Sender<ServerFrame>>,
    /// Recent messages retained for replay, oldest first
    history: Mutex<VecDeque<(u64, String)>>,
    history_limit: usize,
    /// Connection slots claimed via `admit` and not yet returned
    admitted: AtomicUsize,
    next_seq: AtomicU64,
    relayed: AtomicU64,
    dropped: AtomicU64,
}

impl Hub {
    pub fn new(history_limit: usize) -> Self {
        Self {
            clients: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit,
            admitted: AtomicUsize::new(0),
            next_seq: AtomicU64::new(1),
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Claim a connection slot, refusing when `limit` are already out. The
    /// claim is a single compare-and-swap; two racing sessions can never
    /// both take the last slot. Deregistering the registered client returns
    /// the slot.
    pub fn admit(&self, limit: usize) -> bool {
        self.admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Register an admitted client's outgoing channel under its id.
    pub fn register(&self, client_id: Uuid, tx: mpsc::Sender<ServerFrame>) {
        self.clients.insert(client_id, tx);
        debug!(target: "sockline::hub", "Registered client {} ({} online)", client_id, self.clients.len());
    }

    /// Remove a client from the registry and return its connection slot.
    /// Removing an absent id is a no-op.
    pub fn deregister(&self, client_id: &Uuid) {
        if self.clients.remove(client_id).is_some() {
            let _ = self
                .admitted
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            debug!(target: "sockline::hub", "Deregistered client {} ({} online)", client_id, self.clients.len());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Assign the next sequence number to `body`, retain it for replay, and
    /// fan it out to every registered client. Returns the assigned number.
    ///
    /// Seq assignment, the ring update, and the fan-out all happen under the
    /// history lock: two concurrent publishes must not be able to record or
    /// deliver their seqs out of order. Nothing in the critical section
    /// blocks; fan-out uses `try_send`.
    pub async fn publish(&self, body: String) -> u64 {
        let mut history = self.history.lock().await;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        history.push_back((seq, body.clone()));
        while history.len() > self.history_limit {
            history.pop_front();
        }

        // Snapshot the registry so no shard lock is held while sending.
        let targets: Vec<(Uuid, mpsc::Sender<ServerFrame>)> = self
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let fanout = targets.len();

        for (client_id, tx) in targets {
            let frame = ServerFrame::Message {
                seq,
                body: body.clone(),
            };
            // A full or closed channel means a slow or vanished client;
            // skip it rather than stall everyone else.
            if tx.try_send(frame).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "sockline::hub", "Dropped message {} for client {}", seq, client_id);
            }
        }
        drop(history);

        self.relayed.fetch_add(1, Ordering::Relaxed);
        debug!(target: "sockline::hub", "Relayed message {} to {} clients", seq, fanout);
        seq
    }

    /// Send the retained history to one client, oldest first.
    pub async fn replay_to(&self, tx: &mpsc::Sender<ServerFrame>) {
        let frames: Vec<ServerFrame> = {
            let history = self.history.lock().await;
            history
                .iter()
                .map(|(seq, body)| ServerFrame::Message {
                    seq: *seq,
                    body: body.clone(),
                })
                .collect()
        };

        for frame in frames {
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    }

    /// Total messages accepted for fan-out since startup.
    pub fn messages_relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Frames discarded because a client channel was full or closed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
