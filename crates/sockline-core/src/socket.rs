//! Socket manager: lifecycle, buffering, and delivery bookkeeping.

use crate::buffer::MessageBuffer;
use crate::error::SocklineError;
use crate::peer::{PeerLink, SimulatedPeer};
use crate::policy::ReconnectPolicy;
use crate::tracker::ConnectionTracker;
use crate::Result;
use sockline_types::{
    ClientFrame, CloseFrame, ConnectionState, ServerFrame, SocketEvent, TransitionRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tuning for a managed socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Capacity of the while-down message buffer.
    pub buffer_capacity: usize,
    /// Deadline for a single connect attempt.
    pub connect_timeout: Duration,
    /// Retry budget and backoff for [`SocketManager::reconnect`].
    pub reconnect: ReconnectPolicy,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Receipt for one acknowledged publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub id: Uuid,
    /// The peer's arrival-order sequence number.
    pub seq: u64,
}

/// Handle to one in-flight publish.
#[derive(Debug)]
pub struct Delivery {
    id: Uuid,
    rx: oneshot::Receiver<Result<Receipt>>,
}

impl Delivery {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves when the peer acknowledges the publish, or with an error
    /// when the link is torn down first. Never hangs past teardown.
    pub async fn wait(self) -> Result<Receipt> {
        match self.rx.await {
            Ok(result) => result,
            // Sender dropped without a verdict: the manager itself is gone
            Err(_) => Err(SocklineError::Aborted),
        }
    }
}

/// Where a send ended up.
#[derive(Debug)]
pub enum SendState {
    /// On the wire; the receipt resolves through the handle.
    Dispatched(Delivery),
    /// Held until the next successful (re)connect.
    Buffered,
    /// Rejected: the buffer is full.
    Dropped,
}

/// Running totals for one managed socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Publishes dispatched while connected.
    pub sent: u64,
    /// Receipts observed.
    pub delivered: u64,
    /// Sends buffered while the link was down.
    pub buffered: u64,
    /// Buffered messages flushed to the peer on (re)connect.
    pub flushed: u64,
    /// Sends rejected by a full buffer.
    pub dropped: u64,
    /// Link failures observed.
    pub errors: u32,
    /// Successful reconnects.
    pub reconnects: u32,
}

struct LinkHandle {
    tx: mpsc::Sender<ClientFrame>,
    reader: JoinHandle<()>,
    epoch: u64,
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

struct Inner {
    tracker: ConnectionTracker,
    buffer: MessageBuffer<String>,
    link: Option<LinkHandle>,
    pending: HashMap<Uuid, oneshot::Sender<Result<Receipt>>>,
    pending_pings: HashMap<u64, oneshot::Sender<Result<()>>>,
    /// Latched by `close()`, cleared by `connect()`.
    closed: bool,
    /// Bumped on every link install and teardown; readers from superseded
    /// links check it before touching state.
    link_epoch: u64,
    next_ping: u64,
    stats: SocketStats,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<SocketEvent>,
}

impl Shared {
    fn set_state(
        &self,
        inner: &mut Inner,
        to: ConnectionState,
        cause: impl Into<String>,
    ) -> Result<()> {
        inner.tracker.transition(to, cause)?;
        self.state_tx.send_replace(to);
        Ok(())
    }

    fn push_event(&self, inner: &mut Inner, event: SocketEvent) {
        inner.tracker.record_event(event.clone());
        let _ = self.event_tx.send(event);
    }

    /// Resolve every pending delivery and ping with `err`. Nothing waits
    /// past a teardown.
    fn fail_pending<F: Fn() -> SocklineError>(&self, inner: &mut Inner, err: F) {
        for (_, tx) in inner.pending.drain() {
            let _ = tx.send(Err(err()));
        }
        for (_, tx) in inner.pending_pings.drain() {
            let _ = tx.send(Err(err()));
        }
    }

    /// Tear down the live link after a failure and move to `Error`.
    fn fail_link(&self, inner: &mut Inner, reason: &str) {
        inner.stats.errors += 1;
        inner.link = None;
        inner.link_epoch += 1;
        if inner.tracker.state() == ConnectionState::Connected {
            let _ = self.set_state(
                inner,
                ConnectionState::Error,
                format!("peer_error: {reason}"),
            );
            self.push_event(
                inner,
                SocketEvent::Error {
                    reason: reason.to_string(),
                },
            );
        }
        self.fail_pending(inner, || SocklineError::ConnectionLost(reason.to_string()));
    }
}

/// Drives one simulated chat socket through its lifecycle.
///
/// Single-owner and event-driven: every operation is async, every state
/// change lands in the transition history, and everything observable is also
/// fanned out as a [`SocketEvent`]. Frames sent while connected reach the
/// peer in send order; frames buffered while down flush in enqueue order on
/// the next successful connect, ahead of anything sent after.
pub struct SocketManager {
    config: SocketConfig,
    peer: SimulatedPeer,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SocketManager {
    pub fn new(peer: SimulatedPeer, config: SocketConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                tracker: ConnectionTracker::new(),
                buffer: MessageBuffer::new(config.buffer_capacity),
                link: None,
                pending: HashMap::new(),
                pending_pings: HashMap::new(),
                closed: false,
                link_epoch: 0,
                next_ping: 1,
                stats: SocketStats::default(),
            }),
            state_tx,
            event_tx,
        });
        Self {
            config,
            peer,
            shared,
            state_rx,
        }
    }

    /// The peer handle, for scripting mid-test.
    pub fn peer(&self) -> &SimulatedPeer {
        &self.peer
    }

    /// Establish the link. Legal from `disconnected`; one attempt under
    /// `connect_timeout`. Clears the closed latch and flushes anything
    /// buffered once the link is up.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            self.shared
                .set_state(&mut inner, ConnectionState::Connecting, "connect")?;
            inner.closed = false;
        }
        match self.attempt_link().await {
            Ok(link) => {
                let (flush_tx, queued) = {
                    let mut inner = self.shared.inner.lock().await;
                    self.install_link(&mut inner, link, 1, "accepted".to_string())?
                };
                flush_queued(&self.shared, flush_tx, queued).await;
                Ok(())
            }
            Err(err) => {
                let mut inner = self.shared.inner.lock().await;
                if inner.tracker.state() == ConnectionState::Connecting {
                    let _ = self.shared.set_state(
                        &mut inner,
                        ConnectionState::Disconnected,
                        format!("connect failed: {err}"),
                    );
                }
                warn!(target: "sockline::conn", "Connect failed: {err}");
                Err(err)
            }
        }
    }

    /// Send a chat message.
    ///
    /// Connected: dispatched to the peer, receipt through the returned
    /// [`Delivery`]. Down but not closed: buffered, or dropped when the
    /// buffer is full. After `close()`: always an error, immediately.
    pub async fn send(&self, body: impl Into<String>) -> Result<SendState> {
        let body = body.into();
        let (tx, id, rx) = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.tracker.state();
            if inner.closed || state == ConnectionState::Closing {
                return Err(SocklineError::SendOnClosed(state));
            }
            if state != ConnectionState::Connected {
                return if inner.buffer.add(body) {
                    inner.stats.buffered += 1;
                    Ok(SendState::Buffered)
                } else {
                    inner.stats.dropped += 1;
                    Ok(SendState::Dropped)
                };
            }
            let Some(link_tx) = inner.link.as_ref().map(|link| link.tx.clone()) else {
                return Err(SocklineError::ConnectionLost("no live link".to_string()));
            };
            let id = Uuid::new_v4();
            let (ack_tx, ack_rx) = oneshot::channel();
            inner.pending.insert(id, ack_tx);
            inner.stats.sent += 1;
            (link_tx, id, ack_rx)
        };
        if tx.send(ClientFrame::Publish { id, body }).await.is_err() {
            let mut inner = self.shared.inner.lock().await;
            inner.pending.remove(&id);
            inner.stats.sent -= 1;
            return Err(SocklineError::ConnectionLost(
                "link channel closed".to_string(),
            ));
        }
        Ok(SendState::Dispatched(Delivery { id, rx }))
    }

    /// Orderly shutdown. Every pending delivery and ping resolves
    /// `Err(Aborted)`; buffered messages survive for the next connect.
    /// Subsequent sends fail until `connect()` is called again.
    pub async fn close(&self, frame: CloseFrame) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.closed = true;
        match inner.tracker.state() {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connected => {
                self.shared
                    .set_state(&mut inner, ConnectionState::Closing, "close")?;
                // Best-effort notice; teardown does not wait for the reply
                if let Some(tx) = inner.link.as_ref().map(|link| link.tx.clone()) {
                    let _ = tx.try_send(ClientFrame::Close {
                        code: frame.code,
                        reason: frame.reason.clone(),
                    });
                }
                inner.link = None;
                inner.link_epoch += 1;
                self.shared
                    .fail_pending(&mut inner, || SocklineError::Aborted);
                self.shared
                    .set_state(&mut inner, ConnectionState::Disconnected, "closed")?;
                self.shared.push_event(
                    &mut inner,
                    SocketEvent::Close {
                        code: frame.code,
                        reason: frame.reason,
                    },
                );
                info!(target: "sockline::conn", "Closed ({})", frame.code);
                Ok(())
            }
            // Connecting, reconnecting, or error: abandon the limbo outright
            _ => {
                inner.link = None;
                inner.link_epoch += 1;
                self.shared
                    .fail_pending(&mut inner, || SocklineError::Aborted);
                self.shared.set_state(
                    &mut inner,
                    ConnectionState::Disconnected,
                    "close: abandoned",
                )?;
                self.shared.push_event(
                    &mut inner,
                    SocketEvent::Close {
                        code: frame.code,
                        reason: frame.reason,
                    },
                );
                Ok(())
            }
        }
    }

    /// Simulate a mid-session connection failure. Legal while `connected`;
    /// pending deliveries fail with `ConnectionLost` and the socket parks in
    /// `error` until `reconnect()` or `close()`.
    pub async fn inject_error(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut inner = self.shared.inner.lock().await;
        if inner.tracker.state() != ConnectionState::Connected {
            return Err(SocklineError::InvalidTransition {
                from: inner.tracker.state(),
                to: ConnectionState::Error,
            });
        }
        warn!(target: "sockline::conn", "Injected failure: {reason}");
        self.shared.fail_link(&mut inner, &reason);
        Ok(())
    }

    /// Recover after a failure. Legal from `error`; retries under the
    /// configured policy and reports exhaustion as an error rather than
    /// retrying silently forever. Returns the attempt number that succeeded.
    pub async fn reconnect(&self) -> Result<u32> {
        {
            let mut inner = self.shared.inner.lock().await;
            self.shared
                .set_state(&mut inner, ConnectionState::Reconnecting, "reconnect")?;
        }
        let policy = self.config.reconnect.clone();
        let mut last_error = String::new();
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
            {
                let inner = self.shared.inner.lock().await;
                if inner.tracker.state() != ConnectionState::Reconnecting {
                    // close() abandoned the reconnect while we slept
                    return Err(SocklineError::Aborted);
                }
            }
            match self.attempt_link().await {
                Ok(link) => {
                    let (flush_tx, queued) = {
                        let mut inner = self.shared.inner.lock().await;
                        let installed = self.install_link(
                            &mut inner,
                            link,
                            attempt,
                            format!("reconnected (attempt {attempt})"),
                        )?;
                        inner.stats.reconnects += 1;
                        installed
                    };
                    flush_queued(&self.shared, flush_tx, queued).await;
                    return Ok(attempt);
                }
                Err(err) => {
                    debug!(
                        target: "sockline::conn",
                        "Reconnect attempt {attempt}/{} failed: {err}", policy.max_attempts
                    );
                    last_error = err.to_string();
                }
            }
        }
        let mut inner = self.shared.inner.lock().await;
        if inner.tracker.state() == ConnectionState::Reconnecting {
            let _ = self.shared.set_state(
                &mut inner,
                ConnectionState::Disconnected,
                "reconnect budget exhausted",
            );
        }
        Err(SocklineError::RetryBudgetExhausted {
            attempts: policy.max_attempts,
            last_error,
        })
    }

    /// Keepalive round trip. Resolves with the RTT.
    pub async fn ping(&self) -> Result<Duration> {
        let (tx, nonce, rx) = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.tracker.state();
            if inner.closed || state == ConnectionState::Closing {
                return Err(SocklineError::SendOnClosed(state));
            }
            if state != ConnectionState::Connected {
                return Err(SocklineError::ConnectionLost(format!(
                    "cannot ping while {state}"
                )));
            }
            let Some(link_tx) = inner.link.as_ref().map(|link| link.tx.clone()) else {
                return Err(SocklineError::ConnectionLost("no live link".to_string()));
            };
            let nonce = inner.next_ping;
            inner.next_ping += 1;
            let (pong_tx, pong_rx) = oneshot::channel();
            inner.pending_pings.insert(nonce, pong_tx);
            (link_tx, nonce, pong_rx)
        };
        let started = Instant::now();
        if tx.send(ClientFrame::Ping { nonce }).await.is_err() {
            let mut inner = self.shared.inner.lock().await;
            inner.pending_pings.remove(&nonce);
            return Err(SocklineError::ConnectionLost(
                "link channel closed".to_string(),
            ));
        }
        match rx.await {
            Ok(result) => result.map(|()| started.elapsed()),
            Err(_) => Err(SocklineError::Aborted),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to observable events as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The event feed as an async stream.
    pub fn event_stream(&self) -> BroadcastStream<SocketEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Wait until the socket reaches `target`.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        deadline: Duration,
    ) -> Result<()> {
        let mut rx = self.state_rx.clone();
        match tokio::time::timeout(deadline, rx.wait_for(|state| *state == target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SocklineError::ConnectionLost(
                "state channel closed".to_string(),
            )),
            Err(_) => Err(SocklineError::WaitTimeout(format!("state {target}"))),
        }
    }

    /// Ordered transition history so far.
    pub async fn transitions(&self) -> Vec<TransitionRecord> {
        self.shared.inner.lock().await.tracker.transitions().to_vec()
    }

    /// Ordered event history so far.
    pub async fn events(&self) -> Vec<SocketEvent> {
        self.shared.inner.lock().await.tracker.events().to_vec()
    }

    /// Tags of the event history, in order.
    pub async fn event_kinds(&self) -> Vec<&'static str> {
        self.shared.inner.lock().await.tracker.event_kinds()
    }

    /// Messages currently buffered.
    pub async fn buffered(&self) -> usize {
        self.shared.inner.lock().await.buffer.len()
    }

    /// Running totals.
    pub async fn stats(&self) -> SocketStats {
        self.shared.inner.lock().await.stats
    }

    async fn attempt_link(&self) -> Result<PeerLink> {
        match tokio::time::timeout(self.config.connect_timeout, self.peer.open_link()).await {
            Ok(result) => result,
            Err(_) => Err(SocklineError::ConnectTimeout(self.config.connect_timeout)),
        }
    }

    /// Wire up an accepted link: transition, spawn the reader, drain the
    /// buffer. The caller sends the drained messages after releasing the
    /// lock so the reader is free to process receipts during the flush.
    fn install_link(
        &self,
        inner: &mut Inner,
        link: PeerLink,
        attempt: u32,
        cause: String,
    ) -> Result<(mpsc::Sender<ClientFrame>, Vec<String>)> {
        self.shared
            .set_state(inner, ConnectionState::Connected, cause)
            // The state moved while the attempt was in flight (close() won)
            .map_err(|_| SocklineError::Aborted)?;

        let PeerLink { tx, rx } = link;
        let flush_tx = tx.clone();
        inner.link_epoch += 1;
        let epoch = inner.link_epoch;
        let reader = tokio::spawn(run_reader(self.shared.clone(), rx, epoch));
        inner.link = Some(LinkHandle { tx, reader, epoch });
        self.shared
            .push_event(inner, SocketEvent::Open { attempt });
        info!(target: "sockline::conn", "Link up (attempt {attempt})");

        // Drained here, counted as flushed only once each send succeeds
        let queued = inner.buffer.flush();
        Ok((flush_tx, queued))
    }
}

/// Send messages drained from the buffer, oldest first. Receipts surface as
/// `Delivered` events; flushed sends returned `Buffered` long ago, so there
/// is no per-message handle to resolve.
///
/// If the link dies mid-flush the unsent tail goes back to the front of the
/// buffer for the next connect, and only what actually reached the peer
/// counts as flushed. The reader surfaces the link failure itself.
async fn flush_queued(shared: &Arc<Shared>, tx: mpsc::Sender<ClientFrame>, queued: Vec<String>) {
    if queued.is_empty() {
        return;
    }
    debug!(
        target: "sockline::buffer",
        "Flushing {} buffered messages", queued.len()
    );
    let mut sent = 0u64;
    let mut unsent = Vec::new();
    let mut drained = queued.into_iter();
    for body in drained.by_ref() {
        let id = Uuid::new_v4();
        let frame = ClientFrame::Publish {
            id,
            body: body.clone(),
        };
        if tx.send(frame).await.is_err() {
            unsent.push(body);
            break;
        }
        sent += 1;
    }
    unsent.extend(drained);

    let mut inner = shared.inner.lock().await;
    inner.stats.flushed += sent;
    if !unsent.is_empty() {
        warn!(
            target: "sockline::buffer",
            "Link died mid-flush, requeueing {} unsent messages", unsent.len()
        );
        inner.buffer.requeue_front(unsent);
    }
}

async fn run_reader(shared: Arc<Shared>, mut rx: mpsc::Receiver<ServerFrame>, epoch: u64) {
    while let Some(frame) = rx.recv().await {
        let mut inner = shared.inner.lock().await;
        // Frames from a superseded link must not touch current state
        if !inner.link.as_ref().is_some_and(|link| link.epoch == epoch) {
            return;
        }
        match frame {
            ServerFrame::Delivered { id, seq } => {
                inner.stats.delivered += 1;
                if let Some(tx) = inner.pending.remove(&id) {
                    let _ = tx.send(Ok(Receipt { id, seq }));
                }
                shared.push_event(&mut inner, SocketEvent::Delivered { id, seq });
            }
            ServerFrame::Message { seq, body } => {
                shared.push_event(&mut inner, SocketEvent::Message { seq, body });
            }
            ServerFrame::Pong { nonce } => {
                if let Some(tx) = inner.pending_pings.remove(&nonce) {
                    let _ = tx.send(Ok(()));
                }
                shared.push_event(&mut inner, SocketEvent::Pong { nonce });
            }
            ServerFrame::Error { code, message } => {
                let reason = format!("{code}: {message}");
                warn!(target: "sockline::conn", "Peer reported failure: {reason}");
                shared.fail_link(&mut inner, &reason);
                return;
            }
            ServerFrame::Closed { .. } => {
                // Close confirmation; close() tears the link down itself
                break;
            }
        }
    }
    // The peer ended the link. If it is still current, that is a failure.
    let mut inner = shared.inner.lock().await;
    if inner.link.as_ref().is_some_and(|link| link.epoch == epoch) {
        shared.fail_link(&mut inner, "link closed by peer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.buffer_capacity, 64);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts, 4);
    }

    #[tokio::test]
    async fn test_inject_error_requires_connected() {
        let manager = SocketManager::new(SimulatedPeer::new(), SocketConfig::default());
        let err = manager.inject_error("too early").await.unwrap_err();
        assert!(matches!(
            err,
            SocklineError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Error,
            }
        ));
    }

    #[tokio::test]
    async fn test_send_before_first_connect_buffers() {
        let manager = SocketManager::new(SimulatedPeer::new(), SocketConfig::default());
        assert!(matches!(
            manager.send("early").await.unwrap(),
            SendState::Buffered
        ));
        assert_eq!(manager.buffered().await, 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
