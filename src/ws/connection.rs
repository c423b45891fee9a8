#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::error::WsError;
use crate::Result;
use crate::codec;
use crate::subscription::SubscriptionRegistry;
use crate::types::OpCode;
use crate::types::response::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type ResponseSender = oneshot::Sender<Result<Received>>;
type ResponseReceiver = oneshot::Receiver<Result<Received>>;

/// Lifecycle of a session.
///
/// States only ever advance in declaration order. A failed login leaves the
/// session in [`ConnectionState::Opening`].
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display,
)]
pub enum ConnectionState {
    /// Transport established, not yet logged in
    Opening,
    /// Logged in
    Open,
    /// Shutdown initiated by either side
    Closing,
    /// Transport gone. Terminal.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A decoded response together with the text it was decoded from.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Received {
    pub frame: Frame,
    pub raw: String,
}

/// The reply an outstanding request is waiting for.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// `welcome` for a login
    Welcome,
    /// `subscribed` or `unsubscribed` carrying this subscription id
    Subscription(String),
}

impl Expected {
    /// Whether `frame` is the reply to this request.
    ///
    /// Error, disconnect and goodbye frames carry no id and answer any request.
    fn answered_by(&self, frame: &Frame) -> bool {
        match (self, frame) {
            (_, Frame::Error(_) | Frame::Disconnect(_) | Frame::Goodbye(_))
            | (Self::Welcome, Frame::Welcome(_)) => true,
            (Self::Subscription(id), Frame::Subscribed(subscribed)) => subscribed.id == *id,
            (Self::Subscription(id), Frame::Unsubscribed(unsubscribed)) => unsubscribed.id == *id,
            _ => false,
        }
    }

    /// Whether an undecodable frame of kind `op` (with `id`, if one could be read)
    /// would have been the reply to this request.
    fn claims_malformed(&self, op: OpCode, id: Option<&str>) -> bool {
        match (self, op) {
            (_, OpCode::Error | OpCode::Disconnect | OpCode::Goodbye)
            | (Self::Welcome, OpCode::Welcome) => true,
            (Self::Subscription(expected), OpCode::Subscribed | OpCode::Unsubscribed) => {
                id.is_none_or(|id| id == expected)
            }
            _ => false,
        }
    }
}

/// The one outstanding request.
struct Pending {
    expected: Expected,
    tx: ResponseSender,
}

enum Outbound {
    Frame {
        text: String,
        written: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// State shared between the handles and the socket task.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    /// Taken when the socket task stops, which ends every inbound stream
    broadcast_tx: Mutex<Option<broadcast::Sender<Frame>>>,
    /// Slot for the response to the one outstanding request
    pending: Mutex<Option<Pending>>,
    /// Serializes login and subscribe so each gets its own response
    request_lock: tokio::sync::Mutex<()>,
    subscriptions: Arc<SubscriptionRegistry>,
    last_ack: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        // The slot holds no invariant a panicking holder could break.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self) -> MutexGuard<'_, Option<broadcast::Sender<Frame>>> {
        self.broadcast_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, to: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if to > *state {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Route one text frame.
    ///
    /// Only the reply the outstanding request expects resolves it; every other
    /// frame goes to the inbound streams. A frame that cannot be decoded is dropped,
    /// unless its `op` is unreadable or it would have been that reply.
    fn dispatch(&self, text: &str) {
        match codec::decode(text.as_bytes()) {
            Ok(Frame::Heartbeat) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Heartbeat received");
            }
            Ok(frame) => {
                let closing = matches!(frame, Frame::Goodbye(_) | Frame::Disconnect(_));
                if closing {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(op = %frame.op(), "Server is closing the session");
                    self.advance(ConnectionState::Closing);
                }

                let waiting = self.take_pending(|expected| expected.answered_by(&frame));
                let Some(pending) = waiting else {
                    self.notify(frame);
                    return;
                };

                // Inbound readers see goodbye and disconnect as well.
                let copy = closing.then(|| frame.clone());
                let received = Received {
                    frame,
                    raw: text.to_owned(),
                };
                // The requester may have timed out in the meantime.
                if let Err(Ok(unclaimed)) = pending.tx.send(Ok(received)) {
                    self.notify(unclaimed.frame);
                } else if let Some(frame) = copy {
                    self.notify(frame);
                }
            }
            Err(e) => {
                let waiting = match codec::peek_op(text.as_bytes()) {
                    Err(_) => self.take_pending(|_| true),
                    Ok(op) => {
                        let id = codec::peek_id(text.as_bytes());
                        self.take_pending(|expected| expected.claims_malformed(op, id.as_deref()))
                    }
                };

                if let Some(pending) = waiting {
                    _ = pending.tx.send(Err(e));
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%text, error = %e, "Dropping malformed frame");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (&text, &e);
                }
            }
        }
    }

    /// Take the outstanding request if `matches` accepts what it expects.
    fn take_pending<F: FnOnce(&Expected) -> bool>(&self, matches: F) -> Option<Pending> {
        let mut slot = self.pending();
        if slot.as_ref().is_some_and(|pending| matches(&pending.expected)) {
            slot.take()
        } else {
            None
        }
    }

    /// Give up on the outstanding request after its timeout.
    ///
    /// A reply dispatched between the timeout firing and the slot being cleared is
    /// already in `rx`; it is returned rather than lost.
    fn reclaim(&self, rx: &mut ResponseReceiver) -> Result<Received> {
        self.pending().take();
        match rx.try_recv() {
            Ok(response) => response,
            Err(_) => Err(WsError::Timeout.into()),
        }
    }

    /// Deliver an unsolicited frame to the inbound streams.
    fn notify(&self, frame: Frame) {
        match &frame {
            Frame::Unsubscribed(unsubscribed) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    id = %unsubscribed.id,
                    err = unsubscribed.err,
                    reason = %unsubscribed.reason,
                    "Subscription revoked by server"
                );
                self.subscriptions.remove(&unsubscribed.id);
            }
            Frame::Ack(ack) => {
                self.last_ack.fetch_max(ack.seq, Ordering::Relaxed);
            }
            _ => {}
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(?frame, "Inbound frame");

        if let Some(tx) = self.broadcast().as_ref() {
            // No receivers is fine; nobody asked for inbound frames yet.
            _ = tx.send(frame);
        }
    }

    fn shutdown(&self) {
        self.advance(ConnectionState::Closed);
        self.broadcast().take();

        let waiting = self.pending().take();
        if let Some(pending) = waiting {
            _ = pending.tx.send(Err(WsError::ConnectionClosed.into()));
        }
    }
}

/// Owns one WebSocket session: a background task reads and writes the socket,
/// handles share it through this type.
///
/// # Example
///
/// ```ignore
/// let endpoint = Url::parse("ws://broker.example:9191/channel")?;
/// let connection = ConnectionManager::connect(&endpoint, 1024, registry).await?;
///
/// let mut rx = connection.subscribe();
/// while let Ok(frame) = rx.recv().await {
///     println!("Received: {frame:?}");
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    /// Watch channel receiver for state changes (for use in checking the current state)
    state_rx: watch::Receiver<ConnectionState>,
    /// Sender channel for outgoing frames
    sender_tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionManager {
    /// Dial `endpoint` and start the socket task.
    ///
    /// The session starts in [`ConnectionState::Opening`].
    pub async fn connect(
        endpoint: &Url,
        channel_capacity: usize,
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Result<Self> {
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(WsError::Connection)?;

        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Opening);

        let shared = Arc::new(Shared {
            state_tx,
            broadcast_tx: Mutex::new(Some(broadcast_tx)),
            pending: Mutex::new(None),
            request_lock: tokio::sync::Mutex::new(()),
            subscriptions,
            last_ack: AtomicU64::new(0),
        });

        let task = Self::handle_connection(ws_stream, sender_rx, Arc::clone(&shared));
        // Runs in the caller's span, so the task logs under the connection that owns it.
        #[cfg(feature = "tracing")]
        let task = tracing::Instrument::instrument(task, tracing::Span::current());
        tokio::spawn(task);

        Ok(Self {
            shared,
            state_rx,
            sender_tx,
        })
    }

    /// Read and write the socket until either side closes it.
    async fn handle_connection(
        ws_stream: WsStream,
        mut sender_rx: mpsc::UnboundedReceiver<Outbound>,
        shared: Arc<Shared>,
    ) {
        let (mut write, mut read) = ws_stream.split();

        #[cfg(feature = "tracing")]
        tracing::debug!("WebSocket session started");

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("WebSocket closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!(error = %e, "WebSocket read failed");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol; ping and pong
                            // are answered by the transport itself.
                        }
                    }
                }

                outbound = sender_rx.recv() => {
                    match outbound {
                        Some(Outbound::Frame { text, written }) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                #[cfg(feature = "tracing")]
                                tracing::error!(error = %e, "WebSocket write failed");
                                _ = written.send(Err(WsError::Connection(e).into()));
                                break;
                            }
                            _ = written.send(Ok(()));
                        }
                        Some(Outbound::Close) | None => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("Closing WebSocket");
                            _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        }

        shared.shutdown();
    }

    /// Queue a frame without waiting for it to be written.
    ///
    /// Frames are written in the order they were queued. The returned receiver
    /// resolves once the frame is on the wire.
    fn enqueue(&self, text: String) -> Result<oneshot::Receiver<Result<()>>> {
        let (written, written_rx) = oneshot::channel();
        self.sender_tx
            .send(Outbound::Frame { text, written })
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(written_rx)
    }

    /// Write a frame and wait until it is on the wire.
    pub async fn send(&self, text: String) -> Result<()> {
        let written = self.enqueue(text)?;
        written.await.map_err(|_e| WsError::ConnectionClosed)?
    }

    /// Queue a frame now and return a future that waits for the write.
    ///
    /// Use this when the queueing order matters, e.g. under a lock, but the
    /// write should be awaited outside of it.
    pub fn send_ordered(&self, text: String) -> Result<impl Future<Output = Result<()>> + use<>> {
        let written = self.enqueue(text)?;
        Ok(async move { written.await.map_err(|_e| WsError::ConnectionClosed)? })
    }

    /// Write a request frame and wait for the `expected` frame that answers it.
    ///
    /// Requests are serialized: a second caller waits until the first has its
    /// response. With `wait` set, gives up after that long with [`WsError::Timeout`].
    pub async fn request(
        &self,
        text: String,
        expected: Expected,
        wait: Option<Duration>,
    ) -> Result<Received> {
        let _guard = self.shared.request_lock.lock().await;

        let (tx, mut rx) = oneshot::channel();
        // Installed before writing so a fast response cannot be missed.
        *self.shared.pending() = Some(Pending { expected, tx });

        if let Err(e) = self.send(text).await {
            self.shared.pending().take();
            return Err(e);
        }

        let response = match wait {
            Some(duration) => match timeout(duration, &mut rx).await {
                Ok(response) => response,
                Err(_elapsed) => return self.shared.reclaim(&mut rx),
            },
            None => rx.await,
        };

        response.map_err(|_e| WsError::ConnectionClosed)?
    }

    /// Ask the socket task to close the socket and wait until it has stopped.
    pub async fn close(&self) {
        self.shared.advance(ConnectionState::Closing);
        _ = self.sender_tx.send(Outbound::Close);

        let mut state_rx = self.state_rx.clone();
        _ = state_rx.wait_for(|state| state.is_closed()).await;
    }

    /// Move the session forward to `to`. Returns false if it already was at or past it.
    pub fn advance(&self, to: ConnectionState) -> bool {
        self.shared.advance(to)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to unsolicited inbound frames.
    ///
    /// Each call returns a new independent receiver that sees frames arriving
    /// after the call. Once the session is closed the receiver is closed too.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        if let Some(tx) = self.shared.broadcast().as_ref() {
            return tx.subscribe();
        }

        let (_, rx) = broadcast::channel(1);
        rx
    }

    /// Highest sequence number acknowledged by the server so far.
    #[must_use]
    pub fn last_acknowledged(&self) -> u64 {
        self.shared.last_ack.load(Ordering::Relaxed)
    }
}
