use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_stream::try_stream;
use futures::Stream;
use secrecy::SecretString;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use url::Url;

use crate::Result;
use crate::codec;
use crate::config::{Config, DEFAULT_HEARTBEAT, DEFAULT_TIMEOUT};
use crate::error::{Error, Kind, SubscriptionRejected, UnexpectedResponse};
use crate::sequence::Sequence;
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::types::request::{
    DisconnectRequest, LoginRequest, MessageRequest, QOS_OPTION, SubscribeRequest,
    UnsubscribeRequest,
};
use crate::types::response::{Body, Event, Frame, Welcome};
use crate::ws::connection::{ConnectionManager, ConnectionState, Expected};
use crate::ws::WsError;

/// Build the WebSocket endpoint for `server` (host and optional port) and `channel`.
///
/// ```
/// let url = eftl_client::connection::endpoint("broker.example:9191", "/channel", false).unwrap();
/// assert_eq!(url.as_str(), "ws://broker.example:9191/channel");
/// ```
pub fn endpoint(server: &str, channel: &str, secure: bool) -> Result<Url> {
    if server.is_empty() || server.contains(['/', '?', '#']) {
        return Err(Error::validation(format!(
            "server must be a host with an optional port, got {server:?}"
        )));
    }

    let scheme = if secure { "wss" } else { "ws" };
    let mut url = Url::parse(&format!("{scheme}://{server}"))?;
    url.set_path(channel);
    Ok(url)
}

/// Parameters of a session, as negotiated at login.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Session {
    /// Issued by the server at login
    pub client_id: Option<String>,
    /// Issued by the server at login for resuming the session. Never used by this client.
    pub reconnect_token: Option<SecretString>,
    pub timeout: Duration,
    pub heartbeat: Duration,
    /// Largest frame the server accepts, in bytes. Zero means no limit.
    pub max_message_size: usize,
    /// Whether published messages carry a sequence number
    pub qos: bool,
}

impl Session {
    fn new(config: &Config) -> Self {
        Self {
            client_id: None,
            reconnect_token: None,
            timeout: DEFAULT_TIMEOUT,
            heartbeat: DEFAULT_HEARTBEAT,
            max_message_size: 0,
            qos: config.qos(),
        }
    }
}

impl From<Welcome> for Session {
    fn from(welcome: Welcome) -> Self {
        Self {
            client_id: Some(welcome.client_id),
            reconnect_token: Some(SecretString::from(welcome.id_token)),
            timeout: Duration::from_secs(welcome.timeout),
            heartbeat: Duration::from_secs(welcome.heartbeat),
            max_message_size: welcome.max_size,
            qos: welcome.qos,
        }
    }
}

/// A client session with an eFTL server.
///
/// [`Connection::connect`] dials the server, [`Connection::login`] authenticates,
/// after which the connection can subscribe and publish. Handles are cheap to
/// clone and can be used from any task.
///
/// # Examples
///
/// ```rust, no_run
/// use eftl_client::{Config, Connection};
/// use futures::StreamExt as _;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let connection = Connection::connect("broker.example:9191", "/channel", Config::default()).await?;
///     connection.login("alice", "secret").await?;
///
///     // Take the stream before subscribing so no event is missed.
///     let mut messages = Box::pin(connection.messages());
///     connection.subscribe(r#"{"_dest":"orders"}"#, None).await?;
///     connection.publish("hello", "orders").await?;
///
///     while let Some(event) = messages.next().await {
///         let event = event?;
///         println!("{}: {}", event.destination(), event.text());
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: Config,
    endpoint: Url,
    /// Socket task handle
    transport: ConnectionManager,
    session: RwLock<Session>,
    /// Outbound message sequence numbers
    sequence: Sequence,
    /// Ordinals for subscription identifiers
    subscription_ordinals: Sequence,
    subscriptions: Arc<SubscriptionRegistry>,
    /// Keeps sequence allocation and queueing in the same order
    publish_lock: Mutex<()>,
    #[cfg(feature = "tracing")]
    span: tracing::Span,
}

impl Connection {
    /// Open the WebSocket at `ws://<server>/<channel>` (`wss://` when configured).
    ///
    /// Does not log in. The connection starts in [`ConnectionState::Opening`].
    pub async fn connect(server: &str, channel: &str, config: Config) -> Result<Self> {
        let endpoint = endpoint(server, channel, config.secure())?;
        Self::connect_url(endpoint, config).await
    }

    /// Open the WebSocket at an already built endpoint.
    pub async fn connect_url(endpoint: Url, config: Config) -> Result<Self> {
        #[cfg(feature = "tracing")]
        let span = tracing::info_span!(
            "eftl.connection",
            endpoint = %endpoint,
            client_id = tracing::field::Empty
        );

        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let dial = ConnectionManager::connect(
            &endpoint,
            config.channel_capacity(),
            Arc::clone(&subscriptions),
        );
        #[cfg(feature = "tracing")]
        let dial = tracing::Instrument::instrument(dial, span.clone());
        let transport = dial.await?;

        #[cfg(feature = "tracing")]
        span.in_scope(|| tracing::debug!("Connected"));

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                session: RwLock::new(Session::new(&config)),
                config,
                endpoint,
                transport,
                sequence: Sequence::new(),
                subscription_ordinals: Sequence::new(),
                subscriptions,
                publish_lock: Mutex::new(()),
                #[cfg(feature = "tracing")]
                span,
            }),
        })
    }

    /// Log in and wait for the server's welcome.
    ///
    /// On success the session parameters are stored and the connection is
    /// [`ConnectionState::Open`]. Any other response, or one that cannot be
    /// decoded, fails with [`Kind::LoginFailed`] and leaves the connection in
    /// [`ConnectionState::Opening`] so the caller may try again.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", parent = &self.inner.span, skip(self, password))
    )]
    pub async fn login(&self, user: &str, password: &str) -> Result<()> {
        match self.state() {
            ConnectionState::Opening => {}
            ConnectionState::Open => return Err(Error::login_failed("already logged in")),
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(WsError::ConnectionClosed.into());
            }
        }

        let config = &self.inner.config;
        let mut login_options = config.login_options().clone();
        if config.qos() {
            login_options.insert(QOS_OPTION.to_owned(), "true".to_owned());
        }

        let request = LoginRequest::new(
            config.client_type(),
            config.client_version(),
            user,
            SecretString::from(password),
            login_options,
        );

        let received = self
            .inner
            .transport
            .request(
                codec::encode(&request)?,
                Expected::Welcome,
                config.request_timeout(),
            )
            .await
            .map_err(|e| {
                let unanswered = e.kind() == Kind::MalformedFrame
                    || matches!(e.downcast_ref::<WsError>(), Some(WsError::Timeout));
                if unanswered {
                    Error::login_failed(e.to_string())
                } else {
                    e
                }
            })?;

        let Frame::Welcome(welcome) = received.frame else {
            return Err(Error::login_failed(format!(
                "expected welcome, got {} response: {}",
                received.frame.op(),
                received.raw
            )));
        };

        #[cfg(feature = "tracing")]
        {
            self.inner.span.record("client_id", welcome.client_id.as_str());
            tracing::info!(
                client_id = %welcome.client_id,
                timeout = welcome.timeout,
                heartbeat = welcome.heartbeat,
                max_size = welcome.max_size,
                qos = welcome.qos,
                "Logged in"
            );
        }

        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Session::from(welcome);

        self.inner.transport.advance(ConnectionState::Open);
        if self.state().is_open() {
            Ok(())
        } else {
            Err(WsError::ConnectionClosed.into())
        }
    }

    /// Subscribe to the messages selected by `matcher` and wait for the server to confirm.
    ///
    /// `matcher` is passed to the server as-is; an empty matcher is left out of the
    /// request. Give a `durable` name for a subscription that outlives the session.
    /// Returns the identifier of the confirmed subscription.
    ///
    /// A rejection, as an `unsubscribed` or `error` reply, fails with
    /// [`Kind::SubscriptionRejected`] carrying the server's reason; the
    /// subscription is not registered.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", parent = &self.inner.span, skip(self))
    )]
    pub async fn subscribe(&self, matcher: &str, durable: Option<&str>) -> Result<String> {
        self.ensure_open()?;

        let client_id = self.session().client_id.unwrap_or_default();
        let ordinal = self.inner.subscription_ordinals.next_value();
        let subscription = Subscription::pending(&client_id, ordinal, matcher, durable);
        let request = SubscribeRequest::new(subscription.id.clone(), matcher, durable);

        let received = self
            .inner
            .transport
            .request(
                codec::encode(&request)?,
                Expected::Subscription(subscription.id.clone()),
                self.inner.config.request_timeout(),
            )
            .await?;

        match received.frame {
            Frame::Subscribed(subscribed) if subscribed.id == subscription.id => {
                #[cfg(feature = "tracing")]
                tracing::debug!(id = %subscription.id, "Subscription confirmed");

                let id = subscription.id.clone();
                self.inner.subscriptions.add(subscription.confirmed());
                Ok(id)
            }
            Frame::Unsubscribed(unsubscribed) if unsubscribed.id == subscription.id => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    id = %unsubscribed.id,
                    err = unsubscribed.err,
                    reason = %unsubscribed.reason,
                    "Subscription rejected"
                );

                Err(SubscriptionRejected {
                    id: unsubscribed.id,
                    code: unsubscribed.err,
                    reason: unsubscribed.reason,
                }
                .into())
            }
            Frame::Error(notice) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(id = %subscription.id, ?notice, "Subscription rejected");

                Err(SubscriptionRejected {
                    id: subscription.id,
                    code: notice.err.unwrap_or_default(),
                    reason: notice.reason.unwrap_or_default(),
                }
                .into())
            }
            frame => Err(UnexpectedResponse {
                op: frame.op(),
                payload: received.raw,
            }
            .into()),
        }
    }

    /// Drop a subscription. Does not wait for the server.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", parent = &self.inner.span, skip(self))
    )]
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.ensure_open()?;

        let request = UnsubscribeRequest::new(id);
        self.inner.transport.send(codec::encode(&request)?).await?;
        self.inner.subscriptions.remove(id);

        Ok(())
    }

    /// Publish `text` to `destination`.
    ///
    /// Returns the sequence number allocated to the message, which is also sent as
    /// the body's `number`. The sequence number is attached to the frame only when
    /// the server granted quality of service. Frames larger than the server's
    /// advertised maximum fail with [`Kind::MessageTooLarge`] and are never sent.
    ///
    /// Waits for the frame to be written, not for the server's acknowledgement;
    /// see [`Connection::last_acknowledged`].
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", parent = &self.inner.span, skip(self, text))
    )]
    pub async fn publish(&self, text: &str, destination: &str) -> Result<u64> {
        self.ensure_open()?;
        if destination.is_empty() {
            return Err(Error::validation("destination must not be empty"));
        }

        let Session {
            qos,
            max_message_size,
            ..
        } = self.session();

        let (seq, written) = {
            let _guard = self
                .inner
                .publish_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // Only committed once the frame is queued, so rejected messages leave no gap.
            let seq = self.inner.sequence.current() + 1;
            let number = i64::try_from(seq)
                .map_err(|_e| Error::validation("sequence number exhausted"))?;
            let request = MessageRequest::new(
                Body::new(destination, text, number),
                qos.then_some(seq),
            );

            let frame = codec::encode(&request)?;
            codec::ensure_fits(&frame, max_message_size)?;

            let written = self.inner.transport.send_ordered(frame)?;
            self.inner.sequence.next_value();
            (seq, written)
        };

        written.await?;
        Ok(seq)
    }

    /// Send a disconnect, close the socket and wait until the session is [`ConnectionState::Closed`].
    ///
    /// Calling this on a closed connection does nothing.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", parent = &self.inner.span, skip(self))
    )]
    pub async fn close(&self) -> Result<()> {
        if self.state() < ConnectionState::Closing {
            self.inner.transport.advance(ConnectionState::Closing);
            let request = codec::encode(&DisconnectRequest::default())?;
            if let Err(e) = self.inner.transport.send(request).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Unable to send disconnect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }

        self.inner.transport.close().await;
        Ok(())
    }

    /// Stream of inbound published messages.
    ///
    /// Only messages arriving after this call are seen, so take the stream before
    /// subscribing. The stream ends when the connection closes.
    #[must_use]
    pub fn messages(&self) -> impl Stream<Item = Result<Event>> + use<> {
        let mut rx = self.inner.transport.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(Frame::Event(event)) => yield event,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {n} frames");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    /// Stream of every unsolicited frame except heartbeats: events, acks, errors,
    /// revoked subscriptions, and the server's goodbye.
    #[must_use]
    pub fn frames(&self) -> impl Stream<Item = Result<Frame>> + use<> {
        let mut rx = self.inner.transport.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(frame) => yield frame,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Frame stream lagged, missed {n} frames");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        let state = self.state();
        if state.is_open() {
            Ok(())
        } else {
            Err(Error::not_open(state))
        }
    }

    fn session_guard(&self) -> RwLockReadGuard<'_, Session> {
        // Session is replaced whole, never left half written.
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the negotiated session parameters.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session_guard().clone()
    }

    /// Client identifier issued at login.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.session_guard().client_id.clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.state_receiver()
    }

    /// Confirmed subscriptions, in the order they were requested.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.all()
    }

    #[must_use]
    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.inner.subscriptions.lookup(id)
    }

    /// Highest sequence number the server has acknowledged.
    #[must_use]
    pub fn last_acknowledged(&self) -> u64 {
        self.inner.transport.last_acknowledged()
    }

    /// Last sequence number handed to a published message.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.inner.sequence.current()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_server_and_channel() {
        let url = endpoint("broker.example:9191", "/channel", false).unwrap();
        assert_eq!(url.as_str(), "ws://broker.example:9191/channel");

        let url = endpoint("broker.example", "channel", true).unwrap();
        assert_eq!(url.as_str(), "wss://broker.example/channel");
    }

    #[test]
    fn endpoint_rejects_paths_in_server() {
        let err = endpoint("broker.example/extra", "/channel", false).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        let err = endpoint("", "/channel", false).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[test]
    fn session_from_welcome() {
        let welcome: Welcome = serde_json::from_value(serde_json::json!({
            "client_id": "C1",
            "id_token": "T1",
            "timeout": 600,
            "heartbeat": 240,
            "max_size": 8192,
            "_qos": "true"
        }))
        .unwrap();

        let session = Session::from(welcome);
        assert_eq!(session.client_id.as_deref(), Some("C1"));
        assert_eq!(session.timeout, Duration::from_secs(600));
        assert_eq!(session.heartbeat, Duration::from_secs(240));
        assert_eq!(session.max_message_size, 8192);
        assert!(session.qos);
        assert!(session.reconnect_token.is_some());
    }

    #[test]
    fn session_defaults_before_login() {
        let session = Session::new(&Config::builder().qos(false).build());

        assert_eq!(session.client_id, None);
        assert_eq!(session.timeout, Duration::from_secs(600));
        assert_eq!(session.heartbeat, Duration::from_secs(240));
        assert_eq!(session.max_message_size, 0);
        assert!(!session.qos);
    }
}
