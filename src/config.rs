use std::collections::BTreeMap;
use std::time::Duration;

use bon::Builder;

use crate::{CLIENT_TYPE, CLIENT_VERSION};

/// Session timeout assumed until the server's welcome frame says otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// Heartbeat interval assumed until the server's welcome frame says otherwise.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(240);
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Configuration for a [`Connection`](crate::Connection).
///
/// ```
/// use std::time::Duration;
///
/// use eftl_client::Config;
///
/// let config = Config::builder()
///     .client_type("gateway")
///     .request_timeout(Duration::from_secs(10))
///     .build();
/// assert!(config.qos());
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Reported to the server in the login request
    #[builder(default = CLIENT_TYPE.to_owned(), into)]
    client_type: String,
    /// Reported to the server in the login request
    #[builder(default = CLIENT_VERSION.to_owned(), into)]
    client_version: String,
    /// Ask the server for quality of service at login, so published messages carry a sequence number
    #[builder(default = true)]
    qos: bool,
    /// Additional login options, sent as-is
    #[builder(default)]
    login_options: BTreeMap<String, String>,
    /// Connect with `wss://` instead of `ws://`
    #[builder(default)]
    secure: bool,
    /// Upper bound on how long login and subscribe wait for their response.
    /// `None` waits as long as the transport stays up.
    request_timeout: Option<Duration>,
    /// Capacity of the inbound frame broadcast; slow readers past this many frames lag
    #[builder(default = DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,
    /// Kept for the session data model. The client never reconnects on its own.
    #[builder(default = DEFAULT_RECONNECT_ATTEMPTS)]
    reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    #[must_use]
    pub fn client_version(&self) -> &str {
        &self.client_version
    }

    #[must_use]
    pub const fn qos(&self) -> bool {
        self.qos
    }

    #[must_use]
    pub fn login_options(&self) -> &BTreeMap<String, String> {
        &self.login_options
    }

    #[must_use]
    pub const fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[must_use]
    pub const fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }
}
