//! Network link and cloud session management.

use core::fmt;

use log::{info, warn};
use serde::Deserialize;

use crate::time::Delay;

/// Bounded polling: up to `attempts` checks, `delay_ms` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u32,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay_ms: u32) -> Self {
        Self { attempts, delay_ms }
    }

    /// Worst-case time spent waiting.
    pub fn budget_ms(&self) -> u64 {
        u64::from(self.attempts) * u64::from(self.delay_ms)
    }
}

/// Polls `ready` until it returns true or the policy runs out.
///
/// `ready` is checked once more after the last delay, so it runs at most
/// `attempts + 1` times.
pub fn poll_until(
    policy: RetryPolicy,
    delay: &mut dyn Delay,
    mut ready: impl FnMut() -> bool,
) -> bool {
    for _ in 0..policy.attempts {
        if ready() {
            return true;
        }
        delay.delay_ms(policy.delay_ms);
    }
    ready()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionCredentials {
    pub api_key: String,
    pub database_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectivityError {
    /// The network link could not be started.
    Link(String),
    /// The link did not come up within the retry budget.
    LinkTimeout,
    /// The cloud session could not be started (e.g. sign-up rejected).
    Session(String),
    /// The session did not become ready within the retry budget.
    SessionTimeout,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(reason) => write!(f, "network link failed: {reason}"),
            Self::LinkTimeout => f.write_str("network link did not come up"),
            Self::Session(reason) => write!(f, "session failed: {reason}"),
            Self::SessionTimeout => f.write_str("session did not become ready"),
        }
    }
}

impl std::error::Error for ConnectivityError {}

/// The network link, e.g. a WiFi station interface.
pub trait NetworkLink {
    /// Starts associating. Completion is observed through `is_connected`.
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError>;

    fn is_connected(&mut self) -> bool;
}

/// An authenticated session with the cloud database.
///
/// Token refresh is the session's own business; `is_ready` may refresh.
pub trait AuthSession {
    fn begin_session(&mut self, credentials: &SessionCredentials) -> Result<(), ConnectivityError>;

    fn is_ready(&mut self) -> bool;
}

/// Owns the link and the session and brings them up with bounded retries.
pub struct ConnectivityManager<L, S> {
    link: L,
    session: S,
    wifi: WifiCredentials,
    cloud: SessionCredentials,
    link_retry: RetryPolicy,
    session_retry: RetryPolicy,
}

impl<L: NetworkLink, S: AuthSession> ConnectivityManager<L, S> {
    pub const DEFAULT_LINK_RETRY: RetryPolicy = RetryPolicy::new(20, 500);
    pub const DEFAULT_SESSION_RETRY: RetryPolicy = RetryPolicy::new(30, 500);

    pub fn new(link: L, session: S, wifi: WifiCredentials, cloud: SessionCredentials) -> Self {
        Self {
            link,
            session,
            wifi,
            cloud,
            link_retry: Self::DEFAULT_LINK_RETRY,
            session_retry: Self::DEFAULT_SESSION_RETRY,
        }
    }

    pub fn with_retry(mut self, link_retry: RetryPolicy, session_retry: RetryPolicy) -> Self {
        self.link_retry = link_retry;
        self.session_retry = session_retry;
        self
    }

    /// Starts the link and waits for it to come up.
    pub fn connect(&mut self, delay: &mut dyn Delay) -> Result<(), ConnectivityError> {
        info!("Connecting to WiFi: {}", self.wifi.ssid);
        self.link.begin(&self.wifi)?;

        let link = &mut self.link;
        if poll_until(self.link_retry, delay, || link.is_connected()) {
            info!("WiFi connected");
            Ok(())
        } else {
            warn!("WiFi connection failed, check the credentials");
            Err(ConnectivityError::LinkTimeout)
        }
    }

    /// Starts the cloud session and waits for it to become ready.
    pub fn initialize_session(&mut self, delay: &mut dyn Delay) -> Result<(), ConnectivityError> {
        info!("Initializing session with {}", self.cloud.database_url);
        if let Err(e) = self.session.begin_session(&self.cloud) {
            warn!("Session start failed: {}", e);
            return Err(e);
        }

        let session = &mut self.session;
        if poll_until(self.session_retry, delay, || session.is_ready()) {
            info!("Session is ready");
            Ok(())
        } else {
            warn!("Session not ready, check the API key and database URL");
            Err(ConnectivityError::SessionTimeout)
        }
    }

    /// Brings everything back up: reconnects the link if it dropped, then
    /// starts a fresh session.
    pub fn reinitialize(&mut self, delay: &mut dyn Delay) -> Result<(), ConnectivityError> {
        if !self.link.is_connected() {
            warn!("WiFi link is down, reconnecting");
            self.connect(delay)?;
        }
        self.initialize_session(delay)
    }

    /// Link up and session usable.
    pub fn is_ready(&mut self) -> bool {
        self.link.is_connected() && self.session.is_ready()
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}
