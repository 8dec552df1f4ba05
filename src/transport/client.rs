//! Outbound connection management.
//!
//! A [`ClientConnection`] is the intent to keep one logical peer connected.
//! The [`ConnectionManager`] drives each intent on its own task: connect,
//! wait for the channel to drop, reconnect, rotating through the candidate
//! URLs.
//!
//! # Rotation
//!
//! ```text
//! max_reconnect = 3, urls = [A, B]
//!
//! attempt:  1  2  3  4  5  6  7 ...
//! url:      A  A  A  B  B  B  A ...
//! ```
//!
//! Retrying never stops on its own while the intent is tracked;
//! [`ConnectionManager::disconnect`] ends it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

use super::driver::ConnectionStatus;

// ============================================================================
// Types
// ============================================================================

/// Resolves when an established outbound channel has gone away.
///
/// The sending half lives in the channel's I/O task; completion or drop both
/// count as closed.
pub type ClosedSignal = oneshot::Receiver<()>;

// ============================================================================
// ClientConnector
// ============================================================================

/// Opens outbound transport connections for a driver.
#[async_trait]
pub trait ClientConnector: Send + Sync + 'static {
    /// Connects `channel_id` to `url`.
    ///
    /// On success the channel is already registered with the driver and the
    /// returned signal fires when it drops.
    async fn connect(&self, channel_id: &ChannelId, url: &Url) -> Result<ClosedSignal>;
}

// ============================================================================
// ClientConnection
// ============================================================================

/// One outbound connection intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    channel_id: ChannelId,
    urls: Vec<Url>,
    index: usize,
    attempts: u32,
    max_reconnect: Option<u32>,
}

impl ClientConnection {
    /// Creates an intent with candidate URLs in preference order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no URL is given.
    pub fn new(channel_id: impl Into<ChannelId>, urls: impl IntoIterator<Item = Url>) -> Result<Self> {
        let channel_id = channel_id.into();
        let urls: Vec<Url> = urls.into_iter().collect();

        if urls.is_empty() {
            return Err(Error::config(format!(
                "connection {channel_id} needs at least one URL"
            )));
        }

        Ok(Self {
            channel_id,
            urls,
            index: 0,
            attempts: 0,
            max_reconnect: None,
        })
    }

    /// Creates an intent from URL strings.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if a URL does not parse
    /// - [`Error::Config`] if no URL is given
    pub fn parse<I, S>(channel_id: impl Into<ChannelId>, urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = urls
            .into_iter()
            .map(|url| Url::parse(url.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(channel_id, urls)
    }

    /// Sets the attempts per URL before rotating.
    ///
    /// Without it the driver's `max_timeouts` applies.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect(mut self, max: u32) -> Self {
        self.max_reconnect = Some(max);
        self
    }

    /// Returns the channel ID.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Returns the candidate URLs.
    #[inline]
    #[must_use]
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// Returns the URL the next attempt continues on.
    #[inline]
    #[must_use]
    pub fn current_url(&self) -> &Url {
        &self.urls[self.index]
    }

    /// Returns the attempts made on the current URL.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the per-URL attempt budget, if set.
    #[inline]
    #[must_use]
    pub fn max_reconnect(&self) -> Option<u32> {
        self.max_reconnect
    }

    /// Counts one attempt and returns the URL it targets.
    pub fn next_url(&mut self) -> &Url {
        let max = self.max_reconnect.unwrap_or(1).max(1);

        if self.attempts >= max {
            self.attempts = 0;
            self.index = (self.index + 1) % self.urls.len();
        }

        self.attempts += 1;
        &self.urls[self.index]
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Tracked intent plus the flag of its driving task.
struct Tracked {
    connection: Mutex<ClientConnection>,
    driving: AtomicBool,
}

struct ManagerInner {
    connector: Arc<dyn ClientConnector>,
    connections: DashMap<ChannelId, Arc<Tracked>, FxBuildHasher>,
    max_reconnect: u32,
    reconnect_interval: Duration,
}

/// Keeps outbound connections alive.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.inner.connections.len())
            .field("max_reconnect", &self.inner.max_reconnect)
            .field("reconnect_interval", &self.inner.reconnect_interval)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager - Public API
// ============================================================================

impl ConnectionManager {
    /// Creates a manager.
    ///
    /// `max_reconnect` is the default per-URL budget for intents that do not
    /// set their own.
    #[must_use]
    pub fn new(
        connector: Arc<dyn ClientConnector>,
        max_reconnect: u32,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                connections: DashMap::with_hasher(FxBuildHasher),
                max_reconnect,
                reconnect_interval,
            }),
        }
    }

    /// Tracks an intent and starts connecting in the background.
    ///
    /// Never blocks on the network. Attempt outcomes go to `status`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateConnection`] if the channel is already
    /// tracked; `status` receives the same error.
    pub fn connect(
        &self,
        mut connection: ClientConnection,
        status: Option<Arc<dyn ConnectionStatus>>,
    ) -> Result<()> {
        let channel_id = connection.channel_id().clone();

        if connection.max_reconnect.is_none() {
            connection.max_reconnect = Some(self.inner.max_reconnect);
        }

        let tracked = match self.inner.connections.entry(channel_id.clone()) {
            Entry::Occupied(_) => {
                let err = Error::duplicate_connection(channel_id.clone());
                warn!(channel_id = %channel_id, "Connection already tracked");
                if let Some(status) = status {
                    status.error(&channel_id, &err);
                }
                return Err(err);
            }
            Entry::Vacant(slot) => {
                let tracked = Arc::new(Tracked {
                    connection: Mutex::new(connection),
                    driving: AtomicBool::new(false),
                });
                slot.insert(Arc::clone(&tracked));
                tracked
            }
        };

        info!(channel_id = %channel_id, "Outbound connection tracked");
        self.spawn(channel_id, tracked, status, Duration::ZERO);
        Ok(())
    }

    /// Re-runs the attempt logic for a tracked intent.
    ///
    /// Does nothing if the intent is already being driven.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the intent is not tracked.
    pub fn scheduled_reconnect(&self, channel_id: &ChannelId) -> Result<()> {
        let tracked = self
            .inner
            .tracked(channel_id)
            .ok_or_else(|| Error::channel_not_found(channel_id))?;

        self.spawn(channel_id.clone(), tracked, None, self.inner.reconnect_interval);
        Ok(())
    }

    /// Stops tracking an intent; no further attempts are made.
    ///
    /// Returns `true` if the intent was tracked.
    pub fn disconnect(&self, channel_id: &ChannelId) -> bool {
        let removed = self.inner.connections.remove(channel_id).is_some();
        if removed {
            info!(channel_id = %channel_id, "Outbound connection released");
        }
        removed
    }

    /// Stops tracking every intent.
    pub fn shutdown(&self) {
        let count = self.inner.connections.len();
        self.inner.connections.clear();
        if count > 0 {
            debug!(count, "Outbound connections released");
        }
    }

    /// Returns `true` if the intent is tracked.
    #[inline]
    #[must_use]
    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.inner.connections.contains_key(channel_id)
    }

    /// Returns a copy of a tracked intent.
    #[must_use]
    pub fn connection(&self, channel_id: &ChannelId) -> Option<ClientConnection> {
        self.inner
            .tracked(channel_id)
            .map(|tracked| tracked.connection.lock().clone())
    }

    /// Returns the number of tracked intents.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    /// Returns `true` if nothing is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    fn spawn(
        &self,
        channel_id: ChannelId,
        tracked: Arc<Tracked>,
        status: Option<Arc<dyn ConnectionStatus>>,
        delay: Duration,
    ) {
        if tracked.driving.swap(true, Ordering::AcqRel) {
            debug!(channel_id = %channel_id, "Connection already being driven");
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(&channel_id, &tracked, status, delay).await;
            tracked.driving.store(false, Ordering::Release);
        });
    }
}

// ============================================================================
// ManagerInner - Attempt Loop
// ============================================================================

impl ManagerInner {
    fn tracked(&self, channel_id: &ChannelId) -> Option<Arc<Tracked>> {
        self.connections
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` while `tracked` is the intent registered for the ID.
    ///
    /// An intent released and tracked again under the same ID is a new
    /// entry; the old task sees it as gone.
    fn is_current(&self, channel_id: &ChannelId, tracked: &Arc<Tracked>) -> bool {
        self.connections
            .get(channel_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), tracked))
    }

    /// Connects, waits for the drop, and repeats while `tracked` is current.
    async fn drive(
        &self,
        channel_id: &ChannelId,
        tracked: &Arc<Tracked>,
        mut status: Option<Arc<dyn ConnectionStatus>>,
        mut delay: Duration,
    ) {
        loop {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            delay = self.reconnect_interval;

            if !self.is_current(channel_id, tracked) {
                debug!(channel_id = %channel_id, "Connection no longer tracked");
                return;
            }

            let (url, attempt) = {
                let mut connection = tracked.connection.lock();
                let url = connection.next_url().clone();
                (url, connection.attempts())
            };

            info!(channel_id = %channel_id, url = %url, attempt, "Connecting");

            match self.connector.connect(channel_id, &url).await {
                Ok(closed) => {
                    info!(channel_id = %channel_id, url = %url, "Connected");
                    tracked.connection.lock().attempts = 0;
                    if let Some(status) = status.take() {
                        status.success(channel_id);
                    }

                    let _ = closed.await;

                    if !self.is_current(channel_id, tracked) {
                        return;
                    }
                    warn!(channel_id = %channel_id, "Outbound channel dropped, reconnecting");
                }
                Err(e) => {
                    warn!(
                        channel_id = %channel_id,
                        url = %url,
                        attempt,
                        error = %e,
                        "Connection attempt failed"
                    );
                    if let Some(ref status) = status {
                        status.error(channel_id, &e);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use proptest::prelude::*;

    /// Fails every attempt and records the URLs.
    #[derive(Default)]
    struct RefusingConnector {
        attempts: Mutex<Vec<Url>>,
    }

    #[async_trait]
    impl ClientConnector for RefusingConnector {
        async fn connect(&self, _channel_id: &ChannelId, url: &Url) -> Result<ClosedSignal> {
            self.attempts.lock().push(url.clone());
            Err(Error::driver("connection refused"))
        }
    }

    /// Succeeds and hands the close trigger to the test.
    #[derive(Default)]
    struct AcceptingConnector {
        triggers: Mutex<Vec<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl ClientConnector for AcceptingConnector {
        async fn connect(&self, _channel_id: &ChannelId, _url: &Url) -> Result<ClosedSignal> {
            let (tx, rx) = oneshot::channel();
            self.triggers.lock().push(tx);
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct StatusLog {
        ok: Mutex<u32>,
        errors: Mutex<Vec<String>>,
    }

    impl ConnectionStatus for StatusLog {
        fn success(&self, _channel_id: &ChannelId) {
            *self.ok.lock() += 1;
        }

        fn error(&self, _channel_id: &ChannelId, cause: &Error) {
            self.errors.lock().push(cause.to_string());
        }
    }

    fn two_urls() -> ClientConnection {
        ClientConnection::parse("peer", ["ws://a.test/", "ws://b.test/"]).expect("urls")
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            sleep(Duration::from_millis(2)).await;
        }
    }

    #[test]
    fn test_rotation_two_urls_budget_three() {
        let mut connection = two_urls().with_max_reconnect(3);
        let hosts: Vec<String> = (0..7)
            .map(|_| connection.next_url().host_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(hosts, ["a.test", "a.test", "a.test", "b.test", "b.test", "b.test", "a.test"]);
    }

    #[test]
    fn test_empty_urls_rejected() {
        let result = ClientConnection::new("peer", Vec::new());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_bad_url_rejected() {
        let result = ClientConnection::parse("peer", ["not a url"]);
        assert!(matches!(result, Err(Error::Url(_))));
    }

    proptest! {
        #[test]
        fn prop_rotation_visits_urls_in_blocks(
            url_count in 1usize..5,
            max in 1u32..5,
            attempts in 1usize..60,
        ) {
            let urls: Vec<Url> = (0..url_count)
                .map(|i| Url::parse(&format!("ws://host{i}.test/")).unwrap())
                .collect();
            let mut connection = ClientConnection::new("peer", urls.clone())
                .unwrap()
                .with_max_reconnect(max);

            for n in 0..attempts {
                let expected = &urls[(n / max as usize) % url_count];
                prop_assert_eq!(connection.next_url(), expected);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_attempts_rotate_urls() {
        let connector = Arc::new(RefusingConnector::default());
        let manager = ConnectionManager::new(connector.clone(), 3, Duration::from_millis(1));
        let log = Arc::new(StatusLog::default());

        manager.connect(two_urls(), Some(log.clone())).expect("connect");
        wait_until(|| connector.attempts.lock().len() >= 7).await;
        manager.disconnect(&ChannelId::from("peer"));

        let hosts: Vec<String> = connector.attempts.lock()[..7]
            .iter()
            .map(|u| u.host_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(hosts, ["a.test", "a.test", "a.test", "b.test", "b.test", "b.test", "a.test"]);
        assert!(log.errors.lock().len() >= 7);
        assert_eq!(*log.ok.lock(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_connection_rejected() {
        let connector = Arc::new(RefusingConnector::default());
        let manager = ConnectionManager::new(connector, 3, Duration::from_millis(50));
        let log = Arc::new(StatusLog::default());

        manager.connect(two_urls(), None).expect("first");
        let result = manager.connect(two_urls(), Some(log.clone()));

        assert!(matches!(result, Err(Error::DuplicateConnection { .. })));
        assert_eq!(log.errors.lock().len(), 1);
        assert_eq!(manager.len(), 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_stops_retrying() {
        let connector = Arc::new(RefusingConnector::default());
        let manager = ConnectionManager::new(connector.clone(), 3, Duration::from_millis(5));

        manager.connect(two_urls(), None).expect("connect");
        wait_until(|| !connector.attempts.lock().is_empty()).await;

        assert!(manager.disconnect(&ChannelId::from("peer")));
        assert!(!manager.disconnect(&ChannelId::from("peer")));

        sleep(Duration::from_millis(20)).await;
        let settled = connector.attempts.lock().len();
        sleep(Duration::from_millis(40)).await;
        assert_eq!(connector.attempts.lock().len(), settled);
    }

    #[tokio::test]
    async fn test_reconnect_same_id_runs_one_loop() {
        let connector = Arc::new(RefusingConnector::default());
        let interval = Duration::from_millis(25);
        let manager = ConnectionManager::new(connector.clone(), 3, interval);
        let id = ChannelId::from("peer");

        manager.connect(two_urls(), None).expect("first");
        wait_until(|| !connector.attempts.lock().is_empty()).await;
        assert!(manager.disconnect(&id));
        manager.connect(two_urls(), None).expect("second");

        let before = connector.attempts.lock().len();
        sleep(interval * 10).await;
        let made = connector.attempts.lock().len() - before;
        manager.shutdown();

        // One loop makes about 11 attempts in this window, two make about 21.
        assert!(made <= 14, "{made} attempts, expected a single retry loop");
        assert!(made >= 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let connector = Arc::new(AcceptingConnector::default());
        let manager = ConnectionManager::new(connector.clone(), 3, Duration::from_millis(1));
        let log = Arc::new(StatusLog::default());

        manager.connect(two_urls(), Some(log.clone())).expect("connect");
        wait_until(|| connector.triggers.lock().len() == 1).await;
        assert_eq!(*log.ok.lock(), 1);

        let trigger = connector.triggers.lock().pop();
        drop(trigger);

        wait_until(|| connector.triggers.lock().len() == 1).await;
        assert_eq!(*log.ok.lock(), 1);

        manager.shutdown();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_reconnect_unknown() {
        let manager = ConnectionManager::new(
            Arc::new(RefusingConnector::default()),
            3,
            Duration::from_millis(1),
        );
        let result = manager.scheduled_reconnect(&ChannelId::from("ghost"));
        assert!(matches!(result, Err(Error::ChannelNotFound { .. })));
    }
}
