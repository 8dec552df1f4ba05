//! Protocol-agnostic driver state.
//!
//! Every concrete driver embeds one [`DriverCore`]. The I/O side of a driver
//! reports channel lifecycle and raw frames into the core; the core decodes,
//! stamps and forwards them to the [`NetworkListener`], and serves the
//! outbound half of the [`NetworkDriver`](super::NetworkDriver) contract.
//!
//! # Inbound Path
//!
//! ```text
//! frame ─► codec ─► interest check ─► CHANNEL_MESSAGE_SEQUENCE
//!                                  ─► EVENT_MESSAGE_SEQUENCE ─► listener
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{
    CHANNEL_MESSAGE_SEQUENCE, CodecRegistry, EVENT_MESSAGE_SEQUENCE, NetworkEvent,
    NetworkEventType, NetworkMessage, WireFrame, WireType,
};

use super::channel::{ChannelHandle, ChannelRegistry, HandleId, WriteCallback};
use super::driver::{ConnectionStatus, DeliveryStatus, NetworkListener};
use super::options::NetworkOptions;

// ============================================================================
// DriverCore
// ============================================================================

/// Shared state and logic of a network driver.
pub struct DriverCore {
    options: NetworkOptions,
    wire_type: WireType,
    codecs: CodecRegistry,
    channels: ChannelRegistry,
    listener: RwLock<Option<Weak<dyn NetworkListener>>>,
    interest: DashSet<String, FxBuildHasher>,
    event_sequences: DashMap<String, AtomicU64, FxBuildHasher>,
    running: AtomicBool,
}

impl fmt::Debug for DriverCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverCore")
            .field("wire_type", &self.wire_type)
            .field("channels", &self.channels.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DriverCore - Constructor
// ============================================================================

impl DriverCore {
    /// Creates a core for the given wire type.
    #[must_use]
    pub fn new(options: NetworkOptions, wire_type: WireType, codecs: CodecRegistry) -> Self {
        Self {
            options,
            wire_type,
            codecs,
            channels: ChannelRegistry::new(),
            listener: RwLock::new(None),
            interest: DashSet::with_hasher(FxBuildHasher),
            event_sequences: DashMap::with_hasher(FxBuildHasher),
            running: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// DriverCore - Accessors
// ============================================================================

impl DriverCore {
    /// Returns the driver options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    /// Returns the wire type.
    #[inline]
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Returns the codec registry.
    #[inline]
    #[must_use]
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Returns the channel registry.
    #[inline]
    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Returns `true` while the driver is running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Marks the driver as running or stopped.
    ///
    /// Returns the previous state.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel)
    }

    /// Installs the listener.
    pub fn set_listener(&self, listener: Weak<dyn NetworkListener>) {
        *self.listener.write() = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn NetworkListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }
}

// ============================================================================
// DriverCore - Event Interest
// ============================================================================

impl DriverCore {
    /// Registers interest in an event.
    pub fn subscribe(&self, event: &str) {
        if self.interest.insert(event.to_string()) {
            debug!(event, "Subscribed to event");
        }
    }

    /// Withdraws interest in an event.
    pub fn unsubscribe(&self, event: &str) {
        if self.interest.remove(event).is_some() {
            debug!(event, "Unsubscribed from event");
        }
    }

    /// Returns `true` if someone subscribed to the event.
    #[inline]
    #[must_use]
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.interest.contains(event)
    }
}

// ============================================================================
// DriverCore - Outbound
// ============================================================================

impl DriverCore {
    /// Encodes and writes a message to one channel.
    ///
    /// Failures are returned and, when a status callback is given, also
    /// reported through it. Success is reported once the transport accepted
    /// the frame.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the driver is stopped
    /// - [`Error::ChannelNotFound`] if the channel is not live
    /// - [`Error::Codec`] if encoding fails
    /// - [`Error::Driver`] if the channel's I/O task is gone
    pub fn send(
        &self,
        channel_id: &ChannelId,
        message: &NetworkMessage,
        status: Option<Arc<dyn DeliveryStatus>>,
    ) -> Result<()> {
        let result = self.try_send(channel_id, message, status.clone());

        if let Err(ref e) = result {
            warn!(channel_id = %channel_id, event = message.event(), error = %e, "Send failed");
            if let Some(status) = status {
                status.error(channel_id, message, e);
            }
        }

        result
    }

    fn try_send(
        &self,
        channel_id: &ChannelId,
        message: &NetworkMessage,
        status: Option<Arc<dyn DeliveryStatus>>,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let channel = self.channels.get(channel_id)?;
        let frame = self.codecs.serialize(self.wire_type, message)?;

        let on_complete = status.map(|status| {
            let channel_id = channel_id.clone();
            let message = message.clone();
            Box::new(move |result: Result<()>| match result {
                Ok(()) => status.success(&channel_id, &message),
                Err(e) => status.error(&channel_id, &message, &e),
            }) as WriteCallback
        });

        channel.handle().write(frame, on_complete)?;
        trace!(channel_id = %channel_id, event = message.event(), "Message queued");
        Ok(())
    }

    /// Encodes a message once and writes it to every live channel.
    ///
    /// Per-channel write failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the driver is stopped
    /// - [`Error::Codec`] if encoding fails
    pub fn broadcast(&self, message: &NetworkMessage) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let frame = self.codecs.serialize(self.wire_type, message)?;

        for channel in self.channels.snapshot() {
            if let Err(e) = channel.handle().write(frame.clone(), None) {
                warn!(
                    channel_id = %channel.id(),
                    event = message.event(),
                    error = %e,
                    "Broadcast write failed"
                );
            }
        }

        Ok(())
    }

    /// Requests a channel close.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelNotFound`] if the channel is not live
    /// - [`Error::Driver`] if the channel's I/O task is gone
    pub fn close_channel(
        &self,
        channel_id: &ChannelId,
        status: Option<Arc<dyn ConnectionStatus>>,
    ) -> Result<()> {
        let result = self
            .channels
            .get(channel_id)
            .and_then(|channel| channel.handle().close());

        match (&result, status) {
            (Ok(()), Some(status)) => status.success(channel_id),
            (Err(e), Some(status)) => status.error(channel_id, e),
            _ => {}
        }

        if result.is_ok() {
            debug!(channel_id = %channel_id, "Channel close requested");
        }

        result
    }

    /// Requests every live channel to close.
    pub fn close_all(&self) {
        for channel in self.channels.snapshot() {
            if let Err(e) = channel.handle().close() {
                debug!(channel_id = %channel.id(), error = %e, "Close failed");
            }
        }
    }
}

// ============================================================================
// DriverCore - Lifecycle Events
// ============================================================================

impl DriverCore {
    /// Forwards a lifecycle event to the listener.
    pub fn notify(&self, channel_id: &ChannelId, event_type: NetworkEventType) {
        trace!(channel_id = %channel_id, %event_type, "Network event");
        if let Some(listener) = self.listener() {
            listener.on_network_event(NetworkEvent::new(channel_id, event_type));
        }
    }

    /// Registers a connected channel and raises `ACTIVE`.
    pub fn channel_active(&self, channel_id: &ChannelId, handle: Arc<dyn ChannelHandle>) {
        self.channels.on_active(channel_id.clone(), handle);
        info!(channel_id = %channel_id, "Channel active");
        self.notify(channel_id, NetworkEventType::Active);
    }

    /// Removes a channel and raises `INACTIVE`.
    ///
    /// Does nothing if the channel was already removed or now belongs to
    /// another handle.
    pub fn channel_inactive(&self, channel_id: &ChannelId, handle: HandleId) {
        if self.channels.on_inactive(channel_id, handle).is_some() {
            info!(channel_id = %channel_id, "Channel inactive");
            self.notify(channel_id, NetworkEventType::Inactive);
        }
    }

    /// Handles an idle timer firing on a channel.
    ///
    /// Past `max_timeouts` consecutive misses the channel is closed;
    /// otherwise a ping is sent and `TIMEOUT_ALERT_ON` raised.
    pub fn idle_timeout(&self, channel_id: &ChannelId) {
        let Ok(channel) = self.channels.get(channel_id) else {
            return;
        };

        let Ok(misses) = self.channels.next_reconnect_count(channel_id) else {
            return;
        };

        if misses > self.options.max_timeouts {
            warn!(
                channel_id = %channel_id,
                misses,
                max = self.options.max_timeouts,
                "Heartbeat budget exhausted, closing channel"
            );
            if let Err(e) = channel.handle().close() {
                debug!(channel_id = %channel_id, error = %e, "Close failed");
            }
            return;
        }

        debug!(channel_id = %channel_id, misses, "Channel idle, sending ping");
        if let Err(e) = channel.handle().ping() {
            debug!(channel_id = %channel_id, error = %e, "Ping failed");
        }
        self.notify(channel_id, NetworkEventType::TimeoutAlertOn);
    }

    /// Handles a heartbeat answer.
    ///
    /// Resets the miss counter and raises `TIMEOUT_ALERT_OFF` if an alert
    /// was active.
    pub fn pong_received(&self, channel_id: &ChannelId) {
        if let Ok(previous) = self.channels.reset_reconnect_count(channel_id)
            && previous > 0
        {
            debug!(channel_id = %channel_id, "Heartbeat answered");
            self.notify(channel_id, NetworkEventType::TimeoutAlertOff);
        }
    }
}

// ============================================================================
// DriverCore - Inbound
// ============================================================================

impl DriverCore {
    /// Decodes, stamps and forwards one inbound frame.
    ///
    /// Undecodable frames, frames for unsubscribed events and frames from
    /// unknown channels are logged and dropped.
    pub fn handle_frame(&self, channel_id: &ChannelId, frame: WireFrame) {
        let message = match self.codecs.deserialize(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        self.handle_message(channel_id, message);
    }

    /// Stamps and forwards one decoded inbound message.
    pub fn handle_message(&self, channel_id: &ChannelId, mut message: NetworkMessage) {
        if !self.is_subscribed(message.event()) {
            debug!(
                channel_id = %channel_id,
                event = message.event(),
                "No interest in event, dropping message"
            );
            return;
        }

        let channel_sequence = match self.channels.next_message_sequence(channel_id) {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!(channel_id = %channel_id, event = message.event(), error = %e, "Dropping message");
                return;
            }
        };
        let event_sequence = self.next_event_sequence(message.event());

        message.put_context(CHANNEL_MESSAGE_SEQUENCE, channel_sequence);
        message.put_context(EVENT_MESSAGE_SEQUENCE, event_sequence);
        message.set_channel_id(channel_id.clone());

        match self.listener() {
            Some(listener) => listener.on_network_message(message),
            None => debug!(channel_id = %channel_id, "No listener, dropping message"),
        }
    }

    fn next_event_sequence(&self, event: &str) -> u64 {
        if let Some(counter) = self.event_sequences.get(event) {
            return counter.fetch_add(1, Ordering::AcqRel) + 1;
        }

        self.event_sequences
            .entry(event.to_string())
            .or_default()
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::protocol::{JsonCodec, MessageCodec};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<NetworkEvent>>,
        messages: Mutex<Vec<NetworkMessage>>,
    }

    impl NetworkListener for Recorder {
        fn on_network_event(&self, event: NetworkEvent) {
            self.events.lock().push(event);
        }

        fn on_network_message(&self, message: NetworkMessage) {
            self.messages.lock().push(message);
        }
    }

    #[derive(Default)]
    struct FakeHandle {
        written: Mutex<Vec<WireFrame>>,
        pings: Mutex<u32>,
        closes: Mutex<u32>,
    }

    impl ChannelHandle for FakeHandle {
        fn write(&self, frame: WireFrame, on_complete: Option<WriteCallback>) -> Result<()> {
            self.written.lock().push(frame);
            if let Some(callback) = on_complete {
                callback(Ok(()));
            }
            Ok(())
        }

        fn ping(&self) -> Result<()> {
            *self.pings.lock() += 1;
            Ok(())
        }

        fn close(&self) -> Result<()> {
            *self.closes.lock() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct DeliveryLog {
        ok: Mutex<u32>,
        failed: Mutex<u32>,
    }

    impl DeliveryStatus for DeliveryLog {
        fn success(&self, _channel_id: &ChannelId, _message: &NetworkMessage) {
            *self.ok.lock() += 1;
        }

        fn error(&self, _channel_id: &ChannelId, _message: &NetworkMessage, _cause: &Error) {
            *self.failed.lock() += 1;
        }
    }

    fn setup() -> (DriverCore, Arc<Recorder>, Arc<FakeHandle>, ChannelId) {
        let mut codecs = CodecRegistry::new();
        codecs.register(Arc::new(JsonCodec));
        let core = DriverCore::new(NetworkOptions::new(), WireType::Text, codecs);

        let recorder = Arc::new(Recorder::default());
        let weak: Weak<Recorder> = Arc::downgrade(&recorder);
        core.set_listener(weak);
        core.set_running(true);

        let handle = Arc::new(FakeHandle::default());
        let id = ChannelId::from("c1");
        core.channel_active(&id, Arc::clone(&handle) as Arc<dyn ChannelHandle>);

        (core, recorder, handle, id)
    }

    fn text(message: &NetworkMessage) -> WireFrame {
        JsonCodec.serialize(message).expect("encode")
    }

    #[test]
    fn test_active_raises_event() {
        let (core, recorder, _handle, id) = setup();
        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel_id, id);
        assert!(events[0].is_active());
        assert!(core.channels().contains(&id));
    }

    #[test]
    fn test_inactive_raises_event_once() {
        let (core, recorder, handle, id) = setup();
        let handle_id = HandleId::of(Arc::as_ptr(&handle));
        core.channel_inactive(&id, handle_id);
        core.channel_inactive(&id, handle_id);

        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events[1].is_inactive());
    }

    #[test]
    fn test_inbound_stamping() {
        let (core, recorder, _handle, id) = setup();
        core.subscribe("chat");

        for _ in 0..3 {
            core.handle_frame(&id, text(&NetworkMessage::new("chat")));
        }

        let messages = recorder.messages.lock();
        let sequences: Vec<_> = messages.iter().filter_map(NetworkMessage::channel_sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(messages[2].event_sequence(), Some(3));
        assert_eq!(messages[0].channel_id(), Some(&id));
    }

    #[test]
    fn test_event_sequence_is_per_event() {
        let (core, recorder, _handle, id) = setup();
        core.subscribe("a");
        core.subscribe("b");

        core.handle_frame(&id, text(&NetworkMessage::new("a")));
        core.handle_frame(&id, text(&NetworkMessage::new("b")));
        core.handle_frame(&id, text(&NetworkMessage::new("a")));

        let messages = recorder.messages.lock();
        let stamps: Vec<_> = messages
            .iter()
            .map(|m| (m.channel_sequence(), m.event_sequence()))
            .collect();
        assert_eq!(
            stamps,
            vec![(Some(1), Some(1)), (Some(2), Some(1)), (Some(3), Some(2))]
        );
    }

    #[test]
    fn test_unsubscribed_event_dropped() {
        let (core, recorder, _handle, id) = setup();
        core.handle_frame(&id, text(&NetworkMessage::new("chat")));
        assert!(recorder.messages.lock().is_empty());

        core.subscribe("chat");
        core.unsubscribe("chat");
        core.handle_frame(&id, text(&NetworkMessage::new("chat")));
        assert!(recorder.messages.lock().is_empty());
    }

    #[test]
    fn test_garbage_frame_dropped() {
        let (core, recorder, _handle, id) = setup();
        core.subscribe("chat");
        core.handle_frame(&id, WireFrame::Text("garbage".into()));
        assert!(recorder.messages.lock().is_empty());
    }

    #[test]
    fn test_send_writes_frame() {
        let (core, _recorder, handle, id) = setup();
        let log = Arc::new(DeliveryLog::default());

        core.send(&id, &NetworkMessage::new("pong"), Some(log.clone()))
            .expect("send");

        assert_eq!(handle.written.lock().len(), 1);
        assert_eq!(*log.ok.lock(), 1);
    }

    #[test]
    fn test_send_unknown_channel() {
        let (core, _recorder, _handle, _id) = setup();
        let log = Arc::new(DeliveryLog::default());

        let result = core.send(
            &ChannelId::from("ghost"),
            &NetworkMessage::new("pong"),
            Some(log.clone()),
        );

        assert!(matches!(result, Err(Error::ChannelNotFound { .. })));
        assert_eq!(*log.failed.lock(), 1);
    }

    #[test]
    fn test_send_when_stopped() {
        let (core, _recorder, _handle, id) = setup();
        core.set_running(false);
        let result = core.send(&id, &NetworkMessage::new("pong"), None);
        assert!(matches!(result, Err(Error::NotRunning)));
    }

    #[test]
    fn test_broadcast_reaches_all() {
        let (core, _recorder, first, _id) = setup();
        let second = Arc::new(FakeHandle::default());
        core.channel_active(&ChannelId::from("c2"), Arc::clone(&second) as Arc<dyn ChannelHandle>);

        core.broadcast(&NetworkMessage::new("news")).expect("broadcast");

        assert_eq!(first.written.lock().len(), 1);
        assert_eq!(second.written.lock().len(), 1);
    }

    #[test]
    fn test_idle_ping_then_close() {
        let (core, recorder, handle, id) = setup();

        for _ in 0..3 {
            core.idle_timeout(&id);
        }
        assert_eq!(*handle.pings.lock(), 3);
        assert_eq!(*handle.closes.lock(), 0);

        core.idle_timeout(&id);
        assert_eq!(*handle.closes.lock(), 1);

        let alerts = recorder
            .events
            .lock()
            .iter()
            .filter(|e| e.event_type == NetworkEventType::TimeoutAlertOn)
            .count();
        assert_eq!(alerts, 3);
    }

    #[test]
    fn test_pong_resets_and_raises_alert_off() {
        let (core, recorder, _handle, id) = setup();

        core.pong_received(&id);
        core.idle_timeout(&id);
        core.pong_received(&id);

        assert_eq!(core.channels().get(&id).expect("channel").reconnect_count(), 0);
        let offs = recorder
            .events
            .lock()
            .iter()
            .filter(|e| e.event_type == NetworkEventType::TimeoutAlertOff)
            .count();
        assert_eq!(offs, 1);
    }

    #[test]
    fn test_close_channel_reports_status() {
        struct CloseLog(Mutex<Vec<bool>>);
        impl ConnectionStatus for CloseLog {
            fn success(&self, _channel_id: &ChannelId) {
                self.0.lock().push(true);
            }
            fn error(&self, _channel_id: &ChannelId, _cause: &Error) {
                self.0.lock().push(false);
            }
        }

        let (core, _recorder, handle, id) = setup();
        let log = Arc::new(CloseLog(Mutex::new(Vec::new())));

        core.close_channel(&id, Some(log.clone())).expect("close");
        assert!(core.close_channel(&ChannelId::from("ghost"), Some(log.clone())).is_err());

        assert_eq!(*handle.closes.lock(), 1);
        assert_eq!(*log.0.lock(), vec![true, false]);
    }
}
