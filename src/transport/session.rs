//! # Printer Session
//!
//! Owns one radio channel and drives it through the session lifecycle:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──opened──▶ Handshaking ──reply──▶ Streaming
//!                               │                      │                     │ finish
//!                               └──refused/timeout─────┴──timeout/garbage──▶ Faulted
//!                                                                            ▲   │
//!                                              Closed ◀──reply── Draining ◀──┘───┘
//! ```
//!
//! `Closed` and `Faulted` are terminal. [`Session::close`] moves any live
//! session to `Closed` and always releases the channel.
//!
//! ## Acknowledgment
//!
//! Peripage printers never acknowledge raster data, so by default
//! ([`AckMode::Implicit`]) a packet counts as delivered once its write
//! completes and its pacing delay has passed. Links that answer every
//! packet with ACK/NAK use [`AckMode::Explicit`], which keeps up to
//! `window` packets in flight and retransmits the whole window (go-back-N)
//! on a NAK or ack timeout.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Channel, ChannelError, Connector};
use crate::config::millis;
use crate::encode::{AckPolicy, Packet};
use crate::error::{ConfigError, ConnectionError, TransportError};
use crate::protocol::commands::{self, ACK, DeviceQuery, NAK};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Streaming,
    Draining,
    Closed,
    Faulted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Faulted)
    }
}

/// How the printer confirms packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Write completion is the acknowledgment
    #[default]
    Implicit,
    /// One ACK (0x06) or NAK (0x15) byte per packet
    Explicit,
}

/// Session tuning. Durations are milliseconds in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ack_mode: AckMode,
    /// Maximum unacknowledged packets (explicit mode)
    pub window: usize,
    /// Rejections of one packet before the send fails
    pub retries: u32,
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,
    #[serde(rename = "ack_timeout_ms", with = "millis")]
    pub ack_timeout: Duration,
    /// Wait for the first byte of a status reply
    #[serde(rename = "reply_timeout_ms", with = "millis")]
    pub reply_timeout: Duration,
    /// Quiet period that ends a multi-chunk reply
    #[serde(rename = "reply_settle_ms", with = "millis")]
    pub reply_settle: Duration,
    #[serde(rename = "backoff_base_ms", with = "millis")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_max_ms", with = "millis")]
    pub backoff_max: Duration,
    /// Pause after the reset command before the printer listens again
    #[serde(rename = "reset_settle_ms", with = "millis")]
    pub reset_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::Implicit,
            window: 1,
            retries: 2,
            handshake_timeout: Duration::from_millis(3000),
            ack_timeout: Duration::from_millis(2000),
            reply_timeout: Duration::from_millis(3000),
            reply_settle: Duration::from_millis(50),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(2000),
            reset_settle: Duration::from_millis(250),
        }
    }
}

impl SessionConfig {
    /// Short timeouts and no settle pauses, for in-memory channels.
    pub fn immediate() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(200),
            reply_timeout: Duration::from_millis(500),
            reply_settle: Duration::ZERO,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(10),
            reset_settle: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid {
                field: "retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backoff_max < self.backoff_base {
            return Err(ConfigError::Invalid {
                field: "backoff_max_ms",
                reason: "must not be below backoff_base_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before the `attempt`-th retransmission (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// A packet the printer has confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acked {
    pub index: usize,
    pub len: usize,
}

impl Acked {
    fn of(packet: &Packet) -> Self {
        Self {
            index: packet.index,
            len: packet.len(),
        }
    }
}

struct InFlight {
    packet: Packet,
    rejections: u32,
}

/// A connection to one printer.
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    history: Vec<SessionState>,
    channel: Option<Box<dyn Channel>>,
    address: Option<String>,
    identity: Option<String>,
    in_flight: VecDeque<InFlight>,
    /// Received bytes not yet consumed as acks
    rx: VecDeque<u8>,
    /// Confirmed packets not yet handed to the caller
    acked: Vec<Acked>,
}

impl Session {
    /// A disconnected session. Fails on an invalid `config`.
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: SessionState::Disconnected,
            history: vec![SessionState::Disconnected],
            channel: None,
            address: None,
            identity: None,
            in_flight: VecDeque::new(),
            rx: VecDeque::new(),
            acked: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state the session has been in, oldest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// The printer's answer to the name query, e.g. `PeriPage+DF7A`.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Packets written but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Open a channel to `address` and handshake with the printer.
    ///
    /// On success the session is `Streaming`; on any failure it is `Faulted`
    /// and the channel has been released.
    pub fn connect(
        &mut self,
        connector: &mut dyn Connector,
        address: &str,
    ) -> Result<(), ConnectionError> {
        if self.state != SessionState::Disconnected {
            return Err(ConnectionError::InvalidState(self.state));
        }

        self.address = Some(address.to_string());
        self.transition(SessionState::Connecting);

        match connector.open(address) {
            Ok(channel) => self.channel = Some(channel),
            Err(e) => {
                let error = match e {
                    ChannelError::Timeout => ConnectionError::Timeout {
                        address: address.to_string(),
                    },
                    ChannelError::Refused(reason) | ChannelError::LinkDropped(reason) => {
                        ConnectionError::Refused {
                            address: address.to_string(),
                            reason,
                        }
                    }
                };
                self.fault(error.to_string());
                return Err(error);
            }
        }

        self.transition(SessionState::Handshaking);
        match self.handshake() {
            Ok(identity) => {
                tracing::info!(address, identity = %identity, "printer connected");
                self.identity = Some(identity);
                self.transition(SessionState::Streaming);
                Ok(())
            }
            Err(e) => {
                self.fault(e.to_string());
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<String, ConnectionError> {
        let link = |e: ChannelError| ConnectionError::LinkDropped(e.to_string());

        self.write_all(&commands::reset()).map_err(link)?;
        if !self.config.reset_settle.is_zero() {
            thread::sleep(self.config.reset_settle);
        }
        self.write_all(&DeviceQuery::Name.request()).map_err(link)?;

        let timeout = self.config.handshake_timeout;
        let reply = match self.read_reply(timeout) {
            Ok(reply) => reply,
            Err(ChannelError::Timeout) => return Err(ConnectionError::HandshakeTimeout(timeout)),
            Err(e) => return Err(link(e)),
        };
        parse_identity(&reply)
    }

    /// Write one packet.
    ///
    /// Returns the packets that became acknowledged during the call, which
    /// in explicit mode are usually older than `packet`. Blocks while the
    /// window is full.
    ///
    /// ## Errors
    ///
    /// - [`TransportError::Nack`] / [`TransportError::Timeout`] once a packet
    ///   has been rejected `retries` times; the window is cleared and the
    ///   session stays `Streaming`
    /// - [`TransportError::LinkDropped`]: the session is now `Faulted`
    /// - [`TransportError::InvalidState`] unless `Streaming`
    ///
    /// Packets confirmed before an error are kept for [`Session::take_acked`].
    pub fn send(&mut self, packet: &Packet) -> Result<Vec<Acked>, TransportError> {
        self.ensure_streaming()?;

        match (self.config.ack_mode, packet.ack) {
            (AckMode::Implicit, policy) => {
                self.transmit(packet)?;
                if policy == AckPolicy::StatusReply {
                    self.await_reply()?;
                }
                self.acked.push(Acked::of(packet));
            }
            (AckMode::Explicit, AckPolicy::StatusReply) => {
                // The reply replaces the ack byte, so nothing else may be pending
                self.drain_window()?;
                self.transmit(packet)?;
                self.await_reply()?;
                self.acked.push(Acked::of(packet));
            }
            (AckMode::Explicit, _) => {
                while self.in_flight.len() >= self.config.window {
                    self.await_oldest()?;
                }
                self.transmit(packet)?;
                self.in_flight.push_back(InFlight {
                    packet: packet.clone(),
                    rejections: 0,
                });
            }
        }

        Ok(self.take_acked())
    }

    /// Wait until every packet in flight is acknowledged.
    pub fn flush(&mut self) -> Result<Vec<Acked>, TransportError> {
        self.ensure_streaming()?;
        self.drain_window()?;
        Ok(self.take_acked())
    }

    /// Give up on the window without writing anything.
    ///
    /// Collects acks for in-flight packets in order until the first NAK or
    /// ack timeout, then abandons the rest and discards pending input. The
    /// session stays `Streaming` unless the link drops.
    pub fn settle(&mut self) -> Result<Vec<Acked>, TransportError> {
        self.ensure_streaming()?;
        while let Some(index) = self.in_flight.front().map(|f| f.packet.index) {
            match self.next_byte(self.config.ack_timeout) {
                Ok(ACK) => {
                    if let Some(done) = self.in_flight.pop_front() {
                        tracing::debug!(index, "packet acknowledged");
                        self.acked.push(Acked::of(&done.packet));
                    }
                }
                Ok(NAK) | Err(ChannelError::Timeout) => break,
                Ok(byte) => tracing::debug!(byte, "ignoring unexpected byte"),
                Err(e) => return Err(self.fault(e.to_string())),
            }
        }

        if !self.in_flight.is_empty() {
            tracing::debug!(abandoned = self.in_flight.len(), "abandoning window");
            self.in_flight.clear();
        }
        self.discard_input()?;
        Ok(self.take_acked())
    }

    /// Acknowledgments collected but not yet returned by `send`/`flush`.
    pub fn take_acked(&mut self) -> Vec<Acked> {
        std::mem::take(&mut self.acked)
    }

    /// Ask the printer for a property. Waits for the window to empty first.
    pub fn query(&mut self, query: DeviceQuery) -> Result<Vec<u8>, TransportError> {
        self.ensure_streaming()?;
        self.drain_window()?;
        self.write_or_fault(&query.request())?;
        self.await_reply()
    }

    /// Flush, confirm the printer is still answering, and close.
    ///
    /// `Streaming → Draining → Closed`, or `Faulted` when the final status
    /// query goes unanswered.
    pub fn finish(&mut self) -> Result<(), TransportError> {
        self.ensure_streaming()?;
        self.drain_window()?;
        self.transition(SessionState::Draining);

        let result = self
            .write_all(&DeviceQuery::Battery.request())
            .and_then(|_| self.read_reply(self.config.reply_timeout));

        match result {
            Ok(reply) => {
                if let Some(level) = DeviceQuery::decode_battery(&reply) {
                    tracing::info!(battery = level, "printer drained");
                }
                self.release();
                self.transition(SessionState::Closed);
                Ok(())
            }
            Err(ChannelError::Timeout) => {
                self.fault("no reply to final status query");
                Err(TransportError::Timeout)
            }
            Err(e) => Err(self.fault(e.to_string())),
        }
    }

    /// Release the channel. Idempotent; a faulted session stays `Faulted`.
    pub fn close(&mut self) {
        self.release();
        if !self.state.is_terminal() {
            self.transition(SessionState::Closed);
        }
    }

    // ========================================================================
    // Flow control
    // ========================================================================

    fn drain_window(&mut self) -> Result<(), TransportError> {
        while !self.in_flight.is_empty() {
            self.await_oldest()?;
        }
        Ok(())
    }

    /// Wait for the oldest in-flight packet to be acknowledged, retrying the
    /// window as needed.
    fn await_oldest(&mut self) -> Result<(), TransportError> {
        while let Some(index) = self.in_flight.front().map(|f| f.packet.index) {
            let rejection = match self.next_byte(self.config.ack_timeout) {
                Ok(ACK) => {
                    if let Some(done) = self.in_flight.pop_front() {
                        tracing::debug!(index, "packet acknowledged");
                        self.acked.push(Acked::of(&done.packet));
                    }
                    return Ok(());
                }
                Ok(NAK) => TransportError::Nack { index },
                Ok(byte) => {
                    tracing::debug!(byte, "ignoring unexpected byte");
                    continue;
                }
                Err(ChannelError::Timeout) => TransportError::Timeout,
                Err(e) => return Err(self.fault(e.to_string())),
            };
            self.reject(rejection)?;
        }
        Ok(())
    }

    /// Count a rejection of the oldest packet and retransmit the window, or
    /// give up once it has been rejected `retries` times.
    fn reject(&mut self, error: TransportError) -> Result<(), TransportError> {
        let Some(front) = self.in_flight.front_mut() else {
            return Ok(());
        };
        front.rejections += 1;
        let attempt = front.rejections;
        let index = front.packet.index;

        if attempt >= self.config.retries {
            tracing::warn!(index, attempts = attempt, error = %error, "giving up on packet");
            self.in_flight.clear();
            // Acks for the abandoned packets must not be credited to later ones
            self.discard_input()?;
            return Err(error);
        }

        let delay = self.config.backoff(attempt);
        tracing::warn!(
            index,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retransmitting window"
        );
        thread::sleep(delay);

        // Anything still queued answers packets that are about to be resent
        self.discard_input()?;

        for i in 0..self.in_flight.len() {
            let packet = self.in_flight[i].packet.clone();
            self.transmit(&packet)?;
        }
        Ok(())
    }

    fn await_reply(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.read_reply(self.config.reply_timeout) {
            Ok(reply) => Ok(reply),
            Err(ChannelError::Timeout) => {
                tracing::warn!("status reply timed out");
                Err(TransportError::Timeout)
            }
            Err(e) => Err(self.fault(e.to_string())),
        }
    }

    // ========================================================================
    // Channel I/O
    // ========================================================================

    fn transmit(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.write_or_fault(&packet.payload)?;
        tracing::debug!(index = packet.index, len = packet.len(), "packet written");
        if !packet.delay_after.is_zero() {
            thread::sleep(packet.delay_after);
        }
        Ok(())
    }

    fn write_or_fault(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.write_all(bytes).map_err(|e| self.fault(e.to_string()))
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), ChannelError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ChannelError::LinkDropped("no open channel".to_string()))?;

        while !bytes.is_empty() {
            let n = channel.write(bytes)?;
            if n == 0 {
                return Err(ChannelError::LinkDropped("channel accepted no bytes".to_string()));
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    fn read_channel(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ChannelError::LinkDropped("no open channel".to_string()))?;

        let bytes = channel.read(timeout)?;
        if bytes.is_empty() {
            return Err(ChannelError::Timeout);
        }
        Ok(bytes)
    }

    fn next_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError> {
        if let Some(byte) = self.rx.pop_front() {
            return Ok(byte);
        }
        let bytes = self.read_channel(timeout)?;
        self.rx.extend(bytes);
        self.rx.pop_front().ok_or(ChannelError::Timeout)
    }

    /// Read a reply that may arrive in several chunks. The first chunk must
    /// come within `timeout`; the reply ends after `reply_settle` of quiet.
    fn read_reply(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let mut reply: Vec<u8> = self.rx.drain(..).collect();
        if reply.is_empty() {
            reply = self.read_channel(timeout)?;
        }
        loop {
            match self.read_channel(self.config.reply_settle) {
                Ok(more) => reply.extend(more),
                Err(ChannelError::Timeout) => return Ok(reply),
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.rx.clear();
        loop {
            match self.read_channel(Duration::ZERO) {
                Ok(stale) => tracing::debug!(bytes = stale.len(), "discarding stale input"),
                Err(ChannelError::Timeout) => return Ok(()),
                Err(e) => return Err(self.fault(e.to_string())),
            }
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    fn ensure_streaming(&self) -> Result<(), TransportError> {
        if self.state != SessionState::Streaming {
            return Err(TransportError::InvalidState(self.state));
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
        self.history.push(next);
    }

    /// Enter `Faulted`, dropping the channel and anything in flight.
    fn fault(&mut self, reason: impl Into<String>) -> TransportError {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "session faulted");
        self.release();
        self.in_flight.clear();
        self.rx.clear();
        if self.state != SessionState::Faulted {
            self.transition(SessionState::Faulted);
        }
        TransportError::LinkDropped(reason)
    }

    fn release(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("address", &self.address)
            .field("identity", &self.identity)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Accept a printable name reply, e.g. `PeriPage+DF7A`.
fn parse_identity(reply: &[u8]) -> Result<String, ConnectionError> {
    let text = DeviceQuery::decode_text(reply);
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Err(ConnectionError::MalformedHandshake(format!("{:02x?}", reply)));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockPrinter, Response};
    use pretty_assertions::assert_eq;

    fn packet(index: usize, payload: &[u8], ack: AckPolicy) -> Packet {
        Packet {
            index,
            payload: payload.to_vec(),
            spans: Vec::new(),
            ack,
            delay_after: Duration::ZERO,
        }
    }

    fn explicit(window: usize, retries: u32) -> SessionConfig {
        SessionConfig {
            ack_mode: AckMode::Explicit,
            window,
            retries,
            ..SessionConfig::immediate()
        }
    }

    fn connected(printer: &MockPrinter, config: SessionConfig) -> Session {
        let mut session = Session::new(config).unwrap();
        session.connect(&mut printer.connector(), "mock").unwrap();
        session
    }

    #[test]
    fn test_connect_goes_through_handshake() {
        let printer = MockPrinter::new();
        let session = connected(&printer, SessionConfig::immediate());

        assert_eq!(
            session.history(),
            &[
                SessionState::Disconnected,
                SessionState::Connecting,
                SessionState::Handshaking,
                SessionState::Streaming,
            ]
        );
        assert_eq!(session.identity(), Some("PeriPage+DF7A"));
        assert_eq!(printer.writes()[0], commands::reset());
        assert_eq!(printer.writes()[1], DeviceQuery::Name.request());
    }

    #[test]
    fn test_refused_connect_faults() {
        let printer = MockPrinter::new().refuse(ChannelError::Refused("host is down".into()));
        let mut session = Session::new(SessionConfig::immediate()).unwrap();
        let err = session.connect(&mut printer.connector(), "04:7F:0E:B0:CA:57").unwrap_err();

        assert!(matches!(err, ConnectionError::Refused { .. }));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(
            session.history(),
            &[SessionState::Disconnected, SessionState::Connecting, SessionState::Faulted]
        );
    }

    #[test]
    fn test_connect_timeout() {
        let printer = MockPrinter::new().refuse(ChannelError::Timeout);
        let mut session = Session::new(SessionConfig::immediate()).unwrap();
        let err = session.connect(&mut printer.connector(), "mock").unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout { .. }));
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_silent_printer_times_out_handshake() {
        let printer = MockPrinter::new().reply_to(DeviceQuery::Name, None);
        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(20),
            ..SessionConfig::immediate()
        };
        let mut session = Session::new(config).unwrap();
        let err = session.connect(&mut printer.connector(), "mock").unwrap_err();

        assert_eq!(err, ConnectionError::HandshakeTimeout(Duration::from_millis(20)));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(printer.closes(), 1);
    }

    #[test]
    fn test_garbage_handshake_is_malformed() {
        let printer = MockPrinter::new().reply_to(DeviceQuery::Name, Some(&[0x01, 0xFE, 0x07]));
        let mut session = Session::new(SessionConfig::immediate()).unwrap();
        let err = session.connect(&mut printer.connector(), "mock").unwrap_err();

        assert!(matches!(err, ConnectionError::MalformedHandshake(_)));
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_connect_twice_is_invalid() {
        let printer = MockPrinter::new();
        let mut session = connected(&printer, SessionConfig::immediate());
        let err = session.connect(&mut printer.connector(), "mock").unwrap_err();
        assert_eq!(err, ConnectionError::InvalidState(SessionState::Streaming));
    }

    #[test]
    fn test_send_requires_streaming() {
        let mut session = Session::new(SessionConfig::immediate()).unwrap();
        let err = session.send(&packet(0, &[1], AckPolicy::None)).unwrap_err();
        assert_eq!(err, TransportError::InvalidState(SessionState::Disconnected));
    }

    #[test]
    fn test_implicit_send_acks_on_write() {
        let printer = MockPrinter::new();
        let mut session = connected(&printer, SessionConfig::immediate());

        let acked = session.send(&packet(0, &[1, 2, 3], AckPolicy::SingleByte)).unwrap();
        assert_eq!(acked, vec![Acked { index: 0, len: 3 }]);
        assert_eq!(printer.data_writes(), vec![vec![1, 2, 3]]);
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn test_explicit_send_acks_on_later_call() {
        let printer = MockPrinter::new().acking();
        let mut session = connected(&printer, explicit(1, 2));

        assert_eq!(session.send(&packet(0, &[1], AckPolicy::SingleByte)).unwrap(), vec![]);
        assert_eq!(
            session.send(&packet(1, &[2, 2], AckPolicy::SingleByte)).unwrap(),
            vec![Acked { index: 0, len: 1 }]
        );
        assert_eq!(session.flush().unwrap(), vec![Acked { index: 1, len: 2 }]);
    }

    #[test]
    fn test_nack_then_ack_retransmits_once() {
        let printer = MockPrinter::new().on_data(|n, _| {
            if n == 0 { Response::nak() } else { Response::ack() }
        });
        let mut session = connected(&printer, explicit(1, 2));

        session.send(&packet(0, &[9, 9], AckPolicy::SingleByte)).unwrap();
        assert_eq!(session.flush().unwrap(), vec![Acked { index: 0, len: 2 }]);
        assert_eq!(printer.data_writes(), vec![vec![9, 9], vec![9, 9]]);
    }

    #[test]
    fn test_retries_exhausted_keeps_streaming() {
        let printer = MockPrinter::new().on_data(|_, _| Response::nak());
        let mut session = connected(&printer, explicit(1, 2));

        session.send(&packet(0, &[5], AckPolicy::SingleByte)).unwrap();
        assert_eq!(session.flush().unwrap_err(), TransportError::Nack { index: 0 });
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.in_flight(), 0);
        assert_eq!(printer.data_write_count(), 2);
    }

    #[test]
    fn test_ack_timeout_counts_as_rejection() {
        let printer = MockPrinter::new().on_data(|_, _| Response::Silent);
        let config = SessionConfig {
            ack_timeout: Duration::from_millis(5),
            ..explicit(1, 3)
        };
        let mut session = connected(&printer, config);

        session.send(&packet(0, &[5], AckPolicy::SingleByte)).unwrap();
        assert_eq!(session.flush().unwrap_err(), TransportError::Timeout);
        assert_eq!(printer.data_write_count(), 3);
    }

    #[test]
    fn test_go_back_n_resends_whole_window() {
        let printer = MockPrinter::new().on_data(|n, _| {
            if n == 0 { Response::nak() } else { Response::ack() }
        });
        let mut session = connected(&printer, explicit(2, 2));

        session.send(&packet(0, &[0xA], AckPolicy::SingleByte)).unwrap();
        session.send(&packet(1, &[0xB], AckPolicy::SingleByte)).unwrap();
        let acked = session.flush().unwrap();

        assert_eq!(
            acked,
            vec![Acked { index: 0, len: 1 }, Acked { index: 1, len: 1 }]
        );
        assert_eq!(
            printer.data_writes(),
            vec![vec![0xA], vec![0xB], vec![0xA], vec![0xB]]
        );
    }

    #[test]
    fn test_exhausted_retries_drop_acks_for_abandoned_packets() {
        let printer = MockPrinter::new().on_data(|n, _| match n {
            0 => Response::nak(),
            1 => Response::ack(),
            _ => Response::Silent,
        });
        let config = SessionConfig {
            ack_timeout: Duration::from_millis(20),
            ..explicit(2, 1)
        };
        let mut session = connected(&printer, config);

        session.send(&packet(0, &[1], AckPolicy::SingleByte)).unwrap();
        session.send(&packet(1, &[2, 2], AckPolicy::SingleByte)).unwrap();
        assert_eq!(session.flush().unwrap_err(), TransportError::Nack { index: 0 });

        // The ACK that answered packet 1 must not confirm packet 2
        session.send(&packet(2, &[3, 3, 3], AckPolicy::SingleByte)).unwrap();
        assert_eq!(session.flush().unwrap_err(), TransportError::Timeout);
        assert_eq!(session.take_acked(), vec![]);
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_settle_collects_acks_without_writing() {
        let printer = MockPrinter::new().on_data(|n, _| {
            if n == 1 { Response::nak() } else { Response::ack() }
        });
        let mut session = connected(&printer, explicit(3, 3));

        for index in 0..3 {
            session.send(&packet(index, &[index as u8], AckPolicy::SingleByte)).unwrap();
        }
        assert_eq!(session.settle().unwrap(), vec![Acked { index: 0, len: 1 }]);
        assert_eq!(session.in_flight(), 0);
        assert_eq!(printer.data_write_count(), 3);
        assert_eq!(session.state(), SessionState::Streaming);

        // The pending ACK for packet 2 was discarded with the window
        session.send(&packet(3, &[7], AckPolicy::SingleByte)).unwrap();
        assert_eq!(session.flush().unwrap(), vec![Acked { index: 3, len: 1 }]);
    }

    #[test]
    fn test_settle_in_implicit_mode_is_a_no_op() {
        let printer = MockPrinter::new();
        let mut session = connected(&printer, SessionConfig::immediate());
        session.send(&packet(0, &[1], AckPolicy::SingleByte)).unwrap();

        assert_eq!(session.settle().unwrap(), vec![]);
        assert_eq!(printer.data_write_count(), 1);
    }

    #[test]
    fn test_hangup_while_awaiting_ack_faults() {
        let printer = MockPrinter::new().on_data(|_, _| Response::Hangup);
        let mut session = connected(&printer, explicit(1, 3));

        session.send(&packet(0, &[1], AckPolicy::SingleByte)).unwrap();
        let err = session.flush().unwrap_err();

        assert!(matches!(err, TransportError::LinkDropped(_)));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(printer.data_write_count(), 1);
        assert_eq!(printer.closes(), 1);
    }

    #[test]
    fn test_write_failure_faults_session() {
        let printer = MockPrinter::new().on_data(|_, _| Response::DropLink);
        let mut session = connected(&printer, SessionConfig::immediate());

        let err = session.send(&packet(0, &[1], AckPolicy::SingleByte)).unwrap_err();
        assert!(matches!(err, TransportError::LinkDropped(_)));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(printer.closes(), 1);
        assert_eq!(
            session.send(&packet(1, &[1], AckPolicy::SingleByte)).unwrap_err(),
            TransportError::InvalidState(SessionState::Faulted)
        );
    }

    #[test]
    fn test_query_returns_reply() {
        let printer = MockPrinter::new();
        let mut session = connected(&printer, SessionConfig::immediate());

        let reply = session.query(DeviceQuery::Firmware).unwrap();
        assert_eq!(DeviceQuery::decode_text(&reply), "V2.11_304dpi");
        let reply = session.query(DeviceQuery::Battery).unwrap();
        assert_eq!(DeviceQuery::decode_battery(&reply), Some(64));
    }

    #[test]
    fn test_finish_drains_and_closes() {
        let printer = MockPrinter::new();
        let mut session = connected(&printer, SessionConfig::immediate());
        session.finish().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            &session.history()[3..],
            &[SessionState::Streaming, SessionState::Draining, SessionState::Closed]
        );
        assert_eq!(printer.closes(), 1);
        assert_eq!(printer.writes().last().unwrap(), &DeviceQuery::Battery.request());
    }

    #[test]
    fn test_finish_without_reply_faults() {
        let printer = MockPrinter::new().reply_to(DeviceQuery::Battery, None);
        let config = SessionConfig {
            reply_timeout: Duration::from_millis(10),
            ..SessionConfig::immediate()
        };
        let mut session = connected(&printer, config);

        assert_eq!(session.finish().unwrap_err(), TransportError::Timeout);
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(printer.closes(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let printer = MockPrinter::new();
        let mut session = connected(&printer, SessionConfig::immediate());
        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(printer.closes(), 1);
        assert_eq!(
            session.history().iter().filter(|s| **s == SessionState::Closed).count(),
            1
        );
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = SessionConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
            ..SessionConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let zero_window = SessionConfig {
            window: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(Session::new(zero_window), Err(ConfigError::ZeroWindow)));

        let no_retries = SessionConfig {
            retries: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            Session::new(no_retries),
            Err(ConfigError::Invalid { field: "retries", .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        let zero = SessionConfig {
            window: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroWindow)));
        let no_retries = SessionConfig {
            retries: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(no_retries.validate(), Err(ConfigError::Invalid { field: "retries", .. })));
    }
}
