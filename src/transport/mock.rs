//! # Scripted Mock Printer
//!
//! An in-memory [`Connector`]/[`Channel`] pair that behaves like a Peripage
//! on the other end of the radio link. Used by the unit and integration
//! tests.
//!
//! Writes are classified as they arrive:
//!
//! - a write equal to a [`DeviceQuery`] request is answered from the
//!   configured replies (identity for the name query)
//! - a write equal to the reset command is swallowed
//! - anything else is a data packet, handed to the data responder
//!
//! ## Example
//!
//! ```
//! use peripage::transport::mock::{MockPrinter, Response};
//! use peripage::transport::{Session, SessionConfig};
//!
//! let printer = MockPrinter::new().on_data(|_, _| Response::Silent);
//! let mut connector = printer.connector();
//!
//! let mut session = Session::new(SessionConfig::immediate())?;
//! session.connect(&mut connector, "mock")?;
//! assert_eq!(session.identity(), Some("PeriPage+DF7A"));
//! # Ok::<(), peripage::PeripageError>(())
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Channel, ChannelError, Connector};
use crate::protocol::commands::{self, ACK, DeviceQuery, NAK};

/// What the mock printer does with one data write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Accept the write and send these bytes back
    Reply(Vec<u8>),
    /// Accept the write, send nothing
    Silent,
    /// Fail the write as if the radio link went down
    DropLink,
    /// Accept the write, then lose the link before answering
    Hangup,
}

impl Response {
    pub fn ack() -> Self {
        Response::Reply(vec![ACK])
    }

    pub fn nak() -> Self {
        Response::Reply(vec![NAK])
    }
}

type Responder = Box<dyn FnMut(usize, &[u8]) -> Response + Send>;

struct State {
    writes: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
    link_down: bool,
    opens: usize,
    closes: usize,
    refuse: Option<ChannelError>,
    query_replies: HashMap<Vec<u8>, Option<Vec<u8>>>,
    responder: Responder,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A scripted printer. Clones share the same state.
#[derive(Clone)]
pub struct MockPrinter {
    shared: Arc<Shared>,
}

impl Default for MockPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPrinter {
    /// A printer that identifies as `PeriPage+DF7A`, reports 64% battery and
    /// stays silent on data writes (implicit acknowledgment).
    pub fn new() -> Self {
        let mut query_replies = HashMap::new();
        query_replies.insert(DeviceQuery::Name.request(), Some(b"PeriPage+DF7A".to_vec()));
        query_replies.insert(DeviceQuery::Battery.request(), Some(vec![0x00, 64]));
        query_replies.insert(DeviceQuery::SerialNumber.request(), Some(b"A6491571121".to_vec()));
        query_replies.insert(DeviceQuery::Firmware.request(), Some(b"V2.11_304dpi".to_vec()));
        query_replies.insert(DeviceQuery::Hardware.request(), Some(b"HW-A6P".to_vec()));
        query_replies.insert(DeviceQuery::Mac.request(), Some(vec![0x04, 0x7F, 0x0E, 0xB0, 0xDF, 0x7A]));
        query_replies.insert(DeviceQuery::Ip.request(), Some(b"IP-300".to_vec()));

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    writes: Vec::new(),
                    data: Vec::new(),
                    inbox: VecDeque::new(),
                    link_down: false,
                    opens: 0,
                    closes: 0,
                    refuse: None,
                    query_replies,
                    responder: Box::new(|_, _| Response::Silent),
                }),
                wake: Condvar::new(),
            }),
        }
    }

    /// Answer every data write with ACK.
    pub fn acking(self) -> Self {
        self.on_data(|_, _| Response::ack())
    }

    /// Decide the response to each data write. The first argument counts
    /// data writes from 0, retransmissions included.
    pub fn on_data<F>(self, responder: F) -> Self
    where
        F: FnMut(usize, &[u8]) -> Response + Send + 'static,
    {
        self.shared.lock().responder = Box::new(responder);
        self
    }

    /// Reply to `query` with `reply`, or never reply when `None`.
    pub fn reply_to(self, query: DeviceQuery, reply: Option<&[u8]>) -> Self {
        self.shared
            .lock()
            .query_replies
            .insert(query.request(), reply.map(<[u8]>::to_vec));
        self
    }

    /// Make every `open` fail with `error`.
    pub fn refuse(self, error: ChannelError) -> Self {
        self.shared.lock().refuse = Some(error);
        self
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            printer: self.clone(),
        }
    }

    /// Queue bytes for the session to read, e.g. a late ACK.
    pub fn push_reply(&self, bytes: &[u8]) {
        self.shared.lock().inbox.push_back(bytes.to_vec());
        self.shared.wake.notify_all();
    }

    /// Every write the session made, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.lock().writes.clone()
    }

    /// Writes that were data packets (not reset or queries).
    pub fn data_writes(&self) -> Vec<Vec<u8>> {
        self.shared.lock().data.clone()
    }

    pub fn data_write_count(&self) -> usize {
        self.shared.lock().data.len()
    }

    /// Block until at least `count` data writes happened or `timeout` passes.
    pub fn wait_for_data_writes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.data.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.wake.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    pub fn opens(&self) -> usize {
        self.shared.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.shared.lock().closes
    }
}

/// [`Connector`] side of a [`MockPrinter`].
pub struct MockConnector {
    printer: MockPrinter,
}

impl Connector for MockConnector {
    fn open(&mut self, _address: &str) -> Result<Box<dyn Channel>, ChannelError> {
        let mut state = self.printer.shared.lock();
        if let Some(error) = state.refuse.clone() {
            return Err(error);
        }
        state.opens += 1;
        state.link_down = false;
        Ok(Box::new(MockChannel {
            printer: self.printer.clone(),
            open: true,
        }))
    }
}

/// [`Channel`] side of a [`MockPrinter`].
pub struct MockChannel {
    printer: MockPrinter,
    open: bool,
}

impl Channel for MockChannel {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ChannelError> {
        if !self.open {
            return Err(ChannelError::LinkDropped("channel closed".to_string()));
        }
        let shared = &self.printer.shared;
        let mut state = shared.lock();
        if state.link_down {
            return Err(ChannelError::LinkDropped("link is down".to_string()));
        }

        if let Some(reply) = state.query_replies.get(bytes).cloned() {
            state.writes.push(bytes.to_vec());
            if let Some(reply) = reply {
                state.inbox.push_back(reply);
            }
        } else if bytes == commands::reset().as_slice() {
            state.writes.push(bytes.to_vec());
        } else {
            let ordinal = state.data.len();
            match (state.responder)(ordinal, bytes) {
                Response::DropLink => {
                    state.link_down = true;
                    shared.wake.notify_all();
                    return Err(ChannelError::LinkDropped("connection reset by peer".to_string()));
                }
                Response::Reply(reply) => {
                    state.writes.push(bytes.to_vec());
                    state.data.push(bytes.to_vec());
                    state.inbox.push_back(reply);
                }
                Response::Silent => {
                    state.writes.push(bytes.to_vec());
                    state.data.push(bytes.to_vec());
                }
                Response::Hangup => {
                    state.writes.push(bytes.to_vec());
                    state.data.push(bytes.to_vec());
                    state.link_down = true;
                }
            }
        }

        shared.wake.notify_all();
        Ok(bytes.len())
    }

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        if !self.open {
            return Err(ChannelError::LinkDropped("channel closed".to_string()));
        }
        let shared = &self.printer.shared;
        let deadline = Instant::now() + timeout;
        let mut state = shared.lock();
        loop {
            if state.link_down {
                return Err(ChannelError::LinkDropped("link is down".to_string()));
            }
            if let Some(bytes) = state.inbox.pop_front() {
                return Ok(bytes);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ChannelError::Timeout);
            }
            state = match shared.wake.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.printer.shared.lock().closes += 1;
        }
    }
}
