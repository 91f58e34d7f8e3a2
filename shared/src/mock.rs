//! In-memory collaborators for unit tests.
//!
//! Every mock is a cheap handle around shared state so a test can keep a
//! clone after handing the original to the relay.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::traits::{Connection, LinkError, LinkResult, Listener, SerialDevice};

enum Inbound {
    Data(Vec<u8>),
    Eof,
    Error(LinkError),
}

#[derive(Default)]
struct ConnectionState {
    inbound: VecDeque<Inbound>,
    sent: Vec<u8>,
    fail_writes: bool,
    closed: bool,
    shut_down: bool,
}

#[derive(Clone, Default)]
pub struct MockConnection {
    state: Rc<RefCell<ConnectionState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_data(&self, data: &[u8]) {
        self.state
            .borrow_mut()
            .inbound
            .push_back(Inbound::Data(data.to_vec()));
    }

    pub fn push_eof(&self) {
        self.state.borrow_mut().inbound.push_back(Inbound::Eof);
    }

    pub fn push_error(&self, err: LinkError) {
        self.state.borrow_mut().inbound.push_back(Inbound::Error(err));
    }

    pub fn fail_writes(&self) {
        self.state.borrow_mut().fail_writes = true;
    }

    pub fn sent(&self) -> Vec<u8> {
        self.state.borrow().sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.borrow().shut_down
    }
}

impl Connection for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize> {
        let mut state = self.state.borrow_mut();
        match state.inbound.pop_front() {
            None => Err(LinkError::WouldBlock),
            Some(Inbound::Eof) => Ok(0),
            Some(Inbound::Error(e)) => Err(e),
            Some(Inbound::Data(mut data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    state.inbound.push_front(Inbound::Data(rest));
                }
                Ok(n)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<usize> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(LinkError::Io(32));
        }
        state.sent.extend_from_slice(data);
        Ok(data.len())
    }

    fn shutdown(&mut self) {
        self.state.borrow_mut().shut_down = true;
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

#[derive(Default)]
struct SerialState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
}

#[derive(Clone, Default)]
pub struct MockSerial {
    state: Rc<RefCell<SerialState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes arriving from the serial peer
    pub fn feed(&self, data: &[u8]) {
        self.state.borrow_mut().rx.extend(data.iter().copied());
    }

    /// Everything written to the serial peer so far
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().tx.clone()
    }

    pub fn pending_rx(&self) -> usize {
        self.state.borrow().rx.len()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }
}

impl SerialDevice for MockSerial {
    fn available(&mut self) -> usize {
        self.state.borrow().rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize> {
        let mut state = self.state.borrow_mut();
        if state.fail_reads {
            return Err(LinkError::Io(5));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<usize> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(LinkError::Io(5));
        }
        state.tx.extend_from_slice(data);
        Ok(data.len())
    }
}

#[derive(Clone, Default)]
pub struct MockListener {
    pending: Rc<RefCell<VecDeque<(MockConnection, String)>>>,
}

impl MockListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an incoming connection and return a handle to it
    pub fn connect(&self, peer: &str) -> MockConnection {
        let conn = MockConnection::new();
        self.pending
            .borrow_mut()
            .push_back((conn.clone(), String::from(peer)));
        conn
    }
}

impl Listener for MockListener {
    type Connection = MockConnection;

    fn accept(&mut self) -> LinkResult<Option<(MockConnection, String)>> {
        Ok(self.pending.borrow_mut().pop_front())
    }
}
