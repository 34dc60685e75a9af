//! TCP transport over a tokio socket.
//!
//! Connection setup is spawned onto the runtime and observed through a
//! oneshot channel. After that every operation uses the socket's `try_*`
//! methods, which never wait: writes go to an outbox flushed as far as the
//! socket accepts, reads drain whatever is buffered and split it into lines.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::task::Poll;

use tokio::net::TcpStream;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::{Endpoint, RequestTag, Transport, TransportError, TransportResult, WireFrame};
use crate::types::Address;

const READ_CHUNK: usize = 4096;

enum ConnState {
    Idle,
    Connecting {
        endpoint: String,
        rx: oneshot::Receiver<io::Result<TcpStream>>,
    },
    Connected(TcpStream),
    Closed,
}

/// Line-framed JSON over TCP
pub struct TcpTransport {
    state: ConnState,
    outbox: Vec<u8>,
    inbox: Vec<u8>,
    received: HashMap<Address, VecDeque<Vec<u8>>>,
}

impl TcpTransport {
    /// Create an unconnected transport
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnState::Idle,
            outbox: Vec::new(),
            inbox: Vec::new(),
            received: HashMap::new(),
        }
    }

    fn flush(&mut self) -> TransportResult<()> {
        let ConnState::Connected(stream) = &self.state else {
            return Err(TransportError::NotConnected);
        };
        while !self.outbox.is_empty() {
            match stream.try_write(&self.outbox) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
        Ok(())
    }

    fn fill(&mut self) -> TransportResult<()> {
        let ConnState::Connected(stream) = &self.state else {
            return Err(TransportError::NotConnected);
        };
        let mut buf = [0u8; READ_CHUNK];
        let mut peer_closed = false;
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => self.inbox.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }

        while let Some(pos) = self.inbox.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.inbox.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match WireFrame::from_line(line).and_then(|f| Ok((f.payload_bytes()?, f))) {
                Ok((payload, frame)) => {
                    debug!(tag = %frame.tag, from = %frame.address, len = payload.len(), "frame received");
                    self.received
                        .entry(frame.address)
                        .or_default()
                        .push_back(payload);
                }
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }

        if peer_closed {
            self.state = ConnState::Closed;
        }
        Ok(())
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> TransportResult<()> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let target = endpoint.to_string();
        let (tx, rx) = oneshot::channel();

        let addr = target.clone();
        handle.spawn(async move {
            let _ = tx.send(TcpStream::connect(addr).await);
        });

        debug!(endpoint = %target, "connecting");
        self.state = ConnState::Connecting {
            endpoint: target,
            rx,
        };
        Ok(())
    }

    fn poll_connected(&mut self) -> Poll<TransportResult<()>> {
        let (endpoint, result) = match &mut self.state {
            ConnState::Connecting { endpoint, rx } => (endpoint.clone(), rx.try_recv()),
            ConnState::Connected(_) => return Poll::Ready(Ok(())),
            ConnState::Idle | ConnState::Closed => {
                return Poll::Ready(Err(TransportError::NotConnected))
            }
        };

        match result {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "could not disable nagle");
                }
                self.state = ConnState::Connected(stream);
                Poll::Ready(Ok(()))
            }
            Ok(Err(e)) => {
                self.state = ConnState::Closed;
                Poll::Ready(Err(TransportError::Connect {
                    endpoint,
                    reason: e.to_string(),
                }))
            }
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Closed) => {
                self.state = ConnState::Closed;
                Poll::Ready(Err(TransportError::Connect {
                    endpoint,
                    reason: "connect task dropped".into(),
                }))
            }
        }
    }

    fn send(
        &mut self,
        tag: RequestTag,
        address: &Address,
        payload: Option<&[u8]>,
    ) -> TransportResult<()> {
        let line = WireFrame::new(tag, *address, payload).to_line()?;
        debug!(tag = %tag, to = %address, len = line.len(), "frame queued");
        self.outbox.extend_from_slice(&line);
        self.flush()
    }

    fn poll_received(&mut self, address: &Address) -> TransportResult<Option<Vec<u8>>> {
        if matches!(self.state, ConnState::Connected(_)) {
            self.flush()?;
            self.fill()?;
        }
        if let Some(payload) = self.received.get_mut(address).and_then(VecDeque::pop_front) {
            return Ok(Some(payload));
        }
        match self.state {
            ConnState::Connected(_) => Ok(None),
            ConnState::Closed => Err(TransportError::Closed),
            ConnState::Idle | ConnState::Connecting { .. } => Err(TransportError::NotConnected),
        }
    }

    fn close(&mut self) {
        if matches!(self.state, ConnState::Connected(_)) {
            let _ = self.flush();
        }
        self.state = ConnState::Closed;
        self.outbox.clear();
        self.inbox.clear();
    }
}
