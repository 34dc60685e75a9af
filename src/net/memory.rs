//! In-process transport.
//!
//! Requests are handed synchronously to a [`Responder`] closure standing in
//! for the operator; whatever it returns is queued as the reply from the
//! request's destination address. A [`MemoryHandle`] shares the recorded
//! traffic with the caller after the transport has been moved into a session.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::task::Poll;

use super::{Endpoint, RequestTag, Transport, TransportError, TransportResult};
use crate::types::Address;

/// A request as the operator saw it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    /// Request tag
    pub tag: RequestTag,
    /// Destination address
    pub address: Address,
    /// Payload bytes, if any
    pub payload: Option<Vec<u8>>,
}

/// Operator stand-in: answers a request, or stays silent with `None`
pub type Responder = Box<dyn FnMut(&SentFrame) -> Option<Vec<u8>>>;

#[derive(Default)]
struct MemoryState {
    endpoint: Option<Endpoint>,
    sent: Vec<SentFrame>,
    closed: bool,
}

/// Shared view of a [`MemoryTransport`]'s traffic
#[derive(Clone, Default)]
pub struct MemoryHandle(Rc<RefCell<MemoryState>>);

impl MemoryHandle {
    /// Every request sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<SentFrame> {
        self.0.borrow().sent.clone()
    }

    /// Tags of every request sent so far, in order
    #[must_use]
    pub fn sent_tags(&self) -> Vec<RequestTag> {
        self.0.borrow().sent.iter().map(|f| f.tag).collect()
    }

    /// Number of requests sent with `tag`
    #[must_use]
    pub fn count(&self, tag: RequestTag) -> usize {
        self.0.borrow().sent.iter().filter(|f| f.tag == tag).count()
    }

    /// Endpoint passed to `connect`
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.0.borrow().endpoint.clone()
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }
}

/// Transport answering requests from a closure
pub struct MemoryTransport {
    responder: Responder,
    connect_delay: usize,
    refuse: bool,
    connected: bool,
    queued: HashMap<Address, VecDeque<Vec<u8>>>,
    state: MemoryHandle,
}

impl MemoryTransport {
    /// Create a transport answered by `responder`
    #[must_use]
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            connect_delay: 0,
            refuse: false,
            connected: false,
            queued: HashMap::new(),
            state: MemoryHandle::default(),
        }
    }

    /// Report the connection as pending for `polls` calls
    #[must_use]
    pub fn with_connect_delay(mut self, polls: usize) -> Self {
        self.connect_delay = polls;
        self
    }

    /// Fail every connection attempt
    #[must_use]
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Handle for inspecting traffic
    #[must_use]
    pub fn handle(&self) -> MemoryHandle {
        self.state.clone()
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> TransportResult<()> {
        self.state.0.borrow_mut().endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn poll_connected(&mut self) -> Poll<TransportResult<()>> {
        let Some(endpoint) = self.state.endpoint() else {
            return Poll::Ready(Err(TransportError::NotConnected));
        };
        if self.refuse {
            return Poll::Ready(Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            }));
        }
        if self.connect_delay > 0 {
            self.connect_delay -= 1;
            return Poll::Pending;
        }
        self.connected = true;
        Poll::Ready(Ok(()))
    }

    fn send(
        &mut self,
        tag: RequestTag,
        address: &Address,
        payload: Option<&[u8]>,
    ) -> TransportResult<()> {
        if !self.connected || self.state.is_closed() {
            return Err(TransportError::NotConnected);
        }
        let frame = SentFrame {
            tag,
            address: *address,
            payload: payload.map(<[u8]>::to_vec),
        };
        self.state.0.borrow_mut().sent.push(frame.clone());
        if let Some(reply) = (self.responder)(&frame) {
            self.queued.entry(*address).or_default().push_back(reply);
        }
        Ok(())
    }

    fn poll_received(&mut self, address: &Address) -> TransportResult<Option<Vec<u8>>> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(self.queued.get_mut(address).and_then(VecDeque::pop_front))
    }

    fn close(&mut self) {
        self.connected = false;
        self.state.0.borrow_mut().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok};

    fn echo() -> Responder {
        Box::new(|frame: &SentFrame| frame.payload.clone())
    }

    #[test]
    fn test_replies_keyed_by_address() {
        let a = Address::from_bytes([1u8; 32]);
        let b = Address::from_bytes([2u8; 32]);
        let mut transport = MemoryTransport::new(echo());
        transport.connect(&Endpoint::new("local", 1)).unwrap();
        assert!(matches!(transport.poll_connected(), Poll::Ready(Ok(()))));

        transport.send(RequestTag::Zeroes, &a, Some(b"for a")).unwrap();
        assert_eq!(transport.poll_received(&b).unwrap(), None);
        assert_eq!(transport.poll_received(&a).unwrap(), Some(b"for a".to_vec()));
        assert_eq!(transport.poll_received(&a).unwrap(), None);
    }

    #[test]
    fn test_connect_delay_and_handle() {
        let mut transport = MemoryTransport::new(echo()).with_connect_delay(2);
        let handle = transport.handle();
        transport.connect(&Endpoint::new("local", 1)).unwrap();
        assert_pending!(transport.poll_connected());
        assert_pending!(transport.poll_connected());
        assert_ready_ok!(transport.poll_connected());

        transport
            .send(RequestTag::Validation, &Address::ZERO, None)
            .unwrap();
        transport.close();
        assert_eq!(handle.sent_tags(), vec![RequestTag::Validation]);
        assert!(handle.is_closed());
        assert_eq!(handle.endpoint(), Some(Endpoint::new("local", 1)));
    }

    #[test]
    fn test_send_before_connect_fails() {
        let mut transport = MemoryTransport::new(echo());
        assert_eq!(
            transport.send(RequestTag::Zeroes, &Address::ZERO, None),
            Err(TransportError::NotConnected)
        );
    }
}
