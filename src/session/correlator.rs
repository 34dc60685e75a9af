//! Send-once, poll-until-ready request tracking.
//!
//! Each peer address has at most one request in flight. The first call for an
//! exchange builds and sends the request; later calls poll for the reply. A
//! reply is decrypted before the completion callback sees it, and a reply that
//! does not decrypt ends the exchange with an error instead.

use std::collections::HashMap;
use std::task::Poll;

use tracing::debug;

use super::SessionError;
use crate::crypto::CipherSession;
use crate::net::{RequestTag, Transport};
use crate::types::Address;

/// Request state for one peer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PendingRequest {
    /// Nothing outstanding
    #[default]
    Idle,
    /// Request sent, reply not yet seen
    AwaitingResponse,
}

/// A request ready to be sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    /// Request tag
    pub tag: RequestTag,
    /// Payload, already sealed where required
    pub payload: Option<Vec<u8>>,
}

impl Outbound {
    /// Request without payload
    #[must_use]
    pub fn bare(tag: RequestTag) -> Self {
        Self { tag, payload: None }
    }

    /// Request with payload
    #[must_use]
    pub fn with_payload(tag: RequestTag, payload: Vec<u8>) -> Self {
        Self {
            tag,
            payload: Some(payload),
        }
    }
}

/// Tracks one outstanding request per address
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: HashMap<Address, PendingRequest>,
    activations: usize,
}

impl RequestCorrelator {
    /// Create an idle correlator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `address`
    #[must_use]
    pub fn state(&self, address: &Address) -> PendingRequest {
        self.pending.get(address).copied().unwrap_or_default()
    }

    /// Number of requests sent so far
    #[must_use]
    pub fn activations(&self) -> usize {
        self.activations
    }

    /// Wait for another reply to the last request without sending again
    pub fn rearm(&mut self, address: &Address) {
        self.pending
            .insert(*address, PendingRequest::AwaitingResponse);
    }

    /// Encrypted exchange.
    ///
    /// # Errors
    /// Fails if sending fails, the reply does not decrypt, or a callback fails
    pub fn exchange<T>(
        &mut self,
        transport: &mut dyn Transport,
        cipher: &mut dyn CipherSession,
        address: &Address,
        activate: impl FnOnce(&mut dyn CipherSession) -> Result<Outbound, SessionError>,
        on_complete: impl FnOnce(Vec<u8>) -> Result<T, SessionError>,
    ) -> Result<Poll<T>, SessionError> {
        let Some(reply) = self.poll(transport, cipher, address, activate)? else {
            return Ok(Poll::Pending);
        };
        let plaintext = cipher
            .decrypt(&reply, address)
            .map_err(|source| SessionError::Decrypt {
                address: *address,
                source,
            })?;
        self.pending.insert(*address, PendingRequest::Idle);
        on_complete(plaintext).map(Poll::Ready)
    }

    /// Exchange whose reply is used as received.
    ///
    /// # Errors
    /// Fails if sending fails or a callback fails
    pub fn exchange_raw<T>(
        &mut self,
        transport: &mut dyn Transport,
        cipher: &mut dyn CipherSession,
        address: &Address,
        activate: impl FnOnce(&mut dyn CipherSession) -> Result<Outbound, SessionError>,
        on_complete: impl FnOnce(Vec<u8>) -> Result<T, SessionError>,
    ) -> Result<Poll<T>, SessionError> {
        let Some(reply) = self.poll(transport, cipher, address, activate)? else {
            return Ok(Poll::Pending);
        };
        self.pending.insert(*address, PendingRequest::Idle);
        on_complete(reply).map(Poll::Ready)
    }

    fn poll(
        &mut self,
        transport: &mut dyn Transport,
        cipher: &mut dyn CipherSession,
        address: &Address,
        activate: impl FnOnce(&mut dyn CipherSession) -> Result<Outbound, SessionError>,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        match self.state(address) {
            PendingRequest::Idle => {
                let outbound = activate(cipher)?;
                transport.send(outbound.tag, address, outbound.payload.as_deref())?;
                self.pending
                    .insert(*address, PendingRequest::AwaitingResponse);
                self.activations += 1;
                debug!(tag = %outbound.tag, to = %address, "request sent");
                Ok(None)
            }
            PendingRequest::AwaitingResponse => Ok(transport.poll_received(address)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SealedCipher, SecurityLevel};
    use crate::net::{Endpoint, MemoryTransport, SentFrame};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Fixture {
        transport: MemoryTransport,
        client: SealedCipher,
        operator: Address,
    }

    /// Operator answering every request with `reply(frame, client, operator)`.
    fn fixture(reply: impl Fn(&SentFrame, &SealedCipher, &Address) -> Option<Vec<u8>> + 'static) -> Fixture {
        let client = SealedCipher::new(KeyPair::generate(), SecurityLevel::ChaCha20Sha256);
        let server = SealedCipher::new(KeyPair::generate(), SecurityLevel::ChaCha20Sha256);
        let operator = server.address();
        let client_addr = client.address();
        let mut transport =
            MemoryTransport::new(Box::new(move |frame: &SentFrame| reply(frame, &server, &client_addr)));
        transport.connect(&Endpoint::new("local", 1)).unwrap();
        assert!(transport.poll_connected().is_ready());
        Fixture {
            transport,
            client,
            operator,
        }
    }

    fn sealed_reply(frame: &SentFrame, server: &SealedCipher, client: &Address) -> Option<Vec<u8>> {
        let _ = frame;
        Some(server.encrypt(b"{\"zeroes\":12}", client).unwrap())
    }

    #[test]
    fn test_send_once_then_ready() {
        let mut f = fixture(sealed_reply);
        let handle = f.transport.handle();
        let mut correlator = RequestCorrelator::new();
        let activated = Rc::new(Cell::new(0));

        let mut results = Vec::new();
        for _ in 0..2 {
            let activated = Rc::clone(&activated);
            let poll = correlator
                .exchange(
                    &mut f.transport,
                    &mut f.client,
                    &f.operator,
                    |_| {
                        activated.set(activated.get() + 1);
                        Ok(Outbound::bare(RequestTag::Zeroes))
                    },
                    |bytes| Ok(String::from_utf8(bytes).unwrap()),
                )
                .unwrap();
            results.push(poll);
        }

        assert_eq!(results[0], Poll::Pending);
        assert_eq!(results[1], Poll::Ready("{\"zeroes\":12}".to_string()));
        assert_eq!(activated.get(), 1);
        assert_eq!(correlator.activations(), 1);
        assert_eq!(handle.count(RequestTag::Zeroes), 1);
        assert_eq!(correlator.state(&f.operator), PendingRequest::Idle);
    }

    #[test]
    fn test_no_reply_keeps_waiting_without_resend() {
        let mut f = fixture(|_, _, _| None);
        let handle = f.transport.handle();
        let mut correlator = RequestCorrelator::new();

        for _ in 0..5 {
            let poll = correlator
                .exchange(
                    &mut f.transport,
                    &mut f.client,
                    &f.operator,
                    |_| Ok(Outbound::bare(RequestTag::Validation)),
                    Ok,
                )
                .unwrap();
            assert!(poll.is_pending());
        }
        assert_eq!(handle.count(RequestTag::Validation), 1);
        assert_eq!(
            correlator.state(&f.operator),
            PendingRequest::AwaitingResponse
        );
    }

    #[test]
    fn test_decrypt_failure_skips_completion() {
        let mut f = fixture(|_, _, _| Some(b"garbage that is long enough to try".to_vec()));
        let mut correlator = RequestCorrelator::new();
        let completed = Rc::new(Cell::new(false));

        let first = correlator.exchange(
            &mut f.transport,
            &mut f.client,
            &f.operator,
            |_| Ok(Outbound::bare(RequestTag::Zeroes)),
            |_| Ok(()),
        );
        assert!(matches!(first, Ok(Poll::Pending)));

        let flag = Rc::clone(&completed);
        let second = correlator.exchange(
            &mut f.transport,
            &mut f.client,
            &f.operator,
            |_| Ok(Outbound::bare(RequestTag::Zeroes)),
            move |_| {
                flag.set(true);
                Ok(())
            },
        );
        assert!(matches!(second, Err(SessionError::Decrypt { .. })));
        assert!(!completed.get());
    }

    #[test]
    fn test_raw_exchange_and_rearm() {
        let mut f = fixture(|frame, _, _| frame.payload.clone());
        let handle = f.transport.handle();
        let mut correlator = RequestCorrelator::new();

        let send = |c: &mut RequestCorrelator, f: &mut Fixture| {
            c.exchange_raw(
                &mut f.transport,
                &mut f.client,
                &f.operator,
                |_| Ok(Outbound::with_payload(RequestTag::Certificate, b"cert".to_vec())),
                Ok,
            )
            .unwrap()
        };

        assert!(send(&mut correlator, &mut f).is_pending());
        assert_eq!(send(&mut correlator, &mut f), Poll::Ready(b"cert".to_vec()));

        correlator.rearm(&f.operator);
        assert!(send(&mut correlator, &mut f).is_pending());
        assert_eq!(handle.count(RequestTag::Certificate), 1);
    }
}
