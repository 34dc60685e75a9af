//! Certificate handshake with a security-level downgrade ladder.
//!
//! The client sends its certificate and waits for the operator's. A
//! structurally bad certificate is reported and the client keeps waiting
//! without resending. A failed acceptance moves one rung down the ladder and
//! restarts the handshake; falling off the last rung ends the run.

use std::task::Poll;

use tracing::{debug, info, warn};

use super::{Channel, Outbound, SessionError};
use crate::crypto::{CertificateVerdict, SecurityLevel};
use crate::net::RequestTag;
use crate::types::Address;

/// Result of one handshake step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Negotiation {
    /// Waiting for the operator
    Pending,
    /// Shared session established
    Established(String),
    /// Operator certificate rejected; still waiting
    Rejected(String),
    /// Handshake restarts at a weaker level
    Downgraded {
        /// Level that failed
        from: SecurityLevel,
        /// Level applied for the next attempt
        to: SecurityLevel,
    },
}

/// Drives the certificate handshake
#[derive(Clone, Debug)]
pub struct CertificateNegotiator {
    ladder: Vec<SecurityLevel>,
    counter: usize,
}

impl CertificateNegotiator {
    /// Negotiator over `ladder`, strongest first.
    ///
    /// An empty ladder falls back to [`SecurityLevel::LADDER`].
    #[must_use]
    pub fn new(ladder: Vec<SecurityLevel>) -> Self {
        let ladder = if ladder.is_empty() {
            SecurityLevel::LADDER.to_vec()
        } else {
            ladder
        };
        Self { ladder, counter: 0 }
    }

    /// Level currently selected
    #[must_use]
    pub fn level(&self) -> SecurityLevel {
        self.ladder[self.counter]
    }

    /// Ladder position; never decreases
    #[must_use]
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Levels attempted so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.counter + 1
    }

    /// Apply the selected level to the channel's cipher
    pub fn apply(&self, channel: &mut Channel) {
        channel.cipher.set_security_level(self.level());
    }

    /// Run one tick of the handshake with `operator`
    ///
    /// # Errors
    /// Fails when the ladder is exhausted or the transport fails
    pub fn step(
        &mut self,
        channel: &mut Channel,
        operator: &Address,
    ) -> Result<Negotiation, SessionError> {
        let peer = *operator;
        let poll = channel.exchange_raw(
            operator,
            |cipher| {
                let certificate = cipher.issue_certificate(&peer)?;
                Ok(Outbound::with_payload(RequestTag::Certificate, certificate))
            },
            Ok,
        )?;
        let Poll::Ready(certificate) = poll else {
            return Ok(Negotiation::Pending);
        };

        match channel.cipher.accept_certificate(&certificate, operator) {
            Ok(CertificateVerdict::Accepted(id)) => {
                info!(level = %self.level(), session = %id, "certificate accepted");
                Ok(Negotiation::Established(id))
            }
            Ok(CertificateVerdict::Rejected(reason)) => {
                warn!(%reason, "operator certificate rejected");
                channel.correlator.rearm(operator);
                Ok(Negotiation::Rejected(reason))
            }
            Err(source) if self.counter + 1 < self.ladder.len() => {
                let from = self.level();
                self.counter += 1;
                let to = self.level();
                warn!(%from, %to, error = %source, "handshake failed, downgrading");
                self.apply(channel);
                Ok(Negotiation::Downgraded { from, to })
            }
            Err(source) => {
                debug!(attempts = self.attempts(), "security ladder exhausted");
                Err(SessionError::SecurityLadderExhausted {
                    attempts: self.attempts(),
                    source,
                })
            }
        }
    }
}
