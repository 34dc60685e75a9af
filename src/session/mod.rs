//! Per-run session context.
//!
//! Everything a workflow step reads or changes lives here: the resolved
//! command arguments, the encrypted channel to the operator, the handshake
//! ladder position and the values produced along the way. The engine owns the
//! session and hands it to one step handler per tick.

mod correlator;
mod negotiator;
mod report;

pub use correlator::{Outbound, PendingRequest, RequestCorrelator};
pub use negotiator::{CertificateNegotiator, Negotiation};
pub use report::{NoticeLog, Notice, ReplyData, Reporter, ServerReply, Severity};

use std::path::PathBuf;
use std::task::Poll;

use crate::config::MinerConfig;
use crate::crypto::{CipherError, CipherSession};
use crate::net::{Endpoint, NameResolver, ResolveError, Transport, TransportError};
use crate::pow::{ProofOfWork, SearchMode};
use crate::store::StoreError;
use crate::types::{Address, Unit, UnitError, UnitValue, ValidationTarget};

/// Resolved, read-only command parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppArgs {
    /// Key file of the local owner
    pub key_file: Option<PathBuf>,
    /// Operator address given on the command line
    pub operator: Option<Address>,
    /// Counter-party ("new owner") address
    pub counterparty: Option<Address>,
    /// Input unit or bundle file
    pub unit_file: Option<PathBuf>,
    /// Output base path
    pub output: Option<PathBuf>,
    /// Explicit unit value to mine for
    pub unit_value: Option<f64>,
    /// Search execution mode
    pub search_mode: SearchMode,
}

/// Transport, cipher and request tracking for one operator connection
pub struct Channel {
    /// Operator transport
    pub transport: Box<dyn Transport>,
    /// Session cipher
    pub cipher: Box<dyn CipherSession>,
    /// Outstanding request tracking
    pub correlator: RequestCorrelator,
}

impl Channel {
    /// Create a channel with an idle correlator
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, cipher: Box<dyn CipherSession>) -> Self {
        Self {
            transport,
            cipher,
            correlator: RequestCorrelator::new(),
        }
    }

    /// Encrypted request/response with `address`
    ///
    /// # Errors
    /// See [`RequestCorrelator::exchange`]
    pub fn exchange<T>(
        &mut self,
        address: &Address,
        activate: impl FnOnce(&mut dyn CipherSession) -> Result<Outbound, SessionError>,
        on_complete: impl FnOnce(Vec<u8>) -> Result<T, SessionError>,
    ) -> Result<Poll<T>, SessionError> {
        self.correlator.exchange(
            self.transport.as_mut(),
            self.cipher.as_mut(),
            address,
            activate,
            on_complete,
        )
    }

    /// Request/response with `address` whose reply is not decrypted
    ///
    /// # Errors
    /// See [`RequestCorrelator::exchange_raw`]
    pub fn exchange_raw<T>(
        &mut self,
        address: &Address,
        activate: impl FnOnce(&mut dyn CipherSession) -> Result<Outbound, SessionError>,
        on_complete: impl FnOnce(Vec<u8>) -> Result<T, SessionError>,
    ) -> Result<Poll<T>, SessionError> {
        self.correlator.exchange_raw(
            self.transport.as_mut(),
            self.cipher.as_mut(),
            address,
            activate,
            on_complete,
        )
    }
}

/// Values produced while a workflow runs
#[derive(Clone, Debug, Default)]
pub struct Progress {
    /// Operator the run talks to
    pub operator: Option<Address>,
    /// Endpoint the operator resolved to
    pub endpoint: Option<Endpoint>,
    /// Unit being mined, validated or traded
    pub unit: Option<Unit>,
    /// Difficulty target from the operator
    pub zero_bits: Option<u8>,
    /// Latest `(k, N)` from the operator
    pub target: Option<ValidationTarget>,
    /// Latest score of the unit
    pub value: Option<UnitValue>,
    /// Identifier of the established session
    pub session_id: Option<String>,
    /// Files written during the run
    pub saved: Vec<PathBuf>,
}

impl Progress {
    /// Operator address, once known
    ///
    /// # Errors
    /// Fails if no step has set it
    pub fn operator(&self) -> Result<Address, SessionError> {
        self.operator.ok_or(SessionError::MissingContext("operator address"))
    }

    /// Current unit, once known
    ///
    /// # Errors
    /// Fails if no step has set it
    pub fn unit(&self) -> Result<&Unit, SessionError> {
        self.unit.as_ref().ok_or(SessionError::MissingContext("unit"))
    }

    /// Difficulty target, once received
    ///
    /// # Errors
    /// Fails if no step has set it
    pub fn zero_bits(&self) -> Result<u8, SessionError> {
        self.zero_bits
            .ok_or(SessionError::MissingContext("difficulty target"))
    }
}

/// Everything one run of a workflow needs
pub struct Session {
    /// Local digital address
    pub identity: Address,
    /// Command parameters
    pub args: AppArgs,
    /// Loaded configuration
    pub config: MinerConfig,
    /// Operator channel
    pub channel: Channel,
    /// Handshake ladder state
    pub negotiator: CertificateNegotiator,
    /// Operator endpoint lookup
    pub resolver: Box<dyn NameResolver>,
    /// Unit search and scoring
    pub pow: Box<dyn ProofOfWork>,
    /// Notice output
    pub reporter: Reporter,
    /// Values produced so far
    pub progress: Progress,
}

impl Session {
    /// Assemble a session; applies the first ladder level to the cipher
    #[must_use]
    pub fn new(
        identity: Address,
        args: AppArgs,
        config: MinerConfig,
        mut channel: Channel,
        resolver: Box<dyn NameResolver>,
        pow: Box<dyn ProofOfWork>,
        reporter: Reporter,
    ) -> Self {
        let negotiator = CertificateNegotiator::new(config.security_levels.clone());
        negotiator.apply(&mut channel);
        Self {
            identity,
            args,
            config,
            channel,
            negotiator,
            resolver,
            pow,
            reporter,
            progress: Progress::default(),
        }
    }
}

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Reply from the operator did not decrypt
    #[error("cannot decrypt reply from {address}: {source}")]
    Decrypt {
        /// Peer the reply came from
        address: Address,
        /// Cipher failure
        #[source]
        source: CipherError,
    },
    /// Every security level failed the handshake
    #[error("handshake failed at all {attempts} security levels: {source}")]
    SecurityLadderExhausted {
        /// Levels attempted
        attempts: usize,
        /// Failure at the last level
        #[source]
        source: CipherError,
    },
    /// Transport failure
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// Operator endpoint unknown
    #[error("resolve: {0}")]
    Resolve(#[from] ResolveError),
    /// Cipher failure outside the handshake
    #[error("cipher: {0}")]
    Cipher(#[from] CipherError),
    /// Persistence failure
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// Undecodable unit
    #[error("unit: {0}")]
    Unit(#[from] UnitError),
    /// Operator reply not understood
    #[error("invalid operator reply: {0}")]
    Reply(String),
    /// A step ran before the value it needs was produced
    #[error("missing {0}")]
    MissingContext(&'static str),
    /// Transition to a step the workflow does not contain
    #[error("workflow {workflow} has no step {step}")]
    UnknownState {
        /// Workflow name
        workflow: &'static str,
        /// Requested step
        step: String,
    },
}

impl SessionError {
    /// Notice reported when this error ends a run
    #[must_use]
    pub fn notice(&self) -> Notice {
        let text = self.to_string();
        match self {
            Self::Decrypt { .. } => Notice::DecryptFailed(text),
            Self::SecurityLadderExhausted { .. } => Notice::CertificateFailed(text),
            Self::Transport(_) => Notice::ConnectionFailed(text),
            Self::Resolve(_) => Notice::ConnectionSetupFailed(text),
            Self::Cipher(_)
            | Self::Store(_)
            | Self::Unit(_)
            | Self::Reply(_)
            | Self::MissingContext(_)
            | Self::UnknownState { .. } => Notice::Failure(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_notices() {
        let decrypt = SessionError::Decrypt {
            address: Address::ZERO,
            source: CipherError::Decrypt,
        };
        assert_eq!(decrypt.notice().code(), "Err0006");

        let ladder = SessionError::SecurityLadderExhausted {
            attempts: 3,
            source: CipherError::Decrypt,
        };
        assert_eq!(ladder.notice().code(), "Err0007");

        assert_eq!(
            SessionError::from(TransportError::Closed).notice().code(),
            "Err0001"
        );
        assert_eq!(
            SessionError::from(ResolveError::Unknown(Address::ZERO))
                .notice()
                .code(),
            "Err0008"
        );
        assert_eq!(
            SessionError::MissingContext("unit").notice().code(),
            "Err0002"
        );
    }

    #[test]
    fn test_progress_accessors() {
        let mut progress = Progress::default();
        assert!(matches!(
            progress.operator(),
            Err(SessionError::MissingContext(_))
        ));
        progress.operator = Some(Address::ZERO);
        progress.zero_bits = Some(9);
        assert_eq!(progress.operator().unwrap(), Address::ZERO);
        assert_eq!(progress.zero_bits().unwrap(), 9);
        assert!(progress.unit().is_err());
    }
}
