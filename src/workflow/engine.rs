//! The workflow engine.
//!
//! One tick runs the current step's handler once. Handlers never wait: a step
//! that is still waiting for the operator returns [`Transition::Stay`] and is
//! run again on the next tick. Every way out of a run, success or failure,
//! goes through the same teardown.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::{steps, Step, Workflow};
use crate::session::{Notice, Session, SessionError};

/// What a step handler asks the engine to do next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Run the same step again next tick
    Stay,
    /// Move to the following step in the table
    Next,
    /// Move to a named step of the same table
    Goto(Step),
    /// Tear down and finish
    Exit,
}

/// How a run ended
#[derive(Debug)]
pub enum Outcome {
    /// Reached the exit step
    Completed,
    /// Ended by an error
    Aborted(SessionError),
}

impl Outcome {
    /// Process exit code for this outcome
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Aborted(_) => 1,
        }
    }
}

/// Result of one tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickStatus {
    /// The run continues
    Running,
    /// The run ended during this tick; see [`Engine::outcome`]
    Finished,
    /// The run had already ended
    Stopped,
}

/// Steps a session through a workflow table
pub struct Engine {
    workflow: &'static Workflow,
    session: Session,
    cursor: usize,
    ticks: u64,
    outcome: Option<Outcome>,
}

impl Engine {
    /// Engine positioned at the first step of `workflow`
    #[must_use]
    pub fn new(workflow: &'static Workflow, session: Session) -> Self {
        Self {
            workflow,
            session,
            cursor: 0,
            ticks: 0,
            outcome: None,
        }
    }

    /// Step the next tick will run
    #[must_use]
    pub fn current(&self) -> Option<Step> {
        self.workflow.steps.get(self.cursor).copied()
    }

    /// Ticks executed so far
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// How the run ended, once it has
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Consume the engine, keeping how the run ended
    #[must_use]
    pub fn into_outcome(self) -> Option<Outcome> {
        self.outcome
    }

    /// The session being driven
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable access to the session
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Run one step handler to completion
    pub fn tick(&mut self) -> TickStatus {
        if self.outcome.is_some() {
            return TickStatus::Stopped;
        }
        self.ticks += 1;

        let Some(step) = self.current() else {
            return self.finish(Err(SessionError::UnknownState {
                workflow: self.workflow.name,
                step: format!("#{}", self.cursor),
            }));
        };

        let transition = match steps::run(step, &mut self.session) {
            Ok(transition) => transition,
            Err(e) => return self.finish(Err(e)),
        };

        match transition {
            Transition::Stay => {}
            Transition::Next => self.enter(self.cursor + 1),
            Transition::Goto(target) => match self.workflow.position(target) {
                Some(index) => self.enter(index),
                None => {
                    return self.finish(Err(SessionError::UnknownState {
                        workflow: self.workflow.name,
                        step: format!("{target:?}"),
                    }))
                }
            },
            Transition::Exit => return self.finish(Ok(())),
        }
        TickStatus::Running
    }

    /// Tick on the configured period until the run ends
    pub async fn run(mut self) -> Outcome {
        let period = self.session.config.tick_period().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            workflow = self.workflow.name,
            period_ms = period.as_millis() as u64,
            "workflow started"
        );
        loop {
            if self.tick() != TickStatus::Running {
                if let Some(outcome) = self.outcome.take() {
                    return outcome;
                }
            }
            interval.tick().await;
        }
    }

    fn enter(&mut self, index: usize) {
        self.cursor = index;
        if let Some(step) = self.current() {
            debug!(workflow = self.workflow.name, ?step, tick = self.ticks, "step");
        }
    }

    fn finish(&mut self, result: Result<(), SessionError>) -> TickStatus {
        let outcome = match result {
            Ok(()) => Outcome::Completed,
            Err(e) => {
                error!(workflow = self.workflow.name, error = %e, "workflow aborted");
                self.session.reporter.report(e.notice());
                Outcome::Aborted(e)
            }
        };

        self.session.channel.transport.close();
        self.session.reporter.report(Notice::Exiting);
        info!(workflow = self.workflow.name, ticks = self.ticks, "workflow finished");
        self.outcome = Some(outcome);
        TickStatus::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinerConfig;
    use crate::crypto::{KeyPair, SealedCipher, SecurityLevel};
    use crate::crypto::cipher::CipherSession;
    use crate::net::{Endpoint, MemoryTransport, SentFrame, StaticResolver};
    use crate::pow::Sha3Engine;
    use crate::session::{AppArgs, Channel, NoticeLog, Reporter};
    use crate::types::{Address, Unit};
    use crate::workflow::{OnInvalid, Source};

    static BROKEN: Workflow = Workflow {
        name: "broken",
        steps: &[
            Step::Prepare(Source::NewUnit),
            Step::Connect,
            Step::AwaitConnection,
            Step::RequestValidation(OnInvalid::Retarget),
            Step::Exit,
        ],
    };

    static SHORT: Workflow = Workflow {
        name: "short",
        steps: &[Step::Prepare(Source::NewUnit), Step::Exit],
    };

    fn session(operator: Option<Address>) -> (Session, NoticeLog) {
        let keys = KeyPair::generate();
        let identity = keys.address();
        let transport = MemoryTransport::new(Box::new(|_: &SentFrame| None));
        let (reporter, log) = Reporter::recording();
        let session = Session::new(
            identity,
            AppArgs {
                operator,
                ..AppArgs::default()
            },
            MinerConfig::default(),
            Channel::new(
                Box::new(transport),
                Box::new(SealedCipher::new(keys, SecurityLevel::XChaCha20Sha3)),
            ),
            Box::new(StaticResolver(Endpoint::new("local", 1))),
            Box::new(Sha3Engine::new(1)),
            reporter,
        );
        (session, log)
    }

    #[test]
    fn test_exit_step_tears_down_once() {
        let (session, log) = session(Some(Address::ZERO));
        let mut engine = Engine::new(&SHORT, session);

        assert_eq!(engine.tick(), TickStatus::Running);
        assert_eq!(engine.current(), Some(Step::Exit));
        assert_eq!(engine.tick(), TickStatus::Finished);
        assert!(matches!(engine.outcome(), Some(Outcome::Completed)));
        assert_eq!(engine.tick(), TickStatus::Stopped);
        assert_eq!(
            log.borrow().iter().filter(|n| **n == Notice::Exiting).count(),
            1
        );
    }

    #[test]
    fn test_handler_error_aborts_in_same_tick() {
        let (session, log) = session(None);
        let mut engine = Engine::new(&SHORT, session);

        assert_eq!(engine.tick(), TickStatus::Finished);
        match engine.outcome() {
            Some(Outcome::Aborted(SessionError::MissingContext(_))) => {}
            other => panic!("unexpected {other:?}"),
        }
        let log = log.borrow();
        assert_eq!(log.first().map(Notice::code), Some("Err0002"));
        assert_eq!(log.last(), Some(&Notice::Exiting));
    }

    #[test]
    fn test_goto_outside_table_is_unknown_state() {
        let client_keys = KeyPair::generate();
        let client = client_keys.address();
        let server = SealedCipher::new(KeyPair::generate(), SecurityLevel::XChaCha20Sha3);
        let operator = server.address();
        let transport = MemoryTransport::new(Box::new(move |_: &SentFrame| {
            server.encrypt(br#"{"k":20,"N":1024}"#, &client).ok()
        }));
        let (reporter, _log) = Reporter::recording();
        let mut session = Session::new(
            client,
            AppArgs {
                operator: Some(operator),
                ..AppArgs::default()
            },
            MinerConfig::default(),
            Channel::new(
                Box::new(transport),
                Box::new(SealedCipher::new(client_keys, SecurityLevel::XChaCha20Sha3)),
            ),
            Box::new(StaticResolver(Endpoint::new("local", 1))),
            Box::new(Sha3Engine::new(1)),
            reporter,
        );
        session.progress.unit = Some(Unit::new(operator, client, 0, 0, [0u8; 32]));
        let mut engine = Engine::new(&BROKEN, session);

        for _ in 0..8 {
            if engine.tick() != TickStatus::Running {
                break;
            }
        }
        // An invalid unit retargets to RequestZeroes, which this table lacks.
        assert!(matches!(
            engine.outcome(),
            Some(Outcome::Aborted(SessionError::UnknownState { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_ticks_until_exit() {
        let (session, log) = session(Some(Address::ZERO));
        let outcome = Engine::new(&SHORT, session).run().await;
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(log.borrow().last(), Some(&Notice::Exiting));
    }

    #[tokio::test]
    async fn test_run_after_abort_keeps_abort() {
        let (session, log) = session(None);
        let mut engine = Engine::new(&SHORT, session);
        assert_eq!(engine.tick(), TickStatus::Finished);

        let outcome = engine.run().await;
        assert!(matches!(
            outcome,
            Outcome::Aborted(SessionError::MissingContext(_))
        ));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(
            log.borrow().iter().filter(|n| **n == Notice::Exiting).count(),
            1
        );
    }
}
