//! Command workflows as step tables.
//!
//! Each command is a static list of [`Step`]s interpreted by the one
//! [`Engine`]. Steps advance in table order unless a handler jumps, so the
//! tables below read as the protocol for each command.

mod engine;
mod steps;

pub use engine::{Engine, Outcome, TickStatus, Transition};

use std::fmt;
use std::str::FromStr;

/// A command that runs a workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Mine a new unit and register it
    Mine,
    /// Score an existing unit
    Validate,
    /// Release a unit to no owner
    TradeOwnerless,
    /// Hand a unit to a new owner
    TradeCurrentOwner,
    /// Claim a unit handed over by its previous owner
    TradeNewOwner,
    /// Register an existing unit
    Register,
}

impl Command {
    /// Every workflow command
    pub const ALL: [Self; 6] = [
        Self::Mine,
        Self::Validate,
        Self::TradeOwnerless,
        Self::TradeCurrentOwner,
        Self::TradeNewOwner,
        Self::Register,
    ];

    /// Command-line name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mine => "mine",
            Self::Validate => "validate",
            Self::TradeOwnerless => "trade-ownerless",
            Self::TradeCurrentOwner => "trade-current",
            Self::TradeNewOwner => "trade-new",
            Self::Register => "register",
        }
    }

    /// Step table for this command
    #[must_use]
    pub fn workflow(self) -> &'static Workflow {
        match self {
            Self::Mine => &MINE,
            Self::Validate => &VALIDATE,
            Self::TradeOwnerless => &TRADE_OWNERLESS,
            Self::TradeCurrentOwner => &TRADE_CURRENT_OWNER,
            Self::TradeNewOwner => &TRADE_NEW_OWNER,
            Self::Register => &REGISTER,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown command: {s}"))
    }
}

/// Where the unit of a run comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Mined during the run; operator from the command line
    NewUnit,
    /// Unit file, printed before use
    DisplayedUnit,
    /// Unit file
    StoredUnit,
    /// Sealed bundle, or a plain unit file if it is not one
    TransferredUnit,
}

/// What to do when the unit scores invalid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnInvalid {
    /// Ask for a new difficulty target and search again
    Retarget,
    /// Report the value and carry on
    Report,
    /// End the run
    Exit,
}

/// What a persist step writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Persist {
    /// Freshly mined unit at the output path
    MinedUnit,
    /// Unit sealed to the new owner at the output path
    SealedBundle,
    /// Claimed unit next to the input file
    ReceivedUnit,
}

/// Which claim a submit step sends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// `SET Prototype`
    Prototype,
    /// `SET CurrentReleaseOwnerless`
    ReleaseOwnerless,
    /// `SET CurrentOwnerClaim`
    CurrentOwner,
    /// `SET NewOwnerClaim`
    NewOwner,
}

/// One entry in a workflow table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Load inputs and fix the operator address
    Prepare(Source),
    /// Resolve the operator and start connecting
    Connect,
    /// Wait for the connection
    AwaitConnection,
    /// Certificate handshake
    ExchangeCertificates,
    /// `GET Zeroes`
    RequestZeroes,
    /// `GET Validation`, then search
    CalculateUnit,
    /// `GET Validation`, then score
    RequestValidation(OnInvalid),
    /// Write an artifact
    Persist(Persist),
    /// Send a claim and report the reply
    Submit(Claim),
    /// Report the unit's content hash
    HashOfUnit,
    /// Shared teardown
    Exit,
}

/// Coarse step categories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    /// Input loading and connection setup
    Prepare,
    /// Certificate handshake
    CertificateNegotiate,
    /// Request/response with the operator
    RequestExchange,
    /// Local computation
    Compute,
    /// Filesystem output
    Persist,
    /// End of the run
    Terminal,
}

impl Step {
    /// Category of the step
    #[must_use]
    pub fn kind(self) -> StepKind {
        match self {
            Self::Prepare(_) | Self::Connect | Self::AwaitConnection => StepKind::Prepare,
            Self::ExchangeCertificates => StepKind::CertificateNegotiate,
            Self::RequestZeroes
            | Self::CalculateUnit
            | Self::RequestValidation(_)
            | Self::Submit(_) => StepKind::RequestExchange,
            Self::HashOfUnit => StepKind::Compute,
            Self::Persist(_) => StepKind::Persist,
            Self::Exit => StepKind::Terminal,
        }
    }
}

/// A named step table
#[derive(Debug)]
pub struct Workflow {
    /// Name used in logs
    pub name: &'static str,
    /// Steps in execution order; the last one is [`Step::Exit`]
    pub steps: &'static [Step],
}

impl Workflow {
    /// Position of `step` in the table
    #[must_use]
    pub fn position(&self, step: Step) -> Option<usize> {
        self.steps.iter().position(|s| *s == step)
    }
}

/// Mine: search, score, persist, register
pub static MINE: Workflow = Workflow {
    name: "mine",
    steps: &[
        Step::Prepare(Source::NewUnit),
        Step::Connect,
        Step::AwaitConnection,
        Step::ExchangeCertificates,
        Step::RequestZeroes,
        Step::CalculateUnit,
        Step::RequestValidation(OnInvalid::Retarget),
        Step::Persist(Persist::MinedUnit),
        Step::Submit(Claim::Prototype),
        Step::HashOfUnit,
        Step::Exit,
    ],
};

/// Validate: print and score a stored unit
pub static VALIDATE: Workflow = Workflow {
    name: "validate",
    steps: &[
        Step::Prepare(Source::DisplayedUnit),
        Step::Connect,
        Step::AwaitConnection,
        Step::ExchangeCertificates,
        Step::RequestValidation(OnInvalid::Report),
        Step::HashOfUnit,
        Step::Exit,
    ],
};

/// Release a unit to no owner
pub static TRADE_OWNERLESS: Workflow = Workflow {
    name: "trade-ownerless",
    steps: &[
        Step::Prepare(Source::StoredUnit),
        Step::Connect,
        Step::AwaitConnection,
        Step::ExchangeCertificates,
        Step::Submit(Claim::ReleaseOwnerless),
        Step::Exit,
    ],
};

/// Seal a unit to its new owner and announce the transfer
pub static TRADE_CURRENT_OWNER: Workflow = Workflow {
    name: "trade-current",
    steps: &[
        Step::Prepare(Source::StoredUnit),
        Step::Persist(Persist::SealedBundle),
        Step::Connect,
        Step::AwaitConnection,
        Step::ExchangeCertificates,
        Step::Submit(Claim::CurrentOwner),
        Step::Exit,
    ],
};

/// Claim a transferred unit and keep a plain copy
pub static TRADE_NEW_OWNER: Workflow = Workflow {
    name: "trade-new",
    steps: &[
        Step::Prepare(Source::TransferredUnit),
        Step::Connect,
        Step::AwaitConnection,
        Step::ExchangeCertificates,
        Step::Submit(Claim::NewOwner),
        Step::Persist(Persist::ReceivedUnit),
        Step::Exit,
    ],
};

/// Register a stored unit if it is still valid
pub static REGISTER: Workflow = Workflow {
    name: "register",
    steps: &[
        Step::Prepare(Source::StoredUnit),
        Step::Connect,
        Step::AwaitConnection,
        Step::ExchangeCertificates,
        Step::RequestValidation(OnInvalid::Exit),
        Step::Submit(Claim::Prototype),
        Step::HashOfUnit,
        Step::Exit,
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_ends_in_exit() {
        for command in Command::ALL {
            let workflow = command.workflow();
            assert_eq!(workflow.steps.last(), Some(&Step::Exit), "{}", workflow.name);
            assert_eq!(workflow.name, command.name());
        }
    }

    #[test]
    fn test_handshake_precedes_every_request() {
        for command in Command::ALL {
            let steps = command.workflow().steps;
            let handshake = steps
                .iter()
                .position(|s| s.kind() == StepKind::CertificateNegotiate)
                .unwrap();
            let first_request = steps
                .iter()
                .position(|s| s.kind() == StepKind::RequestExchange)
                .unwrap();
            assert!(handshake < first_request, "{command}");
        }
    }

    #[test]
    fn test_mine_retarget_target_exists() {
        assert!(MINE.position(Step::RequestZeroes).is_some());
    }

    #[test]
    fn test_command_names_roundtrip() {
        for command in Command::ALL {
            assert_eq!(command.name().parse::<Command>().unwrap(), command);
        }
        assert!("mine-harder".parse::<Command>().is_err());
    }
}
