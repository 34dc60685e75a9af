//! User-facing notices.
//!
//! Every message the miner prints carries a stable code: `UsInf00xx` for
//! information on stdout, `Err000x` for failures on stderr. Each notice is
//! also emitted as a tracing event so `RUST_LOG` captures the same stream.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::crypto::SecurityLevel;
use crate::net::Endpoint;
use crate::types::{Address, Unit, UnitValue};

/// Reply to every `SET` request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerReply {
    /// Operator status code
    pub status: serde_json::Value,
    /// Unit details as the operator records them
    #[serde(default)]
    pub data: ReplyData,
}

/// Unit details in a [`ServerReply`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// Current owner
    #[serde(rename = "curOwner", default)]
    pub cur_owner: serde_json::Value,
    /// Unit value as the operator scores it
    #[serde(rename = "diceValue", default)]
    pub dice_value: serde_json::Value,
    /// Unit hash
    #[serde(default)]
    pub hash: serde_json::Value,
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Message severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Progress and results
    Info,
    /// Failures
    Error,
}

/// A coded user-facing message
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// Explicit unit value requested
    SpecificValue(f64),
    /// Unit value after scoring
    UnitValue(UnitValue),
    /// Key generation started
    KeyGeneration,
    /// Run finished
    Exiting,
    /// Connected to the operator
    Connected(Endpoint),
    /// Search started
    Searching {
        /// Target zero bits
        zero_bits: u8,
    },
    /// Artifact written
    Saved(PathBuf),
    /// Certificate handshake completed
    SessionEstablished {
        /// Short session identifier
        id: String,
        /// Level in force
        level: SecurityLevel,
    },
    /// Generated private key
    PrivateKey(String),
    /// Generated digital address
    DigitalAddress(Address),
    /// Contents of a unit file
    UnitContents(Unit),
    /// Search duration
    SearchTime(Duration),
    /// Reply to a `SET` request
    ServerReply(ServerReply),
    /// Content hash of the unit
    UnitHash(String),
    /// Handshake moved to a weaker level
    Downgraded {
        /// Level that failed
        from: SecurityLevel,
        /// Level tried next
        to: SecurityLevel,
    },
    /// Input was not a sealed bundle; read as a plain unit
    PlainUnitFallback(String),
    /// Connection lost or refused
    ConnectionFailed(String),
    /// Unclassified fatal error
    Failure(String),
    /// Command could not be started
    CommandFailed(String),
    /// Reply could not be decrypted
    DecryptFailed(String),
    /// Certificate rejected or handshake failed
    CertificateFailed(String),
    /// Connection could not be created
    ConnectionSetupFailed(String),
}

impl Notice {
    /// Stable message code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SpecificValue(_) => "UsInf0051",
            Self::UnitValue(_) => "UsInf0052",
            Self::KeyGeneration => "UsInf0053",
            Self::Exiting => "UsInf0054",
            Self::Connected(_) => "UsInf0055",
            Self::Searching { .. } => "UsInf0056",
            Self::Saved(_) => "UsInf0057",
            Self::SessionEstablished { .. } => "UsInf0058",
            Self::PrivateKey(_) => "UsInf0059",
            Self::DigitalAddress(_) => "UsInf0060",
            Self::UnitContents(_) => "UsInf0061",
            Self::SearchTime(_) => "UsInf0065",
            Self::ServerReply(_) => "UsInf0067",
            Self::UnitHash(_) => "UsInf0071",
            Self::Downgraded { .. } => "UsInf0073",
            Self::PlainUnitFallback(_) => "UsInf0074",
            Self::ConnectionFailed(_) => "Err0001",
            Self::Failure(_) => "Err0002",
            Self::CommandFailed(_) => "Err0005",
            Self::DecryptFailed(_) => "Err0006",
            Self::CertificateFailed(_) => "Err0007",
            Self::ConnectionSetupFailed(_) => "Err0008",
        }
    }

    /// Severity of the notice
    #[must_use]
    pub fn severity(&self) -> Severity {
        if self.code().starts_with("Err") {
            Severity::Error
        } else {
            Severity::Info
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpecificValue(v) => write!(f, "Requested unit value: {v}"),
            Self::UnitValue(v) => write!(f, "Unit value: {v}"),
            Self::KeyGeneration => write!(f, "Generating key pair"),
            Self::Exiting => write!(f, "Exiting"),
            Self::Connected(endpoint) => write!(f, "Connected to operator at {endpoint}"),
            Self::Searching { zero_bits } => {
                write!(f, "Searching for a unit with {zero_bits} leading zero bits")
            }
            Self::Saved(path) => write!(f, "Saved to {}", path.display()),
            Self::SessionEstablished { id, level } => {
                write!(f, "Secure session {id} established ({level})")
            }
            Self::PrivateKey(key) => write!(f, "Private key: {key}"),
            Self::DigitalAddress(addr) => write!(f, "Digital address: {addr}"),
            Self::UnitContents(unit) => {
                writeln!(f, "Unit:")?;
                writeln!(f, "  operator:   {}", unit.operator.to_hex())?;
                writeln!(f, "  miner:      {}", unit.miner.to_hex())?;
                writeln!(f, "  zero bits:  {}", unit.required_zero_bits)?;
                writeln!(f, "  timestamp:  {}", unit.timestamp)?;
                write!(f, "  payload:    {}", hex::encode(unit.payload))
            }
            Self::SearchTime(elapsed) => write!(f, "Search took {} ms", elapsed.as_millis()),
            Self::ServerReply(reply) => {
                writeln!(f, "Operator reply:")?;
                writeln!(f, "  status:     {}", plain(&reply.status))?;
                writeln!(f, "  owner:      {}", plain(&reply.data.cur_owner))?;
                writeln!(f, "  value:      {}", plain(&reply.data.dice_value))?;
                write!(f, "  hash:       {}", plain(&reply.data.hash))
            }
            Self::UnitHash(hash) => write!(f, "Unit hash: {hash}"),
            Self::Downgraded { from, to } => {
                write!(f, "Operator refused {from}, retrying handshake with {to}")
            }
            Self::PlainUnitFallback(reason) => {
                write!(f, "Input is not a sealed bundle ({reason}); reading as a plain unit")
            }
            Self::ConnectionFailed(reason) => write!(f, "Connection failed: {reason}"),
            Self::Failure(reason) => write!(f, "Failed: {reason}"),
            Self::CommandFailed(reason) => write!(f, "Command failed: {reason}"),
            Self::DecryptFailed(reason) => write!(f, "Cannot decrypt operator reply: {reason}"),
            Self::CertificateFailed(reason) => write!(f, "Certificate exchange failed: {reason}"),
            Self::ConnectionSetupFailed(reason) => {
                write!(f, "Cannot create connection: {reason}")
            }
        }
    }
}

/// Notices captured by a recording reporter
pub type NoticeLog = Rc<RefCell<Vec<Notice>>>;

enum Sink {
    Console { interactive: bool },
    Recording(NoticeLog),
}

/// Prints notices, or records them for inspection
pub struct Reporter {
    sink: Sink,
}

impl Reporter {
    /// Reporter writing to stdout and stderr
    #[must_use]
    pub fn console() -> Self {
        Self {
            sink: Sink::Console {
                interactive: console::Term::stdout().is_term(),
            },
        }
    }

    /// Reporter that only records
    #[must_use]
    pub fn recording() -> (Self, NoticeLog) {
        let log = NoticeLog::default();
        (
            Self {
                sink: Sink::Recording(Rc::clone(&log)),
            },
            log,
        )
    }

    /// Emit a notice
    pub fn report(&self, notice: Notice) {
        let code = notice.code();
        match notice.severity() {
            Severity::Info => tracing::info!(code, "{notice}"),
            Severity::Error => tracing::error!(code, "{notice}"),
        }

        match &self.sink {
            Sink::Console { .. } => match notice.severity() {
                Severity::Info => println!("{} {notice}", style(format!("[{code}]")).cyan()),
                Severity::Error => eprintln!(
                    "{} {}",
                    style(format!("[{code}]")).red().bold(),
                    style(notice.to_string()).red()
                ),
            },
            Sink::Recording(log) => log.borrow_mut().push(notice),
        }
    }

    /// Spinner for long synchronous work; hidden unless stdout is a terminal
    #[must_use]
    pub fn spinner(&self, message: impl Into<String>) -> ProgressBar {
        match self.sink {
            Sink::Console { interactive: true } => {
                let pb = ProgressBar::new_spinner();
                if let Ok(spinner_style) =
                    ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")
                {
                    pb.set_style(spinner_style);
                }
                pb.set_message(message.into());
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            }
            _ => ProgressBar::hidden(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_severity() {
        assert_eq!(Notice::Exiting.code(), "UsInf0054");
        assert_eq!(Notice::Exiting.severity(), Severity::Info);
        assert_eq!(Notice::DecryptFailed("x".into()).code(), "Err0006");
        assert_eq!(
            Notice::CertificateFailed("x".into()).severity(),
            Severity::Error
        );
    }

    #[test]
    fn test_recording_reporter() {
        let (reporter, log) = Reporter::recording();
        reporter.report(Notice::UnitHash("abcd".into()));
        reporter.report(Notice::Exiting);
        assert_eq!(
            *log.borrow(),
            vec![Notice::UnitHash("abcd".into()), Notice::Exiting]
        );
        assert!(reporter.spinner("searching").is_hidden());
    }

    #[test]
    fn test_server_reply_parsing() {
        let reply: ServerReply = serde_json::from_str(
            r#"{"status":200,"data":{"curOwner":"ab-cd","diceValue":0.25,"hash":"ff"}}"#,
        )
        .unwrap();
        let text = Notice::ServerReply(reply).to_string();
        assert!(text.contains("status:     200"));
        assert!(text.contains("owner:      ab-cd"));
        assert!(text.contains("value:      0.25"));
    }

    #[test]
    fn test_value_display_uses_1024ths() {
        let text = Notice::UnitValue(UnitValue::Valid(0.25)).to_string();
        assert_eq!(text, "Unit value: 256/1024");
    }
}
