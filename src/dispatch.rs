//! Command dispatch.
//!
//! Checks that a command has what it needs, assembles the production
//! session (key file, name table, TCP transport, sealed cipher, SHA3
//! engine) and runs the command's workflow to its outcome. Anything that
//! fails before the workflow starts is a [`DispatchError`].

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{ConfigError, MinerConfig};
use crate::crypto::SealedCipher;
use crate::net::{FileResolver, NameResolver, ResolveError, TcpTransport};
use crate::pow::Sha3Engine;
use crate::session::{AppArgs, Channel, Reporter, Session};
use crate::wallet::{KeyFile, KeyFileError};
use crate::workflow::{Command, Engine, Outcome};

/// Errors raised before a workflow starts
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A required option was not given
    #[error("missing required option {0}")]
    MissingArgument(&'static str),
    /// Input file does not exist
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),
    /// Key file could not be loaded
    #[error("key file: {0}")]
    KeyFile(#[from] KeyFileError),
    /// Operator could not be resolved
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    /// Configuration could not be loaded
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for dispatch
pub type DispatchResult<T> = Result<T, DispatchError>;

fn require<T: Copy>(value: Option<T>, option: &'static str) -> DispatchResult<T> {
    value.ok_or(DispatchError::MissingArgument(option))
}

fn require_path<'a>(path: Option<&'a PathBuf>, option: &'static str) -> DispatchResult<&'a Path> {
    path.map(PathBuf::as_path)
        .ok_or(DispatchError::MissingArgument(option))
}

fn require_input(path: Option<&PathBuf>) -> DispatchResult<()> {
    let path = require_path(path, "--unit")?;
    if path.is_file() {
        Ok(())
    } else {
        Err(DispatchError::MissingInput(path.to_path_buf()))
    }
}

/// Check that `args` carry every option `command` needs
///
/// # Errors
/// Returns the first missing option or input file
pub fn check(command: Command, args: &AppArgs) -> DispatchResult<()> {
    require_path(args.key_file.as_ref(), "--key")?;
    match command {
        Command::Mine => {
            require(args.operator, "--operator")?;
            require_path(args.output.as_ref(), "--out")?;
        }
        Command::Validate | Command::Register | Command::TradeOwnerless | Command::TradeNewOwner => {
            require_input(args.unit_file.as_ref())?;
        }
        Command::TradeCurrentOwner => {
            require_input(args.unit_file.as_ref())?;
            require(args.counterparty, "--new-owner")?;
            require_path(args.output.as_ref(), "--out")?;
        }
    }
    Ok(())
}

/// Assemble the production session for `command`
///
/// # Errors
/// Returns error if arguments are incomplete, the key file or name table
/// cannot be loaded, or a mining operator is unknown
pub fn build_session(
    command: Command,
    args: AppArgs,
    config: MinerConfig,
    reporter: Reporter,
) -> DispatchResult<Session> {
    check(command, &args)?;
    config.validate()?;

    let key_path = require_path(args.key_file.as_ref(), "--key")?;
    let key_file = KeyFile::load(key_path)?;
    let identity = key_file.address();

    let resolver = FileResolver::load(&config.names_file)?;
    if let Some(operator) = args.operator.filter(|_| command == Command::Mine) {
        resolver.resolve(&operator)?;
    }

    let cipher = SealedCipher::new(key_file.into_keypair(), config.security_levels[0]);
    let channel = Channel::new(Box::new(TcpTransport::new()), Box::new(cipher));
    let pow = Sha3Engine::new(config.search_threads);

    info!(
        %command,
        %identity,
        operators = resolver.len(),
        threads = pow.threads(),
        "session ready"
    );
    Ok(Session::new(
        identity,
        args,
        config,
        channel,
        Box::new(resolver),
        Box::new(pow),
        reporter,
    ))
}

/// Run `command` to completion on the current runtime
///
/// # Errors
/// Returns error if the session cannot be assembled; failures after the
/// workflow starts are reported in the [`Outcome`]
pub async fn dispatch(
    command: Command,
    args: AppArgs,
    config: MinerConfig,
) -> DispatchResult<Outcome> {
    let session = build_session(command, args, config, Reporter::console())?;
    Ok(Engine::new(command.workflow(), session).run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::store;
    use crate::types::{Address, Unit, PAYLOAD_SIZE};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        key: PathBuf,
        operator: Address,
        config: MinerConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("miner.key");
        KeyFile::generate().save(&key).unwrap();

        let operator = KeyPair::generate().address();
        let names = dir.path().join("names.toml");
        std::fs::write(
            &names,
            format!(
                "[[node]]\naddress = \"{}\"\nhost = \"127.0.0.1\"\nport = 7300\n",
                operator.to_hex()
            ),
        )
        .unwrap();

        let config = MinerConfig {
            names_file: names,
            search_threads: 1,
            ..MinerConfig::default()
        };
        Fixture {
            dir,
            key,
            operator,
            config,
        }
    }

    fn mine_args(f: &Fixture, operator: Address) -> AppArgs {
        AppArgs {
            key_file: Some(f.key.clone()),
            operator: Some(operator),
            output: Some(f.dir.path().join("out")),
            ..AppArgs::default()
        }
    }

    #[test]
    fn test_check_reports_missing_options() {
        let args = AppArgs::default();
        assert!(matches!(
            check(Command::Mine, &args),
            Err(DispatchError::MissingArgument("--key"))
        ));

        let args = AppArgs {
            key_file: Some(PathBuf::from("k.key")),
            ..AppArgs::default()
        };
        assert!(matches!(
            check(Command::Mine, &args),
            Err(DispatchError::MissingArgument("--operator"))
        ));
        assert!(matches!(
            check(Command::Validate, &args),
            Err(DispatchError::MissingArgument("--unit"))
        ));
    }

    #[test]
    fn test_check_requires_existing_input() {
        let f = fixture();
        let args = AppArgs {
            key_file: Some(f.key.clone()),
            unit_file: Some(f.dir.path().join("absent.dice")),
            ..AppArgs::default()
        };
        assert!(matches!(
            check(Command::Register, &args),
            Err(DispatchError::MissingInput(_))
        ));
    }

    #[test]
    fn test_trade_current_needs_new_owner() {
        let f = fixture();
        let unit = Unit::new(f.operator, Address::ZERO, 10, 1, [0u8; PAYLOAD_SIZE]);
        let path = store::save_unit(&f.dir.path().join("held"), ".dice", &unit).unwrap();
        let args = AppArgs {
            key_file: Some(f.key.clone()),
            unit_file: Some(path),
            output: Some(f.dir.path().join("bundle")),
            ..AppArgs::default()
        };
        assert!(matches!(
            check(Command::TradeCurrentOwner, &args),
            Err(DispatchError::MissingArgument("--new-owner"))
        ));
    }

    #[test]
    fn test_build_session_for_known_operator() {
        let f = fixture();
        let args = mine_args(&f, f.operator);
        let (reporter, _log) = Reporter::recording();
        let session =
            build_session(Command::Mine, args, f.config.clone(), reporter).unwrap();
        assert_eq!(
            session.identity,
            KeyFile::load(&f.key).unwrap().address()
        );
        assert!(session.progress.operator.is_none());
    }

    #[test]
    fn test_unknown_mining_operator_fails_before_start() {
        let f = fixture();
        let args = mine_args(&f, KeyPair::generate().address());
        let (reporter, log) = Reporter::recording();
        let err = build_session(Command::Mine, args, f.config.clone(), reporter)
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Resolve(ResolveError::Unknown(_))));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_bad_key_file_fails() {
        let f = fixture();
        std::fs::write(&f.key, "not json").unwrap();
        let args = mine_args(&f, f.operator);
        let (reporter, _log) = Reporter::recording();
        assert!(matches!(
            build_session(Command::Mine, args, f.config.clone(), reporter),
            Err(DispatchError::KeyFile(_))
        ));
    }
}
